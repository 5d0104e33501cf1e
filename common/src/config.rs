use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Custom-message id prefixes recognized on chain.
// The watcher's tracked-id list must match the prefix in use.
pub const MESSAGE_ID_PREFIX: &str = "v4vapp";
pub const MESSAGE_ID_PREFIX_DEV: &str = "v4vapp_dev";

// Smallest units: 1 HIVE = 1000 milli-HIVE, 1 sat = 1000 msats
pub const MILLI_PER_COIN: u64 = 1000;
pub const MSATS_PER_SAT: u64 = 1000;
pub const COIN_DECIMALS: u8 = 3;

// Memo marker for the operator balance-adjustment backdoor.
// Matched as a case-sensitive substring.
pub const BALANCE_ADJUSTMENT_MARKER: &str = "Balance adjustment";

// Outbound I/O deadlines
pub const HIVE_RPC_TIMEOUT: Duration = Duration::from_secs(10);
pub const LND_UNARY_TIMEOUT: Duration = Duration::from_secs(30);
pub const LND_LIVENESS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub const STORE_TIMEOUT: Duration = Duration::from_secs(10);
pub const STORE_TIMEOUT_DEV: Duration = Duration::from_secs(600);
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);
pub const LNURL_TIMEOUT: Duration = Duration::from_secs(10);
pub const NOTIFY_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const NOTIFY_READ_TIMEOUT: Duration = Duration::from_secs(30);

// A watcher lagging live head by more than this goes into bulk catch-up
pub const CATCH_UP_THRESHOLD_SECS: u64 = 2 * 3600;

// Balance cache TTLs
pub const CACHE_TTL_LIVE_SECS: u64 = 60;
pub const CACHE_TTL_HISTORICAL_SECS: u64 = 300;

// Error-code re-alert interval when none is configured
pub const DEFAULT_RE_ALERT_INTERVAL_SECS: u64 = 3600;
