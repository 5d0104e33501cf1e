use clap::Parser;
use serde::{Deserialize, Serialize};

use v4vapp_common::config::VERSION;

// Functions Helpers
fn default_hive_api_urls() -> Vec<String> {
    vec![
        String::from("https://api.hive.blog"),
        String::from("https://api.deathwing.me"),
    ]
}

fn default_log_filename() -> String {
    String::from("v4vapp-bridge.log")
}

fn default_logs_path() -> String {
    String::from("logs/")
}

fn default_data_dir() -> String {
    String::from("data/bridge")
}

fn default_chain_id() -> String {
    String::from(crate::hive::broadcast::CHAIN_ID_MAINNET)
}

fn default_admin_bind() -> String {
    String::from("127.0.0.1:8281")
}

fn default_exchange_url() -> String {
    String::from("https://api.binance.com")
}

fn default_quote_asset() -> String {
    String::from("BTC")
}

fn default_log_level() -> String {
    String::from("info")
}

#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
pub struct LogConfig {
    /// Set log level (off, error, warn, info, debug, trace)
    #[clap(long, default_value_t = default_log_level())]
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Disable the log file
    #[clap(long)]
    #[serde(default)]
    pub disable_file_logging: bool,
    /// Log filename
    ///
    /// File will be stored in the logs directory; the file is rotated
    /// daily as YYYY-MM-DD.v4vapp-bridge.log.
    #[clap(long, default_value_t = default_log_filename())]
    #[serde(default = "default_log_filename")]
    pub filename_log: String,
    /// Logs directory, must end with a /
    #[clap(long, default_value_t = default_logs_path())]
    #[serde(default = "default_logs_path")]
    pub logs_path: String,
    /// Disable the usage of colors in log
    #[clap(long)]
    #[serde(default)]
    pub disable_log_color: bool,
}

#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
pub struct HiveConfig {
    /// Hive API nodes, tried in order
    #[clap(long, num_args = 1.., default_values_t = default_hive_api_urls())]
    #[serde(default = "default_hive_api_urls")]
    pub hive_api_urls: Vec<String>,
    /// The account receiving deposits and sending value on chain
    #[clap(long, default_value = "v4vapp")]
    pub server_account: String,
    /// Operator account allowed to use the balance-adjustment memo
    #[clap(long, default_value = "v4v-app")]
    pub operator_account: String,
    /// Hex-encoded active key for the server account
    #[clap(long)]
    pub active_key_hex: Option<String>,
    /// Witness account whose rewards are tracked
    #[clap(long)]
    pub watched_witness: Option<String>,
    /// Extra accounts to watch besides the server account
    #[clap(long, num_args = 0..)]
    #[serde(default)]
    pub watch_accounts: Vec<String>,
    /// Chain id used for transaction signing
    #[clap(long, default_value_t = default_chain_id())]
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    /// Blocks behind head to start from when no resume height exists
    #[clap(long, default_value_t = 100)]
    #[serde(default)]
    pub start_height_offset: u64,
}

#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
pub struct LndConfig {
    /// host:port of the node's gRPC endpoint
    #[clap(long, default_value = "127.0.0.1:10009")]
    pub lnd_address: String,
    /// Path to the node's TLS certificate
    #[clap(long, default_value = "lnd/tls.cert")]
    pub lnd_cert_path: String,
    /// Path to an admin macaroon
    #[clap(long, default_value = "lnd/admin.macaroon")]
    pub lnd_macaroon_path: String,
}

#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the document store
    #[clap(long, default_value_t = default_data_dir())]
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Cache store URL; balance caching is disabled when unset
    #[clap(long)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange used for inventory rebalancing
    #[clap(long, default_value = "binance")]
    pub exchange_name: String,
    #[clap(long, default_value_t = default_exchange_url())]
    #[serde(default = "default_exchange_url")]
    pub exchange_api_url: String,
    #[clap(long, default_value = "")]
    #[serde(default)]
    pub exchange_api_key: String,
    /// Use the quote-then-accept convert API instead of market orders
    #[clap(long)]
    #[serde(default)]
    pub use_quote_api: bool,
    /// Quote asset for rebalancing pairs
    #[clap(long, default_value_t = default_quote_asset())]
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Disable the rebalancer entirely
    #[clap(long)]
    #[serde(default)]
    pub disable_rebalancer: bool,
}

#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Telegram bot token; notifications are disabled when unset
    #[clap(long)]
    pub telegram_token: Option<String>,
    /// Telegram chat id receiving notifications
    #[clap(long)]
    pub telegram_chat_id: Option<i64>,
    /// Components whose messages are never forwarded to the bots
    #[clap(long, num_args = 0..)]
    #[serde(default)]
    pub silenced_components: Vec<String>,
}

#[derive(Parser, Serialize, Deserialize, Clone)]
#[clap(
    version = VERSION,
    about = "V4VApp bridge - bidirectional value bridge between Hive and a Lightning node"
)]
pub struct Config {
    /// Log configuration
    #[clap(flatten)]
    pub log: LogConfig,
    /// Hive side configuration
    #[clap(flatten)]
    pub hive: HiveConfig,
    /// Lightning node configuration
    #[clap(flatten)]
    pub lnd: LndConfig,
    /// Storage configuration
    #[clap(flatten)]
    pub storage: StorageConfig,
    /// Exchange configuration
    #[clap(flatten)]
    pub exchange: ExchangeConfig,
    /// Notification configuration
    #[clap(flatten)]
    pub notifications: NotificationConfig,
    /// Admin API bind address
    #[clap(long, default_value_t = default_admin_bind())]
    #[serde(default = "default_admin_bind")]
    pub admin_bind_address: String,
    /// Accounts listed as bad actors
    #[clap(long, num_args = 0..)]
    #[serde(default)]
    pub bad_actors: Vec<String>,
    /// Development mode: dev message prefix, account allow-list,
    /// extended store timeouts and quote cache TTLs
    #[clap(long)]
    #[serde(default)]
    pub dev_mode: bool,
    /// Accounts allowed to use the bridge in development mode
    #[clap(long, num_args = 0..)]
    #[serde(default)]
    pub dev_allowlist: Vec<String>,
    /// JSON File to load the configuration from
    #[clap(long)]
    #[serde(skip)]
    #[serde(default)]
    pub config_file: Option<String>,
    /// Generate the template at the `config_file` path
    #[clap(long)]
    #[serde(skip)]
    #[serde(default)]
    pub generate_config_template: bool,
}

impl Config {
    // Message prefix and tracked custom-json ids depend on dev mode
    pub fn message_prefix(&self) -> &'static str {
        if self.dev_mode {
            v4vapp_common::config::MESSAGE_ID_PREFIX_DEV
        } else {
            v4vapp_common::config::MESSAGE_ID_PREFIX
        }
    }

    pub fn tracked_message_ids(&self) -> Vec<String> {
        let prefix = self.message_prefix();
        vec![
            format!("{}_transfer", prefix),
            format!("{}_notification", prefix),
        ]
    }

    // Price quote TTL, extended in dev mode
    pub fn rate_ttl(&self) -> std::time::Duration {
        if self.dev_mode {
            std::time::Duration::from_secs(600)
        } else {
            std::time::Duration::from_secs(60)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_mode_switches_the_message_prefix() {
        let mut config = Config::parse_from(["v4vapp_bridge"]);
        assert_eq!(config.message_prefix(), "v4vapp");
        assert!(config
            .tracked_message_ids()
            .contains(&"v4vapp_transfer".to_string()));

        config.dev_mode = true;
        assert_eq!(config.message_prefix(), "v4vapp_dev");
        assert!(config
            .tracked_message_ids()
            .contains(&"v4vapp_dev_notification".to_string()));
        assert_eq!(config.rate_ttl().as_secs(), 600);
    }

    #[test]
    fn defaults_parse_without_arguments() {
        let config = Config::parse_from(["v4vapp_bridge"]);
        assert_eq!(config.hive.server_account, "v4vapp");
        assert_eq!(config.hive.hive_api_urls.len(), 2);
        assert!(!config.dev_mode);
        assert!(config.storage.redis_url.is_none());
    }
}
