// Generation-counter balance cache in front of the ledger. Every key
// embeds the generation current at write time; a ledger post bumps the
// counter, orphaning all previously cached balances at O(1) cost. The
// orphans are never scanned or deleted, they TTL out naturally.

use std::hash::Hasher;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use siphasher::sip::SipHasher13;

use v4vapp_common::account::Account;
use v4vapp_common::config::{CACHE_TTL_HISTORICAL_SECS, CACHE_TTL_LIVE_SECS};
use v4vapp_common::time::{truncate_to_minute, TimestampMillis};

use crate::ledger::entry::LedgerEntry;
use crate::ledger::{Ledger, LedgerAccountDetails, LedgerHook};
use crate::storage::StorageError;

const GENERATION_KEY: &str = "ledger:__generation__";

pub struct BalanceCache {
    ledger: Arc<Ledger>,
    // None when the cache store is disabled; per-call failures fall
    // back to direct ledger queries (warnings, never errors)
    redis: Option<ConnectionManager>,
}

// Hash of the query coordinates; the generation is kept out of the
// hash so keys are trivially unreachable after a bump
pub fn balance_key(
    generation: u64,
    account: &Account,
    as_of_minute: Option<TimestampMillis>,
    age_secs: Option<u64>,
) -> String {
    let mut hasher = SipHasher13::new();
    hasher.write(account.qualified_name().as_bytes());
    hasher.write_u64(as_of_minute.unwrap_or(0));
    hasher.write_u64(age_secs.unwrap_or(0));
    format!("ledger:bal:v{}:{:016x}", generation, hasher.finish())
}

impl BalanceCache {
    pub async fn connect(ledger: Arc<Ledger>, redis_url: Option<&str>) -> Self {
        let redis = match redis_url {
            Some(url) => match Self::try_connect(url).await {
                Ok(manager) => Some(manager),
                Err(e) => {
                    warn!("Balance cache store unreachable, falling back to direct queries: {}", e);
                    None
                }
            },
            None => None,
        };
        Self { ledger, redis }
    }

    async fn try_connect(url: &str) -> Result<ConnectionManager, redis::RedisError> {
        let client = redis::Client::open(url)?;
        client.get_connection_manager().await
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.redis.is_some()
    }

    async fn current_generation(&self) -> Option<u64> {
        let mut con = self.redis.clone()?;
        match con.get::<_, Option<u64>>(GENERATION_KEY).await {
            Ok(generation) => Some(generation.unwrap_or(0)),
            Err(e) => {
                warn!("Cache generation read failed: {}", e);
                None
            }
        }
    }

    // Read path: current generation -> key -> fetch -> on miss compute
    // from the ledger and store under the current generation.
    // `in_progress_msats` is recomputed freshly even on a hit.
    pub async fn balance(
        &self,
        account: &Account,
        as_of: Option<TimestampMillis>,
        age_secs: Option<u64>,
    ) -> Result<(LedgerAccountDetails, bool), StorageError> {
        let as_of_minute = as_of.map(truncate_to_minute);

        let generation = match self.current_generation().await {
            Some(generation) => generation,
            None => {
                let details = self.ledger.balance_uncached(account, as_of, age_secs)?;
                return Ok((details, false));
            }
        };

        let key = balance_key(generation, account, as_of_minute, age_secs);
        if let Some(mut con) = self.redis.clone() {
            match con.get::<_, Option<String>>(&key).await {
                Ok(Some(cached)) => {
                    if let Ok(mut details) = serde_json::from_str::<LedgerAccountDetails>(&cached) {
                        details.in_progress_msats = self.ledger.in_progress_msats(account)?;
                        debug!("Balance cache hit for {}", account);
                        return Ok((details, true));
                    }
                    warn!("Discarding undecodable cached balance under {}", key);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Cache read failed, using direct ledger query: {}", e);
                    let details = self.ledger.balance_uncached(account, as_of, age_secs)?;
                    return Ok((details, false));
                }
            }
        }

        let details = self.ledger.balance_uncached(account, as_of, age_secs)?;
        let ttl = if as_of.is_none() {
            CACHE_TTL_LIVE_SECS
        } else {
            CACHE_TTL_HISTORICAL_SECS
        };
        if let Some(mut con) = self.redis.clone() {
            if let Ok(payload) = serde_json::to_string(&details) {
                if let Err(e) = con.set_ex::<_, _, ()>(&key, payload, ttl).await {
                    warn!("Cache write failed: {}", e);
                }
            }
        }
        Ok((details, false))
    }
}

#[async_trait]
impl LedgerHook for BalanceCache {
    // Any ledger write orphans every cached balance by bumping the
    // generation atomically in the cache store
    async fn on_entry_posted(&self, _entry: &LedgerEntry) {
        if let Some(mut con) = self.redis.clone() {
            if let Err(e) = con.incr::<_, _, u64>(GENERATION_KEY, 1).await {
                warn!("Cache generation bump failed: {}", e);
            }
        }
    }
}
