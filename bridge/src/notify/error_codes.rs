// Recurring-error deduplication. Each distinct error code alerts once,
// then stays silent for its re-alert interval; a clear event is
// recorded when the condition goes away and history is persisted for
// later inspection.

use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use v4vapp_common::config::DEFAULT_RE_ALERT_INTERVAL_SECS;
use v4vapp_common::time::{get_current_time_in_millis, TimestampMillis};
use v4vapp_common::utils::machine_id;

use crate::storage::BridgeStorage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCode {
    // Includes the machine id suffix so identical errors on different
    // hosts do not suppress each other
    pub code: String,
    pub message: String,
    pub start_time: TimestampMillis,
    pub last_log_time: TimestampMillis,
    pub re_alert_interval_secs: u64,
    pub active: bool,
    pub cleared_at: Option<TimestampMillis>,
    pub machine_id: String,
}

pub struct ErrorCodeFilter {
    storage: Arc<BridgeStorage>,
    machine: String,
}

impl ErrorCodeFilter {
    pub fn new(storage: Arc<BridgeStorage>) -> Self {
        Self {
            storage,
            machine: machine_id(),
        }
    }

    fn qualified(&self, code: &str) -> String {
        format!("{}@{}", code, self.machine)
    }

    // Returns true when the occurrence should be forwarded to the
    // notification transports; repeats inside the re-alert interval
    // are suppressed at this level
    pub fn should_alert(&self, code: &str, message: &str) -> bool {
        let qualified = self.qualified(code);
        let now = get_current_time_in_millis();

        let existing = match self.storage.get_error_code(&qualified) {
            Ok(existing) => existing,
            Err(e) => {
                debug!("Error-code lookup failed for {}: {}", qualified, e);
                return true;
            }
        };

        match existing {
            Some(mut entry) if entry.active => {
                let elapsed_secs = now.saturating_sub(entry.last_log_time) / 1000;
                if elapsed_secs < entry.re_alert_interval_secs {
                    return false;
                }
                entry.last_log_time = now;
                entry.message = message.to_string();
                let _ = self.storage.put_error_code(&entry);
                true
            }
            Some(mut entry) => {
                // reappearing after a clear starts a fresh episode
                entry.active = true;
                entry.start_time = now;
                entry.last_log_time = now;
                entry.cleared_at = None;
                entry.message = message.to_string();
                let _ = self.storage.put_error_code(&entry);
                true
            }
            None => {
                let entry = ErrorCode {
                    code: qualified,
                    message: message.to_string(),
                    start_time: now,
                    last_log_time: now,
                    re_alert_interval_secs: DEFAULT_RE_ALERT_INTERVAL_SECS,
                    active: true,
                    cleared_at: None,
                    machine_id: self.machine.clone(),
                };
                let _ = self.storage.put_error_code(&entry);
                true
            }
        }
    }

    // Record that the condition went away; the history row is kept
    pub fn clear(&self, code: &str) {
        let qualified = self.qualified(code);
        if let Ok(Some(mut entry)) = self.storage.get_error_code(&qualified) {
            if entry.active {
                entry.active = false;
                entry.cleared_at = Some(get_current_time_in_millis());
                let _ = self.storage.put_error_code(&entry);
                info!("Error code {} cleared", qualified);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> (ErrorCodeFilter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(BridgeStorage::open(dir.path().to_str().unwrap()).unwrap());
        (ErrorCodeFilter::new(storage), dir)
    }

    #[test]
    fn repeats_inside_interval_are_suppressed() {
        let (filter, _dir) = filter();
        assert!(filter.should_alert("hive_rpc_down", "node unreachable"));
        assert!(!filter.should_alert("hive_rpc_down", "node unreachable"));
        assert!(!filter.should_alert("hive_rpc_down", "still unreachable"));
        // a different code alerts independently
        assert!(filter.should_alert("redis_down", "cache unreachable"));
    }

    #[test]
    fn clear_then_reappear_alerts_again() {
        let (filter, _dir) = filter();
        assert!(filter.should_alert("hive_rpc_down", "node unreachable"));
        filter.clear("hive_rpc_down");
        assert!(filter.should_alert("hive_rpc_down", "node unreachable again"));
    }
}
