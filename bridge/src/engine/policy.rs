// Live operator policy. The blob lives in the operator account's
// on-chain metadata as loose JSON; it is validated into this typed
// record at the boundary and the engine only ever consumes the typed
// form. Reads are cached briefly so every conversion sees near-live
// values without hammering the node.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use v4vapp_common::config::MILLI_PER_COIN;

use crate::hive::client::HiveClient;

const POLICY_METADATA_KEY: &str = "v4vapp";
const POLICY_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy field {field} is invalid: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub hours: u32,
    pub sats: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicFeesRef {
    pub account: String,
    pub permlink: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    // Flat fee withheld when returning a failed deposit, in milli-HIVE
    pub hive_return_fee_milli: u64,
    pub conv_fee_percent: f64,
    pub conv_fee_sats: u64,
    pub streaming_fee_percent: f64,
    pub min_invoice_sats: u64,
    pub max_invoice_sats: u64,
    pub max_ln_routing_fee_msats: u64,
    pub gateway_hive_to_ln: bool,
    pub gateway_ln_to_hive: bool,
    pub rate_limits: Vec<RateLimit>,
    pub dynamic_fees: Option<DynamicFeesRef>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            hive_return_fee_milli: 200,
            conv_fee_percent: 0.5,
            conv_fee_sats: 100,
            streaming_fee_percent: 1.0,
            min_invoice_sats: 100,
            max_invoice_sats: 250_000,
            max_ln_routing_fee_msats: 50_000,
            gateway_hive_to_ln: true,
            gateway_ln_to_hive: true,
            rate_limits: vec![RateLimit {
                hours: 24,
                sats: 500_000,
            }],
            dynamic_fees: None,
        }
    }
}

impl Policy {
    // Validate a loose blob, falling back to current values for keys
    // the operator did not set
    pub fn from_blob(blob: &Value, base: &Policy) -> Result<Self, PolicyError> {
        let mut policy = base.clone();

        if let Some(value) = blob.get("hive_return_fee") {
            let hive = value.as_f64().ok_or_else(|| PolicyError::InvalidField {
                field: "hive_return_fee",
                reason: format!("expected number, got {}", value),
            })?;
            if !(0.0..1000.0).contains(&hive) {
                return Err(PolicyError::InvalidField {
                    field: "hive_return_fee",
                    reason: format!("{} out of range", hive),
                });
            }
            policy.hive_return_fee_milli = (hive * MILLI_PER_COIN as f64).round() as u64;
        }
        if let Some(value) = blob.get("conv_fee_percent") {
            let percent = value.as_f64().ok_or_else(|| PolicyError::InvalidField {
                field: "conv_fee_percent",
                reason: format!("expected number, got {}", value),
            })?;
            if !(0.0..=100.0).contains(&percent) {
                return Err(PolicyError::InvalidField {
                    field: "conv_fee_percent",
                    reason: format!("{} out of range", percent),
                });
            }
            policy.conv_fee_percent = percent;
        }
        if let Some(value) = blob.get("conv_fee_sats") {
            policy.conv_fee_sats = value.as_u64().ok_or_else(|| PolicyError::InvalidField {
                field: "conv_fee_sats",
                reason: format!("expected integer, got {}", value),
            })?;
        }
        if let Some(value) = blob.get("streaming_fee_percent") {
            policy.streaming_fee_percent =
                value.as_f64().ok_or_else(|| PolicyError::InvalidField {
                    field: "streaming_fee_percent",
                    reason: format!("expected number, got {}", value),
                })?;
        }
        if let Some(value) = blob.get("min_invoice_sats") {
            policy.min_invoice_sats = value.as_u64().ok_or_else(|| PolicyError::InvalidField {
                field: "min_invoice_sats",
                reason: format!("expected integer, got {}", value),
            })?;
        }
        if let Some(value) = blob.get("max_invoice_sats") {
            policy.max_invoice_sats = value.as_u64().ok_or_else(|| PolicyError::InvalidField {
                field: "max_invoice_sats",
                reason: format!("expected integer, got {}", value),
            })?;
        }
        if policy.min_invoice_sats > policy.max_invoice_sats {
            return Err(PolicyError::InvalidField {
                field: "min_invoice_sats",
                reason: format!(
                    "minimum {} exceeds maximum {}",
                    policy.min_invoice_sats, policy.max_invoice_sats
                ),
            });
        }
        if let Some(value) = blob.get("max_ln_routing_fee_msats") {
            policy.max_ln_routing_fee_msats =
                value.as_u64().ok_or_else(|| PolicyError::InvalidField {
                    field: "max_ln_routing_fee_msats",
                    reason: format!("expected integer, got {}", value),
                })?;
        }
        if let Some(value) = blob.get("gateway_hive_to_ln") {
            policy.gateway_hive_to_ln =
                value.as_bool().ok_or_else(|| PolicyError::InvalidField {
                    field: "gateway_hive_to_ln",
                    reason: format!("expected bool, got {}", value),
                })?;
        }
        if let Some(value) = blob.get("gateway_ln_to_hive") {
            policy.gateway_ln_to_hive =
                value.as_bool().ok_or_else(|| PolicyError::InvalidField {
                    field: "gateway_ln_to_hive",
                    reason: format!("expected bool, got {}", value),
                })?;
        }
        if let Some(value) = blob.get("rate_limits") {
            policy.rate_limits = serde_json::from_value(value.clone()).map_err(|e| {
                PolicyError::InvalidField {
                    field: "rate_limits",
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(value) = blob.get("dynamic_fees") {
            policy.dynamic_fees = if value.is_null() {
                None
            } else {
                Some(serde_json::from_value(value.clone()).map_err(|e| {
                    PolicyError::InvalidField {
                        field: "dynamic_fees",
                        reason: e.to_string(),
                    }
                })?)
            };
        }
        Ok(policy)
    }
}

pub struct PolicyStore {
    client: Arc<HiveClient>,
    operator_account: String,
    cache: StdMutex<(Policy, Option<Instant>)>,
}

impl PolicyStore {
    pub fn new(client: Arc<HiveClient>, operator_account: String) -> Arc<Self> {
        Arc::new(Self {
            client,
            operator_account,
            cache: StdMutex::new((Policy::default(), None)),
        })
    }

    // Current policy; refreshed from the chain when the short cache
    // lapses, with the last good policy surviving node hiccups
    pub async fn current(&self) -> Policy {
        {
            let cache = self.cache.lock().unwrap();
            if let (policy, Some(fetched_at)) = &*cache {
                if fetched_at.elapsed() < POLICY_CACHE_TTL {
                    return policy.clone();
                }
            }
        }

        let base = self.cache.lock().unwrap().0.clone();
        let refreshed = match self.fetch_blob().await {
            Some(blob) => match Policy::from_blob(&blob, &base) {
                Ok(policy) => policy,
                Err(e) => {
                    warn!("Rejecting invalid policy blob: {}", e);
                    base
                }
            },
            None => base,
        };

        *self.cache.lock().unwrap() = (refreshed.clone(), Some(Instant::now()));
        refreshed
    }

    async fn fetch_blob(&self) -> Option<Value> {
        let account = match self.client.find_account(&self.operator_account).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!("Operator account {} not found", self.operator_account);
                return None;
            }
            Err(e) => {
                debug!("Policy fetch failed: {}", e);
                return None;
            }
        };
        let metadata: Value = serde_json::from_str(&account.json_metadata).ok()?;
        metadata.get(POLICY_METADATA_KEY).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blob_overrides_merge_onto_base() {
        let blob = json!({
            "conv_fee_percent": 0.5,
            "conv_fee_sats": 100,
            "min_invoice_sats": 1000,
            "max_invoice_sats": 100000,
            "gateway_hive_to_ln": false,
            "rate_limits": [{"hours": 1, "sats": 50000}, {"hours": 24, "sats": 400000}],
        });
        let policy = Policy::from_blob(&blob, &Policy::default()).unwrap();
        assert_eq!(policy.conv_fee_sats, 100);
        assert_eq!(policy.min_invoice_sats, 1000);
        assert!(!policy.gateway_hive_to_ln);
        // untouched keys keep their base values
        assert!(policy.gateway_ln_to_hive);
        assert_eq!(policy.rate_limits.len(), 2);
        assert_eq!(policy.rate_limits[0].sats, 50_000);
    }

    #[test]
    fn fractional_return_fee_lands_in_milli() {
        let blob = json!({ "hive_return_fee": 0.2 });
        let policy = Policy::from_blob(&blob, &Policy::default()).unwrap();
        assert_eq!(policy.hive_return_fee_milli, 200);
    }

    #[test]
    fn invalid_blobs_are_rejected() {
        let base = Policy::default();
        assert!(Policy::from_blob(&json!({"conv_fee_percent": "high"}), &base).is_err());
        assert!(Policy::from_blob(&json!({"conv_fee_percent": 150.0}), &base).is_err());
        assert!(Policy::from_blob(
            &json!({"min_invoice_sats": 1000, "max_invoice_sats": 10}),
            &base
        )
        .is_err());
        assert!(Policy::from_blob(&json!({"gateway_hive_to_ln": "yes"}), &base).is_err());
    }

    #[test]
    fn dynamic_fees_reference_parses() {
        let blob = json!({
            "dynamic_fees": {"account": "v4vapp", "permlink": "fee-overrides"}
        });
        let policy = Policy::from_blob(&blob, &Policy::default()).unwrap();
        let dynamic = policy.dynamic_fees.unwrap();
        assert_eq!(dynamic.account, "v4vapp");
        assert_eq!(dynamic.permlink, "fee-overrides");
    }
}
