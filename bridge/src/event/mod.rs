// Event envelope and id layer. Every event crossing the ingestion
// boundary is normalized into a TrackedOp identified by a stable group
// id; all downstream effects of one user intent share that id.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use thiserror::Error;

use v4vapp_common::currency::Unit;
use v4vapp_common::time::{get_current_time_in_millis, TimestampMillis};

pub const GROUP_ID_LEN: usize = 32;
pub const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Invalid state transition {from} -> {to}")]
    InvalidTransition { from: OpState, to: OpState },
}

// Allocate a fresh group id for an operation originated by a watcher.
// 32 lowercase hex chars, embedded into any outgoing memo or custom
// message so the reply event can reattach to the same chain.
pub fn new_group_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// Derive a deterministic group id from a source event's natural
// identifier. Replays of the same source event map to the same id.
pub fn derive_group_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(&hasher.finalize()[..GROUP_ID_LEN / 2])
}

pub fn short_id(group_id: &str) -> String {
    group_id.chars().take(SHORT_ID_LEN).collect()
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    HiveTransfer,
    HiveCustomMessage,
    HiveWitnessReward,
    HiveLimitOrder,
    LnInvoice,
    LnPayment,
    LnForward,
}

impl SourceKind {
    // Stable tag used in storage keys
    pub fn tag(&self) -> &'static str {
        match self {
            SourceKind::HiveTransfer => "hive_transfer",
            SourceKind::HiveCustomMessage => "hive_custom_message",
            SourceKind::HiveWitnessReward => "hive_witness_reward",
            SourceKind::HiveLimitOrder => "hive_limit_order",
            SourceKind::LnInvoice => "ln_invoice",
            SourceKind::LnPayment => "ln_payment",
            SourceKind::LnForward => "ln_forward",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
pub enum OpState {
    Ingested,
    Routed,
    Processed,
    Failed,
    Skipped,
}

impl OpState {
    // Transitions are monotonic: Ingested -> Routed -> terminal.
    // A cancelled handler releases Routed back to Ingested for retry.
    pub fn can_transition_to(&self, next: OpState) -> bool {
        match (self, next) {
            (OpState::Ingested, OpState::Routed) => true,
            (OpState::Routed, OpState::Ingested) => true,
            (OpState::Routed, OpState::Processed) => true,
            (OpState::Routed, OpState::Failed) => true,
            (OpState::Routed, OpState::Skipped) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OpState::Processed | OpState::Failed | OpState::Skipped)
    }
}

// Normalized payloads per source kind. Opaque to the envelope layer;
// only the router and the conversion engine look inside.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpPayload {
    HiveTransfer {
        from: String,
        to: String,
        amount_milli: u64,
        unit: Unit,
        memo: String,
        block_num: u64,
        trx_id: String,
        op_index: u32,
    },
    HiveCustomMessage {
        message_id: String,
        // First required posting auth, i.e. the on-chain signing authority
        required_auth: String,
        json: serde_json::Value,
        block_num: u64,
        trx_id: String,
        op_index: u32,
    },
    HiveWitnessReward {
        witness: String,
        // Raw vesting shares in 1e-6 VESTS, as paid by the chain
        vests: u64,
        block_num: u64,
    },
    HiveLimitOrder {
        owner: String,
        order_id: u32,
        sold_milli: u64,
        sold_unit: Unit,
        received_milli: u64,
        received_unit: Unit,
        block_num: u64,
        trx_id: String,
    },
    LnInvoice {
        payment_hash: String,
        memo: String,
        value_msats: u64,
        amt_paid_msats: u64,
        state: String,
        add_index: u64,
        settle_index: u64,
        payment_request: String,
    },
    LnPayment {
        payment_hash: String,
        value_msats: u64,
        fee_msats: u64,
        status: String,
        payment_index: u64,
        failure_reason: String,
    },
    LnForward {
        incoming_channel_id: u64,
        outgoing_channel_id: u64,
        incoming_amt_msats: u64,
        outgoing_amt_msats: u64,
        timestamp_ns: u64,
        settled: bool,
    },
}

// The normalized envelope for any event entering the system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedOp {
    pub group_id: String,
    pub short_id: String,
    pub source_kind: SourceKind,
    pub source_timestamp: TimestampMillis,
    pub ingested_timestamp: TimestampMillis,
    pub state: OpState,
    pub payload: OpPayload,
    pub parent_group_id: Option<String>,
    // Duration in millis, set when the op reaches Processed
    pub process_time: Option<u64>,
    pub last_error: Option<String>,
    pub skip_reason: Option<String>,
}

impl TrackedOp {
    pub fn new(
        group_id: String,
        source_kind: SourceKind,
        source_timestamp: TimestampMillis,
        payload: OpPayload,
    ) -> Self {
        let short = short_id(&group_id);
        Self {
            group_id,
            short_id: short,
            source_kind,
            source_timestamp,
            ingested_timestamp: get_current_time_in_millis(),
            state: OpState::Ingested,
            payload,
            parent_group_id: None,
            process_time: None,
            last_error: None,
            skip_reason: None,
        }
    }

    pub fn with_parent(mut self, parent_group_id: String) -> Self {
        self.parent_group_id = Some(parent_group_id);
        self
    }

    fn transition(&mut self, next: OpState) -> Result<(), EventError> {
        if !self.state.can_transition_to(next) {
            return Err(EventError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn mark_routed(&mut self) -> Result<(), EventError> {
        self.transition(OpState::Routed)
    }

    // Release a Routed row back to Ingested after a cancelled handler
    pub fn release(&mut self) -> Result<(), EventError> {
        self.transition(OpState::Ingested)
    }

    pub fn mark_processed(&mut self, process_time_millis: u64) -> Result<(), EventError> {
        self.transition(OpState::Processed)?;
        self.process_time = Some(process_time_millis);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), EventError> {
        self.transition(OpState::Failed)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) -> Result<(), EventError> {
        self.transition(OpState::Skipped)?;
        self.skip_reason = Some(reason.into());
        Ok(())
    }

    // Journal key: group id is unique per source kind
    pub fn journal_key(&self) -> String {
        journal_key(&self.group_id, self.source_kind)
    }
}

pub fn journal_key(group_id: &str, kind: SourceKind) -> String {
    format!("{}:{}", group_id, kind.tag())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_payload() -> OpPayload {
        OpPayload::HiveTransfer {
            from: "alice".into(),
            to: "server".into(),
            amount_milli: 25_000,
            unit: Unit::Hive,
            memo: String::new(),
            block_num: 1,
            trx_id: "abcd".into(),
            op_index: 0,
        }
    }

    #[test]
    fn derived_ids_are_stable_and_distinct() {
        let a = derive_group_id(&["93000000", "abcd", "0"]);
        let b = derive_group_id(&["93000000", "abcd", "0"]);
        let c = derive_group_id(&["93000000", "abcd", "1"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), GROUP_ID_LEN);
    }

    #[test]
    fn random_ids_have_the_same_shape() {
        let id = new_group_id();
        assert_eq!(id.len(), GROUP_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(short_id(&id).len(), SHORT_ID_LEN);
    }

    #[test]
    fn state_machine_is_monotonic() {
        let mut op = TrackedOp::new(new_group_id(), SourceKind::HiveTransfer, 0, transfer_payload());
        assert!(op.mark_processed(1).is_err());
        op.mark_routed().unwrap();
        op.mark_processed(12).unwrap();
        assert_eq!(op.state, OpState::Processed);
        assert_eq!(op.process_time, Some(12));
        // terminal states never move again
        assert!(op.mark_routed().is_err());
        assert!(op.mark_failed("nope").is_err());
    }

    #[test]
    fn routed_rows_can_be_released() {
        let mut op = TrackedOp::new(new_group_id(), SourceKind::HiveTransfer, 0, transfer_payload());
        op.mark_routed().unwrap();
        op.release().unwrap();
        assert_eq!(op.state, OpState::Ingested);
    }

    #[test]
    fn skip_records_the_reason() {
        let mut op = TrackedOp::new(new_group_id(), SourceKind::HiveTransfer, 0, transfer_payload());
        op.mark_routed().unwrap();
        op.mark_skipped("Insufficient Keepsats balance").unwrap();
        assert_eq!(op.skip_reason.as_deref(), Some("Insufficient Keepsats balance"));
    }
}
