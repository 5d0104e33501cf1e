// Serde models for the subset of the Hive node's block_api /
// database_api / account_history_api surface the bridge consumes.

use serde::{Deserialize, Serialize};

use v4vapp_common::currency::Unit;

// Network asset identifiers (precision 3 for both liquid assets)
pub const NAI_HIVE: &str = "@@000000021";
pub const NAI_HBD: &str = "@@000000013";
pub const NAI_VESTS: &str = "@@000000037";

// Amounts come over the wire already in their smallest unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub amount: String,
    pub precision: u8,
    pub nai: String,
}

impl AssetAmount {
    pub fn new(amount: u64, unit: Unit) -> Self {
        Self {
            amount: amount.to_string(),
            precision: 3,
            nai: match unit {
                Unit::Hbd => NAI_HBD.to_string(),
                _ => NAI_HIVE.to_string(),
            },
        }
    }

    pub fn raw_amount(&self) -> Option<u64> {
        self.amount.parse().ok()
    }

    pub fn unit(&self) -> Option<Unit> {
        match self.nai.as_str() {
            NAI_HIVE => Some(Unit::Hive),
            NAI_HBD => Some(Unit::Hbd),
            _ => None,
        }
    }

    pub fn is_vests(&self) -> bool {
        self.nai == NAI_VESTS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOperation {
    pub from: String,
    pub to: String,
    pub amount: AssetAmount,
    pub memo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomJsonOperation {
    #[serde(default)]
    pub required_auths: Vec<String>,
    #[serde(default)]
    pub required_posting_auths: Vec<String>,
    pub id: String,
    pub json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerRewardOperation {
    pub producer: String,
    pub vesting_shares: AssetAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillOrderOperation {
    pub current_owner: String,
    pub current_orderid: u32,
    pub current_pays: AssetAmount,
    pub open_owner: String,
    pub open_orderid: u32,
    pub open_pays: AssetAmount,
}

// Operations in the node's typed (block_api) form. Anything the bridge
// does not track deserializes into Unknown and is dropped by the filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Operation {
    #[serde(rename = "transfer_operation")]
    Transfer(TransferOperation),
    #[serde(rename = "custom_json_operation")]
    CustomJson(CustomJsonOperation),
    #[serde(rename = "producer_reward_operation")]
    ProducerReward(ProducerRewardOperation),
    #[serde(rename = "fill_order_operation")]
    FillOrder(FillOrderOperation),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub previous: String,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<SignedTransaction>,
    #[serde(default)]
    pub transaction_ids: Vec<String>,
}

// Virtual operations (witness rewards among them) are not carried in
// block transactions; they come from account_history_api.get_ops_in_block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualOpEntry {
    pub block: u64,
    pub trx_id: String,
    pub op_in_trx: u32,
    pub timestamp: String,
    pub op: Operation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_number: u64,
    pub head_block_id: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub name: String,
    #[serde(default)]
    pub json_metadata: String,
    #[serde(default)]
    pub posting_json_metadata: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_operations_decode() {
        let raw = r#"{
            "type": "transfer_operation",
            "value": {
                "from": "alice",
                "to": "v4vapp",
                "amount": {"amount": "25000", "precision": 3, "nai": "@@000000021"},
                "memo": "lnbc45u1..."
            }
        }"#;
        let op: Operation = serde_json::from_str(raw).unwrap();
        match op {
            Operation::Transfer(transfer) => {
                assert_eq!(transfer.from, "alice");
                assert_eq!(transfer.amount.raw_amount(), Some(25_000));
                assert_eq!(transfer.amount.unit(), Some(Unit::Hive));
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn unknown_operations_are_tolerated() {
        let raw = r#"{"type": "vote_operation", "value": {"voter": "alice"}}"#;
        let op: Operation = serde_json::from_str(raw).unwrap();
        assert!(matches!(op, Operation::Unknown));
    }

    #[test]
    fn hbd_amounts_map_to_their_unit() {
        let amount = AssetAmount {
            amount: "1500".into(),
            precision: 3,
            nai: NAI_HBD.into(),
        };
        assert_eq!(amount.unit(), Some(Unit::Hbd));
        let vests = AssetAmount {
            amount: "1".into(),
            precision: 6,
            nai: NAI_VESTS.into(),
        };
        assert_eq!(vests.unit(), None);
        assert!(vests.is_vests());
    }
}
