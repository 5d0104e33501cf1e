// Outbound on-chain messages: value transfers and signalling custom
// messages. Operations are serialized into the chain's canonical binary
// form for the signing digest; the JSON form travels to the node.
// Signing itself is delegated to secp256k1 (canonical recoverable ECDSA).

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use log::{debug, info};
use secp256k1::{Message, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;

use v4vapp_common::currency::Unit;
use v4vapp_common::serializer::{Reader, ReaderError, Serializer, Writer};
use v4vapp_common::time::get_current_time_in_seconds;
use v4vapp_common::utils::to_asset_string;

use super::client::{HiveClient, HiveClientError};
use super::types::{AssetAmount, CustomJsonOperation, Operation, TransferOperation};

pub const CHAIN_ID_MAINNET: &str =
    "beeab0de00000000000000000000000000000000000000000000000000000000";

// On-chain operation ids
const OP_TRANSFER: u64 = 2;
const OP_CUSTOM_JSON: u64 = 18;

// Transactions expire shortly after construction
const EXPIRATION_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error(transparent)]
    Client(#[from] HiveClientError),
    #[error("Invalid signing key")]
    InvalidKey,
    #[error("Invalid chain id")]
    InvalidChainId,
    #[error("Message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---- Outbound message envelopes (§ external interfaces) ----

// Value-bearing message: user→server, user→user and server→user flows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMessage {
    pub from_account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_account: Option<String>,
    pub memo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sats: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msats: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hive: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hbd: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_message: Option<String>,
    pub group_id: String,
}

// Informational message, never acted on by the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub from_account: String,
    pub to_account: String,
    pub memo: String,
    pub msats: u64,
    pub parent_group_id: String,
    pub notification: bool,
    pub group_id: String,
}

impl NotificationMessage {
    pub fn new(
        from_account: impl Into<String>,
        to_account: impl Into<String>,
        memo: impl Into<String>,
        msats: u64,
        parent_group_id: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            from_account: from_account.into(),
            to_account: to_account.into(),
            memo: memo.into(),
            msats,
            parent_group_id: parent_group_id.into(),
            notification: true,
            group_id: group_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Transfer(TransferMessage),
    Notification(NotificationMessage),
}

impl OutboundMessage {
    // The message's on-chain id, distinguished by kind
    pub fn message_id(&self, prefix: &str) -> String {
        match self {
            OutboundMessage::Transfer(_) => format!("{}_transfer", prefix),
            OutboundMessage::Notification(_) => format!("{}_notification", prefix),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundMessage::Transfer(msg) => serde_json::to_string(msg),
            OutboundMessage::Notification(msg) => serde_json::to_string(msg),
        }
    }

    pub fn decode(message_id: &str, raw: &str) -> Result<Self, serde_json::Error> {
        if message_id.ends_with("_notification") {
            Ok(OutboundMessage::Notification(serde_json::from_str(raw)?))
        } else {
            Ok(OutboundMessage::Transfer(serde_json::from_str(raw)?))
        }
    }
}

// ---- Canonical binary serialization for the signing digest ----

fn write_asset(writer: &mut Writer, amount_milli: u64, unit: Unit) {
    writer.write_i64(amount_milli as i64);
    writer.write_u8(3);
    let symbol: [u8; 7] = match unit {
        Unit::Hbd => *b"HBD\0\0\0\0",
        _ => *b"HIVE\0\0\0",
    };
    writer.write_bytes(&symbol);
}

impl Serializer for TransferOperation {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.from);
        writer.write_string(&self.to);
        let amount = self.amount.raw_amount().unwrap_or(0);
        let unit = self.amount.unit().unwrap_or(Unit::Hive);
        write_asset(writer, amount, unit);
        writer.write_string(&self.memo);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let from = reader.read_string()?;
        let to = reader.read_string()?;
        let amount = reader.read_i64()? as u64;
        let _precision = reader.read_u8()?;
        let symbol = reader.read_bytes(7)?;
        let unit = if symbol.starts_with(b"HBD") {
            Unit::Hbd
        } else {
            Unit::Hive
        };
        let memo = reader.read_string()?;
        Ok(Self {
            from,
            to,
            amount: AssetAmount::new(amount, unit),
            memo,
        })
    }
}

impl Serializer for CustomJsonOperation {
    fn write(&self, writer: &mut Writer) {
        writer.write_varint(self.required_auths.len() as u64);
        for auth in &self.required_auths {
            writer.write_string(auth);
        }
        writer.write_varint(self.required_posting_auths.len() as u64);
        for auth in &self.required_posting_auths {
            writer.write_string(auth);
        }
        writer.write_string(&self.id);
        writer.write_string(&self.json);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let auth_count = reader.read_varint()? as usize;
        let mut required_auths = Vec::with_capacity(auth_count);
        for _ in 0..auth_count {
            required_auths.push(reader.read_string()?);
        }
        let posting_count = reader.read_varint()? as usize;
        let mut required_posting_auths = Vec::with_capacity(posting_count);
        for _ in 0..posting_count {
            required_posting_auths.push(reader.read_string()?);
        }
        Ok(Self {
            required_auths,
            required_posting_auths,
            id: reader.read_string()?,
            json: reader.read_string()?,
        })
    }
}

fn write_operation(writer: &mut Writer, operation: &Operation) {
    match operation {
        Operation::Transfer(transfer) => {
            writer.write_varint(OP_TRANSFER);
            transfer.write(writer);
        }
        Operation::CustomJson(custom) => {
            writer.write_varint(OP_CUSTOM_JSON);
            custom.write(writer);
        }
        _ => unreachable!("only outbound operation kinds are serialized"),
    }
}

struct UnsignedTransaction {
    ref_block_num: u16,
    ref_block_prefix: u32,
    expiration: u64,
    operations: Vec<Operation>,
}

impl UnsignedTransaction {
    fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_u16(self.ref_block_num);
        writer.write_u32(self.ref_block_prefix);
        writer.write_u32(self.expiration as u32);
        writer.write_varint(self.operations.len() as u64);
        for operation in &self.operations {
            write_operation(&mut writer, operation);
        }
        // extensions, always empty
        writer.write_varint(0);
        writer.bytes()
    }

    fn signing_digest(&self, chain_id: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(chain_id);
        hasher.update(self.to_canonical_bytes());
        hasher.finalize().into()
    }

    fn expiration_string(&self) -> String {
        Utc.timestamp_opt(self.expiration as i64, 0)
            .single()
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_default()
    }
}

// ---- Signing ----

pub struct HiveSigner {
    secret: SecretKey,
}

impl HiveSigner {
    pub fn from_hex(key_hex: &str) -> Result<Self, BroadcastError> {
        let bytes = hex::decode(key_hex.trim()).map_err(|_| BroadcastError::InvalidKey)?;
        let secret = SecretKey::from_slice(&bytes).map_err(|_| BroadcastError::InvalidKey)?;
        Ok(Self { secret })
    }

    // The chain rejects non-canonical signatures; grind the nonce until
    // both halves pass the canonical check
    pub fn sign_canonical(&self, digest: &[u8; 32]) -> [u8; 65] {
        let secp = Secp256k1::new();
        let message = Message::from_digest(*digest);
        let mut counter = 0u32;
        loop {
            let mut extra = [0u8; 32];
            extra[..4].copy_from_slice(&counter.to_le_bytes());
            let recoverable =
                secp.sign_ecdsa_recoverable_with_noncedata(&message, &self.secret, &extra);
            let (recovery_id, compact) = recoverable.serialize_compact();
            let mut signature = [0u8; 65];
            // 27 base, +4 for compressed public keys
            signature[0] = 31 + recovery_id.to_i32() as u8;
            signature[1..].copy_from_slice(&compact);
            if is_canonical(&signature) {
                return signature;
            }
            counter += 1;
        }
    }
}

fn is_canonical(signature: &[u8; 65]) -> bool {
    signature[1] & 0x80 == 0
        && !(signature[1] == 0 && signature[2] & 0x80 == 0)
        && signature[33] & 0x80 == 0
        && !(signature[33] == 0 && signature[34] & 0x80 == 0)
}

// ---- Broadcaster ----

pub struct HiveBroadcaster {
    client: Arc<HiveClient>,
    signer: HiveSigner,
    server_account: String,
    message_prefix: String,
    chain_id: [u8; 32],
}

impl HiveBroadcaster {
    pub fn new(
        client: Arc<HiveClient>,
        signer: HiveSigner,
        server_account: String,
        message_prefix: String,
        chain_id_hex: &str,
    ) -> Result<Self, BroadcastError> {
        let bytes = hex::decode(chain_id_hex).map_err(|_| BroadcastError::InvalidChainId)?;
        let chain_id: [u8; 32] = bytes
            .try_into()
            .map_err(|_| BroadcastError::InvalidChainId)?;
        Ok(Self {
            client,
            signer,
            server_account,
            message_prefix,
            chain_id,
        })
    }

    pub fn server_account(&self) -> &str {
        &self.server_account
    }

    pub fn message_prefix(&self) -> &str {
        &self.message_prefix
    }

    // Send value from the server account to a user
    pub async fn send_transfer(
        &self,
        to: &str,
        amount_milli: u64,
        unit: Unit,
        memo: String,
    ) -> Result<(), BroadcastError> {
        info!(
            "Broadcasting transfer of {} to {}",
            to_asset_string(amount_milli, unit),
            to
        );
        let operation = Operation::Transfer(TransferOperation {
            from: self.server_account.clone(),
            to: to.to_string(),
            amount: AssetAmount::new(amount_milli, unit),
            memo,
        });
        self.broadcast(vec![operation]).await
    }

    // Emit a signalling custom message under the configured prefix
    pub async fn send_message(&self, message: &OutboundMessage) -> Result<(), BroadcastError> {
        let operation = Operation::CustomJson(CustomJsonOperation {
            required_auths: vec![self.server_account.clone()],
            required_posting_auths: Vec::new(),
            id: message.message_id(&self.message_prefix),
            json: message.encode()?,
        });
        self.broadcast(vec![operation]).await
    }

    async fn broadcast(&self, operations: Vec<Operation>) -> Result<(), BroadcastError> {
        let properties = self.client.get_dynamic_global_properties().await?;
        let head_id = hex::decode(&properties.head_block_id)
            .map_err(|_| BroadcastError::InvalidChainId)?;

        let transaction = UnsignedTransaction {
            ref_block_num: (properties.head_block_number & 0xffff) as u16,
            ref_block_prefix: u32::from_le_bytes(
                head_id
                    .get(4..8)
                    .and_then(|b| b.try_into().ok())
                    .unwrap_or([0u8; 4]),
            ),
            expiration: get_current_time_in_seconds() + EXPIRATION_SECS,
            operations,
        };

        let digest = transaction.signing_digest(&self.chain_id);
        let signature = self.signer.sign_canonical(&digest);
        debug!("Signed transaction, digest {}", hex::encode(digest));

        let trx = json!({
            "ref_block_num": transaction.ref_block_num,
            "ref_block_prefix": transaction.ref_block_prefix,
            "expiration": transaction.expiration_string(),
            "operations": transaction.operations,
            "extensions": [],
            "signatures": [hex::encode(signature)],
        });
        self.client.broadcast_transaction(trx).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_message_round_trip() {
        let original = OutboundMessage::Notification(NotificationMessage::new(
            "v4vapp",
            "alice",
            "Insufficient Keepsats balance",
            5_000_000,
            "eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee",
            "ffffffffffffffffffffffffffffffff",
        ));
        let id = original.message_id("v4vapp");
        assert_eq!(id, "v4vapp_notification");
        let raw = original.encode().unwrap();
        let decoded = OutboundMessage::decode(&id, &raw).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn transfer_message_round_trip_skips_empty_fields() {
        let original = OutboundMessage::Transfer(TransferMessage {
            from_account: "alice".into(),
            to_account: Some("bob".into()),
            memo: "thanks".into(),
            sats: None,
            msats: Some(5_000_000),
            hive: None,
            hbd: None,
            invoice_message: None,
            group_id: "ffffffffffffffffffffffffffffffff".into(),
        });
        let raw = original.encode().unwrap();
        assert!(!raw.contains("sats\":null"));
        let decoded = OutboundMessage::decode("v4vapp_dev_transfer", &raw).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn transfer_binary_round_trip() {
        let operation = TransferOperation {
            from: "v4vapp".into(),
            to: "alice".into(),
            amount: AssetAmount::new(25_000, Unit::Hive),
            memo: "Refund (v4v:0123456789abcdef0123456789abcdef)".into(),
        };
        let bytes = operation.to_bytes();
        let decoded = TransferOperation::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.from, operation.from);
        assert_eq!(decoded.amount, operation.amount);
        assert_eq!(decoded.memo, operation.memo);
    }

    #[test]
    fn canonical_serialization_is_stable() {
        let transaction = UnsignedTransaction {
            ref_block_num: 0x1234,
            ref_block_prefix: 0xdeadbeef,
            expiration: 1_704_067_200,
            operations: vec![Operation::Transfer(TransferOperation {
                from: "v4vapp".into(),
                to: "alice".into(),
                amount: AssetAmount::new(25_000, Unit::Hive),
                memo: String::new(),
            })],
        };
        let first = transaction.to_canonical_bytes();
        let again = transaction.to_canonical_bytes();
        assert_eq!(first, again);
        // ref_block_num is little-endian at the front
        assert_eq!(&first[..2], &[0x34, 0x12]);
        assert_eq!(transaction.expiration_string(), "2024-01-01T00:00:00");
    }

    #[test]
    fn signatures_are_canonical() {
        let signer = HiveSigner::from_hex(
            "0101010101010101010101010101010101010101010101010101010101010101",
        )
        .unwrap();
        let digest = [7u8; 32];
        let signature = signer.sign_canonical(&digest);
        assert!(is_canonical(&signature));
        assert!(signature[0] >= 31 && signature[0] <= 34);
    }
}
