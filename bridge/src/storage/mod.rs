// Sled-backed document store. One tree per collection; unique indexes
// are enforced with compare_and_swap so the store stays the single
// point of serialization for idempotency.

use log::trace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use thiserror::Error;

use v4vapp_common::account::Account;
use v4vapp_common::time::TimestampMillis;

use crate::event::{journal_key, OpState, SourceKind, TrackedOp};
use crate::ledger::entry::{entry_key, LedgerEntry, LedgerType};
use crate::notify::error_codes::ErrorCode;
use crate::rates::RateRow;
use crate::rebalance::{PendingRebalance, RebalanceResult};

// Collection names
const TRACKED_OPS: &str = "tracked_ops";
const OPS_PENDING: &str = "ops_pending";
const LEDGER: &str = "ledger";
const LEDGER_BY_TIME: &str = "ledger_by_time";
const LEDGER_ACCOUNTS: &str = "ledger_accounts";
const ACCOUNTS: &str = "accounts";
const IN_PROGRESS: &str = "in_progress";
const PENDING_REBALANCES: &str = "pending_rebalances";
const REBALANCE_RESULTS: &str = "rebalance_results";
const ERROR_CODES: &str = "error_codes";
const RATES: &str = "rates";
const META: &str = "meta";

// Meta keys for watcher resume points
const HIVE_RESUME_HEIGHT: &[u8] = b"hive_resume_height";
const INVOICE_ADD_INDEX: &[u8] = b"lnd_invoice_add_index";
const INVOICE_SETTLE_INDEX: &[u8] = b"lnd_invoice_settle_index";
const PAYMENT_INDEX: &[u8] = b"lnd_payment_index";
const FORWARD_TIMESTAMP_NS: &[u8] = b"lnd_forward_timestamp_ns";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Entry {0} already exists")]
    DuplicateEntry(String),
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),
    #[error("Concurrent modification of {0}")]
    Conflict(String),
    #[error("Document {0} not found")]
    NotFound(String),
}

// Denormalized account posting used for balance aggregation without
// loading full entries
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Posting {
    pub timestamp: TimestampMillis,
    pub unit: v4vapp_common::currency::Unit,
    pub signed_amount: i64,
    pub entry_key: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LndResumeIndices {
    pub invoice_add_index: u64,
    pub invoice_settle_index: u64,
    pub payment_index: u64,
    pub forward_timestamp_ns: u64,
}

pub struct BridgeStorage {
    db: Db,
    tracked_ops: Tree,
    ops_pending: Tree,
    ledger: Tree,
    ledger_by_time: Tree,
    ledger_accounts: Tree,
    accounts: Tree,
    in_progress: Tree,
    pending_rebalances: Tree,
    rebalance_results: Tree,
    error_codes: Tree,
    rates: Tree,
    meta: Tree,
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(value)?)
}

fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

impl BridgeStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            tracked_ops: db.open_tree(TRACKED_OPS)?,
            ops_pending: db.open_tree(OPS_PENDING)?,
            ledger: db.open_tree(LEDGER)?,
            ledger_by_time: db.open_tree(LEDGER_BY_TIME)?,
            ledger_accounts: db.open_tree(LEDGER_ACCOUNTS)?,
            accounts: db.open_tree(ACCOUNTS)?,
            in_progress: db.open_tree(IN_PROGRESS)?,
            pending_rebalances: db.open_tree(PENDING_REBALANCES)?,
            rebalance_results: db.open_tree(REBALANCE_RESULTS)?,
            error_codes: db.open_tree(ERROR_CODES)?,
            rates: db.open_tree(RATES)?,
            meta: db.open_tree(META)?,
            db,
        })
    }

    // Flush on disk to make sure everything is saved
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.db.flush_async().await?;
        Ok(())
    }

    // Resume point methods

    fn get_meta_u64(&self, key: &[u8]) -> Result<Option<u64>, StorageError> {
        Ok(self
            .meta
            .get(key)?
            .map(|v| u64::from_be_bytes(v.as_ref().try_into().unwrap_or([0u8; 8]))))
    }

    fn set_meta_u64(&self, key: &[u8], value: u64) -> Result<(), StorageError> {
        self.meta.insert(key, &value.to_be_bytes())?;
        Ok(())
    }

    pub fn get_hive_resume_height(&self) -> Result<Option<u64>, StorageError> {
        self.get_meta_u64(HIVE_RESUME_HEIGHT)
    }

    pub fn set_hive_resume_height(&self, height: u64) -> Result<(), StorageError> {
        self.set_meta_u64(HIVE_RESUME_HEIGHT, height)
    }

    pub fn get_lnd_resume_indices(&self) -> Result<LndResumeIndices, StorageError> {
        Ok(LndResumeIndices {
            invoice_add_index: self.get_meta_u64(INVOICE_ADD_INDEX)?.unwrap_or(0),
            invoice_settle_index: self.get_meta_u64(INVOICE_SETTLE_INDEX)?.unwrap_or(0),
            payment_index: self.get_meta_u64(PAYMENT_INDEX)?.unwrap_or(0),
            forward_timestamp_ns: self.get_meta_u64(FORWARD_TIMESTAMP_NS)?.unwrap_or(0),
        })
    }

    pub fn set_invoice_indices(&self, add_index: u64, settle_index: u64) -> Result<(), StorageError> {
        self.set_meta_u64(INVOICE_ADD_INDEX, add_index)?;
        self.set_meta_u64(INVOICE_SETTLE_INDEX, settle_index)
    }

    pub fn set_payment_index(&self, index: u64) -> Result<(), StorageError> {
        self.set_meta_u64(PAYMENT_INDEX, index)
    }

    pub fn set_forward_timestamp_ns(&self, timestamp_ns: u64) -> Result<(), StorageError> {
        self.set_meta_u64(FORWARD_TIMESTAMP_NS, timestamp_ns)
    }

    // Tracked-op journal

    fn pending_key(op: &TrackedOp) -> Vec<u8> {
        let mut key = op.source_timestamp.to_be_bytes().to_vec();
        key.extend_from_slice(op.journal_key().as_bytes());
        key
    }

    // Insert a freshly ingested op. Returns false when the same source
    // event was already journaled (duplicate replay is a no-op).
    pub fn insert_tracked_op(&self, op: &TrackedOp) -> Result<bool, StorageError> {
        trace!("insert tracked op {}", op.journal_key());
        let key = op.journal_key();
        let value = to_json(op)?;
        let previous = self
            .tracked_ops
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?;
        if previous.is_err() {
            return Ok(false);
        }
        self.ops_pending
            .insert(Self::pending_key(op), key.as_bytes())?;
        Ok(true)
    }

    // Persist a state change, maintaining the pending index
    pub fn save_tracked_op(&self, op: &TrackedOp) -> Result<(), StorageError> {
        let key = op.journal_key();
        self.tracked_ops.insert(key.as_bytes(), to_json(op)?)?;
        if op.state == OpState::Ingested {
            self.ops_pending
                .insert(Self::pending_key(op), key.as_bytes())?;
        } else {
            self.ops_pending.remove(Self::pending_key(op))?;
        }
        Ok(())
    }

    pub fn get_tracked_op(
        &self,
        group_id: &str,
        kind: SourceKind,
    ) -> Result<Option<TrackedOp>, StorageError> {
        match self.tracked_ops.get(journal_key(group_id, kind).as_bytes())? {
            Some(bytes) => Ok(Some(from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    // All ops sharing a group id, any source kind
    pub fn find_ops_by_group(&self, group_id: &str) -> Result<Vec<TrackedOp>, StorageError> {
        let prefix = format!("{}:", group_id);
        let mut ops = Vec::new();
        for item in self.tracked_ops.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            ops.push(from_json(&value)?);
        }
        Ok(ops)
    }

    // Oldest ingested op by source timestamp, if any
    pub fn next_ingested(&self) -> Result<Option<TrackedOp>, StorageError> {
        for item in self.ops_pending.iter() {
            let (pending_key, journal) = item?;
            match self.tracked_ops.get(&journal)? {
                Some(bytes) => {
                    let op: TrackedOp = from_json(&bytes)?;
                    if op.state == OpState::Ingested {
                        return Ok(Some(op));
                    }
                    // stale index row, clean it up
                    self.ops_pending.remove(pending_key)?;
                }
                None => {
                    self.ops_pending.remove(pending_key)?;
                }
            }
        }
        Ok(None)
    }

    pub fn pending_op_count(&self) -> usize {
        self.ops_pending.len()
    }

    // Ingested ops in source-timestamp order, up to `limit`
    pub fn ingested_ops(&self, limit: usize) -> Result<Vec<TrackedOp>, StorageError> {
        let mut ops = Vec::new();
        for item in self.ops_pending.iter() {
            if ops.len() >= limit {
                break;
            }
            let (pending_key, journal) = item?;
            match self.tracked_ops.get(&journal)? {
                Some(bytes) => {
                    let op: TrackedOp = from_json(&bytes)?;
                    if op.state == OpState::Ingested {
                        ops.push(op);
                    } else {
                        self.ops_pending.remove(pending_key)?;
                    }
                }
                None => {
                    self.ops_pending.remove(pending_key)?;
                }
            }
        }
        Ok(ops)
    }

    // Crash recovery: rows left Routed by a cancelled handler go back
    // to Ingested so another worker can retry them
    pub fn release_routed_ops(&self) -> Result<usize, StorageError> {
        let mut released = 0;
        for item in self.tracked_ops.iter() {
            let (_, value) = item?;
            let mut op: TrackedOp = from_json(&value)?;
            if op.state == OpState::Routed {
                if op.release().is_ok() {
                    self.save_tracked_op(&op)?;
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    // Ledger journal

    // Atomic insert with the (group_id, ledger_type) uniqueness guard.
    // Also maintains the by-time and per-account posting indexes.
    pub fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<(), StorageError> {
        let key = entry.entry_key();
        let value = to_json(entry)?;
        let previous = self
            .ledger
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?;
        if previous.is_err() {
            return Err(StorageError::DuplicateEntry(key));
        }

        let mut time_key = entry.timestamp.to_be_bytes().to_vec();
        time_key.extend_from_slice(key.as_bytes());
        self.ledger_by_time.insert(time_key, key.as_bytes())?;

        for account in [&entry.debit, &entry.credit] {
            let signed = entry
                .signed_amount_for(account)
                .expect("entry side is always one of its own accounts");
            let posting = Posting {
                timestamp: entry.timestamp,
                unit: entry.unit,
                signed_amount: signed,
                entry_key: key.clone(),
            };
            let qualified = account.qualified_name();
            let mut posting_key = qualified.as_bytes().to_vec();
            posting_key.push(0);
            posting_key.extend_from_slice(&entry.timestamp.to_be_bytes());
            posting_key.extend_from_slice(key.as_bytes());
            self.ledger_accounts.insert(posting_key, to_json(&posting)?)?;
            self.accounts
                .insert(qualified.as_bytes(), to_json(account)?)?;
        }
        Ok(())
    }

    pub fn has_ledger_entry(
        &self,
        group_id: &str,
        ledger_type: LedgerType,
    ) -> Result<bool, StorageError> {
        Ok(self
            .ledger
            .contains_key(entry_key(group_id, ledger_type).as_bytes())?)
    }

    pub fn entries_for_group(&self, group_id: &str) -> Result<Vec<LedgerEntry>, StorageError> {
        let prefix = format!("{}:", group_id);
        let mut entries = Vec::new();
        for item in self.ledger.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            entries.push(from_json(&value)?);
        }
        Ok(entries)
    }

    // Postings for one account inside an optional time window
    pub fn postings_for_account(
        &self,
        account: &Account,
        from: Option<TimestampMillis>,
        to: Option<TimestampMillis>,
    ) -> Result<Vec<Posting>, StorageError> {
        let mut prefix = account.qualified_name().as_bytes().to_vec();
        prefix.push(0);
        let mut postings = Vec::new();
        for item in self.ledger_accounts.scan_prefix(&prefix) {
            let (_, value) = item?;
            let posting: Posting = from_json(&value)?;
            if let Some(from) = from {
                if posting.timestamp < from {
                    continue;
                }
            }
            if let Some(to) = to {
                if posting.timestamp > to {
                    continue;
                }
            }
            postings.push(posting);
        }
        Ok(postings)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let mut accounts = Vec::new();
        for item in self.accounts.iter() {
            let (_, value) = item?;
            accounts.push(from_json(&value)?);
        }
        Ok(accounts)
    }

    // Most recent entries, newest first
    pub fn ledger_tail(&self, limit: usize) -> Result<Vec<LedgerEntry>, StorageError> {
        let mut entries = Vec::new();
        for item in self.ledger_by_time.iter().rev().take(limit) {
            let (_, key) = item?;
            if let Some(bytes) = self.ledger.get(&key)? {
                entries.push(from_json(&bytes)?);
            }
        }
        Ok(entries)
    }

    pub fn all_ledger_entries(&self) -> Result<Vec<LedgerEntry>, StorageError> {
        let mut entries = Vec::new();
        for item in self.ledger.iter() {
            let (_, value) = item?;
            entries.push(from_json(&value)?);
        }
        Ok(entries)
    }

    // In-progress outbound payments (msats committed but not yet settled),
    // keyed per account so balance reads can refresh them cheaply

    fn in_progress_key(account: &Account, group_id: &str) -> Vec<u8> {
        let mut key = account.qualified_name().as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(group_id.as_bytes());
        key
    }

    pub fn add_in_progress(
        &self,
        account: &Account,
        group_id: &str,
        msats: u64,
    ) -> Result<(), StorageError> {
        self.in_progress
            .insert(Self::in_progress_key(account, group_id), &msats.to_be_bytes())?;
        Ok(())
    }

    pub fn has_in_progress(&self, account: &Account, group_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .in_progress
            .contains_key(Self::in_progress_key(account, group_id))?)
    }

    pub fn clear_in_progress(&self, account: &Account, group_id: &str) -> Result<(), StorageError> {
        self.in_progress
            .remove(Self::in_progress_key(account, group_id))?;
        Ok(())
    }

    pub fn in_progress_msats_for(&self, account: &Account) -> Result<u64, StorageError> {
        let mut prefix = account.qualified_name().as_bytes().to_vec();
        prefix.push(0);
        let mut total = 0u64;
        for item in self.in_progress.scan_prefix(&prefix) {
            let (_, value) = item?;
            total =
                total.saturating_add(u64::from_be_bytes(value.as_ref().try_into().unwrap_or([0; 8])));
        }
        Ok(total)
    }

    // Pending rebalance pool, optimistic concurrency

    // Returns the row plus the raw bytes to pass back to store_pending_rebalance
    pub fn load_pending_rebalance(
        &self,
        pool_key: &str,
    ) -> Result<Option<(PendingRebalance, Vec<u8>)>, StorageError> {
        match self.pending_rebalances.get(pool_key.as_bytes())? {
            Some(bytes) => {
                let row = from_json(&bytes)?;
                Ok(Some((row, bytes.to_vec())))
            }
            None => Ok(None),
        }
    }

    // Write-if-unchanged; Err(Conflict) when another task won the race
    pub fn store_pending_rebalance(
        &self,
        pool_key: &str,
        expected: Option<&[u8]>,
        row: &PendingRebalance,
    ) -> Result<(), StorageError> {
        let value = to_json(row)?;
        let swapped =
            self.pending_rebalances
                .compare_and_swap(pool_key.as_bytes(), expected, Some(value))?;
        if swapped.is_err() {
            return Err(StorageError::Conflict(pool_key.to_string()));
        }
        Ok(())
    }

    pub fn all_pending_rebalances(&self) -> Result<Vec<PendingRebalance>, StorageError> {
        let mut rows = Vec::new();
        for item in self.pending_rebalances.iter() {
            let (_, value) = item?;
            rows.push(from_json(&value)?);
        }
        Ok(rows)
    }

    pub fn append_rebalance_result(&self, result: &RebalanceResult) -> Result<(), StorageError> {
        let mut key = result.timestamp.to_be_bytes().to_vec();
        key.extend_from_slice(result.pool_key.as_bytes());
        self.rebalance_results.insert(key, to_json(result)?)?;
        Ok(())
    }

    // Error-code history

    pub fn get_error_code(&self, code: &str) -> Result<Option<ErrorCode>, StorageError> {
        match self.error_codes.get(code.as_bytes())? {
            Some(bytes) => Ok(Some(from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_error_code(&self, error_code: &ErrorCode) -> Result<(), StorageError> {
        self.error_codes
            .insert(error_code.code.as_bytes(), to_json(error_code)?)?;
        Ok(())
    }

    // Rates time-series

    pub fn append_rate(&self, row: &RateRow) -> Result<(), StorageError> {
        let mut key = row.timestamp.to_be_bytes().to_vec();
        key.extend_from_slice(row.pair.as_bytes());
        self.rates.insert(key, to_json(row)?)?;
        Ok(())
    }

    pub fn latest_rate(&self, pair: &str) -> Result<Option<RateRow>, StorageError> {
        for item in self.rates.iter().rev() {
            let (_, value) = item?;
            let row: RateRow = from_json(&value)?;
            if row.pair == pair {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{new_group_id, OpPayload};
    use v4vapp_common::currency::{CrossRates, Unit};

    fn temp_storage() -> (BridgeStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = BridgeStorage::open(dir.path().to_str().unwrap()).unwrap();
        (storage, dir)
    }

    fn transfer_op(group_id: String, ts: u64) -> TrackedOp {
        TrackedOp::new(
            group_id,
            SourceKind::HiveTransfer,
            ts,
            OpPayload::HiveTransfer {
                from: "alice".into(),
                to: "server".into(),
                amount_milli: 25_000,
                unit: Unit::Hive,
                memo: String::new(),
                block_num: 1,
                trx_id: "abcd".into(),
                op_index: 0,
            },
        )
    }

    fn sample_entry(group_id: &str) -> LedgerEntry {
        let conv = CrossRates {
            sats_per_hive: 200.0,
            sats_per_hbd: 800.0,
            usd_per_hive: 0.2,
            usd_per_hbd: 1.0,
        }
        .snapshot(25_000, Unit::Hive);
        LedgerEntry::new(
            group_id,
            LedgerType::DepositHive,
            100,
            "Customer deposit booked",
            Account::treasury_hive("server"),
            Account::user_balance("alice"),
            25_000,
            Unit::Hive,
            conv,
        )
    }

    #[test]
    fn duplicate_tracked_op_is_a_noop() {
        let (storage, _dir) = temp_storage();
        let op = transfer_op(new_group_id(), 10);
        assert!(storage.insert_tracked_op(&op).unwrap());
        assert!(!storage.insert_tracked_op(&op).unwrap());
        assert_eq!(storage.pending_op_count(), 1);
    }

    #[test]
    fn pending_index_orders_by_source_timestamp() {
        let (storage, _dir) = temp_storage();
        let late = transfer_op(new_group_id(), 2_000);
        let early = transfer_op(new_group_id(), 1_000);
        storage.insert_tracked_op(&late).unwrap();
        storage.insert_tracked_op(&early).unwrap();

        let next = storage.next_ingested().unwrap().unwrap();
        assert_eq!(next.group_id, early.group_id);

        let mut routed = next;
        routed.mark_routed().unwrap();
        storage.save_tracked_op(&routed).unwrap();
        let next = storage.next_ingested().unwrap().unwrap();
        assert_eq!(next.group_id, late.group_id);
    }

    #[test]
    fn ledger_uniqueness_guard() {
        let (storage, _dir) = temp_storage();
        let entry = sample_entry("group1");
        storage.insert_ledger_entry(&entry).unwrap();
        match storage.insert_ledger_entry(&entry) {
            Err(StorageError::DuplicateEntry(key)) => {
                assert_eq!(key, "group1:deposit_hive");
            }
            other => panic!("expected duplicate entry, got {:?}", other),
        }
    }

    #[test]
    fn postings_index_both_sides() {
        let (storage, _dir) = temp_storage();
        storage.insert_ledger_entry(&sample_entry("group1")).unwrap();

        let debit_postings = storage
            .postings_for_account(&Account::treasury_hive("server"), None, None)
            .unwrap();
        assert_eq!(debit_postings.len(), 1);
        assert_eq!(debit_postings[0].signed_amount, 25_000);

        let credit_postings = storage
            .postings_for_account(&Account::user_balance("alice"), None, None)
            .unwrap();
        assert_eq!(credit_postings.len(), 1);
        assert_eq!(credit_postings[0].signed_amount, 25_000);

        assert_eq!(storage.list_accounts().unwrap().len(), 2);
    }

    #[test]
    fn resume_points_round_trip() {
        let (storage, _dir) = temp_storage();
        assert_eq!(storage.get_hive_resume_height().unwrap(), None);
        storage.set_hive_resume_height(93_000_000).unwrap();
        assert_eq!(storage.get_hive_resume_height().unwrap(), Some(93_000_000));

        storage.set_invoice_indices(5, 3).unwrap();
        storage.set_payment_index(7).unwrap();
        let indices = storage.get_lnd_resume_indices().unwrap();
        assert_eq!(indices.invoice_add_index, 5);
        assert_eq!(indices.invoice_settle_index, 3);
        assert_eq!(indices.payment_index, 7);
        assert_eq!(indices.forward_timestamp_ns, 0);
    }

    #[test]
    fn in_progress_totals_are_per_account() {
        let (storage, _dir) = temp_storage();
        let node = Account::ln_holdings("voltage");
        storage.add_in_progress(&node, "g1", 4_500_000).unwrap();
        storage.add_in_progress(&node, "g2", 500_000).unwrap();
        storage
            .add_in_progress(&Account::ln_holdings("other"), "g3", 9_000_000)
            .unwrap();
        assert_eq!(storage.in_progress_msats_for(&node).unwrap(), 5_000_000);
        storage.clear_in_progress(&node, "g1").unwrap();
        assert_eq!(storage.in_progress_msats_for(&node).unwrap(), 500_000);
    }
}
