pub mod cache;
pub mod entry;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::trace;
use tokio::sync::RwLock;

use v4vapp_common::account::Account;
use v4vapp_common::currency::Unit;
use v4vapp_common::time::{get_current_time_in_millis, truncate_to_minute, TimestampMillis};

use crate::ledger::entry::LedgerEntry;
use crate::storage::{BridgeStorage, StorageError};

// Invalidation hook fired after every successful post. The balance
// cache registers itself here to bump its generation counter.
#[async_trait]
pub trait LedgerHook: Send + Sync {
    async fn on_entry_posted(&self, entry: &LedgerEntry);
}

// Aggregated view of one account. All totals are integers in the
// smallest unit of their column; display conversion happens at the
// boundary only.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LedgerAccountDetails {
    pub per_unit_totals: HashMap<Unit, i64>,
    pub per_unit_history: Vec<HistoryPoint>,
    // Always recomputed, even on a cache hit
    pub in_progress_msats: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HistoryPoint {
    pub timestamp: TimestampMillis,
    pub unit: Unit,
    pub signed_amount: i64,
}

pub struct Ledger {
    storage: Arc<BridgeStorage>,
    hooks: RwLock<Vec<Arc<dyn LedgerHook>>>,
}

impl Ledger {
    pub fn new(storage: Arc<BridgeStorage>) -> Self {
        Self {
            storage,
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub async fn register_hook(&self, hook: Arc<dyn LedgerHook>) {
        self.hooks.write().await.push(hook);
    }

    pub fn storage(&self) -> &Arc<BridgeStorage> {
        &self.storage
    }

    // Validate and append one entry. Fails with DuplicateEntry when the
    // (group_id, ledger_type) slot is already filled; the duplicate
    // guard is what makes handler replay idempotent.
    pub async fn post(&self, entry: LedgerEntry) -> Result<(), StorageError> {
        trace!("post ledger entry {}", entry.entry_key());
        entry
            .validate()
            .map_err(|e| StorageError::InvalidEntry(e.to_string()))?;
        self.storage.insert_ledger_entry(&entry)?;

        for hook in self.hooks.read().await.iter() {
            hook.on_entry_posted(&entry).await;
        }
        Ok(())
    }

    // Post several entries of one business action. Slots already filled
    // are skipped silently so a replayed handler converges on the same
    // journal instead of failing halfway.
    pub async fn post_all(&self, entries: Vec<LedgerEntry>) -> Result<usize, StorageError> {
        let mut posted = 0;
        for entry in entries {
            match self.post(entry).await {
                Ok(()) => posted += 1,
                Err(StorageError::DuplicateEntry(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(posted)
    }

    // Direct (uncached) balance aggregation. `as_of` is truncated to
    // the minute; `age_secs` limits the lookback window.
    pub fn balance_uncached(
        &self,
        account: &Account,
        as_of: Option<TimestampMillis>,
        age_secs: Option<u64>,
    ) -> Result<LedgerAccountDetails, StorageError> {
        let to = as_of.map(truncate_to_minute);
        let from = age_secs.map(|age| {
            let reference = to.unwrap_or_else(get_current_time_in_millis);
            reference.saturating_sub(age * 1000)
        });

        let postings = self.storage.postings_for_account(account, from, to)?;
        let mut per_unit_totals: HashMap<Unit, i64> = HashMap::new();
        let mut per_unit_history = Vec::with_capacity(postings.len());
        for posting in postings {
            *per_unit_totals.entry(posting.unit).or_insert(0) += posting.signed_amount;
            per_unit_history.push(HistoryPoint {
                timestamp: posting.timestamp,
                unit: posting.unit,
                signed_amount: posting.signed_amount,
            });
        }

        Ok(LedgerAccountDetails {
            per_unit_totals,
            per_unit_history,
            in_progress_msats: self.storage.in_progress_msats_for(account)?,
        })
    }

    pub fn in_progress_msats(&self, account: &Account) -> Result<u64, StorageError> {
        self.storage.in_progress_msats_for(account)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        self.storage.list_accounts()
    }

    pub fn has_entry(
        &self,
        group_id: &str,
        ledger_type: entry::LedgerType,
    ) -> Result<bool, StorageError> {
        self.storage.has_ledger_entry(group_id, ledger_type)
    }

    pub fn entries_for_group(&self, group_id: &str) -> Result<Vec<LedgerEntry>, StorageError> {
        self.storage.entries_for_group(group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::LedgerType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use v4vapp_common::currency::CrossRates;

    struct CountingHook(AtomicUsize);

    #[async_trait]
    impl LedgerHook for CountingHook {
        async fn on_entry_posted(&self, _entry: &LedgerEntry) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn rates() -> CrossRates {
        CrossRates {
            sats_per_hive: 200.0,
            sats_per_hbd: 800.0,
            usd_per_hive: 0.2,
            usd_per_hbd: 1.0,
        }
    }

    fn deposit(group_id: &str, amount: u64, ts: u64) -> LedgerEntry {
        LedgerEntry::new(
            group_id,
            LedgerType::DepositHive,
            ts,
            "Customer deposit booked",
            Account::treasury_hive("server"),
            Account::user_balance("alice"),
            amount,
            Unit::Hive,
            rates().snapshot(amount, Unit::Hive),
        )
    }

    async fn temp_ledger() -> (Ledger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(BridgeStorage::open(dir.path().to_str().unwrap()).unwrap());
        (Ledger::new(storage), dir)
    }

    #[tokio::test]
    async fn post_fires_hooks_and_rejects_duplicates() {
        let (ledger, _dir) = temp_ledger().await;
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        ledger.register_hook(hook.clone()).await;

        ledger.post(deposit("g1", 25_000, 100)).await.unwrap();
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);

        let result = ledger.post(deposit("g1", 25_000, 100)).await;
        assert!(matches!(result, Err(StorageError::DuplicateEntry(_))));
        // failed post must not fire the hook
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn post_all_skips_filled_slots() {
        let (ledger, _dir) = temp_ledger().await;
        ledger.post(deposit("g1", 25_000, 100)).await.unwrap();
        let posted = ledger
            .post_all(vec![deposit("g1", 25_000, 100), deposit("g2", 1_000, 200)])
            .await
            .unwrap();
        assert_eq!(posted, 1);
    }

    #[tokio::test]
    async fn balance_sums_per_unit_and_honours_age() {
        let (ledger, _dir) = temp_ledger().await;
        let now = get_current_time_in_millis();
        ledger.post(deposit("old", 10_000, now - 600_000)).await.unwrap();
        ledger.post(deposit("new", 25_000, now - 1_000)).await.unwrap();

        let full = ledger
            .balance_uncached(&Account::user_balance("alice"), None, None)
            .unwrap();
        assert_eq!(full.per_unit_totals[&Unit::Hive], 35_000);
        assert_eq!(full.per_unit_history.len(), 2);

        // 2 minute lookback only sees the recent deposit
        let recent = ledger
            .balance_uncached(&Account::user_balance("alice"), None, Some(120))
            .unwrap();
        assert_eq!(recent.per_unit_totals[&Unit::Hive], 25_000);
    }
}
