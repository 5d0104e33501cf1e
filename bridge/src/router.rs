// Process router: the single consumer between the journal and the
// conversion engine. Reads ingested ops in source-timestamp order,
// marks them Routed, dispatches to exactly one handler and writes the
// typed outcome back. Idempotency lives in the engine's duplicate-entry
// guards; ordering across sources exists only through group-id linkage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Error;
use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::engine::{ConversionEngine, Outcome};
use crate::event::TrackedOp;
use crate::storage::BridgeStorage;

// Journal rescan interval when no watcher wakes us
const RESCAN_INTERVAL: Duration = Duration::from_secs(5);
const BATCH_SIZE: usize = 64;

pub type SharedRouter = Arc<ProcessRouter>;

pub struct ProcessRouter {
    task: Mutex<Option<JoinHandle<Result<(), Error>>>>,
    wake: Mutex<Option<mpsc::Receiver<()>>>,
    storage: Arc<BridgeStorage>,
    engine: Arc<ConversionEngine>,
}

impl ProcessRouter {
    pub fn new(
        storage: Arc<BridgeStorage>,
        engine: Arc<ConversionEngine>,
        wake: mpsc::Receiver<()>,
    ) -> SharedRouter {
        Arc::new(Self {
            task: Mutex::new(None),
            wake: Mutex::new(Some(wake)),
            storage,
            engine,
        })
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        trace!("Starting process router");

        // Rows left Routed by a cancelled run are released for retry
        let released = self.storage.release_routed_ops()?;
        if released > 0 {
            warn!("Released {} routed ops back to the journal", released);
        }

        let Some(mut wake) = self.wake.lock().await.take() else {
            return Err(anyhow::anyhow!("router already started"));
        };

        let zelf = Arc::clone(self);
        *self.task.lock().await = Some(tokio::spawn(async move {
            loop {
                match zelf.drain_journal().await {
                    Ok(processed) => {
                        if processed > 0 {
                            debug!("Router drained {} ops", processed);
                        }
                    }
                    Err(e) => {
                        // unexpected failures surface and the loop resumes
                        error!("Router pass failed: {}", e);
                        sleep(RESCAN_INTERVAL).await;
                    }
                }
                tokio::select! {
                    _ = wake.recv() => {},
                    _ = sleep(RESCAN_INTERVAL) => {},
                }
            }
        }));
        Ok(())
    }

    pub async fn stop(&self) {
        trace!("Stopping process router");
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        // release anything the aborted pass left Routed
        match self.storage.release_routed_ops() {
            Ok(released) if released > 0 => {
                warn!("Released {} in-flight ops on shutdown", released)
            }
            Ok(_) => {}
            Err(e) => error!("Could not release routed ops: {}", e),
        }
    }

    // One pass over the pending index. Public so tests and operator
    // tooling can drive the router synchronously.
    pub async fn drain_journal(self: &Arc<Self>) -> Result<usize, Error> {
        let mut processed = 0;
        loop {
            let batch = self.storage.ingested_ops(BATCH_SIZE)?;
            if batch.is_empty() {
                return Ok(processed);
            }
            let mut advanced = false;
            for op in batch {
                if self.must_defer(&op)? {
                    trace!("Deferring {} until its parent settles", op.short_id);
                    continue;
                }
                self.process_one(op).await?;
                processed += 1;
                advanced = true;
            }
            if !advanced {
                // everything in the batch is deferred; wait for a wake
                return Ok(processed);
            }
        }
    }

    // A reply cannot be processed before its parent reaches a terminal
    // state; unknown parents (third-party chains) do not block
    fn must_defer(&self, op: &TrackedOp) -> Result<bool, Error> {
        let Some(parent_group_id) = &op.parent_group_id else {
            return Ok(false);
        };
        let parents = self.storage.find_ops_by_group(parent_group_id)?;
        Ok(parents
            .iter()
            .any(|parent| !parent.state.is_terminal()))
    }

    async fn process_one(self: &Arc<Self>, mut op: TrackedOp) -> Result<(), Error> {
        op.mark_routed()?;
        self.storage.save_tracked_op(&op)?;

        let started = Instant::now();
        let outcome = self.engine.handle(&op).await;
        let elapsed_millis = started.elapsed().as_millis() as u64;

        match outcome {
            Outcome::Processed | Outcome::Refunded => {
                op.mark_processed(elapsed_millis)?;
                info!(
                    "Processed {} {} in {}ms",
                    op.source_kind, op.short_id, elapsed_millis
                );
            }
            Outcome::Skipped(reason) => {
                debug!("Skipped {} {}: {}", op.source_kind, op.short_id, reason);
                op.mark_skipped(reason)?;
            }
            Outcome::Failed(error_message) => {
                // WARN and above reach the notification dispatcher
                error!(
                    "Handler failed for {} {}: {}",
                    op.source_kind, op.short_id, error_message
                );
                op.mark_failed(error_message)?;
            }
        }
        self.storage.save_tracked_op(&op)?;
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.storage.pending_op_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::policy::Policy;
    use crate::engine::test_support::{MockPayer, RecordingOutbound, StaticPolicy, StaticRates};
    use crate::engine::EngineConfig;
    use crate::event::{new_group_id, OpPayload, OpState, SourceKind};
    use crate::ledger::Ledger;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use v4vapp_common::currency::{CrossRates, Unit};

    fn router_harness() -> (SharedRouter, Arc<BridgeStorage>, mpsc::Sender<()>, tempfile::TempDir)
    {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(BridgeStorage::open(dir.path().to_str().unwrap()).unwrap());
        let ledger = Arc::new(Ledger::new(storage.clone()));
        let engine = ConversionEngine::new(
            ledger,
            storage.clone(),
            Arc::new(StaticPolicy(Policy::default())),
            Arc::new(StaticRates(CrossRates {
                sats_per_hive: 200.0,
                sats_per_hbd: 800.0,
                usd_per_hive: 0.2,
                usd_per_hbd: 1.0,
            })),
            Arc::new(MockPayer {
                fail_with: None,
                routing_fee_msats: 0,
                payments: StdMutex::new(Vec::new()),
            }),
            Arc::new(RecordingOutbound::default()),
            None,
            None,
            EngineConfig {
                server_account: "v4vapp".into(),
                operator_account: "v4v-app".into(),
                node_alias: "voltage".into(),
                bad_actors: HashSet::new(),
                dev_mode: false,
                dev_allowlist: HashSet::new(),
            },
        );
        let (tx, rx) = mpsc::channel(8);
        let router = ProcessRouter::new(storage.clone(), engine, rx);
        (router, storage, tx, dir)
    }

    fn keepsats_deposit(ts: u64) -> TrackedOp {
        TrackedOp::new(
            new_group_id(),
            SourceKind::HiveTransfer,
            ts,
            OpPayload::HiveTransfer {
                from: "alice".into(),
                to: "v4vapp".into(),
                amount_milli: 25_000,
                unit: Unit::Hive,
                memo: "#sats".into(),
                block_num: 93_000_000,
                trx_id: "abcd".into(),
                op_index: 0,
            },
        )
    }

    #[tokio::test]
    async fn drains_ops_in_timestamp_order() {
        let (router, storage, _tx, _dir) = router_harness();
        let late = keepsats_deposit(2_000);
        let early = keepsats_deposit(1_000);
        storage.insert_tracked_op(&late).unwrap();
        storage.insert_tracked_op(&early).unwrap();

        let processed = router.drain_journal().await.unwrap();
        assert_eq!(processed, 2);

        let early_after = storage
            .get_tracked_op(&early.group_id, SourceKind::HiveTransfer)
            .unwrap()
            .unwrap();
        assert_eq!(early_after.state, OpState::Processed);
        assert!(early_after.process_time.is_some());
        assert_eq!(storage.pending_op_count(), 0);
    }

    #[tokio::test]
    async fn replies_wait_for_their_parents() {
        let (router, storage, _tx, _dir) = router_harness();
        let parent = keepsats_deposit(1_000);
        let reply = keepsats_deposit(2_000).with_parent(parent.group_id.clone());
        // only the reply is journaled first; its parent arrives later
        let orphaned_reply = keepsats_deposit(3_000).with_parent("aa".repeat(16));

        storage.insert_tracked_op(&parent).unwrap();
        storage.insert_tracked_op(&reply).unwrap();
        storage.insert_tracked_op(&orphaned_reply).unwrap();

        let processed = router.drain_journal().await.unwrap();
        // parent processes first, then the reply becomes eligible in the
        // same drain; the orphan (unknown parent) never blocks
        assert_eq!(processed, 3);
        let reply_after = storage
            .get_tracked_op(&reply.group_id, SourceKind::HiveTransfer)
            .unwrap()
            .unwrap();
        assert!(reply_after.state.is_terminal());
    }

    #[tokio::test]
    async fn released_rows_are_retried() {
        let (router, storage, _tx, _dir) = router_harness();
        let mut stuck = keepsats_deposit(1_000);
        storage.insert_tracked_op(&stuck).unwrap();
        stuck.mark_routed().unwrap();
        storage.save_tracked_op(&stuck).unwrap();

        // simulates the crash-recovery pass at startup
        let released = storage.release_routed_ops().unwrap();
        assert_eq!(released, 1);
        let processed = router.drain_journal().await.unwrap();
        assert_eq!(processed, 1);
    }
}
