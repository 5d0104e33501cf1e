// Lightning watcher: three concurrent streams (invoices, payments,
// HTLC forwards) multiplexed into the journal. Each stream keeps its
// own backoff-reconnect loop and resumes from its persisted index;
// the protocol supports catch-up by index so interim events are not
// lost across reconnects.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use log::{debug, info, trace, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

use v4vapp_common::config::LND_LIVENESS_PING_INTERVAL;
use v4vapp_common::time::get_current_time_in_millis;

use crate::event::{derive_group_id, OpPayload, SourceKind, TrackedOp};
use crate::notify;
use crate::storage::BridgeStorage;

use super::client::LndClient;
use super::gen::lnrpc;
use super::gen::lnrpc::invoice::InvoiceState;
use super::gen::lnrpc::payment::PaymentStatus;
use super::gen::routerrpc::htlc_event;

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const CATCH_UP_PAGE: u64 = 200;
const FORWARD_CATCH_UP_EVENTS: u32 = 1000;

pub type SharedLightningWatcher = Arc<LightningWatcher>;

pub struct LightningWatcher {
    tasks: Mutex<Vec<JoinHandle<()>>>,
    client: Arc<LndClient>,
    storage: Arc<BridgeStorage>,
    wake_router: mpsc::Sender<()>,
}

impl LightningWatcher {
    pub fn new(
        client: Arc<LndClient>,
        storage: Arc<BridgeStorage>,
        wake_router: mpsc::Sender<()>,
    ) -> SharedLightningWatcher {
        Arc::new(Self {
            tasks: Mutex::new(Vec::new()),
            client,
            storage,
            wake_router,
        })
    }

    pub async fn start(self: &Arc<Self>) {
        trace!("Starting lightning watcher");

        // Startup self-test: exercises the dispatcher's rebound runtime
        // handle before any real traffic depends on it
        notify::notify(
            "ln_watcher",
            format!(
                "Startup self-test: lightning watcher online for node {}",
                self.client.node_alias()
            ),
        );

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_stream("invoices", |zelf| async move {
            zelf.run_invoice_stream().await
        }));
        tasks.push(self.spawn_stream("payments", |zelf| async move {
            zelf.run_payment_stream().await
        }));
        tasks.push(self.spawn_stream("forwards", |zelf| async move {
            zelf.run_forward_stream().await
        }));
    }

    pub async fn stop(&self) {
        trace!("Stopping lightning watcher");
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    pub async fn is_running(&self) -> bool {
        let tasks = self.tasks.lock().await;
        !tasks.is_empty() && tasks.iter().any(|t| !t.is_finished())
    }

    fn spawn_stream<F, Fut>(self: &Arc<Self>, name: &'static str, run: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), Error>> + Send + 'static,
    {
        let zelf = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            loop {
                match run(Arc::clone(&zelf)).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(
                            "LN {} stream interrupted: {}, reconnecting in {:?}",
                            name, e, backoff
                        );
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    fn emit(&self, op: TrackedOp) -> Result<(), Error> {
        if self.storage.insert_tracked_op(&op)? {
            info!("Tracked {} {}", op.source_kind, op.short_id);
            let _ = self.wake_router.try_send(());
        }
        Ok(())
    }

    // ---- invoices ----

    async fn run_invoice_stream(self: Arc<Self>) -> Result<(), Error> {
        let indices = self.storage.get_lnd_resume_indices()?;
        let mut stream = self
            .client
            .subscribe_invoices(indices.invoice_add_index, indices.invoice_settle_index)
            .await?;
        debug!(
            "Invoice stream resumed from add {} / settle {}",
            indices.invoice_add_index, indices.invoice_settle_index
        );

        let mut liveness = interval(LND_LIVENESS_PING_INTERVAL);
        liveness.reset();
        loop {
            tokio::select! {
                message = stream.message() => {
                    let Some(invoice) = message? else {
                        return Err(anyhow::anyhow!("invoice stream closed by node"));
                    };
                    self.handle_invoice(invoice)?;
                }
                _ = liveness.tick() => {
                    // application-level liveness ping; streams carry no deadline
                    self.client.get_info().await?;
                }
            }
        }
    }

    fn handle_invoice(&self, invoice: lnrpc::Invoice) -> Result<(), Error> {
        let state = InvoiceState::try_from(invoice.state).unwrap_or(InvoiceState::Open);
        let payment_hash = hex::encode(&invoice.r_hash);

        // Terminal states advance the persisted indices and enter the
        // journal; open/accepted invoices only move the add index
        let indices = self.storage.get_lnd_resume_indices()?;
        let add_index = indices.invoice_add_index.max(invoice.add_index);
        let settle_index = indices.invoice_settle_index.max(invoice.settle_index);
        self.storage.set_invoice_indices(add_index, settle_index)?;

        if !matches!(state, InvoiceState::Settled | InvoiceState::Canceled) {
            trace!("Invoice {} now {}", payment_hash, state.as_str_name());
            return Ok(());
        }

        let source_timestamp = if invoice.settle_date > 0 {
            (invoice.settle_date as u64) * 1000
        } else {
            get_current_time_in_millis()
        };
        let op = TrackedOp::new(
            derive_group_id(&["invoice", &payment_hash]),
            SourceKind::LnInvoice,
            source_timestamp,
            OpPayload::LnInvoice {
                payment_hash,
                memo: invoice.memo.clone(),
                value_msats: invoice.value_msat.max(0) as u64,
                amt_paid_msats: invoice.amt_paid_msat.max(0) as u64,
                state: state.as_str_name().to_string(),
                add_index: invoice.add_index,
                settle_index: invoice.settle_index,
                payment_request: invoice.payment_request.clone(),
            },
        );
        self.emit(op)
    }

    // ---- payments ----

    async fn run_payment_stream(self: Arc<Self>) -> Result<(), Error> {
        // Catch up from the persisted creation index first
        let mut index = self.storage.get_lnd_resume_indices()?.payment_index;
        loop {
            let page = self.client.list_payments(index, CATCH_UP_PAGE).await?;
            if page.payments.is_empty() {
                break;
            }
            for payment in &page.payments {
                self.handle_payment(payment)?;
            }
            if page.last_index_offset <= index {
                break;
            }
            index = page.last_index_offset;
            self.storage.set_payment_index(index)?;
        }

        let mut stream = self.client.track_payments().await?;
        debug!("Payment stream live from index {}", index);

        let mut liveness = interval(LND_LIVENESS_PING_INTERVAL);
        liveness.reset();
        loop {
            tokio::select! {
                message = stream.message() => {
                    let Some(payment) = message? else {
                        return Err(anyhow::anyhow!("payment stream closed by node"));
                    };
                    self.handle_payment(&payment)?;
                    if payment.payment_index > 0 {
                        self.storage.set_payment_index(payment.payment_index)?;
                    }
                }
                _ = liveness.tick() => {
                    self.client.get_info().await?;
                }
            }
        }
    }

    fn handle_payment(&self, payment: &lnrpc::Payment) -> Result<(), Error> {
        let status = PaymentStatus::try_from(payment.status).unwrap_or(PaymentStatus::Unknown);
        if !matches!(status, PaymentStatus::Succeeded | PaymentStatus::Failed) {
            return Ok(());
        }
        let failure_reason =
            lnrpc::PaymentFailureReason::try_from(payment.failure_reason)
                .unwrap_or(lnrpc::PaymentFailureReason::FailureReasonNone);
        let op = TrackedOp::new(
            derive_group_id(&["payment", &payment.payment_hash]),
            SourceKind::LnPayment,
            (payment.creation_time_ns.max(0) as u64) / 1_000_000,
            OpPayload::LnPayment {
                payment_hash: payment.payment_hash.clone(),
                value_msats: payment.value_msat.max(0) as u64,
                fee_msats: payment.fee_msat.max(0) as u64,
                status: status.as_str_name().to_string(),
                payment_index: payment.payment_index,
                failure_reason: failure_reason.as_str_name().to_string(),
            },
        );
        self.emit(op)
    }

    // ---- forwards ----

    async fn run_forward_stream(self: Arc<Self>) -> Result<(), Error> {
        // Catch up from the persisted forward timestamp
        let resume_ns = self.storage.get_lnd_resume_indices()?.forward_timestamp_ns;
        let history = self
            .client
            .forwarding_history(resume_ns / 1_000_000_000, FORWARD_CATCH_UP_EVENTS)
            .await?;
        for event in &history.forwarding_events {
            if event.timestamp_ns <= resume_ns {
                continue;
            }
            self.emit_forward(
                event.chan_id_in,
                event.chan_id_out,
                event.amt_in_msat,
                event.amt_out_msat,
                event.timestamp_ns,
                true,
            )?;
            self.storage.set_forward_timestamp_ns(event.timestamp_ns)?;
        }

        let mut stream = self.client.subscribe_htlc_events().await?;
        debug!("HTLC event stream live");

        let mut liveness = interval(LND_LIVENESS_PING_INTERVAL);
        liveness.reset();
        loop {
            tokio::select! {
                message = stream.message() => {
                    let Some(event) = message? else {
                        return Err(anyhow::anyhow!("htlc stream closed by node"));
                    };
                    if event.event_type == htlc_event::EventType::Forward as i32 {
                        if let Some(htlc_event::Event::ForwardEvent(forward)) = &event.event {
                            if let Some(htlc) = &forward.info {
                                self.emit_forward(
                                    event.incoming_channel_id,
                                    event.outgoing_channel_id,
                                    htlc.incoming_amt_msat,
                                    htlc.outgoing_amt_msat,
                                    event.timestamp_ns,
                                    false,
                                )?;
                            }
                        }
                        if event.timestamp_ns > 0 {
                            self.storage.set_forward_timestamp_ns(event.timestamp_ns)?;
                        }
                    }
                }
                _ = liveness.tick() => {
                    self.client.get_info().await?;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_forward(
        &self,
        incoming_channel_id: u64,
        outgoing_channel_id: u64,
        incoming_amt_msats: u64,
        outgoing_amt_msats: u64,
        timestamp_ns: u64,
        settled: bool,
    ) -> Result<(), Error> {
        let op = TrackedOp::new(
            derive_group_id(&[
                "forward",
                &incoming_channel_id.to_string(),
                &outgoing_channel_id.to_string(),
                &timestamp_ns.to_string(),
            ]),
            SourceKind::LnForward,
            timestamp_ns / 1_000_000,
            OpPayload::LnForward {
                incoming_channel_id,
                outgoing_channel_id,
                incoming_amt_msats,
                outgoing_amt_msats,
                timestamp_ns,
                settled,
            },
        );
        self.emit(op)
    }
}
