// Conversion engine: turns an ingested event on one side of the bridge
// into ledger entries and an outbound action on the other side. Every
// handler is idempotent over the (group_id, ledger_type) uniqueness
// guard and returns a typed outcome the router writes back to the
// journal.

pub mod fees;
pub mod policy;

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use lightning_invoice::Bolt11Invoice;
use log::{debug, info, warn};

use v4vapp_common::account::Account;
use v4vapp_common::config::{BALANCE_ADJUSTMENT_MARKER, MSATS_PER_SAT};
use v4vapp_common::currency::{CrossRates, Unit};
use v4vapp_common::time::get_current_time_in_millis;
use v4vapp_common::utils::to_asset_string;

use crate::event::{OpPayload, SourceKind, TrackedOp};
use crate::hive::broadcast::{NotificationMessage, OutboundMessage, TransferMessage};
use crate::hive::watcher::memo_group_tag;
use crate::ledger::entry::{LedgerEntry, LedgerType};
use crate::ledger::Ledger;
use crate::lightning::address::{is_lightning_address, LnAddressResolver};
use crate::notify;
use crate::rebalance::{RebalanceDirection, Rebalancer};
use crate::storage::BridgeStorage;

use fees::{check_invoice_bounds, check_rate_limits, conversion_fee_msats, routing_fee_budget_msats};
use policy::Policy;

const COMPONENT: &str = "engine";

// Typed handler outcome, written to the TrackedOp by the router
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Processed,
    Refunded,
    Skipped(String),
    Failed(String),
}

// ---- Seams to the two outbound sides ----

#[derive(Debug, Clone, Copy)]
pub struct PaymentOutcome {
    pub paid_msats: u64,
    pub fee_msats: u64,
}

#[async_trait]
pub trait LightningPayer: Send + Sync {
    // Pay a BOLT-11 invoice within the given fee budget. An Err is a
    // permanent failure; transient transport trouble must be retried
    // inside the implementation.
    async fn pay_invoice(
        &self,
        payment_request: &str,
        amt_msats: Option<u64>,
        fee_limit_msats: u64,
    ) -> Result<PaymentOutcome, String>;
}

#[async_trait]
pub trait HiveOutbound: Send + Sync {
    async fn send_transfer(
        &self,
        to: &str,
        amount_milli: u64,
        unit: Unit,
        memo: String,
    ) -> Result<(), String>;

    async fn send_message(&self, message: &OutboundMessage) -> Result<(), String>;
}

#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn current(&self) -> Policy;
}

#[async_trait]
pub trait RateSource: Send + Sync {
    async fn current(&self) -> Result<CrossRates, String>;
}

#[async_trait]
impl PolicySource for policy::PolicyStore {
    async fn current(&self) -> Policy {
        policy::PolicyStore::current(self).await
    }
}

#[async_trait]
impl HiveOutbound for crate::hive::broadcast::HiveBroadcaster {
    async fn send_transfer(
        &self,
        to: &str,
        amount_milli: u64,
        unit: Unit,
        memo: String,
    ) -> Result<(), String> {
        crate::hive::broadcast::HiveBroadcaster::send_transfer(self, to, amount_milli, unit, memo)
            .await
            .map_err(|e| e.to_string())
    }

    async fn send_message(&self, message: &OutboundMessage) -> Result<(), String> {
        crate::hive::broadcast::HiveBroadcaster::send_message(self, message)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl RateSource for crate::rates::RateService {
    async fn current(&self) -> Result<CrossRates, String> {
        crate::rates::RateService::current(self)
            .await
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub server_account: String,
    // Special account whose marked transfers bypass the ledger
    pub operator_account: String,
    pub node_alias: String,
    pub bad_actors: HashSet<String>,
    pub dev_mode: bool,
    pub dev_allowlist: HashSet<String>,
}

pub struct ConversionEngine {
    ledger: Arc<Ledger>,
    storage: Arc<BridgeStorage>,
    policy: Arc<dyn PolicySource>,
    rates: Arc<dyn RateSource>,
    payer: Arc<dyn LightningPayer>,
    outbound: Arc<dyn HiveOutbound>,
    resolver: Option<Arc<LnAddressResolver>>,
    rebalancer: Option<Arc<Rebalancer>>,
    config: EngineConfig,
}

// What a deposit memo asks for
#[derive(Debug, Clone, PartialEq)]
enum DepositInstruction {
    PayInvoice(String),
    PayAddress(String),
    KeepSats,
    Unknown,
}

fn parse_deposit_memo(memo: &str) -> DepositInstruction {
    for token in memo.split_whitespace() {
        let lowered = token.to_lowercase();
        if lowered.starts_with("lnbc") || lowered.starts_with("lntb") {
            if Bolt11Invoice::from_str(token).is_ok() {
                return DepositInstruction::PayInvoice(token.to_string());
            }
        }
        if is_lightning_address(token) {
            return DepositInstruction::PayAddress(token.to_string());
        }
    }
    let lowered = memo.to_lowercase();
    if lowered.contains("#sats") || lowered.contains("#hbd") {
        return DepositInstruction::KeepSats;
    }
    DepositInstruction::Unknown
}

// Beneficiary encoded into invoices the bridge issues: "<user>" with
// an optional on-chain delivery flag
fn parse_invoice_beneficiary(memo: &str) -> Option<(String, Option<Unit>)> {
    let mut tokens = memo.split_whitespace();
    let user = tokens.next()?;
    if user.is_empty() || user.len() > 16 || user.contains('@') {
        return None;
    }
    let delivery = tokens.next().and_then(|flag| match flag.to_lowercase().as_str() {
        "#hive" => Some(Unit::Hive),
        "#hbd" => Some(Unit::Hbd),
        _ => None,
    });
    Some((user.to_string(), delivery))
}

impl ConversionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<Ledger>,
        storage: Arc<BridgeStorage>,
        policy: Arc<dyn PolicySource>,
        rates: Arc<dyn RateSource>,
        payer: Arc<dyn LightningPayer>,
        outbound: Arc<dyn HiveOutbound>,
        resolver: Option<Arc<LnAddressResolver>>,
        rebalancer: Option<Arc<Rebalancer>>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            storage,
            policy,
            rates,
            payer,
            outbound,
            resolver,
            rebalancer,
            config,
        })
    }

    // Dispatch one routed op to its flow
    pub async fn handle(&self, op: &TrackedOp) -> Outcome {
        match (&op.source_kind, &op.payload) {
            (SourceKind::HiveTransfer, OpPayload::HiveTransfer { .. }) => {
                self.handle_hive_transfer(op).await
            }
            (SourceKind::HiveCustomMessage, OpPayload::HiveCustomMessage { .. }) => {
                self.handle_custom_message(op).await
            }
            (SourceKind::LnInvoice, OpPayload::LnInvoice { .. }) => {
                self.handle_ln_invoice(op).await
            }
            (SourceKind::LnPayment, OpPayload::LnPayment { .. }) => {
                self.handle_ln_payment(op).await
            }
            (SourceKind::LnForward, OpPayload::LnForward { .. }) => {
                self.handle_ln_forward(op).await
            }
            (SourceKind::HiveWitnessReward, OpPayload::HiveWitnessReward { .. }) => {
                self.handle_witness_reward(op).await
            }
            (SourceKind::HiveLimitOrder, OpPayload::HiveLimitOrder { .. }) => {
                self.handle_limit_order(op).await
            }
            _ => Outcome::Failed(format!(
                "Payload shape does not match source kind {}",
                op.source_kind
            )),
        }
    }

    async fn user_notification(
        &self,
        to_account: &str,
        memo: &str,
        msats: u64,
        parent_group_id: &str,
    ) {
        let message = OutboundMessage::Notification(NotificationMessage::new(
            self.config.server_account.clone(),
            to_account,
            memo,
            msats,
            parent_group_id,
            crate::event::new_group_id(),
        ));
        if let Err(e) = self.outbound.send_message(&message).await {
            warn!("Could not notify {} on chain: {}", to_account, e);
        }
    }

    // Conversion volume already used by one user inside a window
    fn converted_msats_in_window(&self, user: &str, hours: u32) -> u64 {
        let from = get_current_time_in_millis().saturating_sub(hours as u64 * 3_600_000);
        match self
            .storage
            .postings_for_account(&Account::user_balance(user), Some(from), None)
        {
            Ok(postings) => postings
                .iter()
                .filter(|p| {
                    p.unit == Unit::Msats
                        && (p.entry_key.ends_with(":conv_hive_to_sats")
                            || p.entry_key.ends_with(":conv_sats_to_hive"))
                })
                .map(|p| p.signed_amount.unsigned_abs())
                .sum(),
            Err(e) => {
                warn!("Rate-limit window query failed for {}: {}", user, e);
                0
            }
        }
    }

    fn keepsats_balance_msats(&self, user: &str) -> i64 {
        self.ledger
            .balance_uncached(&Account::user_balance(user), None, None)
            .map(|details| {
                details
                    .per_unit_totals
                    .get(&Unit::Msats)
                    .copied()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    // ---- F1 / F4: on-chain deposit ----

    async fn handle_hive_transfer(&self, op: &TrackedOp) -> Outcome {
        let OpPayload::HiveTransfer {
            from,
            to,
            amount_milli,
            unit,
            memo,
            ..
        } = &op.payload
        else {
            return Outcome::Failed("payload mismatch".into());
        };

        // Echo of one of our own outbound transfers
        if from == &self.config.server_account {
            debug!("Observed outbound transfer echo {}", op.short_id);
            return Outcome::Processed;
        }
        if to != &self.config.server_account {
            return Outcome::Skipped("transfer does not involve the server account".into());
        }

        // F4: operator reconciliation backdoor, case-sensitive marker
        if from == &self.config.operator_account && memo.contains(BALANCE_ADJUSTMENT_MARKER) {
            info!(
                "Balance adjustment from {}: {} ({})",
                from,
                to_asset_string(*amount_milli, *unit),
                memo
            );
            notify::notify(
                COMPONENT,
                format!("Balance adjustment logged for {}: {}", from, memo),
            );
            return Outcome::Processed;
        }

        // Development-mode whitelist: silent drop, log only
        if self.config.dev_mode && !self.config.dev_allowlist.contains(from) {
            debug!("Dev mode: dropping transfer from non-allow-listed {}", from);
            return Outcome::Skipped("dev mode allow-list".into());
        }

        if self.config.bad_actors.contains(from) {
            warn!("Blocked transfer from listed bad actor {}", from);
            return Outcome::Skipped("sender is blacklisted".into());
        }

        // Replay guard: the deposit slot being filled means this group
        // was fully handled before
        match self.ledger.has_entry(&op.group_id, LedgerType::DepositHive) {
            Ok(true) => {
                debug!("Entries already posted for {}, no-op", op.short_id);
                return Outcome::Processed;
            }
            Ok(false) => {}
            Err(e) => return Outcome::Failed(e.to_string()),
        }

        let policy = self.policy.current().await;
        if !policy.gateway_hive_to_ln {
            self.user_notification(from, "Hive to Lightning gateway is disabled", 0, &op.group_id)
                .await;
            return Outcome::Skipped("hive->ln gateway disabled".into());
        }

        let rates = match self.rates.current().await {
            Ok(rates) => rates,
            Err(e) => return Outcome::Failed(format!("no rate snapshot: {}", e)),
        };
        let gross_msats = match rates.milli_to_msats(*amount_milli, *unit) {
            Ok(msats) => msats,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        let fee_msats = conversion_fee_msats(gross_msats, &policy);

        if let Err(reason) = check_rate_limits(&policy.rate_limits, gross_msats, |hours| {
            self.converted_msats_in_window(from, hours)
        }) {
            self.user_notification(from, &reason, 0, &op.group_id).await;
            return Outcome::Skipped(reason);
        }

        match parse_deposit_memo(memo) {
            DepositInstruction::Unknown => {
                self.refund_deposit(op, from, *amount_milli, *unit, &policy, rates, "no payment instruction in memo")
                    .await
            }
            DepositInstruction::KeepSats => {
                if gross_msats <= fee_msats {
                    return self
                        .refund_deposit(op, from, *amount_milli, *unit, &policy, rates, "amount does not cover the conversion fee")
                        .await;
                }
                if let Err(reason) = check_invoice_bounds(gross_msats, &policy) {
                    return self
                        .refund_deposit(op, from, *amount_milli, *unit, &policy, rates, &reason)
                        .await;
                }
                if let Err(e) = self
                    .post_deposit_conversion(op, from, *amount_milli, *unit, gross_msats, fee_msats, rates)
                    .await
                {
                    return Outcome::Failed(e);
                }
                info!(
                    "Credited {} keepsats to {} ({})",
                    (gross_msats - fee_msats) / MSATS_PER_SAT,
                    from,
                    op.short_id
                );
                self.schedule_rebalance(op, RebalanceDirection::SellBaseForQuote, *unit, *amount_milli, rates);
                Outcome::Processed
            }
            DepositInstruction::PayInvoice(invoice) => {
                self.deposit_and_pay(op, from, *amount_milli, *unit, gross_msats, fee_msats, invoice, &policy, rates)
                    .await
            }
            DepositInstruction::PayAddress(address) => {
                let Some(resolver) = &self.resolver else {
                    return self
                        .refund_deposit(op, from, *amount_milli, *unit, &policy, rates, "lightning addresses are not supported")
                        .await;
                };
                let send_msats = gross_msats.saturating_sub(fee_msats);
                if let Err(reason) = check_invoice_bounds(send_msats, &policy) {
                    return self
                        .refund_deposit(op, from, *amount_milli, *unit, &policy, rates, &reason)
                        .await;
                }
                match resolver.resolve(&address, send_msats).await {
                    Ok(invoice) => {
                        self.deposit_and_pay(op, from, *amount_milli, *unit, gross_msats, fee_msats, invoice, &policy, rates)
                            .await
                    }
                    Err(e) => {
                        self.refund_deposit(op, from, *amount_milli, *unit, &policy, rates, &format!("lightning address failed: {}", e))
                            .await
                    }
                }
            }
        }
    }

    // Deposit booked plus the cross-unit conversion pair and the fee.
    // Leaves the user holding (gross - fee) msats.
    async fn post_deposit_conversion(
        &self,
        op: &TrackedOp,
        user: &str,
        amount_milli: u64,
        unit: Unit,
        gross_msats: u64,
        fee_msats: u64,
        rates: CrossRates,
    ) -> Result<(), String> {
        let timestamp = op.source_timestamp;
        let entries = vec![
            LedgerEntry::new(
                &op.group_id,
                LedgerType::DepositHive,
                timestamp,
                format!("Customer deposit booked from {}", user),
                Account::treasury_hive(&self.config.server_account),
                Account::user_balance(user),
                amount_milli,
                unit,
                rates.snapshot(amount_milli, unit),
            ),
            LedgerEntry::new(
                &op.group_id,
                LedgerType::ConvContra,
                timestamp,
                format!("Conversion contra for {}", user),
                Account::user_balance(user),
                Account::conversion_offset(),
                amount_milli,
                unit,
                rates.snapshot(amount_milli, unit),
            ),
            LedgerEntry::new(
                &op.group_id,
                LedgerType::ConvHiveToSats,
                timestamp,
                format!("Conversion to sats for {}", user),
                Account::conversion_offset(),
                Account::user_balance(user),
                gross_msats,
                Unit::Msats,
                rates.snapshot(gross_msats, Unit::Msats),
            ),
            LedgerEntry::new(
                &op.group_id,
                LedgerType::FeeConversion,
                timestamp,
                format!("Conversion fee for {}", user),
                Account::user_balance(user),
                Account::conversion_fees(),
                fee_msats,
                Unit::Msats,
                rates.snapshot(fee_msats, Unit::Msats),
            ),
        ];
        self.ledger.post_all(entries).await.map(|_| ()).map_err(|e| e.to_string())
    }

    #[allow(clippy::too_many_arguments)]
    async fn deposit_and_pay(
        &self,
        op: &TrackedOp,
        user: &str,
        amount_milli: u64,
        unit: Unit,
        gross_msats: u64,
        fee_msats: u64,
        invoice: String,
        policy: &Policy,
        rates: CrossRates,
    ) -> Outcome {
        let decoded = match Bolt11Invoice::from_str(&invoice) {
            Ok(decoded) => decoded,
            Err(e) => {
                return self
                    .refund_deposit(op, user, amount_milli, unit, policy, rates, &format!("invoice does not parse: {}", e))
                    .await
            }
        };
        let invoice_msats = decoded
            .amount_milli_satoshis()
            .unwrap_or_else(|| gross_msats.saturating_sub(fee_msats));

        if let Err(reason) = check_invoice_bounds(invoice_msats, policy) {
            self.user_notification(user, &reason, invoice_msats, &op.group_id)
                .await;
            return self
                .refund_deposit(op, user, amount_milli, unit, policy, rates, &reason)
                .await;
        }
        if invoice_msats + fee_msats > gross_msats {
            let reason = format!(
                "deposit of {} covers only {} sats after fees, invoice wants {}",
                to_asset_string(amount_milli, unit),
                gross_msats.saturating_sub(fee_msats) / MSATS_PER_SAT,
                invoice_msats / MSATS_PER_SAT
            );
            return self
                .refund_deposit(op, user, amount_milli, unit, policy, rates, &reason)
                .await;
        }

        // A replayed op with a live in-flight payment needs an operator,
        // not a second payment
        let node_account = Account::ln_holdings(&self.config.node_alias);
        match self.storage.has_in_progress(&node_account, &op.group_id) {
            Ok(false) => {}
            Ok(true) => {
                return Outcome::Failed(
                    "a payment for this group is already in flight, operator intervention required"
                        .into(),
                )
            }
            Err(e) => return Outcome::Failed(e.to_string()),
        }

        let fee_budget = routing_fee_budget_msats(policy);
        if let Err(e) = self
            .storage
            .add_in_progress(&node_account, &op.group_id, invoice_msats)
        {
            return Outcome::Failed(e.to_string());
        }

        let amt_override = if decoded.amount_milli_satoshis().is_none() {
            Some(invoice_msats)
        } else {
            None
        };
        let payment = self
            .payer
            .pay_invoice(&invoice, amt_override, fee_budget)
            .await;

        match payment {
            Ok(outcome) => {
                // the in-flight marker stays until the books are written,
                // so a crash in between cannot trigger a second payment
                if let Err(e) = self
                    .post_deposit_conversion(op, user, amount_milli, unit, gross_msats, fee_msats, rates)
                    .await
                {
                    return Outcome::Failed(e);
                }
                let timestamp = op.source_timestamp;
                let mut entries = vec![LedgerEntry::new(
                    &op.group_id,
                    LedgerType::WithdrawLn,
                    timestamp,
                    format!("Lightning payout for {}", user),
                    Account::user_balance(user),
                    node_account.clone(),
                    outcome.paid_msats,
                    Unit::Msats,
                    rates.snapshot(outcome.paid_msats, Unit::Msats),
                )];
                if outcome.fee_msats > 0 {
                    entries.push(LedgerEntry::new(
                        &op.group_id,
                        LedgerType::FeeLnRouting,
                        timestamp,
                        "Lightning routing fee",
                        Account::ln_routing_fees(),
                        node_account.clone(),
                        outcome.fee_msats,
                        Unit::Msats,
                        rates.snapshot(outcome.fee_msats, Unit::Msats),
                    ));
                }
                if let Err(e) = self.ledger.post_all(entries).await {
                    return Outcome::Failed(e.to_string());
                }
                let _ = self.storage.clear_in_progress(&node_account, &op.group_id);
                info!(
                    "Paid {} sats for {} ({})",
                    outcome.paid_msats / MSATS_PER_SAT,
                    user,
                    op.short_id
                );
                self.schedule_rebalance(op, RebalanceDirection::SellBaseForQuote, unit, amount_milli, rates);
                Outcome::Processed
            }
            Err(reason) => {
                let _ = self.storage.clear_in_progress(&node_account, &op.group_id);
                warn!("LN payment failed permanently for {}: {}", op.short_id, reason);
                self.refund_deposit(op, user, amount_milli, unit, policy, rates, &format!("payment failed: {}", reason))
                    .await
            }
        }
    }

    // Return the on-chain value to the sender minus the configured
    // return fee, keyed to the same group id
    #[allow(clippy::too_many_arguments)]
    async fn refund_deposit(
        &self,
        op: &TrackedOp,
        user: &str,
        amount_milli: u64,
        unit: Unit,
        policy: &Policy,
        rates: CrossRates,
        reason: &str,
    ) -> Outcome {
        let timestamp = op.source_timestamp;
        let return_fee = policy.hive_return_fee_milli.min(amount_milli);
        let refund_milli = amount_milli - return_fee;

        let mut entries = vec![LedgerEntry::new(
            &op.group_id,
            LedgerType::DepositHive,
            timestamp,
            format!("Customer deposit booked from {}", user),
            Account::treasury_hive(&self.config.server_account),
            Account::user_balance(user),
            amount_milli,
            unit,
            rates.snapshot(amount_milli, unit),
        )];
        if refund_milli > 0 {
            entries.push(LedgerEntry::new(
                &op.group_id,
                LedgerType::WithdrawHive,
                timestamp,
                format!("Refund to {}: {}", user, reason),
                Account::user_balance(user),
                Account::treasury_hive(&self.config.server_account),
                refund_milli,
                unit,
                rates.snapshot(refund_milli, unit),
            ));
        }
        if return_fee > 0 {
            entries.push(LedgerEntry::new(
                &op.group_id,
                LedgerType::FeeConversion,
                timestamp,
                "Return fee withheld",
                Account::user_balance(user),
                Account::conversion_fees(),
                return_fee,
                unit,
                rates.snapshot(return_fee, unit),
            ));
        }
        if let Err(e) = self.ledger.post_all(entries).await {
            return Outcome::Failed(e.to_string());
        }

        if refund_milli > 0 {
            let memo = format!("Returned: {} {}", reason, memo_group_tag(&op.group_id));
            if let Err(e) = self
                .outbound
                .send_transfer(user, refund_milli, unit, memo)
                .await
            {
                // entries are posted; a stuck transfer needs an operator
                return Outcome::Failed(format!("refund transfer failed: {}", e));
            }
        }
        notify::notify(
            COMPONENT,
            format!("Refunded {} to {}: {}", to_asset_string(refund_milli, unit), user, reason),
        );
        Outcome::Refunded
    }

    fn schedule_rebalance(
        &self,
        op: &TrackedOp,
        direction: RebalanceDirection,
        unit: Unit,
        amount_milli: u64,
        rates: CrossRates,
    ) {
        if let Some(rebalancer) = &self.rebalancer {
            let base_asset = match unit {
                Unit::Hbd => "HBD",
                _ => "HIVE",
            };
            rebalancer.record_conversion_background(
                op.group_id.clone(),
                direction,
                base_asset.to_string(),
                amount_milli,
                rates,
            );
        }
    }

    // ---- F2: settled invoice -> on-chain credit ----

    async fn handle_ln_invoice(&self, op: &TrackedOp) -> Outcome {
        let OpPayload::LnInvoice {
            memo,
            amt_paid_msats,
            state,
            payment_hash,
            ..
        } = &op.payload
        else {
            return Outcome::Failed("payload mismatch".into());
        };

        if state == "CANCELED" {
            return Outcome::Skipped("invoice canceled".into());
        }
        let gross_msats = *amt_paid_msats;
        if gross_msats == 0 {
            return Outcome::Skipped("settled invoice carries no amount".into());
        }

        let Some((user, delivery)) = parse_invoice_beneficiary(memo) else {
            debug!("Invoice {} has no beneficiary memo", payment_hash);
            return Outcome::Skipped("not a bridge invoice".into());
        };

        match self.ledger.has_entry(&op.group_id, LedgerType::DepositLn) {
            Ok(true) => return Outcome::Processed,
            Ok(false) => {}
            Err(e) => return Outcome::Failed(e.to_string()),
        }

        let policy = self.policy.current().await;
        if !policy.gateway_ln_to_hive {
            notify::notify(
                COMPONENT,
                format!(
                    "Invoice {} settled while the LN to Hive gateway is disabled",
                    payment_hash
                ),
            );
            return Outcome::Skipped("ln->hive gateway disabled".into());
        }

        let rates = match self.rates.current().await {
            Ok(rates) => rates,
            Err(e) => return Outcome::Failed(format!("no rate snapshot: {}", e)),
        };
        let node_account = Account::ln_holdings(&self.config.node_alias);
        let timestamp = op.source_timestamp;
        let fee_msats = conversion_fee_msats(gross_msats, &policy).min(gross_msats);

        // The fee comes off the customer balance before any sats are
        // consumed; this ordering is load-bearing
        let mut entries = vec![
            LedgerEntry::new(
                &op.group_id,
                LedgerType::DepositLn,
                timestamp,
                format!("Lightning receipt for {}", user),
                node_account.clone(),
                Account::user_balance(&user),
                gross_msats,
                Unit::Msats,
                rates.snapshot(gross_msats, Unit::Msats),
            ),
            LedgerEntry::new(
                &op.group_id,
                LedgerType::FeeConversion,
                timestamp,
                format!("Conversion fee for {}", user),
                Account::user_balance(&user),
                Account::conversion_fees(),
                fee_msats,
                Unit::Msats,
                rates.snapshot(fee_msats, Unit::Msats),
            ),
        ];

        let remaining_msats = gross_msats - fee_msats;
        let mut outbound_transfer = None;
        if let Some(unit) = delivery {
            let hive_milli = match rates.msats_to_milli(remaining_msats, unit) {
                Ok(milli) => milli,
                Err(e) => return Outcome::Failed(e.to_string()),
            };
            if hive_milli > 0 {
                entries.push(LedgerEntry::new(
                    &op.group_id,
                    LedgerType::ConvSatsToHive,
                    timestamp,
                    format!("Conversion to {} for {}", unit.symbol(), user),
                    Account::user_balance(&user),
                    Account::conversion_offset(),
                    remaining_msats,
                    Unit::Msats,
                    rates.snapshot(remaining_msats, Unit::Msats),
                ));
                entries.push(LedgerEntry::new(
                    &op.group_id,
                    LedgerType::ConvContra,
                    timestamp,
                    format!("Conversion contra for {}", user),
                    Account::conversion_offset(),
                    Account::user_balance(&user),
                    hive_milli,
                    unit,
                    rates.snapshot(hive_milli, unit),
                ));
                entries.push(LedgerEntry::new(
                    &op.group_id,
                    LedgerType::WithdrawHive,
                    timestamp,
                    format!("On-chain delivery to {}", user),
                    Account::user_balance(&user),
                    Account::treasury_hive(&self.config.server_account),
                    hive_milli,
                    unit,
                    rates.snapshot(hive_milli, unit),
                ));
                outbound_transfer = Some((unit, hive_milli));
            }
        }

        if let Err(e) = self.ledger.post_all(entries).await {
            return Outcome::Failed(e.to_string());
        }

        if let Some((unit, hive_milli)) = outbound_transfer {
            let memo = format!(
                "Lightning deposit delivered {}",
                memo_group_tag(&op.group_id)
            );
            if let Err(e) = self
                .outbound
                .send_transfer(&user, hive_milli, unit, memo)
                .await
            {
                return Outcome::Failed(format!("delivery transfer failed: {}", e));
            }
            self.schedule_rebalance(op, RebalanceDirection::BuyBaseWithQuote, unit, hive_milli, rates);
        }

        info!(
            "Invoice {} settled: {} sats to {} ({})",
            payment_hash,
            gross_msats / MSATS_PER_SAT,
            user,
            op.short_id
        );
        Outcome::Processed
    }

    // ---- F3: signed internal transfer ----

    async fn handle_custom_message(&self, op: &TrackedOp) -> Outcome {
        let OpPayload::HiveCustomMessage {
            message_id,
            required_auth,
            json,
            ..
        } = &op.payload
        else {
            return Outcome::Failed("payload mismatch".into());
        };

        // Informational messages (including our own echoes) are never
        // acted on
        if message_id.ends_with("_notification")
            || json.get("notification").and_then(|v| v.as_bool()) == Some(true)
        {
            return Outcome::Skipped("informational message".into());
        }

        let message: TransferMessage = match serde_json::from_value(json.clone()) {
            Ok(message) => message,
            Err(e) => return Outcome::Skipped(format!("undecodable message: {}", e)),
        };
        // Our own server-signed transfer envelopes route back here too
        if *required_auth == self.config.server_account {
            return Outcome::Skipped("own outbound envelope".into());
        }

        let Some(to_account) = message.to_account.clone() else {
            return Outcome::Skipped("message names no recipient".into());
        };
        let Some(amount_msats) = message.msats.or(message.sats.map(|s| s * MSATS_PER_SAT)) else {
            return Outcome::Skipped("message carries no amount".into());
        };

        // from must match the on-chain signing authority
        if message.from_account != *required_auth {
            self.user_notification(
                required_auth,
                "Transfer sender does not match signing authority",
                amount_msats,
                &op.group_id,
            )
            .await;
            return Outcome::Skipped("sender/authority mismatch".into());
        }

        if self.config.bad_actors.contains(&message.from_account) {
            return Outcome::Skipped("sender is blacklisted".into());
        }

        match self.ledger.has_entry(&op.group_id, LedgerType::InternalTransfer) {
            Ok(true) => return Outcome::Processed,
            Ok(false) => {}
            Err(e) => return Outcome::Failed(e.to_string()),
        }

        // Both ends need a registered balance; the recipient must have
        // appeared in the ledger before
        let recipient_known = self
            .ledger
            .list_accounts()
            .map(|accounts| accounts.contains(&Account::user_balance(&to_account)))
            .unwrap_or(false);
        if !recipient_known {
            self.user_notification(
                &message.from_account,
                &format!("Unknown recipient {}", to_account),
                amount_msats,
                &op.group_id,
            )
            .await;
            return Outcome::Skipped(format!("unknown recipient {}", to_account));
        }

        let balance = self.keepsats_balance_msats(&message.from_account);
        if balance < amount_msats as i64 {
            self.user_notification(
                &message.from_account,
                "Insufficient Keepsats balance",
                amount_msats,
                &op.group_id,
            )
            .await;
            return Outcome::Skipped("insufficient balance".into());
        }

        let rates = match self.rates.current().await {
            Ok(rates) => rates,
            Err(e) => return Outcome::Failed(format!("no rate snapshot: {}", e)),
        };
        let entry = LedgerEntry::new(
            &op.group_id,
            LedgerType::InternalTransfer,
            op.source_timestamp,
            format!("Internal transfer {} -> {}", message.from_account, to_account),
            Account::user_balance(&message.from_account),
            Account::user_balance(&to_account),
            amount_msats,
            Unit::Msats,
            rates.snapshot(amount_msats, Unit::Msats),
        );
        if let Err(e) = self.ledger.post(entry).await {
            return Outcome::Failed(e.to_string());
        }
        info!(
            "Internal transfer of {} sats from {} to {} ({})",
            amount_msats / MSATS_PER_SAT,
            message.from_account,
            to_account,
            op.short_id
        );
        Outcome::Processed
    }

    // ---- Audit-only kinds ----

    async fn handle_ln_payment(&self, op: &TrackedOp) -> Outcome {
        let OpPayload::LnPayment {
            payment_hash,
            value_msats,
            status,
            failure_reason,
            ..
        } = &op.payload
        else {
            return Outcome::Failed("payload mismatch".into());
        };
        if status == "FAILED" {
            notify::notify(
                COMPONENT,
                format!(
                    "Payment {} of {} sats failed: {}",
                    payment_hash,
                    value_msats / MSATS_PER_SAT,
                    failure_reason
                ),
            );
        } else {
            debug!("Payment {} observed as {}", payment_hash, status);
        }
        Outcome::Processed
    }

    async fn handle_ln_forward(&self, op: &TrackedOp) -> Outcome {
        let OpPayload::LnForward {
            incoming_amt_msats,
            outgoing_amt_msats,
            ..
        } = &op.payload
        else {
            return Outcome::Failed("payload mismatch".into());
        };
        debug!(
            "Forwarded {} sats, earned {} msats ({})",
            outgoing_amt_msats / MSATS_PER_SAT,
            incoming_amt_msats.saturating_sub(*outgoing_amt_msats),
            op.short_id
        );
        Outcome::Processed
    }

    async fn handle_witness_reward(&self, op: &TrackedOp) -> Outcome {
        let OpPayload::HiveWitnessReward { witness, vests, .. } = &op.payload else {
            return Outcome::Failed("payload mismatch".into());
        };
        notify::notify(
            COMPONENT,
            format!("Witness reward for {}: {} VESTS", witness, *vests as f64 / 1e6),
        );
        Outcome::Processed
    }

    async fn handle_limit_order(&self, op: &TrackedOp) -> Outcome {
        let OpPayload::HiveLimitOrder {
            owner,
            sold_milli,
            sold_unit,
            received_milli,
            received_unit,
            ..
        } = &op.payload
        else {
            return Outcome::Failed("payload mismatch".into());
        };
        notify::notify(
            COMPONENT,
            format!(
                "Market order filled for {}: sold {} for {}",
                owner,
                to_asset_string(*sold_milli, *sold_unit),
                to_asset_string(*received_milli, *received_unit)
            ),
        );
        Outcome::Processed
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex as StdMutex;

    pub struct StaticPolicy(pub Policy);

    #[async_trait]
    impl PolicySource for StaticPolicy {
        async fn current(&self) -> Policy {
            self.0.clone()
        }
    }

    pub struct StaticRates(pub CrossRates);

    #[async_trait]
    impl RateSource for StaticRates {
        async fn current(&self) -> Result<CrossRates, String> {
            Ok(self.0)
        }
    }

    // Scripted Lightning payer
    pub struct MockPayer {
        pub fail_with: Option<String>,
        pub routing_fee_msats: u64,
        pub payments: StdMutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl LightningPayer for MockPayer {
        async fn pay_invoice(
            &self,
            payment_request: &str,
            amt_msats: Option<u64>,
            _fee_limit_msats: u64,
        ) -> Result<PaymentOutcome, String> {
            if let Some(reason) = &self.fail_with {
                return Err(reason.clone());
            }
            let decoded = Bolt11Invoice::from_str(payment_request)
                .map_err(|e| format!("bad invoice: {}", e))?;
            let paid = decoded
                .amount_milli_satoshis()
                .or(amt_msats)
                .ok_or_else(|| "amountless invoice without override".to_string())?;
            self.payments
                .lock()
                .unwrap()
                .push((payment_request.to_string(), paid));
            Ok(PaymentOutcome {
                paid_msats: paid,
                fee_msats: self.routing_fee_msats,
            })
        }
    }

    #[derive(Default)]
    pub struct RecordingOutbound {
        pub transfers: StdMutex<Vec<(String, u64, Unit, String)>>,
        pub messages: StdMutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl HiveOutbound for RecordingOutbound {
        async fn send_transfer(
            &self,
            to: &str,
            amount_milli: u64,
            unit: Unit,
            memo: String,
        ) -> Result<(), String> {
            self.transfers
                .lock()
                .unwrap()
                .push((to.to_string(), amount_milli, unit, memo));
            Ok(())
        }

        async fn send_message(&self, message: &OutboundMessage) -> Result<(), String> {
            self.messages.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::event::{new_group_id, SourceKind};
    use std::sync::Mutex as StdMutex;

    // Build a signed invoice for the payment-path tests
    fn test_invoice(msats: u64) -> String {
        use bitcoin::hashes::{sha256, Hash};
        use bitcoin::secp256k1::{Secp256k1, SecretKey};
        use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};

        let secp = Secp256k1::new();
        let key = SecretKey::from_slice(&[0x41; 32]).unwrap();
        InvoiceBuilder::new(Currency::Bitcoin)
            .description("bridge test".into())
            .payment_hash(sha256::Hash::from_slice(&[0x01; 32]).unwrap())
            .payment_secret(PaymentSecret([0x02; 32]))
            .amount_milli_satoshis(msats)
            .duration_since_epoch(std::time::Duration::from_secs(1_700_000_000))
            .min_final_cltv_expiry_delta(18)
            .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &key))
            .unwrap()
            .to_string()
    }

    fn rates() -> CrossRates {
        CrossRates {
            sats_per_hive: 200.0,
            sats_per_hbd: 800.0,
            usd_per_hive: 0.2,
            usd_per_hbd: 1.0,
        }
    }

    struct Harness {
        engine: Arc<ConversionEngine>,
        ledger: Arc<Ledger>,
        outbound: Arc<RecordingOutbound>,
        payer: Arc<MockPayer>,
        _dir: tempfile::TempDir,
    }

    fn harness_with(policy: Policy, payer: MockPayer) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(BridgeStorage::open(dir.path().to_str().unwrap()).unwrap());
        let ledger = Arc::new(Ledger::new(storage.clone()));
        let outbound = Arc::new(RecordingOutbound::default());
        let payer = Arc::new(payer);
        let config = EngineConfig {
            server_account: "v4vapp".into(),
            operator_account: "v4v-app".into(),
            node_alias: "voltage".into(),
            bad_actors: ["mallory".to_string()].into_iter().collect(),
            dev_mode: false,
            dev_allowlist: HashSet::new(),
        };
        let engine = ConversionEngine::new(
            ledger.clone(),
            storage,
            Arc::new(StaticPolicy(policy)),
            Arc::new(StaticRates(rates())),
            payer.clone(),
            outbound.clone(),
            None,
            None,
            config,
        );
        Harness {
            engine,
            ledger,
            outbound,
            payer,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(
            Policy {
                conv_fee_percent: 0.5,
                conv_fee_sats: 100,
                hive_return_fee_milli: 200,
                min_invoice_sats: 100,
                max_invoice_sats: 100_000,
                ..Policy::default()
            },
            MockPayer {
                fail_with: None,
                routing_fee_msats: 1_000,
                payments: StdMutex::new(Vec::new()),
            },
        )
    }

    fn routed(mut op: TrackedOp) -> TrackedOp {
        op.mark_routed().unwrap();
        op
    }

    fn hive_transfer(from: &str, to: &str, amount_milli: u64, memo: &str) -> TrackedOp {
        routed(TrackedOp::new(
            new_group_id(),
            SourceKind::HiveTransfer,
            1_700_000_000_000,
            OpPayload::HiveTransfer {
                from: from.into(),
                to: to.into(),
                amount_milli,
                unit: Unit::Hive,
                memo: memo.into(),
                block_num: 93_000_000,
                trx_id: "abcd".into(),
                op_index: 0,
            },
        ))
    }

    #[tokio::test]
    async fn keepsats_deposit_posts_the_conversion_set() {
        let h = harness();
        let op = hive_transfer("alice", "v4vapp", 25_000, "deposit #sats");
        let outcome = h.engine.handle(&op).await;
        assert_eq!(outcome, Outcome::Processed);

        let entries = h.ledger.entries_for_group(&op.group_id).unwrap();
        assert_eq!(entries.len(), 4);
        // 25 HIVE at 200 sats = 5000 sats gross; fee 0.5% + 100 = 125 sats
        let gross = entries
            .iter()
            .find(|e| e.ledger_type == LedgerType::ConvHiveToSats)
            .unwrap();
        assert_eq!(gross.amount, 5_000_000);
        let fee = entries
            .iter()
            .find(|e| e.ledger_type == LedgerType::FeeConversion)
            .unwrap();
        assert_eq!(fee.amount, 125_000);

        // user keeps gross - fee
        let balance = h
            .ledger
            .balance_uncached(&Account::user_balance("alice"), None, None)
            .unwrap();
        assert_eq!(balance.per_unit_totals[&Unit::Msats], 4_875_000);
        assert_eq!(balance.per_unit_totals[&Unit::Hive], 0);
    }

    #[tokio::test]
    async fn invoice_deposit_pays_and_posts_six_entries() {
        let h = harness();
        let memo = format!("please pay {}", test_invoice(4_500_000));
        let op = hive_transfer("alice", "v4vapp", 25_000, &memo);
        let outcome = h.engine.handle(&op).await;
        assert_eq!(outcome, Outcome::Processed);

        // the 4500 sat invoice went out once
        let payments = h.payer.payments.lock().unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].1, 4_500_000);
        drop(payments);

        let entries = h.ledger.entries_for_group(&op.group_id).unwrap();
        assert_eq!(entries.len(), 6);
        let amount_of = |lt: LedgerType| {
            entries
                .iter()
                .find(|e| e.ledger_type == lt)
                .map(|e| e.amount)
                .unwrap_or_else(|| panic!("missing {:?} entry", lt))
        };
        assert_eq!(amount_of(LedgerType::DepositHive), 25_000);
        assert_eq!(amount_of(LedgerType::ConvContra), 25_000);
        assert_eq!(amount_of(LedgerType::ConvHiveToSats), 5_000_000);
        assert_eq!(amount_of(LedgerType::FeeConversion), 125_000);
        assert_eq!(amount_of(LedgerType::WithdrawLn), 4_500_000);
        assert_eq!(amount_of(LedgerType::FeeLnRouting), 1_000);

        // the user's HIVE leg nets to zero, the remainder stays as sats
        let balance = h
            .ledger
            .balance_uncached(&Account::user_balance("alice"), None, None)
            .unwrap();
        assert_eq!(balance.per_unit_totals[&Unit::Hive], 0);
        // 5000 gross - 125 fee - 4500 paid = 375 sats keepsats remainder
        assert_eq!(balance.per_unit_totals[&Unit::Msats], 375_000);
    }

    #[tokio::test]
    async fn replayed_deposit_is_a_noop() {
        let h = harness();
        let memo = test_invoice(4_500_000);
        let op = hive_transfer("alice", "v4vapp", 25_000, &memo);
        assert_eq!(h.engine.handle(&op).await, Outcome::Processed);
        let entries_before = h.ledger.entries_for_group(&op.group_id).unwrap().len();

        assert_eq!(h.engine.handle(&op).await, Outcome::Processed);
        let entries_after = h.ledger.entries_for_group(&op.group_id).unwrap().len();
        assert_eq!(entries_before, entries_after);
        // no second payment went out
        assert_eq!(h.payer.payments.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_payment_refunds_minus_return_fee() {
        let h = harness_with(
            Policy {
                hive_return_fee_milli: 200,
                ..Policy::default()
            },
            MockPayer {
                fail_with: Some("no route".into()),
                routing_fee_msats: 0,
                payments: StdMutex::new(Vec::new()),
            },
        );
        let memo = test_invoice(4_500_000);
        let op = hive_transfer("alice", "v4vapp", 25_000, &memo);
        let outcome = h.engine.handle(&op).await;
        assert_eq!(outcome, Outcome::Refunded);

        // 25.000 HIVE minus the 0.200 return fee goes back on chain,
        // keyed to the same group id
        let transfers = h.outbound.transfers.lock().unwrap();
        assert_eq!(transfers.len(), 1);
        let (to, amount, unit, memo) = &transfers[0];
        assert_eq!(to, "alice");
        assert_eq!(*amount, 24_800);
        assert_eq!(*unit, Unit::Hive);
        assert!(memo.contains(&format!("(v4v:{})", op.group_id)));
        drop(transfers);

        // the user liability nets to zero after the refund
        let balance = h
            .ledger
            .balance_uncached(&Account::user_balance("alice"), None, None)
            .unwrap();
        assert_eq!(balance.per_unit_totals[&Unit::Hive], 0);
    }

    #[tokio::test]
    async fn gateway_disabled_skips_with_notification() {
        let h = harness_with(
            Policy {
                gateway_hive_to_ln: false,
                ..Policy::default()
            },
            MockPayer {
                fail_with: None,
                routing_fee_msats: 0,
                payments: StdMutex::new(Vec::new()),
            },
        );
        let op = hive_transfer("alice", "v4vapp", 25_000, "#sats");
        let outcome = h.engine.handle(&op).await;
        assert!(matches!(outcome, Outcome::Skipped(_)));
        assert!(h.ledger.entries_for_group(&op.group_id).unwrap().is_empty());
        let messages = h.outbound.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn bad_actor_is_blocked_without_entries() {
        let h = harness();
        let op = hive_transfer("mallory", "v4vapp", 25_000, "#sats");
        assert!(matches!(h.engine.handle(&op).await, Outcome::Skipped(_)));
        assert!(h.ledger.entries_for_group(&op.group_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn balance_adjustment_backdoor_posts_nothing() {
        let h = harness();
        let op = hive_transfer(
            "v4v-app",
            "v4vapp",
            1_000,
            "Balance adjustment — reconcile #T1",
        );
        assert_eq!(h.engine.handle(&op).await, Outcome::Processed);
        assert!(h.ledger.entries_for_group(&op.group_id).unwrap().is_empty());

        // the marker is case-sensitive
        let op = hive_transfer("v4v-app", "v4vapp", 1_000, "balance adjustment");
        let outcome = h.engine.handle(&op).await;
        assert_ne!(outcome, Outcome::Processed);
    }

    #[tokio::test]
    async fn internal_transfer_moves_keepsats() {
        let h = harness();
        // fund alice with a keepsats deposit first
        let deposit = hive_transfer("alice", "v4vapp", 25_000, "#sats");
        assert_eq!(h.engine.handle(&deposit).await, Outcome::Processed);
        // bob needs a registered balance to receive
        let bob_deposit = hive_transfer("bob", "v4vapp", 1_000, "#sats");
        assert_eq!(h.engine.handle(&bob_deposit).await, Outcome::Processed);

        let op = routed(TrackedOp::new(
            new_group_id(),
            SourceKind::HiveCustomMessage,
            1_700_000_100_000,
            OpPayload::HiveCustomMessage {
                message_id: "v4vapp_transfer".into(),
                required_auth: "alice".into(),
                json: serde_json::json!({
                    "from_account": "alice",
                    "to_account": "bob",
                    "memo": "thanks",
                    "msats": 1_000_000,
                    "group_id": new_group_id(),
                }),
                block_num: 93_000_001,
                trx_id: "beef".into(),
                op_index: 0,
            },
        ));
        assert_eq!(h.engine.handle(&op).await, Outcome::Processed);

        let alice = h
            .ledger
            .balance_uncached(&Account::user_balance("alice"), None, None)
            .unwrap();
        let bob = h
            .ledger
            .balance_uncached(&Account::user_balance("bob"), None, None)
            .unwrap();
        assert_eq!(alice.per_unit_totals[&Unit::Msats], 3_875_000);
        // bob: his own deposit (200 sats gross - 101 fee) + 1000 transferred
        assert_eq!(bob.per_unit_totals[&Unit::Msats], 99_000 + 1_000_000);
    }

    #[tokio::test]
    async fn insufficient_balance_transfer_notifies_sender() {
        let h = harness();
        // alice ends up holding ~1094 sats, well short of the 5000 below
        let deposit = hive_transfer("alice", "v4vapp", 6_000, "#sats");
        assert_eq!(h.engine.handle(&deposit).await, Outcome::Processed);
        let bob_deposit = hive_transfer("bob", "v4vapp", 6_000, "#sats");
        assert_eq!(h.engine.handle(&bob_deposit).await, Outcome::Processed);

        let op = routed(TrackedOp::new(
            new_group_id(),
            SourceKind::HiveCustomMessage,
            1_700_000_100_000,
            OpPayload::HiveCustomMessage {
                message_id: "v4vapp_transfer".into(),
                required_auth: "alice".into(),
                json: serde_json::json!({
                    "from_account": "alice",
                    "to_account": "bob",
                    "memo": "too much",
                    "msats": 5_000_000,
                    "group_id": new_group_id(),
                }),
                block_num: 93_000_001,
                trx_id: "beef".into(),
                op_index: 0,
            },
        ));
        let outcome = h.engine.handle(&op).await;
        assert!(matches!(outcome, Outcome::Skipped(_)));

        // zero transfer entries, one outbound notification linking back
        let entries = h.ledger.entries_for_group(&op.group_id).unwrap();
        assert!(entries.is_empty());
        let messages = h.outbound.messages.lock().unwrap();
        let OutboundMessage::Notification(notification) = messages.last().unwrap() else {
            panic!("expected a notification message");
        };
        assert_eq!(notification.memo, "Insufficient Keepsats balance");
        assert_eq!(notification.parent_group_id, op.group_id);
        assert_eq!(notification.to_account, "alice");
    }

    #[tokio::test]
    async fn settled_invoice_credits_and_delivers_on_chain() {
        let h = harness();
        let op = routed(TrackedOp::new(
            new_group_id(),
            SourceKind::LnInvoice,
            1_700_000_200_000,
            OpPayload::LnInvoice {
                payment_hash: "ff".repeat(32),
                memo: "carol #HIVE".into(),
                value_msats: 10_000_000,
                amt_paid_msats: 10_000_000,
                state: "SETTLED".into(),
                add_index: 7,
                settle_index: 3,
                payment_request: "lnbc...".into(),
            },
        ));
        assert_eq!(h.engine.handle(&op).await, Outcome::Processed);

        let entries = h.ledger.entries_for_group(&op.group_id).unwrap();
        // receipt, fee, conversion pair, withdrawal
        assert_eq!(entries.len(), 5);
        // fee comes off before sats are consumed: 0.5% of 10000 sats
        // + 100 = 150 sats; remainder 9850 sats = 49.250 HIVE at 200
        let transfers = h.outbound.transfers.lock().unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].0, "carol");
        assert_eq!(transfers[0].1, 49_250);
        drop(transfers);

        let carol = h
            .ledger
            .balance_uncached(&Account::user_balance("carol"), None, None)
            .unwrap();
        assert_eq!(carol.per_unit_totals[&Unit::Msats], 0);
        assert_eq!(carol.per_unit_totals[&Unit::Hive], 0);
    }

    #[tokio::test]
    async fn settled_invoice_keepsats_posts_no_withdrawal() {
        let h = harness();
        let op = routed(TrackedOp::new(
            new_group_id(),
            SourceKind::LnInvoice,
            1_700_000_200_000,
            OpPayload::LnInvoice {
                payment_hash: "ee".repeat(32),
                memo: "carol".into(),
                value_msats: 10_000_000,
                amt_paid_msats: 10_000_000,
                state: "SETTLED".into(),
                add_index: 8,
                settle_index: 4,
                payment_request: "lnbc...".into(),
            },
        ));
        assert_eq!(h.engine.handle(&op).await, Outcome::Processed);
        let entries = h.ledger.entries_for_group(&op.group_id).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(h.outbound.transfers.lock().unwrap().is_empty());
        let carol = h
            .ledger
            .balance_uncached(&Account::user_balance("carol"), None, None)
            .unwrap();
        assert_eq!(carol.per_unit_totals[&Unit::Msats], 9_850_000);
    }

    #[tokio::test]
    async fn unknown_memo_is_refunded() {
        let h = harness();
        let op = hive_transfer("alice", "v4vapp", 25_000, "hello there");
        assert_eq!(h.engine.handle(&op).await, Outcome::Refunded);
        let transfers = h.outbound.transfers.lock().unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].1, 24_800);
    }

    #[tokio::test]
    async fn dev_mode_drops_unlisted_senders_silently() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(BridgeStorage::open(dir.path().to_str().unwrap()).unwrap());
        let ledger = Arc::new(Ledger::new(storage.clone()));
        let outbound = Arc::new(RecordingOutbound::default());
        let engine = ConversionEngine::new(
            ledger.clone(),
            storage,
            Arc::new(StaticPolicy(Policy::default())),
            Arc::new(StaticRates(rates())),
            Arc::new(MockPayer {
                fail_with: None,
                routing_fee_msats: 0,
                payments: StdMutex::new(Vec::new()),
            }),
            outbound.clone(),
            None,
            None,
            EngineConfig {
                server_account: "v4vapp-dev".into(),
                operator_account: "v4v-app".into(),
                node_alias: "voltage".into(),
                bad_actors: HashSet::new(),
                dev_mode: true,
                dev_allowlist: ["tester".to_string()].into_iter().collect(),
            },
        );

        let op = hive_transfer("alice", "v4vapp-dev", 25_000, "#sats");
        assert!(matches!(engine.handle(&op).await, Outcome::Skipped(_)));
        assert!(ledger.entries_for_group(&op.group_id).unwrap().is_empty());
        // silent: no outbound notification either
        assert!(outbound.messages.lock().unwrap().is_empty());

        let op = hive_transfer("tester", "v4vapp-dev", 25_000, "#sats");
        assert_eq!(engine.handle(&op).await, Outcome::Processed);
    }
}
