// Exchange rebalancer. Conversions feed a persistent pending pool per
// (base, quote, direction, exchange); a market order goes out only when
// both the lot-size and notional minima clear. Opposing pools are
// netted so only the residual trades. Everything here is best-effort
// background work: a failed trade never blocks or fails the
// user-visible conversion.

pub mod exchange;

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use v4vapp_common::account::Account;
use v4vapp_common::config::MILLI_PER_COIN;
use v4vapp_common::currency::{CrossRates, Unit};
use v4vapp_common::time::{get_current_time_in_millis, TimestampMillis};

use crate::event::new_group_id;
use crate::ledger::entry::{LedgerEntry, LedgerType};
use crate::ledger::Ledger;
use crate::storage::{BridgeStorage, StorageError};

use exchange::{new_client_order_id, ExchangeAdapter, ExchangeError, TradeResult};

// 1 BTC = 100_000_000 sats = 1e11 msats
const MSATS_PER_BTC: f64 = 100_000_000_000.0;

#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RebalanceDirection {
    SellBaseForQuote,
    BuyBaseWithQuote,
}

impl RebalanceDirection {
    pub fn opposite(&self) -> Self {
        match self {
            RebalanceDirection::SellBaseForQuote => RebalanceDirection::BuyBaseWithQuote,
            RebalanceDirection::BuyBaseWithQuote => RebalanceDirection::SellBaseForQuote,
        }
    }
}

// Per-(base, quote, direction, exchange) accumulator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRebalance {
    pub base_asset: String,
    pub quote_asset: String,
    pub direction: RebalanceDirection,
    pub exchange: String,
    // Base units (display units, e.g. whole HIVE)
    pub pending_qty: f64,
    // Quote-asset estimate of the pending quantity
    pub pending_quote_value: f64,
    // Refreshed from the exchange on each touch, best-effort
    pub min_qty_threshold: f64,
    pub min_notional_threshold: f64,
    pub transaction_count: u64,
    pub transaction_ids: Vec<String>,
    pub total_executed_qty: f64,
    pub execution_count: u64,
    // Optimistic concurrency: background tasks may race on this row
    pub version: u64,
}

impl PendingRebalance {
    pub fn new(
        base_asset: &str,
        quote_asset: &str,
        direction: RebalanceDirection,
        exchange: &str,
    ) -> Self {
        Self {
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
            direction,
            exchange: exchange.to_string(),
            pending_qty: 0.0,
            pending_quote_value: 0.0,
            min_qty_threshold: 0.0,
            min_notional_threshold: 0.0,
            transaction_count: 0,
            transaction_ids: Vec::new(),
            total_executed_qty: 0.0,
            execution_count: 0,
            version: 0,
        }
    }

    pub fn pool_key(&self) -> String {
        pool_key(&self.base_asset, &self.quote_asset, self.direction, &self.exchange)
    }

    pub fn pair(&self) -> String {
        format!("{}{}", self.base_asset, self.quote_asset)
    }

    // Either threshold falling below current pending triggers eligibility
    pub fn is_eligible(&self) -> bool {
        self.pending_qty > 0.0
            && self.pending_qty >= self.min_qty_threshold
            && self.pending_quote_value >= self.min_notional_threshold
    }
}

pub fn pool_key(
    base_asset: &str,
    quote_asset: &str,
    direction: RebalanceDirection,
    exchange: &str,
) -> String {
    format!("{}:{}:{}:{}", base_asset, quote_asset, direction, exchange)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceResult {
    pub pool_key: String,
    pub timestamp: TimestampMillis,
    pub group_ids: Vec<String>,
    pub executed_qty: f64,
    pub quote_received: f64,
    pub avg_price: f64,
    pub fee: f64,
}

pub struct Rebalancer {
    storage: Arc<BridgeStorage>,
    ledger: Arc<Ledger>,
    exchange: Arc<dyn ExchangeAdapter>,
    quote_asset: String,
}

impl Rebalancer {
    pub fn new(
        storage: Arc<BridgeStorage>,
        ledger: Arc<Ledger>,
        exchange: Arc<dyn ExchangeAdapter>,
        quote_asset: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            ledger,
            exchange,
            quote_asset,
        })
    }

    // Fire-and-forget entry point used by the conversion engine
    pub fn record_conversion_background(
        self: &Arc<Self>,
        group_id: String,
        direction: RebalanceDirection,
        base_asset: String,
        base_qty_milli: u64,
        conv: CrossRates,
    ) {
        let zelf = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = zelf
                .record_conversion(&group_id, direction, &base_asset, base_qty_milli, conv)
                .await
            {
                warn!("Rebalance accumulation failed for {}: {}", group_id, e);
            }
        });
    }

    // Returns true when a trade was executed
    pub async fn record_conversion(
        &self,
        group_id: &str,
        direction: RebalanceDirection,
        base_asset: &str,
        base_qty_milli: u64,
        conv: CrossRates,
    ) -> Result<bool, RebalanceError> {
        let qty = base_qty_milli as f64 / MILLI_PER_COIN as f64;
        let mut attempts = 0;
        loop {
            match self
                .try_record(group_id, direction, base_asset, qty, conv)
                .await
            {
                Err(RebalanceError::Storage(StorageError::Conflict(key))) if attempts < 3 => {
                    attempts += 1;
                    debug!("Pending rebalance {} raced, retrying", key);
                }
                other => return other,
            }
        }
    }

    async fn try_record(
        &self,
        group_id: &str,
        direction: RebalanceDirection,
        base_asset: &str,
        qty: f64,
        conv: CrossRates,
    ) -> Result<bool, RebalanceError> {
        let key = pool_key(base_asset, &self.quote_asset, direction, self.exchange.name());
        let (mut row, expected) = match self.storage.load_pending_rebalance(&key)? {
            Some((row, raw)) => (row, Some(raw)),
            None => (
                PendingRebalance::new(base_asset, &self.quote_asset, direction, self.exchange.name()),
                None,
            ),
        };
        let pair = row.pair();

        // Refresh thresholds; on connection error proceed with cached ones
        match self.exchange.get_min_order_requirements(&pair).await {
            Ok(requirements) => {
                row.min_qty_threshold = requirements.min_qty;
                row.min_notional_threshold = requirements.min_notional;
            }
            Err(e) => debug!("Threshold refresh failed for {}: {}", pair, e),
        }
        let price = match self.exchange.get_price(&pair).await {
            Ok(price) => price,
            Err(e) => {
                debug!("Price fetch failed for {}: {}", pair, e);
                if row.pending_qty > 0.0 {
                    row.pending_quote_value / row.pending_qty
                } else {
                    0.0
                }
            }
        };

        row.pending_qty += qty;
        row.pending_quote_value += qty * price;
        row.transaction_count += 1;
        row.transaction_ids.push(group_id.to_string());
        row.version += 1;

        // Commit the accumulation before any exchange I/O so a failed
        // trade can never lose the contribution
        self.storage
            .store_pending_rebalance(&key, expected.as_deref(), &row)?;

        if !row.is_eligible() {
            return Ok(false);
        }

        // Netting: trade only the residual against the opposing pool
        let opposing_key = pool_key(
            base_asset,
            &self.quote_asset,
            direction.opposite(),
            self.exchange.name(),
        );
        let opposing = self.storage.load_pending_rebalance(&opposing_key)?;
        let opposing_qty = opposing.as_ref().map(|(o, _)| o.pending_qty).unwrap_or(0.0);

        let (net_qty, net_direction) = if row.pending_qty >= opposing_qty {
            (row.pending_qty - opposing_qty, direction)
        } else {
            (opposing_qty - row.pending_qty, direction.opposite())
        };
        if net_qty <= f64::EPSILON {
            // fully netted, nothing to trade; zero both sides
            self.settle_netted(&key, &opposing_key)?;
            return Ok(false);
        }

        let client_id = new_client_order_id("v4vrb");
        let trade = match net_direction {
            RebalanceDirection::SellBaseForQuote => {
                self.exchange.market_sell(&pair, net_qty, &client_id).await
            }
            RebalanceDirection::BuyBaseWithQuote => {
                self.exchange
                    .market_buy(&pair, net_qty * price, &client_id)
                    .await
            }
        };

        let result = match trade {
            Ok(result) => result,
            Err(e) => {
                // pending row already holds the accumulation; next event
                // naturally absorbs the lost contribution
                warn!("Exchange trade refused for {}: {}", pair, e);
                return Ok(false);
            }
        };

        info!(
            "Rebalanced {} {} {} at {} on {}",
            result.filled_qty,
            base_asset,
            net_direction,
            result.avg_price,
            self.exchange.name()
        );

        self.apply_execution(&key, &opposing_key, net_qty, &result, price)?;
        self.post_trade_entries(net_direction, base_asset, &result, conv)
            .await?;
        Ok(true)
    }

    fn settle_netted(&self, key: &str, opposing_key: &str) -> Result<(), RebalanceError> {
        for pool in [key, opposing_key] {
            if let Some((mut row, raw)) = self.storage.load_pending_rebalance(pool)? {
                row.pending_qty = 0.0;
                row.pending_quote_value = 0.0;
                row.version += 1;
                self.storage.store_pending_rebalance(pool, Some(&raw), &row)?;
            }
        }
        Ok(())
    }

    // Reduce the traded side by the full nominal (traded residual plus
    // the netted opposing quantity), zero the opposing side, and carry
    // any unfilled remainder forward
    fn apply_execution(
        &self,
        key: &str,
        opposing_key: &str,
        net_qty: f64,
        result: &TradeResult,
        price: f64,
    ) -> Result<(), RebalanceError> {
        let unfilled = (net_qty - result.filled_qty).max(0.0);

        if let Some((mut row, raw)) = self.storage.load_pending_rebalance(key)? {
            let timestamp = get_current_time_in_millis();
            let group_ids = std::mem::take(&mut row.transaction_ids);
            row.pending_qty = unfilled;
            row.pending_quote_value = unfilled * price;
            row.total_executed_qty += result.filled_qty;
            row.execution_count += 1;
            row.version += 1;
            self.storage.store_pending_rebalance(key, Some(&raw), &row)?;
            self.storage.append_rebalance_result(&RebalanceResult {
                pool_key: key.to_string(),
                timestamp,
                group_ids,
                executed_qty: result.filled_qty,
                quote_received: result.quote_received,
                avg_price: result.avg_price,
                fee: result.fee,
            })?;
        }

        if let Some((mut row, raw)) = self.storage.load_pending_rebalance(opposing_key)? {
            if row.pending_qty > 0.0 {
                row.pending_qty = 0.0;
                row.pending_quote_value = 0.0;
                row.version += 1;
                self.storage
                    .store_pending_rebalance(opposing_key, Some(&raw), &row)?;
            }
        }
        Ok(())
    }

    // EXCHANGE_CONVERSION and EXCHANGE_FEES entries for the executed trade
    async fn post_trade_entries(
        &self,
        direction: RebalanceDirection,
        base_asset: &str,
        result: &TradeResult,
        conv: CrossRates,
    ) -> Result<(), RebalanceError> {
        let group_id = new_group_id();
        let timestamp = get_current_time_in_millis();
        let base_unit = if base_asset == "HBD" { Unit::Hbd } else { Unit::Hive };
        let base_milli = (result.filled_qty * MILLI_PER_COIN as f64).round() as u64;
        let quote_msats = (result.quote_received * MSATS_PER_BTC).round() as u64;
        let exchange_account = Account::exchange_holdings(self.exchange.name());

        let (base_debit, base_credit, quote_debit, quote_credit) = match direction {
            RebalanceDirection::SellBaseForQuote => (
                Account::conversion_offset(),
                exchange_account.clone(),
                exchange_account.clone(),
                Account::conversion_offset(),
            ),
            RebalanceDirection::BuyBaseWithQuote => (
                exchange_account.clone(),
                Account::conversion_offset(),
                Account::conversion_offset(),
                exchange_account.clone(),
            ),
        };

        let mut entries = Vec::new();
        if base_milli > 0 {
            entries.push(LedgerEntry::new(
                &group_id,
                LedgerType::ExcConv,
                timestamp,
                format!("Exchange {} {} {}", direction, result.filled_qty, base_asset),
                base_debit,
                base_credit,
                base_milli,
                base_unit,
                conv.snapshot(base_milli, base_unit),
            ));
        }
        if quote_msats > 0 {
            entries.push(LedgerEntry::new(
                &group_id,
                LedgerType::ReclassifySats,
                timestamp,
                format!("Exchange quote leg {} {}", result.quote_received, self.quote_asset),
                quote_debit,
                quote_credit,
                quote_msats,
                Unit::Msats,
                conv.snapshot(quote_msats, Unit::Msats),
            ));
        }
        let fee_msats = (result.fee * MSATS_PER_BTC).round() as u64;
        if fee_msats > 0 {
            entries.push(LedgerEntry::new(
                &group_id,
                LedgerType::ExcFee,
                timestamp,
                "Exchange commission",
                Account::exchange_fees(),
                exchange_account,
                fee_msats,
                Unit::Msats,
                conv.snapshot(fee_msats, Unit::Msats),
            ));
        }
        self.ledger.post_all(entries).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use exchange::MinOrderRequirements;
    use std::sync::Mutex as StdMutex;

    struct MockExchange {
        min_qty: f64,
        min_notional: f64,
        price: f64,
        refuse_trades: bool,
        trades: StdMutex<Vec<(String, f64)>>,
    }

    #[async_trait]
    impl ExchangeAdapter for MockExchange {
        fn name(&self) -> &str {
            "mockex"
        }

        async fn market_sell(
            &self,
            pair: &str,
            qty: f64,
            _client_id: &str,
        ) -> Result<TradeResult, ExchangeError> {
            if self.refuse_trades {
                return Err(ExchangeError::Rejected("refused".into()));
            }
            self.trades.lock().unwrap().push((pair.to_string(), qty));
            Ok(TradeResult {
                filled_qty: qty,
                quote_received: qty * self.price,
                avg_price: self.price,
                fee: 0.000001,
            })
        }

        async fn market_buy(
            &self,
            pair: &str,
            quote_qty: f64,
            _client_id: &str,
        ) -> Result<TradeResult, ExchangeError> {
            if self.refuse_trades {
                return Err(ExchangeError::Rejected("refused".into()));
            }
            let qty = quote_qty / self.price;
            self.trades.lock().unwrap().push((pair.to_string(), -qty));
            Ok(TradeResult {
                filled_qty: qty,
                quote_received: quote_qty,
                avg_price: self.price,
                fee: 0.0,
            })
        }

        async fn get_balance(&self, _asset: &str) -> Result<f64, ExchangeError> {
            Ok(1000.0)
        }

        async fn get_min_order_requirements(
            &self,
            _pair: &str,
        ) -> Result<MinOrderRequirements, ExchangeError> {
            Ok(MinOrderRequirements {
                min_qty: self.min_qty,
                min_notional: self.min_notional,
            })
        }

        async fn get_price(&self, _pair: &str) -> Result<f64, ExchangeError> {
            Ok(self.price)
        }
    }

    fn conv() -> CrossRates {
        CrossRates {
            sats_per_hive: 200.0,
            sats_per_hbd: 800.0,
            usd_per_hive: 0.2,
            usd_per_hbd: 1.0,
        }
    }

    fn setup(
        exchange: MockExchange,
    ) -> (Arc<Rebalancer>, Arc<BridgeStorage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(BridgeStorage::open(dir.path().to_str().unwrap()).unwrap());
        let ledger = Arc::new(Ledger::new(storage.clone()));
        let rebalancer = Rebalancer::new(
            storage.clone(),
            ledger,
            Arc::new(exchange),
            "BTC".to_string(),
        );
        (rebalancer, storage, dir)
    }

    #[tokio::test]
    async fn accumulates_until_both_minima_clear() {
        let (rebalancer, storage, _dir) = setup(MockExchange {
            min_qty: 10.0,
            min_notional: 0.00001,
            price: 0.0002,
            refuse_trades: false,
            trades: StdMutex::new(Vec::new()),
        });

        let executed = rebalancer
            .record_conversion("g1", RebalanceDirection::SellBaseForQuote, "HIVE", 5_000, conv())
            .await
            .unwrap();
        assert!(!executed);
        let key = pool_key("HIVE", "BTC", RebalanceDirection::SellBaseForQuote, "mockex");
        let (row, _) = storage.load_pending_rebalance(&key).unwrap().unwrap();
        assert!((row.pending_qty - 5.0).abs() < 1e-9);
        assert_eq!(row.transaction_count, 1);

        let executed = rebalancer
            .record_conversion("g2", RebalanceDirection::SellBaseForQuote, "HIVE", 5_000, conv())
            .await
            .unwrap();
        assert!(executed);
        let (row, _) = storage.load_pending_rebalance(&key).unwrap().unwrap();
        assert!(row.pending_qty.abs() < 1e-9);
        assert_eq!(row.execution_count, 1);
        assert!((row.total_executed_qty - 10.0).abs() < 1e-9);
        assert!(row.transaction_ids.is_empty());
    }

    #[tokio::test]
    async fn refused_trade_preserves_pending() {
        let (rebalancer, storage, _dir) = setup(MockExchange {
            min_qty: 1.0,
            min_notional: 0.0,
            price: 0.0002,
            refuse_trades: true,
            trades: StdMutex::new(Vec::new()),
        });

        let executed = rebalancer
            .record_conversion("g1", RebalanceDirection::SellBaseForQuote, "HIVE", 5_000, conv())
            .await
            .unwrap();
        assert!(!executed);
        let key = pool_key("HIVE", "BTC", RebalanceDirection::SellBaseForQuote, "mockex");
        let (row, _) = storage.load_pending_rebalance(&key).unwrap().unwrap();
        // never smaller than the prior persisted value
        assert!((row.pending_qty - 5.0).abs() < 1e-9);
        assert_eq!(row.execution_count, 0);
    }

    #[tokio::test]
    async fn opposing_pools_net_to_the_residual() {
        let (rebalancer, storage, _dir) = setup(MockExchange {
            min_qty: 1.0,
            min_notional: 0.0,
            price: 0.0002,
            refuse_trades: false,
            trades: StdMutex::new(Vec::new()),
        });

        // seed an opposing BUY pool of 4 HIVE below its own threshold
        let buy_key = pool_key("HIVE", "BTC", RebalanceDirection::BuyBaseWithQuote, "mockex");
        let mut buy_row =
            PendingRebalance::new("HIVE", "BTC", RebalanceDirection::BuyBaseWithQuote, "mockex");
        buy_row.pending_qty = 4.0;
        buy_row.pending_quote_value = 4.0 * 0.0002;
        buy_row.min_qty_threshold = 100.0;
        storage.store_pending_rebalance(&buy_key, None, &buy_row).unwrap();

        let executed = rebalancer
            .record_conversion("g1", RebalanceDirection::SellBaseForQuote, "HIVE", 10_000, conv())
            .await
            .unwrap();
        assert!(executed);

        // the smaller side is zeroed, the traded side carries no remainder
        let (buy_row, _) = storage.load_pending_rebalance(&buy_key).unwrap().unwrap();
        assert!(buy_row.pending_qty.abs() < 1e-9);
        let sell_key = pool_key("HIVE", "BTC", RebalanceDirection::SellBaseForQuote, "mockex");
        let (sell_row, _) = storage.load_pending_rebalance(&sell_key).unwrap().unwrap();
        assert!(sell_row.pending_qty.abs() < 1e-9);
    }
}
