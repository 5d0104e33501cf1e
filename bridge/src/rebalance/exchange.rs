// Exchange adapters. Two API shapes exist in the wild: plain market
// orders, and a quote-then-accept sequence where the fee is embedded in
// the quoted ratio. Both sit behind one trait so the rebalancer does
// not care which one is configured.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

use v4vapp_common::config::EXCHANGE_TIMEOUT;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Order below exchange minimum: {0}")]
    BelowMinimum(String),
    #[error("Quote expired before acceptance")]
    QuoteExpired,
    #[error("Exchange rejected request: {0}")]
    Rejected(String),
    #[error("Unexpected response shape: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy)]
pub struct TradeResult {
    pub filled_qty: f64,
    pub quote_received: f64,
    pub avg_price: f64,
    pub fee: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct MinOrderRequirements {
    pub min_qty: f64,
    pub min_notional: f64,
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn market_sell(
        &self,
        pair: &str,
        qty: f64,
        client_id: &str,
    ) -> Result<TradeResult, ExchangeError>;

    async fn market_buy(
        &self,
        pair: &str,
        quote_qty: f64,
        client_id: &str,
    ) -> Result<TradeResult, ExchangeError>;

    async fn get_balance(&self, asset: &str) -> Result<f64, ExchangeError>;

    async fn get_min_order_requirements(
        &self,
        pair: &str,
    ) -> Result<MinOrderRequirements, ExchangeError>;

    async fn get_price(&self, pair: &str) -> Result<f64, ExchangeError>;
}

pub fn new_client_order_id(prefix: &str) -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!("{}-{:016x}", prefix, nonce)
}

// ---- Market-order REST adapter ----

pub struct MarketExchange {
    name: String,
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    free: String,
}

#[derive(Debug, Deserialize)]
struct SymbolInfoResponse {
    min_qty: String,
    min_notional: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    executed_qty: String,
    cummulative_quote_qty: String,
    avg_price: String,
    commission: String,
}

impl MarketExchange {
    pub fn new(
        name: String,
        base_url: String,
        api_key: String,
    ) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()?;
        Ok(Self {
            name,
            http,
            base_url,
            api_key,
        })
    }

    fn parse_f64(value: &str, field: &str) -> Result<f64, ExchangeError> {
        value
            .parse()
            .map_err(|_| ExchangeError::Decode(format!("{}: {}", field, value)))
    }

    async fn place_order(
        &self,
        pair: &str,
        side: &str,
        qty_param: (&str, f64),
        client_id: &str,
    ) -> Result<TradeResult, ExchangeError> {
        trace!("{} {} {} {}", self.name, side, pair, qty_param.1);
        let response = self
            .http
            .post(format!("{}/api/v3/order", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .form(&[
                ("symbol", pair.to_string()),
                ("side", side.to_string()),
                ("type", "MARKET".to_string()),
                (qty_param.0, qty_param.1.to_string()),
                ("newClientOrderId", client_id.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("MIN_NOTIONAL") || body.contains("LOT_SIZE") {
                return Err(ExchangeError::BelowMinimum(body));
            }
            return Err(ExchangeError::Rejected(body));
        }

        let order: OrderResponse = response.json().await?;
        Ok(TradeResult {
            filled_qty: Self::parse_f64(&order.executed_qty, "executed_qty")?,
            quote_received: Self::parse_f64(&order.cummulative_quote_qty, "quote_qty")?,
            avg_price: Self::parse_f64(&order.avg_price, "avg_price")?,
            fee: Self::parse_f64(&order.commission, "commission")?,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for MarketExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn market_sell(
        &self,
        pair: &str,
        qty: f64,
        client_id: &str,
    ) -> Result<TradeResult, ExchangeError> {
        self.place_order(pair, "SELL", ("quantity", qty), client_id).await
    }

    async fn market_buy(
        &self,
        pair: &str,
        quote_qty: f64,
        client_id: &str,
    ) -> Result<TradeResult, ExchangeError> {
        self.place_order(pair, "BUY", ("quoteOrderQty", quote_qty), client_id)
            .await
    }

    async fn get_balance(&self, asset: &str) -> Result<f64, ExchangeError> {
        let response: BalanceResponse = self
            .http
            .get(format!("{}/api/v3/balance", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .query(&[("asset", asset)])
            .send()
            .await?
            .json()
            .await?;
        Self::parse_f64(&response.free, "free")
    }

    async fn get_min_order_requirements(
        &self,
        pair: &str,
    ) -> Result<MinOrderRequirements, ExchangeError> {
        let response: SymbolInfoResponse = self
            .http
            .get(format!("{}/api/v3/exchangeInfo", self.base_url))
            .query(&[("symbol", pair)])
            .send()
            .await?
            .json()
            .await?;
        Ok(MinOrderRequirements {
            min_qty: Self::parse_f64(&response.min_qty, "min_qty")?,
            min_notional: Self::parse_f64(&response.min_notional, "min_notional")?,
        })
    }

    async fn get_price(&self, pair: &str) -> Result<f64, ExchangeError> {
        let response: TickerResponse = self
            .http
            .get(format!("{}/api/v3/ticker/price", self.base_url))
            .query(&[("symbol", pair)])
            .send()
            .await?
            .json()
            .await?;
        Self::parse_f64(&response.price, "price")
    }
}

// ---- Quote-then-accept adapter ----
// request_quote -> accept_quote -> poll_status; quotes are only valid
// for a few seconds and the fee is embedded in the quoted ratio.

pub struct QuoteExchange {
    name: String,
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
    max_polls: u32,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    quote_id: String,
    ratio: String,
    #[serde(default)]
    ttl_ms: u64,
}

#[derive(Debug, Deserialize)]
struct QuoteStatusResponse {
    status: String,
    #[serde(default)]
    from_amount: String,
    #[serde(default)]
    to_amount: String,
}

impl QuoteExchange {
    pub fn new(
        name: String,
        base_url: String,
        api_key: String,
    ) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()?;
        Ok(Self {
            name,
            http,
            base_url,
            api_key,
            poll_interval: Duration::from_secs(1),
            max_polls: 10,
        })
    }

    async fn convert(
        &self,
        from_asset: &str,
        to_asset: &str,
        from_amount: f64,
        client_id: &str,
    ) -> Result<TradeResult, ExchangeError> {
        let quote: QuoteResponse = self
            .http
            .post(format!("{}/v1/convert/quote", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({
                "fromAsset": from_asset,
                "toAsset": to_asset,
                "fromAmount": from_amount,
            }))
            .send()
            .await?
            .json()
            .await?;
        debug!(
            "{} quoted {}->{} ratio {} (ttl {}ms)",
            self.name, from_asset, to_asset, quote.ratio, quote.ttl_ms
        );

        let accept = self
            .http
            .post(format!("{}/v1/convert/accept", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({
                "quoteId": quote.quote_id,
                "clientId": client_id,
            }))
            .send()
            .await?;
        if accept.status().as_u16() == 410 {
            return Err(ExchangeError::QuoteExpired);
        }
        if !accept.status().is_success() {
            return Err(ExchangeError::Rejected(accept.text().await.unwrap_or_default()));
        }

        for _ in 0..self.max_polls {
            let status: QuoteStatusResponse = self
                .http
                .get(format!("{}/v1/convert/status", self.base_url))
                .header("X-API-KEY", &self.api_key)
                .query(&[("quoteId", quote.quote_id.as_str())])
                .send()
                .await?
                .json()
                .await?;
            match status.status.as_str() {
                "SUCCESS" => {
                    let filled: f64 = status.from_amount.parse().unwrap_or(from_amount);
                    let received: f64 = status.to_amount.parse().unwrap_or(0.0);
                    return Ok(TradeResult {
                        filled_qty: filled,
                        quote_received: received,
                        avg_price: if filled > 0.0 { received / filled } else { 0.0 },
                        // fee is embedded in the quoted ratio
                        fee: 0.0,
                    });
                }
                "FAILED" => {
                    return Err(ExchangeError::Rejected(format!(
                        "convert {} failed",
                        quote.quote_id
                    )))
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
        Err(ExchangeError::Rejected("convert status polling timed out".into()))
    }

    fn split_pair<'a>(&self, pair: &'a str) -> (&'a str, &'a str) {
        // pairs are BASE+QUOTE with a known quote suffix
        for quote in ["BTC", "USDT", "USD"] {
            if let Some(base) = pair.strip_suffix(quote) {
                return (base, quote);
            }
        }
        (pair, "")
    }
}

#[async_trait]
impl ExchangeAdapter for QuoteExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn market_sell(
        &self,
        pair: &str,
        qty: f64,
        client_id: &str,
    ) -> Result<TradeResult, ExchangeError> {
        let (base, quote) = self.split_pair(pair);
        self.convert(base, quote, qty, client_id).await
    }

    async fn market_buy(
        &self,
        pair: &str,
        quote_qty: f64,
        client_id: &str,
    ) -> Result<TradeResult, ExchangeError> {
        let (base, quote) = self.split_pair(pair);
        let result = self.convert(quote, base, quote_qty, client_id).await?;
        // normalize so filled_qty is always in base units
        Ok(TradeResult {
            filled_qty: result.quote_received,
            quote_received: result.filled_qty,
            avg_price: if result.quote_received > 0.0 {
                result.filled_qty / result.quote_received
            } else {
                0.0
            },
            fee: 0.0,
        })
    }

    async fn get_balance(&self, asset: &str) -> Result<f64, ExchangeError> {
        let response: BalanceResponse = self
            .http
            .get(format!("{}/v1/balance", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .query(&[("asset", asset)])
            .send()
            .await?
            .json()
            .await?;
        response
            .free
            .parse()
            .map_err(|_| ExchangeError::Decode(format!("free: {}", response.free)))
    }

    async fn get_min_order_requirements(
        &self,
        pair: &str,
    ) -> Result<MinOrderRequirements, ExchangeError> {
        let response: SymbolInfoResponse = self
            .http
            .get(format!("{}/v1/convert/limits", self.base_url))
            .query(&[("symbol", pair)])
            .send()
            .await?
            .json()
            .await?;
        Ok(MinOrderRequirements {
            min_qty: response
                .min_qty
                .parse()
                .map_err(|_| ExchangeError::Decode("min_qty".into()))?,
            min_notional: response
                .min_notional
                .parse()
                .map_err(|_| ExchangeError::Decode("min_notional".into()))?,
        })
    }

    async fn get_price(&self, pair: &str) -> Result<f64, ExchangeError> {
        let response: TickerResponse = self
            .http
            .get(format!("{}/v1/price", self.base_url))
            .query(&[("symbol", pair)])
            .send()
            .await?
            .json()
            .await?;
        response
            .price
            .parse()
            .map_err(|_| ExchangeError::Decode(format!("price: {}", response.price)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_order_ids_are_unique_and_prefixed() {
        let a = new_client_order_id("v4v");
        let b = new_client_order_id("v4v");
        assert!(a.starts_with("v4v-"));
        assert_ne!(a, b);
    }
}
