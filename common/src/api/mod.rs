// DTOs served by the admin HTTP endpoints. The admin UI is an external
// collaborator; only the JSON shapes are part of this crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::time::TimestampMillis;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub version: String,
    pub network: String,
    pub dev_mode: bool,
    pub hive_head_block: Option<u64>,
    pub ln_node_alias: Option<String>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsResponse {
    pub accounts: Vec<Account>,
}

// Per-unit integer totals in smallest units; the display layer converts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub account: Account,
    pub per_unit_totals: HashMap<String, i64>,
    pub in_progress_msats: u64,
    pub as_of: Option<TimestampMillis>,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTailQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceQuery {
    pub account_type: String,
    pub name: String,
    #[serde(default)]
    pub sub: String,
    pub as_of: Option<TimestampMillis>,
    pub age_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceRow {
    pub base_asset: String,
    pub quote_asset: String,
    pub direction: String,
    pub exchange: String,
    pub pending_qty: f64,
    pub pending_quote_value: f64,
    pub transaction_count: u64,
    pub execution_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancesResponse {
    pub rows: Vec<RebalanceRow>,
}
