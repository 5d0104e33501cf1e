// Read-only admin HTTP surface. The admin UI itself is an external
// collaborator; these JSON endpoints are its interface. No auth, no
// TLS: the server is expected to sit behind the operator's own proxy.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use actix_web::{web, App, HttpResponse, HttpServer};
use log::info;

use v4vapp_common::account::{Account, AccountType};
use v4vapp_common::api::{
    AccountsResponse, BalanceQuery, BalanceResponse, HealthResponse, LedgerTailQuery,
    RebalanceRow, RebalancesResponse,
};
use v4vapp_common::config::VERSION;

use crate::ledger::cache::BalanceCache;
use crate::storage::BridgeStorage;

pub struct AdminState {
    pub storage: Arc<BridgeStorage>,
    pub cache: Arc<BalanceCache>,
    pub started_at: Instant,
    pub network: String,
    pub dev_mode: bool,
    pub node_alias: Option<String>,
}

async fn health(state: web::Data<AdminState>) -> HttpResponse {
    let hive_head_block = state.storage.get_hive_resume_height().ok().flatten();
    HttpResponse::Ok().json(HealthResponse {
        version: VERSION.to_string(),
        network: state.network.clone(),
        dev_mode: state.dev_mode,
        hive_head_block,
        ln_node_alias: state.node_alias.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn accounts(state: web::Data<AdminState>) -> HttpResponse {
    match state.storage.list_accounts() {
        Ok(accounts) => HttpResponse::Ok().json(AccountsResponse { accounts }),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

async fn balance(
    state: web::Data<AdminState>,
    query: web::Query<BalanceQuery>,
) -> HttpResponse {
    let Ok(account_type) = AccountType::from_str(&query.account_type) else {
        return HttpResponse::BadRequest().body(format!(
            "unknown account type {}",
            query.account_type
        ));
    };
    let account = Account::new(account_type, query.name.clone(), query.sub.clone());
    match state
        .cache
        .balance(&account, query.as_of, query.age_secs)
        .await
    {
        Ok((details, cached)) => HttpResponse::Ok().json(BalanceResponse {
            account,
            per_unit_totals: details
                .per_unit_totals
                .into_iter()
                .map(|(unit, total)| (unit.to_string(), total))
                .collect(),
            in_progress_msats: details.in_progress_msats,
            as_of: query.as_of,
            cached,
        }),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

async fn ledger_tail(
    state: web::Data<AdminState>,
    query: web::Query<LedgerTailQuery>,
) -> HttpResponse {
    let limit = query.limit.unwrap_or(50).min(500);
    match state.storage.ledger_tail(limit) {
        Ok(entries) => HttpResponse::Ok().json(entries),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

async fn rebalances(state: web::Data<AdminState>) -> HttpResponse {
    match state.storage.all_pending_rebalances() {
        Ok(rows) => HttpResponse::Ok().json(RebalancesResponse {
            rows: rows
                .into_iter()
                .map(|row| RebalanceRow {
                    base_asset: row.base_asset,
                    quote_asset: row.quote_asset,
                    direction: row.direction.to_string(),
                    exchange: row.exchange,
                    pending_qty: row.pending_qty,
                    pending_quote_value: row.pending_quote_value,
                    transaction_count: row.transaction_count,
                    execution_count: row.execution_count,
                })
                .collect(),
        }),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

pub async fn run_admin_server(
    bind_address: String,
    state: AdminState,
) -> std::io::Result<()> {
    info!("Admin API listening on {}", bind_address);
    let state = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(health))
            .route("/accounts", web::get().to(accounts))
            .route("/balance", web::get().to(balance))
            .route("/ledger", web::get().to(ledger_tail))
            .route("/rebalances", web::get().to(rebalances))
    })
    .bind(bind_address)?
    .run()
    .await
}
