use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use v4vapp_bridge::api::{run_admin_server, AdminState};
use v4vapp_bridge::config::Config;
use v4vapp_bridge::engine::policy::PolicyStore;
use v4vapp_bridge::engine::{ConversionEngine, EngineConfig};
use v4vapp_bridge::hive::broadcast::{HiveBroadcaster, HiveSigner};
use v4vapp_bridge::hive::client::HiveClient;
use v4vapp_bridge::hive::watcher::{HiveWatcher, HiveWatcherConfig};
use v4vapp_bridge::ledger::cache::BalanceCache;
use v4vapp_bridge::ledger::Ledger;
use v4vapp_bridge::lightning::address::LnAddressResolver;
use v4vapp_bridge::lightning::client::LndClient;
use v4vapp_bridge::lightning::payer::LndPayer;
use v4vapp_bridge::lightning::watcher::LightningWatcher;
use v4vapp_bridge::notify::error_codes::ErrorCodeFilter;
use v4vapp_bridge::notify::{NotifyEvent, Notifier, TelegramTransport};
use v4vapp_bridge::rates::RateService;
use v4vapp_bridge::rebalance::exchange::{ExchangeAdapter, MarketExchange, QuoteExchange};
use v4vapp_bridge::rebalance::Rebalancer;
use v4vapp_bridge::router::ProcessRouter;
use v4vapp_bridge::storage::BridgeStorage;

fn setup_logger(config: &Config) -> Result<()> {
    let level: log::LevelFilter = config
        .log
        .log_level
        .parse()
        .context("Invalid log level")?;
    let colors = fern::colors::ColoredLevelConfig::new()
        .info(fern::colors::Color::Green)
        .warn(fern::colors::Color::Yellow)
        .error(fern::colors::Color::Red)
        .debug(fern::colors::Color::Blue);
    let disable_color = config.log.disable_log_color;

    let mut dispatch = fern::Dispatch::new()
        .level(level)
        .level_for("sled", log::LevelFilter::Warn)
        .level_for("actix_server", log::LevelFilter::Warn)
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    if disable_color {
                        out.finish(format_args!(
                            "{} [{}] {}: {}",
                            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                            record.level(),
                            record.target(),
                            message
                        ))
                    } else {
                        out.finish(format_args!(
                            "{} [{}] {}: {}",
                            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                            colors.color(record.level()),
                            record.target(),
                            message
                        ))
                    }
                })
                .chain(std::io::stdout()),
        )
        // WARNING and above fan out to the notification dispatcher; the
        // enqueue is synchronous and never blocks this pipeline
        .chain(
            fern::Dispatch::new()
                .filter(|metadata| {
                    metadata.level() <= log::Level::Warn
                        && !metadata.target().contains("notify")
                })
                .chain(fern::Output::call(|record| {
                    let mut event = NotifyEvent::new(
                        record.target().to_string(),
                        record.args().to_string(),
                    );
                    event.level = record.level();
                    event.notify = false;
                    Notifier::global().publish(event);
                })),
        );

    if !config.log.disable_file_logging {
        std::fs::create_dir_all(&config.log.logs_path)?;
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "{} [{}] {}: {}",
                        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                        record.level(),
                        record.target(),
                        message
                    ))
                })
                .chain(fern::DateBased::new(
                    config.log.logs_path.clone(),
                    format!("%Y-%m-%d.{}", config.log.filename_log),
                )),
        );
    }

    dispatch.apply().context("Logger already initialized")?;
    Ok(())
}

fn load_config() -> Result<Option<Config>> {
    let mut config = Config::parse();
    if let Some(path) = config.config_file.clone() {
        if config.generate_config_template {
            let mut file = File::create(&path)?;
            file.write_all(serde_json::to_string_pretty(&config)?.as_bytes())?;
            println!("Config template written to {}", path);
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Could not read config file {}", path))?;
        config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path))?;
    }
    Ok(Some(config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let Some(config) = load_config()? else {
        return Ok(());
    };
    setup_logger(&config)?;

    // Re-point the dispatcher at the now-running runtime before
    // anything can log with the notify flag set
    Notifier::global().rebind_runtime(&Handle::current());
    if let (Some(token), Some(chat_id)) = (
        config.notifications.telegram_token.clone(),
        config.notifications.telegram_chat_id,
    ) {
        Notifier::global().add_transport(
            Arc::new(TelegramTransport::new("telegram".into(), token, chat_id)?),
            true,
        );
    }
    Notifier::global().set_silenced(config.notifications.silenced_components.iter().cloned());

    info!(
        "Starting v4vapp bridge {} ({} mode)",
        v4vapp_common::config::VERSION,
        if config.dev_mode { "dev" } else { "production" }
    );

    // Storage and ledger
    let storage = Arc::new(BridgeStorage::open(&config.storage.data_dir)?);
    Notifier::global().set_error_filter(Arc::new(ErrorCodeFilter::new(storage.clone())));
    let ledger = Arc::new(Ledger::new(storage.clone()));
    let cache = Arc::new(
        BalanceCache::connect(ledger.clone(), config.storage.redis_url.as_deref()).await,
    );
    ledger.register_hook(cache.clone()).await;

    // Hive side
    let hive_client = Arc::new(HiveClient::new(config.hive.hive_api_urls.clone(), None)?);
    let signer_key = config
        .hive
        .active_key_hex
        .as_deref()
        .context("--active-key-hex is required to broadcast transactions")?;
    let broadcaster = Arc::new(HiveBroadcaster::new(
        hive_client.clone(),
        HiveSigner::from_hex(signer_key)?,
        config.hive.server_account.clone(),
        config.message_prefix().to_string(),
        &config.hive.chain_id,
    )?);

    // Lightning side
    let lnd_client = Arc::new(
        LndClient::connect(
            &config.lnd.lnd_address,
            &config.lnd.lnd_cert_path,
            &config.lnd.lnd_macaroon_path,
        )
        .await?,
    );
    let node_alias = lnd_client.node_alias().to_string();

    // Exchange, rates, rebalancer
    let exchange: Arc<dyn ExchangeAdapter> = if config.exchange.use_quote_api {
        Arc::new(QuoteExchange::new(
            config.exchange.exchange_name.clone(),
            config.exchange.exchange_api_url.clone(),
            config.exchange.exchange_api_key.clone(),
        )?)
    } else {
        Arc::new(MarketExchange::new(
            config.exchange.exchange_name.clone(),
            config.exchange.exchange_api_url.clone(),
            config.exchange.exchange_api_key.clone(),
        )?)
    };
    let rates = RateService::new(exchange.clone(), storage.clone(), config.rate_ttl());
    let rebalancer = if config.exchange.disable_rebalancer {
        None
    } else {
        Some(Rebalancer::new(
            storage.clone(),
            ledger.clone(),
            exchange,
            config.exchange.quote_asset.clone(),
        ))
    };

    // Conversion engine
    let policy = PolicyStore::new(hive_client.clone(), config.hive.operator_account.clone());
    let engine = ConversionEngine::new(
        ledger.clone(),
        storage.clone(),
        policy,
        rates,
        LndPayer::new(lnd_client.clone()),
        broadcaster,
        Some(Arc::new(LnAddressResolver::new(
            v4vapp_common::config::LNURL_TIMEOUT,
        )?)),
        rebalancer,
        EngineConfig {
            server_account: config.hive.server_account.clone(),
            operator_account: config.hive.operator_account.clone(),
            node_alias: node_alias.clone(),
            bad_actors: config.bad_actors.iter().cloned().collect(),
            dev_mode: config.dev_mode,
            dev_allowlist: config.dev_allowlist.iter().cloned().collect(),
        },
    );

    // Router and watchers share a wake channel through the journal
    let (wake_tx, wake_rx) = mpsc::channel(64);
    let router = ProcessRouter::new(storage.clone(), engine, wake_rx);
    router.start().await?;

    let mut interesting: HashSet<String> = config.hive.watch_accounts.iter().cloned().collect();
    interesting.insert(config.hive.server_account.clone());
    interesting.insert(config.hive.operator_account.clone());
    let hive_watcher = HiveWatcher::new(
        hive_client,
        storage.clone(),
        HiveWatcherConfig {
            interesting_accounts: interesting,
            tracked_message_ids: config.tracked_message_ids().into_iter().collect(),
            watched_witness: config.hive.watched_witness.clone(),
            start_height_offset: config.hive.start_height_offset,
        },
        wake_tx.clone(),
    );
    hive_watcher.start().await?;

    let ln_watcher = LightningWatcher::new(lnd_client, storage.clone(), wake_tx);
    ln_watcher.start().await;

    // Admin API
    let admin_state = AdminState {
        storage: storage.clone(),
        cache,
        started_at: Instant::now(),
        network: if config.dev_mode {
            "develop".into()
        } else {
            "mainnet".into()
        },
        dev_mode: config.dev_mode,
        node_alias: Some(node_alias),
    };
    let admin_bind = config.admin_bind_address.clone();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("failed to start admin server runtime");
        rt.block_on(async move {
            if let Err(e) = run_admin_server(admin_bind, admin_state).await {
                error!("Admin server stopped: {}", e);
            }
        });
    });

    tokio::signal::ctrl_c().await?;
    warn!("Shutdown requested");

    ln_watcher.stop().await;
    hive_watcher.stop().await;
    router.stop().await;
    storage.flush().await?;
    info!("Bridge stopped cleanly");
    Ok(())
}
