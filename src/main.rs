//! boostlined: order engine daemon and admin commands

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use boostline::config::{AppConfig, ConfigLoader, ConfigWatcher, ENV_PREFIX};
use boostline::engine::{OrderEngine, OrderStore, PriceCatalog, SqliteOrderStore};
use boostline::ledger::{open_pool, CoinLedger, SqliteLedger};
use boostline::metrics::{init_tracing, init_tracing_with_metrics, LogFormat, MetricsCollector, MetricsServer};
use boostline::provider::SmmPanelClient;

/// Boostline order engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (TOML, YAML or JSON)
    #[arg(long, short, default_value = "boostline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resume unfinished orders and run until interrupted
    Run,

    /// Add coins to a user's balance
    Credit { user: String, amount: u64 },

    /// Show a user's balance
    Balance { user: String },

    /// List a user's most recent orders
    Orders {
        user: String,

        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run => run(args.config).await,
        Command::Credit { user, amount } => {
            let (ledger, _) = open_admin(&args.config).await?;
            let entry = ledger.credit(&user, amount).await?;
            let balance = ledger.balance(&user).await?;
            println!("credited {amount} to {user} ({}), balance {balance}", entry.entry_id);
            Ok(())
        }
        Command::Balance { user } => {
            let (ledger, _) = open_admin(&args.config).await?;
            println!("{}", ledger.balance(&user).await?);
            Ok(())
        }
        Command::Orders { user, limit } => {
            let (_, store) = open_admin(&args.config).await?;
            for order in store.list_by_user(&user, limit).await? {
                println!(
                    "{}  {:<18}  {:>7}/{:<7}  {:<9}  refunded {:<6}  {}",
                    order.order_id,
                    order.state,
                    order.delivered_quantity,
                    order.requested_quantity,
                    order.speed_policy.name(),
                    order.refunded_amount,
                    order.target,
                );
            }
            Ok(())
        }
    }
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let watcher = ConfigWatcher::new(config_path.clone(), ENV_PREFIX)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let config = watcher.get_config();

    let metrics = Arc::new(MetricsCollector::new());
    let format: LogFormat = config.service.log_format.parse()?;
    init_tracing_with_metrics(&config.service.log_level, format, metrics.clone())?;

    info!(
        config = %config_path.display(),
        database = %config.service.database_url,
        unit_price = config.pricing.unit_price,
        "Starting boostlined"
    );

    let (ledger, store) = open_stores(&config.service.database_url).await?;
    let provider = Arc::new(SmmPanelClient::new(config.smm_panel_config())?);

    let engine = OrderEngine::builder()
        .with_ledger(ledger)
        .with_store(store)
        .with_provider(provider)
        .with_validator(config.order_validator())
        .with_catalog(PriceCatalog::new(config.pricing.unit_price))
        .with_rate_limiter(config.rate_limiter())
        .with_metrics(metrics.clone())
        .with_config(config.engine_config())
        .build()?;

    let report = engine.resume_active().await?;
    info!(
        orders = report.len(),
        resumed = report.resumed(),
        refunds_pending = report.refunds_pending(),
        rejected = report.rejected(),
        "Resumed unfinished orders"
    );

    let _watch_task = watcher.start_watching()?;
    tokio::spawn(follow_price(watcher.subscribe(), engine.catalog().clone()));

    let (stop_metrics, metrics_stopped) = oneshot::channel::<()>();
    if config.service.metrics_enabled {
        let server = MetricsServer::new(metrics.clone(), config.service.metrics_addr.clone());
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = metrics_stopped.await;
            };
            if let Err(e) = server.serve_with_shutdown(shutdown).await {
                error!(error = %e, error_type = "metrics", "Metrics server failed");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!(active_orders = engine.active_orders(), "Shutting down");

    let _ = stop_metrics.send(());
    engine.shutdown();
    Ok(())
}

/// Apply unit price changes from reloaded config; placed orders keep theirs
async fn follow_price(mut updates: tokio::sync::watch::Receiver<AppConfig>, catalog: PriceCatalog) {
    while updates.changed().await.is_ok() {
        let price = updates.borrow_and_update().pricing.unit_price;
        if price == catalog.unit_price() {
            continue;
        }
        if let Err(e) = catalog.set_unit_price(price) {
            warn!(error = %e, "Ignoring unit price from config");
        }
    }
}

async fn open_stores(
    database_url: &str,
) -> anyhow::Result<(Arc<SqliteLedger>, Arc<SqliteOrderStore>)> {
    let pool = open_pool(database_url)
        .await
        .with_context(|| format!("opening {database_url}"))?;
    let ledger = SqliteLedger::with_pool(pool.clone()).await?;
    let store = SqliteOrderStore::with_pool(pool).await?;
    Ok((Arc::new(ledger), Arc::new(store)))
}

/// Stores for the admin commands, which need no provider settings
async fn open_admin(config_path: &Path) -> anyhow::Result<(Arc<SqliteLedger>, Arc<SqliteOrderStore>)> {
    let config = if config_path.exists() {
        ConfigLoader::from_file_with_env(config_path, ENV_PREFIX)?
    } else {
        ConfigLoader::from_env()?
    };

    init_tracing("warn", LogFormat::Pretty)?;
    open_stores(&config.service.database_url).await
}
