use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use catalog_sync::config;
use catalog_sync::db;
use catalog_sync::graph::GraphClient;
use catalog_sync::model::ChangeMethod;
use catalog_sync::sync::{PassOutcome, SyncEngine};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one catalog synchronization pass against the remote commerce graph and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Push the full product catalog
    Full {
        /// Only this store (default: every eligible store)
        #[arg(long)]
        store: Option<i64>,
        /// Only send stock and price fields
        #[arg(long)]
        inventory_only: bool,
    },
    /// Process queued product changes
    Incremental {
        #[arg(long)]
        store: Option<i64>,
        /// Only this method (default: update, then delete)
        #[arg(long, value_enum)]
        method: Option<MethodArg>,
    },
    /// Push the category tree as product sets
    Categories {
        #[arg(long)]
        store: Option<i64>,
    },
    /// Queue a product change for the next incremental pass
    Enqueue {
        #[arg(long)]
        product: i64,
        #[arg(long)]
        sku: String,
        #[arg(long, value_enum, default_value = "update")]
        method: MethodArg,
    },
    /// Push one category after it changed, or delete its product sets
    Category {
        #[arg(long)]
        id: i64,
        /// The name changed, so descendants are renamed too
        #[arg(long)]
        renamed: bool,
        /// Delete the sets of the category and its descendants
        #[arg(long, conflicts_with = "renamed")]
        delete: bool,
    },
    /// Set the sync flag of a product or category
    SetSync {
        #[arg(long, conflicts_with = "category", requires = "sku")]
        product: Option<i64>,
        #[arg(long)]
        sku: Option<String>,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long, value_enum)]
        state: FlagArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    Update,
    Delete,
}

impl From<MethodArg> for ChangeMethod {
    fn from(m: MethodArg) -> Self {
        match m {
            MethodArg::Update => ChangeMethod::Update,
            MethodArg::Delete => ChangeMethod::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FlagArg {
    On,
    Off,
    Inherit,
}

impl FlagArg {
    fn as_flag(self) -> Option<bool> {
        match self {
            FlagArg::On => Some(true),
            FlagArg::Off => Some(false),
            FlagArg::Inherit => None,
        }
    }
}

fn finish<T>(pass: &str, outcome: PassOutcome<T>) -> Result<()> {
    if outcome.is_success() {
        info!(pass, stores = outcome.reports.len(), "pass completed");
        Ok(())
    } else {
        error!(pass, failed_stores = ?outcome.failed_stores, "pass completed with failures");
        bail!("{} pass failed for stores {:?}", pass, outcome.failed_stores)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let store = Arc::new(db::SqliteStore::new(pool.clone()));
    let graph = Arc::new(GraphClient::from_config(&cfg)?);
    let engine = SyncEngine::new(cfg, store, graph);

    match args.command {
        Command::Full { store, inventory_only } => {
            finish("full", engine.run_full(store, inventory_only).await)
        }
        Command::Incremental { store, method } => {
            let methods = match method {
                Some(m) => vec![m.into()],
                None => vec![ChangeMethod::Update, ChangeMethod::Delete],
            };
            let reports = engine.run_incremental(store, &methods).await?;
            let remaining = db::count_pending_changes(&pool, None).await?;
            info!(passes = reports.len(), remaining, "incremental run finished");
            let failed: Vec<i64> = reports.iter().flat_map(|r| r.failed_stores.clone()).collect();
            if failed.is_empty() {
                Ok(())
            } else {
                bail!("incremental pass released its reservation after failures in stores {:?}", failed)
            }
        }
        Command::Categories { store } => finish("categories", engine.run_categories(store).await),
        Command::Enqueue { product, sku, method } => {
            engine.product_changed(product, &sku, method.into()).await?;
            Ok(())
        }
        Command::Category { id, renamed, delete } => {
            if delete {
                finish("category-delete", engine.category_deleted(id).await)
            } else {
                finish("category", engine.category_saved(id, renamed).await)
            }
        }
        Command::SetSync {
            product,
            sku,
            category,
            state,
        } => match (product, sku, category) {
            (Some(product), Some(sku), None) => {
                engine.set_product_sync(product, &sku, state.as_flag()).await?;
                Ok(())
            }
            (None, _, Some(category)) => engine.set_category_sync(category, state.as_flag()).await,
            _ => bail!("set-sync needs either --product with --sku, or --category"),
        },
    }
}
