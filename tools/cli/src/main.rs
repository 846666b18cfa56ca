//! Carecache CLI - drive the offline cache from the command line.
//!
//! Syncs collections from the API into the local database, inspects what is
//! cached, uploads files through the connectivity gate and runs the caching
//! proxy in front of a web origin.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use carecache_common::{CollectionName, Connectivity, ConnectivityMonitor};
use carecache_router::proxy::{self, ProxyConfig};
use carecache_router::{
    CacheStorage, HttpNetwork, OfflineDocument, RequestRouter, RouterConfig, RouterHost,
};
use carecache_storage::{create_default_registry, UploadFile, UploadGate};
use carecache_store::{MemoryStore, RecordStore, SqliteStore};
use carecache_sync::{HttpRemoteSource, SyncManager, SyncOutcome, SyncState};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "carecache")]
#[command(about = "Carecache - offline-first data cache")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Local database path.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Behave as if the device were offline.
    #[arg(long, global = true)]
    offline: bool,

    /// Keep records in memory only; nothing is written to disk.
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh collections from the API.
    Sync {
        /// Only this collection (default: every configured one).
        #[arg(short = 'n', long)]
        collection: Option<String>,

        /// Sync even when the local copy is fresh.
        #[arg(short, long)]
        force: bool,
    },

    /// Print every cached record of a collection.
    List {
        #[arg(short = 'n', long)]
        collection: String,
    },

    /// Print one cached record.
    Get {
        #[arg(short = 'n', long)]
        collection: String,

        /// Record id.
        #[arg(short, long)]
        id: String,
    },

    /// Drop cached records and sync state of a collection.
    Clear {
        #[arg(short = 'n', long)]
        collection: String,
    },

    /// Show sync state of every known collection.
    Status,

    /// Upload a file to blob storage.
    Upload {
        /// File to upload.
        #[arg(short, long)]
        file: PathBuf,

        /// Owner id, used as the first path segment.
        #[arg(short, long)]
        owner: String,

        /// Category, e.g. "avatar" or "documents".
        #[arg(short = 'k', long, default_value = "documents")]
        category: String,
    },

    /// Run the caching proxy.
    Serve {
        /// Listen address (default from config).
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Origin to forward requests to.
        #[arg(short, long)]
        upstream: Option<Url>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = AppConfig::load(cli.config.as_deref())?;
    let connectivity = Arc::new(ConnectivityMonitor::new(if cli.offline {
        Connectivity::Offline
    } else {
        Connectivity::Online
    }));
    let database = (!cli.ephemeral).then(|| config.database_path(cli.database.as_deref()));
    let database = database.as_deref();

    match cli.command {
        Commands::Sync { collection, force } => {
            cmd_sync(&config, database, connectivity, collection.as_deref(), force).await
        }

        Commands::List { collection } => cmd_list(database, &collection).await,

        Commands::Get { collection, id } => cmd_get(database, &collection, &id).await,

        Commands::Clear { collection } => cmd_clear(database, &collection).await,

        Commands::Status => cmd_status(&config, database).await,

        Commands::Upload {
            file,
            owner,
            category,
        } => cmd_upload(&config, connectivity, &file, &owner, &category).await,

        Commands::Serve { listen, upstream } => cmd_serve(&config, listen, upstream).await,
    }
}

/// Open the local database, creating its directory if needed.
///
/// `None` selects a throwaway in-memory store.
fn open_store(path: Option<&Path>) -> Result<Arc<dyn RecordStore>> {
    let Some(path) = path else {
        debug!("Using in-memory record store");
        return Ok(Arc::new(MemoryStore::new()));
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn collection_name(name: &str) -> Result<CollectionName> {
    CollectionName::new(name).context("Invalid collection name")
}

/// Sync one or every configured collection.
async fn cmd_sync(
    config: &AppConfig,
    database: Option<&Path>,
    connectivity: Arc<ConnectivityMonitor>,
    only: Option<&str>,
    force: bool,
) -> Result<()> {
    let targets = match only {
        Some(name) => vec![config.collection(name)],
        None => config.collections.clone(),
    };
    if targets.is_empty() {
        anyhow::bail!("No collections configured. Pass --collection or add them to the config");
    }

    let manager = SyncManager::new(open_store(database)?, connectivity);
    for target in &targets {
        let source = HttpRemoteSource::new(
            &config.api_base,
            target.endpoint_path(),
            config.bearer_token.clone(),
        )
        .context("Invalid API endpoint")?;
        manager
            .register(
                collection_name(&target.name)?,
                Arc::new(source),
                config.sync_config(target),
            )
            .await
            .context("Failed to register collection")?;
    }

    let results = if force {
        manager.force_sync_all().await
    } else {
        manager.sync_all().await
    };

    let mut failures = 0;
    for (collection, result) in results {
        let result = result.with_context(|| format!("Sync of '{}' failed", collection))?;
        match &result.outcome {
            SyncOutcome::Synced { records } => {
                println!("{}: synced {} records in {:?}", collection, records, result.duration);
            }
            SyncOutcome::Skipped { reason } => {
                println!(
                    "{}: skipped ({:?}), {} records cached",
                    collection,
                    reason,
                    result.records.len()
                );
            }
            SyncOutcome::Failed { error } => {
                failures += 1;
                println!(
                    "{}: failed: {} ({} records cached)",
                    collection,
                    error,
                    result.records.len()
                );
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} collection(s) failed to sync", failures);
    }
    Ok(())
}

/// Print a collection as a JSON array.
async fn cmd_list(database: Option<&Path>, collection: &str) -> Result<()> {
    let store = open_store(database)?;
    let records = store
        .get_all(&collection_name(collection)?)
        .await
        .context("Failed to read collection")?;
    debug!("{} records in '{}'", records.len(), collection);

    let values: Vec<_> = records.into_iter().map(|r| r.into_value()).collect();
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}

async fn cmd_get(database: Option<&Path>, collection: &str, id: &str) -> Result<()> {
    let store = open_store(database)?;
    let record = store
        .get_by_id(&collection_name(collection)?, id)
        .await
        .context("Failed to read record")?;

    match record {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record.into_value())?);
            Ok(())
        }
        None => anyhow::bail!("No record '{}' in '{}'", id, collection),
    }
}

async fn cmd_clear(database: Option<&Path>, collection: &str) -> Result<()> {
    let store = open_store(database)?;
    let name = collection_name(collection)?;

    store.clear(&name).await.context("Failed to clear records")?;
    SyncState::forget(store.as_ref(), &name)
        .await
        .context("Failed to clear sync state")?;

    println!("Cleared '{}'", collection);
    Ok(())
}

async fn cmd_status(config: &AppConfig, database: Option<&Path>) -> Result<()> {
    let store = open_store(database)?;

    let mut names: BTreeSet<String> = config.collections.iter().map(|c| c.name.clone()).collect();
    for name in store.collections().await.context("Failed to list collections")? {
        names.insert(name.as_str().to_string());
    }

    if names.is_empty() {
        println!("No collections cached yet.");
        return Ok(());
    }

    let now = chrono::Utc::now();
    for name in names {
        let collection = config.collection(&name);
        let interval = config.sync_config(&collection).sync_interval;
        let name = collection_name(&name)?;
        let state = SyncState::load(store.as_ref(), &name, interval).await?;
        let cached = store.get_all(&name).await?.len();

        println!("{}", name);
        println!("  Records: {}", cached);
        match state.last_synced_at {
            Some(at) => println!("  Last synced: {}", at.to_rfc3339()),
            None => println!("  Last synced: never"),
        }
        println!("  Stale: {}", state.is_stale(now));
        println!("  Phase: {:?}", state.phase);
        if let Some(error) = &state.last_error {
            println!("  Last error: {}", error);
        }
    }

    Ok(())
}

async fn cmd_upload(
    config: &AppConfig,
    connectivity: Arc<ConnectivityMonitor>,
    path: &Path,
    owner: &str,
    category: &str,
) -> Result<()> {
    let storage = create_default_registry()
        .resolve(&config.storage.backend, config.storage.options.clone())
        .context("Failed to set up blob storage")?;
    let gate = UploadGate::new(storage, connectivity, config.upload.clone());

    let mut progress = gate.progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let state = progress.borrow_and_update().clone();
            debug!("Upload {}%: {:?}", state.percent(), state);
            if state.is_finished() {
                break;
            }
        }
    });

    let file = UploadFile::from_path(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    info!("Uploading {} ({} bytes)", file.file_name, file.data.len());

    let result = gate.upload(file, owner, category).await;
    let _ = reporter.await;

    let url = result.context("Upload failed")?;
    println!("{}", url);
    Ok(())
}

async fn cmd_serve(
    config: &AppConfig,
    listen: Option<SocketAddr>,
    upstream: Option<Url>,
) -> Result<()> {
    let upstream = match upstream {
        Some(url) => url,
        None => {
            let configured = config
                .proxy
                .upstream
                .as_deref()
                .context("No upstream given. Pass --upstream or set proxy.upstream")?;
            Url::parse(configured).context("Invalid proxy.upstream")?
        }
    };

    let mut router_config = RouterConfig::default();
    if let Some(routes) = &config.proxy.routes {
        router_config = router_config.with_routes(routes.clone());
    }
    if let Some(page) = &config.proxy.offline_page {
        let offline = OfflineDocument::from_file(page)
            .await
            .with_context(|| format!("Failed to read offline page {}", page.display()))?;
        router_config = router_config.with_offline(offline);
    }

    let network = Arc::new(HttpNetwork::new().context("Failed to create HTTP client")?);
    let router = RequestRouter::new(router_config, Arc::new(CacheStorage::new()), network.clone());
    let host = Arc::new(RouterHost::new(network));
    let outcome = host.install(router).await.context("Router install failed")?;
    debug!("Router install: {:?}", outcome);

    let proxy_config = ProxyConfig {
        listen: listen.unwrap_or(config.proxy.listen),
        upstream,
    };
    proxy::serve(host, proxy_config)
        .await
        .context("Proxy stopped")?;

    Ok(())
}
