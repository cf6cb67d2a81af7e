use anyhow::Result;
use clap::{Parser, Subcommand};
use court_registry_pipeline::change_monitor::ChangeMonitor;
use court_registry_pipeline::config::Config;
use court_registry_pipeline::coordinator::PipelineCoordinator;
use court_registry_pipeline::embedding::build_embedding_provider;
use court_registry_pipeline::event_bus::build_event_bus;
use court_registry_pipeline::fetcher::FetcherPool;
use court_registry_pipeline::health;
use court_registry_pipeline::metadata_store::SqliteMetadataStore;
use court_registry_pipeline::metrics::Metrics;
use court_registry_pipeline::{blob_store::build_blob_store, metadata_store::MetadataStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "court-registry-pipeline")]
#[command(about = "Ingestion and change-tracking pipeline for a court decisions registry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the discovery and reconciliation loops until a shutdown signal arrives.
    Serve,
    /// Runs one synthetic discovery pass restricted to a date range, then exits.
    Backfill {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Applies idempotent schema creation and exits.
    Migrate,
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

struct Services {
    config: Arc<Config>,
    store: Arc<dyn MetadataStore>,
    coordinator: Arc<PipelineCoordinator>,
    monitor: Arc<ChangeMonitor>,
    metrics: Arc<Metrics>,
}

async fn build_services() -> Result<Services> {
    let config = Arc::new(Config::load()?);
    init_logging(&config);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.fetcher_timeout_secs))
        .pool_max_idle_per_host(config.fetcher_workers * 2)
        .build()?;

    let metrics = Arc::new(Metrics::new()?);
    let blob_store = build_blob_store(&config, http.clone())?;
    let bus = build_event_bus(&config, metrics.clone())?;
    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::connect(&config.database_url).await?);
    let embeddings = build_embedding_provider(
        http.clone(),
        config.embedding_api_base.clone(),
        config.embedding_api_key.clone(),
        config.embedding_model.clone(),
        config.embedding_dimension,
        config.embedding_batch_size,
    );
    let fetcher = Arc::new(FetcherPool::new(
        http.clone(),
        config.fetcher_workers,
        config.fetcher_max_retries,
        blob_store,
    ));
    let monitor = Arc::new(ChangeMonitor::new(
        http,
        config.court_registry_base_url.clone(),
        config.court_registry_rss_endpoint.clone(),
        config.court_registry_search_endpoint.clone(),
        store.clone(),
    ));
    let coordinator = Arc::new(PipelineCoordinator::new(
        config.clone(),
        fetcher,
        store.clone(),
        bus,
        embeddings,
        metrics.clone(),
    ));

    Ok(Services { config, store, coordinator, monitor, metrics })
}

async fn discovery_loop(services: Arc<Services>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let period = Duration::from_secs(services.config.discovery_interval_minutes * 60);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        match services.monitor.discover_documents().await {
            Ok(tuples) => {
                info!(count = tuples.len(), "discovery cycle found documents");
                for tuple in tuples {
                    if let Err(e) = services.coordinator.process(tuple).await {
                        error!(error = %e, "unhandled error processing discovered document");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "discovery cycle failed, backing off");
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }
    }
}

async fn reconciliation_loop(services: Arc<Services>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let period = Duration::from_secs(services.config.reconciliation_interval_hours * 3600);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        match services.monitor.reconcile(services.config.reconciliation_batch_size).await {
            Ok(changed) => {
                info!(count = changed.len(), "reconciliation cycle found changed documents");
                for tuple in changed {
                    if let Err(e) = services.coordinator.process(tuple).await {
                        error!(error = %e, "unhandled error reprocessing changed document");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "reconciliation cycle failed, backing off");
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }
    }
}

async fn wait_for_shutdown_signal(tx: tokio::sync::watch::Sender<bool>) {
    let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    tokio::select! {
        _ = term.recv() => info!("received SIGTERM"),
        _ = int.recv() => info!("received SIGINT"),
    }
    let _ = tx.send(true);
}

async fn run_serve() -> Result<()> {
    let services = Arc::new(build_services().await?);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let health_port = services.config.health_port;
    tokio::spawn(health::serve(health_port, services.metrics.clone()));

    let discovery = tokio::spawn(discovery_loop(services.clone(), shutdown_rx.clone()));
    let reconciliation = tokio::spawn(reconciliation_loop(services.clone(), shutdown_rx.clone()));
    let signal_task = tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    let _ = tokio::join!(discovery, reconciliation, signal_task);
    info!("all loops drained, exiting");
    Ok(())
}

async fn run_backfill(from: String, to: String) -> Result<()> {
    let services = build_services().await?;
    let tuples = services.monitor.discover_for_range(&from, &to).await?;
    info!(count = tuples.len(), from, to, "backfill discovery complete");
    for tuple in tuples {
        services.coordinator.process(tuple).await?;
    }
    Ok(())
}

async fn run_migrate() -> Result<()> {
    let config = Config::load()?;
    init_logging(&config);
    SqliteMetadataStore::connect(&config.database_url).await?;
    info!("schema migration complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => run_serve().await,
        Commands::Backfill { from, to } => run_backfill(from, to).await,
        Commands::Migrate => run_migrate().await,
    }
}
