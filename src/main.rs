//! Market Data Hub - Entry Point
//!
//! Wires configured sources into both chains, opens the store, serves
//! health/metrics and keeps historical bars warm. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config (path from MARKETDATA_CONFIG, default config.toml)
//! 2. Init tracing (JSON structured logging)
//! 3. Probe sources once and register the working ones
//! 4. Open the SQLite store
//! 5. Build realtime + history chains and the acquisition manager
//! 6. Spawn health server (/live, /ready, /health, /metrics)
//! 7. Spawn warm-up task (startup + optional interval)
//! 8. Wait for SIGINT, then shut down gracefully

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use marketdata_hub::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use marketdata_hub::adapters::persistence::SqliteStore;
use marketdata_hub::adapters::sources::SourceRegistry;
use marketdata_hub::config::{self, AppConfig};
use marketdata_hub::domain::market::Category;
use marketdata_hub::usecases::{AcquisitionManager, FallbackChain, ManagerConfig, PriorityChain};

const CONFIG_ENV: &str = "MARKETDATA_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        asset_class = ?config.service.asset_class,
        sources = config.sources.len(),
        "Starting market data hub"
    );

    // ── 3. Probe sources once ───────────────────────────────
    let registry = SourceRegistry::from_config(&config.sources)
        .await
        .context("Failed to build sources")?;
    if registry.is_empty() {
        warn!("No source passed the startup probe; every request will be served from cache only");
    }
    info!(
        registered = registry.len(),
        rejected = registry.rejected().len(),
        "Source registry ready"
    );

    // ── 4. Open persistent store ────────────────────────────
    let store = SqliteStore::open(&config.store.path)
        .with_context(|| format!("Failed to open store at {}", config.store.path))?;

    // ── 5. Build chains and manager ─────────────────────────
    let manager = Arc::new(build_manager(&config, &registry, store, Handle::current())?);

    // ── 6. Shutdown channel + health server ─────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let health_state = Arc::new(HealthState::new(
        Arc::clone(&manager),
        MetricsRegistry::new().context("Failed to register metrics")?,
    ));
    let server = HealthServer::new(Arc::clone(&health_state), config.server.bind_address.clone());
    let server_shutdown = shutdown_tx.subscribe();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = server.run(server_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    // ── 7. Warm-up task ─────────────────────────────────────
    let warm_handle = tokio::spawn(run_warmup(
        Arc::clone(&manager),
        config.warmup.clone(),
        shutdown_tx.subscribe(),
    ));

    info!("All tasks spawned, hub is running");

    // ── 8. Wait for SIGINT ──────────────────────────────────
    signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    info!("SIGINT received, initiating graceful shutdown");

    // 1. Readiness probe → 503
    health_state.mark_not_ready();

    // 2. Signal all tasks to stop
    let _ = shutdown_tx.send(());

    // 3. Let an in-flight warm-up batch finish its current symbol
    let _ = tokio::time::timeout(Duration::from_secs(30), warm_handle).await;

    // 4. Release source connections
    manager.close().await;

    // 5. Stop health server
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;

    info!("Shutdown complete");
    Ok(())
}

/// Assemble both chains over the registered sources.
fn build_manager(
    config: &AppConfig,
    registry: &SourceRegistry,
    store: SqliteStore,
    handle: Handle,
) -> Result<AcquisitionManager> {
    let realtime = FallbackChain::new(
        registry.async_sources(),
        registry.priorities(&config.chains, &[Category::Realtime]),
        config.circuit.realtime.policy(),
    )
    .context("Invalid realtime chain")?;

    let history = PriorityChain::new(
        registry.blocking_sources(&handle),
        registry.priorities(
            &config.chains,
            &[
                Category::Daily,
                Category::Minute,
                Category::Snapshot,
                Category::SnapshotFallback,
            ],
        ),
        config.circuit.history.policy(),
        config.throttle.min_interval(),
    )
    .context("Invalid history chain")?;

    let manager_config = ManagerConfig {
        asset_class: config.service.asset_class,
        realtime_ttl: config.cache.realtime_ttl(),
        min_bars: config.history.min_bars,
        default_days: config.history.default_days,
        cache_max_size: config.cache.max_size,
    };

    let store = Arc::new(store);
    Ok(AcquisitionManager::new(
        manager_config,
        realtime,
        history,
        store.clone(),
        store,
    ))
}

/// Warm configured symbols at startup and then every `interval_seconds`.
async fn run_warmup(
    manager: Arc<AcquisitionManager>,
    warmup: config::WarmupConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if warmup.symbols.is_empty() {
        info!("No warm-up symbols configured");
        return;
    }

    loop {
        let symbols = warmup.symbols.clone();
        let days = warmup.days;
        match manager.run_blocking(move |m| m.warm_bars(&symbols, days)).await {
            Ok(report) => info!(
                symbols = report.symbols_warmed,
                elapsed_ms = report.elapsed_ms,
                "Warm-up pass complete"
            ),
            Err(e) => error!(error = %e, "Warm-up pass failed"),
        }

        if warmup.interval_seconds == 0 {
            return;
        }
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!("Warm-up task received shutdown signal");
                return;
            }
            () = tokio::time::sleep(Duration::from_secs(warmup.interval_seconds)) => {}
        }
    }
}
