//! Health Check Server - Probes, Health Report and Metrics
//!
//! Exposes via axum 0.7:
//! - `/live`: 200 while the process runs
//! - `/ready`: 200 until shutdown begins, then 503
//! - `/health`: the manager's health report as JSON
//! - `/metrics`: Prometheus text, gauges refreshed from the same report

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use super::prometheus::MetricsRegistry;
use crate::usecases::AcquisitionManager;

/// Shared state behind every endpoint.
pub struct HealthState {
    /// Cleared when shutdown starts.
    pub ready: AtomicBool,
    /// Source of the health report.
    pub manager: Arc<AcquisitionManager>,
    /// Gauges refreshed at scrape time.
    pub metrics: MetricsRegistry,
}

impl HealthState {
    pub fn new(manager: Arc<AcquisitionManager>, metrics: MetricsRegistry) -> Self {
        Self {
            ready: AtomicBool::new(true),
            manager,
            metrics,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::Relaxed);
    }
}

/// Axum-based health and metrics HTTP server.
pub struct HealthServer {
    state: Arc<HealthState>,
    bind_address: String,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, bind_address: impl Into<String>) -> Self {
        Self {
            state,
            bind_address: bind_address.into(),
        }
    }

    /// Routes without a listener, for embedding and tests.
    pub fn router(state: Arc<HealthState>) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/health", get(Self::health))
            .route("/metrics", get(Self::metrics))
            .with_state(state)
    }

    /// Serve until the shutdown signal fires.
    #[instrument(skip(self, shutdown_rx), fields(address = %self.bind_address))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Self::router(Arc::clone(&self.state));
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        info!(address = %self.bind_address, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness probe: 503 once shutdown has begun.
    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    async fn health(State(state): State<Arc<HealthState>>) -> Response {
        match report_off_thread(&state).await {
            Some(report) => Json(report).into_response(),
            None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }

    async fn metrics(State(state): State<Arc<HealthState>>) -> Response {
        let Some(report) = report_off_thread(&state).await else {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };
        state.metrics.observe(&report);
        match state.metrics.render() {
            Ok(text) => text.into_response(),
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// The report reads SQLite, so it is built on the blocking pool.
async fn report_off_thread(state: &Arc<HealthState>) -> Option<crate::usecases::HealthReport> {
    let manager = Arc::clone(&state.manager);
    tokio::task::spawn_blocking(move || manager.health_report())
        .await
        .inspect_err(|e| error!(error = %e, "Health report task failed"))
        .ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::adapters::persistence::SqliteStore;
    use crate::domain::health::CircuitPolicy;
    use crate::usecases::{FallbackChain, ManagerConfig, PriorityChain};

    fn state() -> Arc<HealthState> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let manager = AcquisitionManager::new(
            ManagerConfig::default(),
            FallbackChain::new(Vec::new(), HashMap::new(), CircuitPolicy::realtime()).unwrap(),
            PriorityChain::new(Vec::new(), HashMap::new(), CircuitPolicy::history(), Duration::ZERO)
                .unwrap(),
            store.clone(),
            store,
        );
        Arc::new(HealthState::new(
            Arc::new(manager),
            MetricsRegistry::new().unwrap(),
        ))
    }

    async fn serve(state: Arc<HealthState>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, HealthServer::router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_readiness_flips_on_shutdown() {
        let state = state();
        let base = serve(Arc::clone(&state)).await;

        let ready = reqwest::get(format!("{base}/ready")).await.unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::OK);

        state.mark_not_ready();
        let ready = reqwest::get(format!("{base}/ready")).await.unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        let live = reqwest::get(format!("{base}/live")).await.unwrap();
        assert_eq!(live.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_and_metrics_bodies() {
        let base = serve(state()).await;

        let health: serde_json::Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["memory_cache"]["max_size"], 2000);
        assert_eq!(health["bar_store"]["rows"], 0);
        assert_eq!(health["warmed_symbols"], 0);

        let metrics = reqwest::get(format!("{base}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(metrics.contains("marketdata_cache_size 0"));
        assert!(metrics.contains(r#"marketdata_store_rows{table="snapshots"} 0"#));
    }
}
