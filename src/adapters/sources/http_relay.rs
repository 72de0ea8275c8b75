//! HTTP Relay Source - Generic JSON Market Data Adapter
//!
//! Talks to an HTTP endpoint that already serves the normalized schema:
//!
//! - `GET {base}/quotes?symbols=a,b`
//! - `GET {base}/bars?symbol=&start=&end=&frequency=&adjust=`
//! - `GET {base}/snapshots?symbols=a,b`
//! - `GET {base}/health`
//!
//! Provider-specific scraping lives behind the relay, not here. Every
//! request carries the configured timeout; the chains add none.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::SourceConfig;
use crate::domain::market::{
    timestamp_format, BarRequest, Capability, NormalizedBar, NormalizedQuote, Snapshot,
};
use crate::ports::source::{MarketSource, SourceError, SourcePayload, SourceRequest};

/// Bar row as served by a relay. Key fields come from the request.
#[derive(Debug, Deserialize)]
struct WireBar {
    #[serde(with = "timestamp_format")]
    timestamp: NaiveDateTime,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
    #[serde(default)]
    amount: f64,
}

impl WireBar {
    fn into_bar(self, request: &BarRequest) -> NormalizedBar {
        NormalizedBar {
            symbol: request.symbol.clone(),
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            amount: self.amount,
            source: String::new(),
            frequency: request.frequency,
            adjustment: request.adjustment,
        }
    }
}

/// Async adapter for one relay endpoint.
pub struct HttpRelaySource {
    /// Identifier used in chain configuration.
    name: String,
    /// Base URL without trailing slash.
    base_url: String,
    /// Per-request timeout, also reported in `SourceError::Timeout`.
    timeout: Duration,
    /// Endpoints this relay serves.
    capabilities: Vec<Capability>,
    /// Shared connection pool.
    http: Client,
}

impl HttpRelaySource {
    /// Build the adapter and its HTTP client.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .with_context(|| format!("Failed to build HTTP client for {}", config.name))?;

        Ok(Self {
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            capabilities: config.capabilities.clone(),
            http,
        })
    }

    fn map_transport_error(&self, err: &reqwest::Error) -> SourceError {
        if err.is_timeout() {
            SourceError::Timeout(self.timeout)
        } else if err.is_decode() {
            SourceError::Malformed(err.to_string())
        } else {
            SourceError::Network(err.to_string())
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited);
        }
        if status.is_server_error() {
            return Err(SourceError::Network(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(SourceError::Malformed(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(&e))?;
        serde_json::from_slice(&body).map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl MarketSource for HttpRelaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    #[instrument(skip(self, request), fields(source = %self.name, request = %request.describe()))]
    async fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError> {
        let capability = request.capability();
        if !self.supports(capability) {
            return Err(SourceError::Unsupported(capability));
        }

        let payload = match request {
            SourceRequest::Quotes { symbols } => {
                let quotes: Vec<NormalizedQuote> = self
                    .get_json("/quotes", &[("symbols", symbols.join(","))])
                    .await?;
                SourcePayload::Quotes(quotes)
            }
            SourceRequest::Bars(req) => {
                let query = [
                    ("symbol", req.symbol.clone()),
                    ("start", req.start.to_string()),
                    ("end", req.end.to_string()),
                    ("frequency", req.frequency.as_key()),
                    ("adjust", req.adjustment.as_key().to_string()),
                ];
                let rows: Vec<WireBar> = self.get_json("/bars", &query).await?;
                SourcePayload::Bars(rows.into_iter().map(|row| row.into_bar(req)).collect())
            }
            SourceRequest::Snapshots { symbols } => {
                let rows: Vec<Snapshot> = self
                    .get_json("/snapshots", &[("symbols", symbols.join(","))])
                    .await?;
                SourcePayload::Snapshots(rows)
            }
        };

        debug!(rows = payload.len(), "Relay responded");
        if payload.is_empty() {
            return Err(SourceError::Empty);
        }
        Ok(payload)
    }

    async fn probe(&self) -> Result<(), SourceError> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SourceError::Network(format!("HTTP {}", response.status())))
        }
    }
}
