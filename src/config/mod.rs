//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`.
//! Source endpoints, chain priorities and reliability tuning are all
//! externalized here; nothing provider-specific is hardcoded in the
//! usecases layer.

pub mod loader;

use std::time::Duration;

use serde::Deserialize;

use crate::domain::health::CircuitPolicy;
use crate::domain::market::{Capability, Category};
use crate::domain::symbol::AssetClass;

/// Top-level service configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before any source is contacted.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  #[serde(default)]
  pub service: ServiceConfig,
  /// Health/metrics HTTP server.
  #[serde(default)]
  pub server: ServerConfig,
  /// In-memory quote cache.
  #[serde(default)]
  pub cache: CacheConfig,
  /// Persistent bar/snapshot store.
  #[serde(default)]
  pub store: StoreConfig,
  /// Historical bar policy.
  #[serde(default)]
  pub history: HistoryConfig,
  /// Circuit breaker tuning per chain.
  #[serde(default)]
  pub circuit: CircuitConfig,
  /// Per-source throttling for the blocking chain.
  #[serde(default)]
  pub throttle: ThrottleConfig,
  /// Ordered source names per request category.
  pub chains: ChainsConfig,
  /// Source endpoint definitions.
  pub sources: Vec<SourceConfig>,
  /// Background warm-up of historical bars.
  #[serde(default)]
  pub warmup: WarmupConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  #[serde(default = "default_service_name")]
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Symbol convention for quotes and bars.
  #[serde(default)]
  pub asset_class: AssetClass,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      name: default_service_name(),
      log_level: default_log_level(),
      asset_class: AssetClass::default(),
    }
  }
}

/// Health and metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Bind address for /live, /ready, /health and /metrics.
  #[serde(default = "default_bind_address")]
  pub bind_address: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind_address: default_bind_address(),
    }
  }
}

/// Memory cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Maximum number of entries.
  #[serde(default = "default_cache_max_size")]
  pub max_size: usize,
  /// TTL for real-time quote batches (seconds).
  #[serde(default = "default_realtime_ttl")]
  pub realtime_ttl_seconds: u64,
}

impl CacheConfig {
  pub const fn realtime_ttl(&self) -> Duration {
    Duration::from_secs(self.realtime_ttl_seconds)
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_size: default_cache_max_size(),
      realtime_ttl_seconds: default_realtime_ttl(),
    }
  }
}

/// Persistent store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// SQLite database file.
  #[serde(default = "default_store_path")]
  pub path: String,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      path: default_store_path(),
    }
  }
}

/// Historical bar configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
  /// Cached rows below this count trigger a one-time refetch.
  #[serde(default = "default_min_bars")]
  pub min_bars: usize,
  /// Lookback used when a caller does not specify one (days).
  #[serde(default = "default_history_days")]
  pub default_days: u32,
}

impl Default for HistoryConfig {
  fn default() -> Self {
    Self {
      min_bars: default_min_bars(),
      default_days: default_history_days(),
    }
  }
}

/// Circuit breaker configuration for both chains.
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitConfig {
  #[serde(default = "default_realtime_circuit")]
  pub realtime: CircuitSettings,
  #[serde(default = "default_history_circuit")]
  pub history: CircuitSettings,
}

impl Default for CircuitConfig {
  fn default() -> Self {
    Self {
      realtime: default_realtime_circuit(),
      history: default_history_circuit(),
    }
  }
}

/// Breaker tuning for one chain.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CircuitSettings {
  /// Consecutive failures before the breaker opens.
  pub fail_threshold: u32,
  /// Cooldown before the breaker closes again (seconds).
  pub recover_seconds: u64,
}

impl CircuitSettings {
  pub const fn policy(&self) -> CircuitPolicy {
    CircuitPolicy {
      fail_threshold: self.fail_threshold,
      recover: Duration::from_secs(self.recover_seconds),
    }
  }
}

/// Throttle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
  /// Minimum spacing between calls to one source (milliseconds).
  #[serde(default = "default_min_interval")]
  pub min_interval_ms: u64,
}

impl ThrottleConfig {
  pub const fn min_interval(&self) -> Duration {
    Duration::from_millis(self.min_interval_ms)
  }
}

impl Default for ThrottleConfig {
  fn default() -> Self {
    Self {
      min_interval_ms: default_min_interval(),
    }
  }
}

/// Static fallback order per request category.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainsConfig {
  #[serde(default)]
  pub realtime: Vec<String>,
  #[serde(default)]
  pub daily: Vec<String>,
  #[serde(default)]
  pub minute: Vec<String>,
  #[serde(default)]
  pub snapshot: Vec<String>,
  #[serde(default)]
  pub snapshot_fallback: Vec<String>,
}

impl ChainsConfig {
  /// Priority list for a category.
  pub fn priorities(&self, category: Category) -> &[String] {
    match category {
      Category::Realtime => &self.realtime,
      Category::Daily => &self.daily,
      Category::Minute => &self.minute,
      Category::Snapshot => &self.snapshot,
      Category::SnapshotFallback => &self.snapshot_fallback,
    }
  }
}

/// One HTTP relay source.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
  /// Identifier referenced by `[chains]`.
  pub name: String,
  /// Base URL serving the normalized JSON endpoints.
  pub base_url: String,
  /// Per-request timeout (milliseconds).
  #[serde(default = "default_source_timeout")]
  pub timeout_ms: u64,
  /// Disabled sources are never probed or registered.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Endpoints the relay serves. Defaults to all of them.
  #[serde(default = "default_capabilities")]
  pub capabilities: Vec<Capability>,
}

/// Warm-up configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WarmupConfig {
  /// Symbols whose daily bars are refreshed.
  #[serde(default)]
  pub symbols: Vec<String>,
  /// Lookback (days).
  #[serde(default = "default_warmup_days")]
  pub days: u32,
  /// Repeat interval (seconds); 0 runs once at startup.
  #[serde(default)]
  pub interval_seconds: u64,
}

impl Default for WarmupConfig {
  fn default() -> Self {
    Self {
      symbols: Vec::new(),
      days: default_warmup_days(),
      interval_seconds: 0,
    }
  }
}

// Default value functions for serde

fn default_service_name() -> String {
  "marketdata-hub".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_bind_address() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_cache_max_size() -> usize {
  2000
}

fn default_realtime_ttl() -> u64 {
  30
}

fn default_store_path() -> String {
  "data/marketdata.db".to_string()
}

fn default_min_bars() -> usize {
  20
}

fn default_history_days() -> u32 {
  60
}

fn default_realtime_circuit() -> CircuitSettings {
  CircuitSettings {
    fail_threshold: 3,
    recover_seconds: 300,
  }
}

fn default_history_circuit() -> CircuitSettings {
  CircuitSettings {
    fail_threshold: 3,
    recover_seconds: 600,
  }
}

fn default_min_interval() -> u64 {
  2000
}

fn default_source_timeout() -> u64 {
  10_000
}

fn default_true() -> bool {
  true
}

fn default_capabilities() -> Vec<Capability> {
  vec![Capability::Quotes, Capability::Bars, Capability::Snapshots]
}

fn default_warmup_days() -> u32 {
  90
}
