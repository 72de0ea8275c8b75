//! Acquisition Manager - Unified Quote and Bar Access
//!
//! Orchestrates both cache tiers and both chains without any
//! provider-specific logic:
//!
//! - Quotes: memory cache, then the async fallback chain; successful
//!   batches are cached with the real-time TTL.
//! - Daily bars: persistent store first; when it holds fewer than
//!   `min_bars` rows and the symbol has not been force-refetched in this
//!   process, the priority chain is called and the result upserted.
//! - Minute bars: always refetched, store used only as a fallback.
//! - Snapshots: store rows first, then the snapshot chain, then the
//!   snapshot fallback chain for whatever is still unresolved.
//!
//! Source exhaustion is never an error here: callers get an empty (or
//! cached) result. Errors are reserved for bad input and store faults.
//!
//! Blocking operations share one worker lock so the throttle only ever
//! sees one caller at a time.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::fallback_chain::FallbackChain;
use super::priority_chain::PriorityChain;
use crate::adapters::cache::{CacheStats, MemoryCache};
use crate::domain::health::SourceHealthReport;
use crate::domain::market::{
  Adjustment, BarRequest, Category, Frequency, NormalizedBar, NormalizedQuote, Snapshot,
};
use crate::domain::symbol::{normalize_us_symbol, AssetClass, SymbolError};
use crate::ports::source::SourceRequest;
use crate::ports::store::{BarQuery, BarStore, SnapshotStore, StoreError, TableStats};

/// Days of intraday history requested for minute bars.
const MINUTE_LOOKBACK_DAYS: i64 = 5;

/// Provenance of snapshot error rows when no source answered.
const NO_SOURCE: &str = "none";

#[derive(Debug, Error)]
pub enum AcquisitionError {
  #[error(transparent)]
  InvalidSymbol(#[from] SymbolError),

  #[error("unsupported minute period: {0}")]
  UnsupportedPeriod(u32),

  /// A store write failed; the batch was rolled back.
  #[error("store write failed: {0}")]
  Store(#[from] StoreError),

  #[error("blocking worker panicked: {0}")]
  WorkerPanicked(String),
}

/// Manager tuning, usually derived from `AppConfig`.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
  /// Symbol convention for quotes and bars.
  pub asset_class: AssetClass,
  /// TTL of cached real-time quote batches.
  pub realtime_ttl: Duration,
  /// Cached rows below this count trigger a one-time refetch.
  pub min_bars: usize,
  /// Daily window used when a caller asks for 0 days.
  pub default_days: u32,
  /// Memory cache capacity.
  pub cache_max_size: usize,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    Self {
      asset_class: AssetClass::Cn,
      realtime_ttl: Duration::from_secs(30),
      min_bars: 20,
      default_days: 60,
      cache_max_size: 2000,
    }
  }
}

/// Per-symbol warm-up outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WarmStatus {
  Rows(usize),
  Error(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmReport {
  pub symbols_warmed: usize,
  pub elapsed_ms: u64,
  pub details: BTreeMap<String, WarmStatus>,
}

/// Aggregated operational view of chains, caches and store.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
  pub realtime: BTreeMap<String, SourceHealthReport>,
  pub history: BTreeMap<String, SourceHealthReport>,
  pub memory_cache: CacheStats,
  /// `None` when the store could not be queried.
  pub bar_store: Option<TableStats>,
  pub snapshot_store: Option<TableStats>,
  pub warmed_symbols: usize,
  pub priorities: BTreeMap<Category, Vec<String>>,
}

/// Explicitly constructed acquisition context. Owns both chains and the
/// memory cache; shares the stores.
pub struct AcquisitionManager {
  config: ManagerConfig,
  realtime: FallbackChain,
  history: PriorityChain,
  quotes: MemoryCache<Vec<NormalizedQuote>>,
  bar_store: Arc<dyn BarStore>,
  snapshot_store: Arc<dyn SnapshotStore>,
  /// Symbols force-refetched in this process.
  warmed: Mutex<HashSet<String>>,
  /// Serializes every blocking chain call.
  history_worker: Mutex<()>,
}

impl AcquisitionManager {
  pub fn new(
    config: ManagerConfig,
    realtime: FallbackChain,
    history: PriorityChain,
    bar_store: Arc<dyn BarStore>,
    snapshot_store: Arc<dyn SnapshotStore>,
  ) -> Self {
    let quotes = MemoryCache::new(config.cache_max_size, config.realtime_ttl);
    Self {
      config,
      realtime,
      history,
      quotes,
      bar_store,
      snapshot_store,
      warmed: Mutex::new(HashSet::new()),
      history_worker: Mutex::new(()),
    }
  }

  pub fn config(&self) -> &ManagerConfig {
    &self.config
  }

  fn normalize(&self, raw: &str) -> Result<String, AcquisitionError> {
    Ok(self.config.asset_class.normalize(raw)?)
  }

  fn window_days(&self, days: u32) -> u32 {
    if days == 0 { self.config.default_days } else { days }
  }

  // ── Quotes ─────────────────────────────────────────

  /// Real-time quotes for `symbols`. Empty when every source failed.
  #[instrument(skip(self, symbols), fields(symbols = symbols.len()))]
  pub async fn get_quotes(
    &self,
    symbols: &[String],
  ) -> Result<Vec<NormalizedQuote>, AcquisitionError> {
    if symbols.is_empty() {
      return Ok(Vec::new());
    }
    let codes = symbols
      .iter()
      .map(|s| self.normalize(s))
      .collect::<Result<Vec<_>, _>>()?;

    let key = quote_cache_key(&codes);
    if let Some(cached) = self.quotes.get(&key) {
      debug!(key = %key, "Quote cache hit");
      return Ok(cached);
    }

    let request = SourceRequest::Quotes { symbols: codes };
    let outcome = self.realtime.fetch(Category::Realtime, &request).await;
    if outcome.is_exhausted() {
      return Ok(Vec::new());
    }

    let quotes = outcome.into_payload().into_quotes();
    self.quotes.set(&key, quotes.clone(), Some(self.config.realtime_ttl));
    Ok(quotes)
  }

  // ── Historical bars (blocking) ─────────────────────

  /// Daily bars for the last `days` days ending today. `0` selects
  /// the configured default window.
  pub fn get_bars(
    &self,
    symbol: &str,
    days: u32,
    adjustment: Adjustment,
  ) -> Result<Vec<NormalizedBar>, AcquisitionError> {
    let (start, end) = lookback(self.window_days(days));
    self.get_bars_between(symbol, start, end, adjustment)
  }

  /// Daily bars in `[start, end]`, refetching once when the store is thin.
  #[instrument(skip(self))]
  pub fn get_bars_between(
    &self,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    adjustment: Adjustment,
  ) -> Result<Vec<NormalizedBar>, AcquisitionError> {
    let code = self.normalize(symbol)?;
    let _worker = self.history_worker.lock();

    let query = BarQuery::new(&code, Frequency::Daily, adjustment)
      .between(day_start(start), day_end(end));
    let cached = self.read_bars(&query);

    if cached.len() >= self.config.min_bars {
      return Ok(cached);
    }
    if !self.warmed.lock().insert(code.clone()) {
      debug!(symbol = %code, rows = cached.len(), "Already warmed, serving cached rows");
      return Ok(cached);
    }

    info!(symbol = %code, rows = cached.len(), "Cached bars insufficient, fetching from source");
    let request = BarRequest {
      symbol: code,
      start,
      end,
      frequency: Frequency::Daily,
      adjustment,
    };
    match self.refetch(Category::Daily, request)? {
      Some(bars) => Ok(bars),
      None => Ok(cached),
    }
  }

  /// Intraday bars of `period` minutes. Always refetched; cached rows
  /// are served only when every source failed.
  #[instrument(skip(self))]
  pub fn get_minute_bars(
    &self,
    symbol: &str,
    period: u32,
    adjustment: Adjustment,
  ) -> Result<Vec<NormalizedBar>, AcquisitionError> {
    if !Frequency::MINUTE_PERIODS.contains(&period) {
      return Err(AcquisitionError::UnsupportedPeriod(period));
    }
    let code = self.normalize(symbol)?;
    let frequency = Frequency::Minute(period);
    let end = Local::now().date_naive();
    let start = end - chrono::Duration::days(MINUTE_LOOKBACK_DAYS);

    let _worker = self.history_worker.lock();
    let request = BarRequest {
      symbol: code.clone(),
      start,
      end,
      frequency,
      adjustment,
    };
    if let Some(bars) = self.refetch(Category::Minute, request)? {
      return Ok(bars);
    }
    Ok(self.read_bars(&BarQuery::new(code, frequency, adjustment)))
  }

  /// Concatenated daily bars for many symbols; failing symbols are skipped.
  pub fn get_daily_batch(
    &self,
    symbols: &[String],
    days: u32,
    adjustment: Adjustment,
  ) -> Vec<NormalizedBar> {
    let mut all = Vec::new();
    for symbol in symbols {
      match self.get_bars(symbol, days, adjustment) {
        Ok(bars) => all.extend(bars),
        Err(e) => warn!(symbol = %symbol, error = %e, "Skipping symbol in batch"),
      }
    }
    all
  }

  /// Force-refetch daily bars for every symbol and persist them.
  /// `days == 0` selects the configured default window.
  #[instrument(skip(self, symbols), fields(symbols = symbols.len()))]
  pub fn warm_bars(&self, symbols: &[String], days: u32) -> WarmReport {
    let started = Instant::now();
    let (start, end) = lookback(self.window_days(days));
    let mut details = BTreeMap::new();

    for symbol in symbols {
      let status = match self.warm_one(symbol, start, end) {
        Ok(rows) => {
          if rows < self.config.min_bars {
            warn!(symbol = %symbol, rows, "Warm returned fewer rows than expected");
          }
          WarmStatus::Rows(rows)
        }
        Err(e) => {
          warn!(symbol = %symbol, error = %e, "Warm failed");
          WarmStatus::Error(e)
        }
      };
      details.insert(symbol.clone(), status);
    }

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(symbols = symbols.len(), elapsed_ms, "Warm-up finished");
    WarmReport {
      symbols_warmed: symbols.len(),
      elapsed_ms,
      details,
    }
  }

  fn warm_one(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<usize, String> {
    let code = self.normalize(symbol).map_err(|e| e.to_string())?;
    let _worker = self.history_worker.lock();

    let request = BarRequest {
      symbol: code.clone(),
      start,
      end,
      frequency: Frequency::Daily,
      adjustment: Adjustment::None,
    };
    // Only a successful warm marks the code; a failed one leaves the
    // next thin read free to refetch.
    match self.refetch(Category::Daily, request) {
      Ok(Some(bars)) => {
        self.warmed.lock().insert(code);
        Ok(bars.len())
      }
      Ok(None) => Err("all sources exhausted".to_string()),
      Err(e) => Err(e.to_string()),
    }
  }

  /// Run the bar chain and upsert a successful result.
  ///
  /// `Ok(None)` on exhaustion. Caller must hold the worker lock.
  fn refetch(
    &self,
    category: Category,
    request: BarRequest,
  ) -> Result<Option<Vec<NormalizedBar>>, AcquisitionError> {
    let outcome = self.history.fetch(category, &SourceRequest::Bars(request));
    if outcome.is_exhausted() {
      return Ok(None);
    }
    let source = outcome.source.clone().unwrap_or_default();
    let bars = outcome.into_payload().into_bars();
    let written = self.bar_store.upsert_bars(&bars)?;
    info!(source = %source, rows = written, "Bars fetched and stored");
    Ok(Some(bars))
  }

  /// Store read that degrades to "no rows" on failure. Rows from
  /// several sources collapse to one per timestamp.
  fn read_bars(&self, query: &BarQuery) -> Vec<NormalizedBar> {
    match self.bar_store.bars(query) {
      Ok(rows) => first_per_timestamp(rows),
      Err(e) => {
        warn!(symbol = %query.symbol, error = %e, "Store read failed, treating as empty");
        Vec::new()
      }
    }
  }

  // ── Snapshots (blocking) ───────────────────────────

  /// One snapshot per distinct requested symbol, in request order.
  ///
  /// Unresolvable symbols get an error row rather than being dropped.
  #[instrument(skip(self, symbols), fields(symbols = symbols.len()))]
  pub fn get_snapshots(
    &self,
    symbols: &[String],
    use_cache: bool,
  ) -> Result<Vec<Snapshot>, AcquisitionError> {
    let mut ordered = Vec::new();
    let mut seen = HashSet::new();
    for raw in symbols {
      let symbol = normalize_us_symbol(raw)?;
      if seen.insert(symbol.clone()) {
        ordered.push(symbol);
      }
    }
    if ordered.is_empty() {
      return Ok(Vec::new());
    }

    let mut resolved: HashMap<String, Snapshot> = HashMap::new();
    if use_cache {
      match self.snapshot_store.latest_snapshots(&ordered) {
        Ok(rows) => {
          resolved.extend(rows.into_iter().filter(Snapshot::is_ok).map(|r| (r.symbol.clone(), r)));
        }
        Err(e) => warn!(error = %e, "Snapshot store read failed, fetching everything"),
      }
    }

    let remaining: Vec<String> = ordered
      .iter()
      .filter(|s| !resolved.contains_key(*s))
      .cloned()
      .collect();
    let mut fresh = Vec::new();
    let mut primary = NO_SOURCE.to_string();

    if !remaining.is_empty() {
      let _worker = self.history_worker.lock();

      let outcome = self.history.fetch(
        Category::Snapshot,
        &SourceRequest::Snapshots { symbols: remaining.clone() },
      );
      if let Some(source) = &outcome.source {
        primary.clone_from(source);
      }
      fresh.extend(outcome.into_payload().into_snapshots().into_iter().filter(Snapshot::is_ok));

      let unresolved: Vec<String> = remaining
        .iter()
        .filter(|s| !fresh.iter().any(|row| &row.symbol == *s))
        .cloned()
        .collect();
      if !unresolved.is_empty() {
        let outcome = self.history.fetch(
          Category::SnapshotFallback,
          &SourceRequest::Snapshots { symbols: unresolved },
        );
        fresh.extend(outcome.into_payload().into_snapshots().into_iter().filter(Snapshot::is_ok));
      }
    }

    // Only rows for symbols that were actually asked for.
    fresh.retain(|row| remaining.contains(&row.symbol));
    if !fresh.is_empty() {
      self.snapshot_store.upsert_snapshots(&fresh)?;
    }
    for row in fresh {
      resolved.entry(row.symbol.clone()).or_insert(row);
    }

    let now = Utc::now().naive_utc();
    Ok(
      ordered
        .iter()
        .map(|symbol| {
          resolved
            .remove(symbol)
            .unwrap_or_else(|| Snapshot::error_row(symbol, &primary, now))
        })
        .collect(),
    )
  }

  // ── Blocking helpers for async callers ─────────────

  /// Run a blocking manager operation on the blocking thread pool.
  pub async fn run_blocking<T, F>(self: &Arc<Self>, job: F) -> Result<T, AcquisitionError>
  where
    T: Send + 'static,
    F: FnOnce(&Self) -> T + Send + 'static,
  {
    let manager = Arc::clone(self);
    tokio::task::spawn_blocking(move || job(manager.as_ref()))
      .await
      .map_err(|e| AcquisitionError::WorkerPanicked(e.to_string()))
  }

  // ── Reporting and teardown ─────────────────────────

  pub fn health_report(&self) -> HealthReport {
    let mut priorities = self.realtime.core().priority_map();
    priorities.extend(self.history.core().priority_map());

    HealthReport {
      realtime: self.realtime.health_report(),
      history: self.history.health_report(),
      memory_cache: self.quotes.stats(),
      bar_store: self
        .bar_store
        .bar_stats()
        .inspect_err(|e| warn!(error = %e, "Bar store stats unavailable"))
        .ok(),
      snapshot_store: self
        .snapshot_store
        .snapshot_stats()
        .inspect_err(|e| warn!(error = %e, "Snapshot store stats unavailable"))
        .ok(),
      warmed_symbols: self.warmed.lock().len(),
      priorities,
    }
  }

  pub fn cache_stats(&self) -> CacheStats {
    self.quotes.stats()
  }

  pub fn is_warmed(&self, symbol: &str) -> bool {
    self
      .normalize(symbol)
      .is_ok_and(|code| self.warmed.lock().contains(&code))
  }

  /// Close every source and drop cached quotes.
  pub async fn close(&self) {
    self.realtime.close().await;
    self.quotes.clear();
    info!("Acquisition manager closed");
  }
}

/// Memory cache key of a quote batch: order-insensitive.
pub fn quote_cache_key(codes: &[String]) -> String {
  let mut sorted: Vec<&str> = codes.iter().map(String::as_str).collect();
  sorted.sort_unstable();
  format!("rt:{}", sorted.join("_"))
}

fn lookback(days: u32) -> (NaiveDate, NaiveDate) {
  let end = Local::now().date_naive();
  (end - chrono::Duration::days(i64::from(days)), end)
}

fn day_start(date: NaiveDate) -> NaiveDateTime {
  date.and_time(NaiveTime::MIN)
}

fn day_end(date: NaiveDate) -> NaiveDateTime {
  date.and_hms_opt(23, 59, 59).unwrap_or_else(|| day_start(date))
}

/// Keep the first row per timestamp of a timestamp-ordered slice.
fn first_per_timestamp(rows: Vec<NormalizedBar>) -> Vec<NormalizedBar> {
  let mut out: Vec<NormalizedBar> = Vec::with_capacity(rows.len());
  for row in rows {
    if out.last().is_none_or(|prev| prev.timestamp != row.timestamp) {
      out.push(row);
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bar(day: u32, source: &str) -> NormalizedBar {
    NormalizedBar {
      symbol: "600519".into(),
      timestamp: NaiveDate::from_ymd_opt(2024, 3, day).unwrap().and_time(NaiveTime::MIN),
      open: 1.0,
      high: 1.0,
      low: 1.0,
      close: 1.0,
      volume: 0.0,
      amount: 0.0,
      source: source.into(),
      frequency: Frequency::Daily,
      adjustment: Adjustment::None,
    }
  }

  #[test]
  fn test_quote_cache_key_is_order_insensitive() {
    let a = quote_cache_key(&["600519".into(), "000001".into()]);
    let b = quote_cache_key(&["000001".into(), "600519".into()]);
    assert_eq!(a, b);
    assert_eq!(a, "rt:000001_600519");
  }

  #[test]
  fn test_first_per_timestamp_collapses_sources() {
    let rows = vec![bar(1, "baostock"), bar(1, "sina"), bar(2, "sina")];
    let collapsed = first_per_timestamp(rows);
    assert_eq!(collapsed.len(), 2);
    assert_eq!(collapsed[0].source, "baostock");
  }

  #[test]
  fn test_lookback_window() {
    let (start, end) = lookback(30);
    assert_eq!((end - start).num_days(), 30);
    assert!(day_end(end) > day_start(end));
  }

  #[test]
  fn test_warm_status_serializes_untagged() {
    assert_eq!(serde_json::to_string(&WarmStatus::Rows(42)).unwrap(), "42");
    assert_eq!(
      serde_json::to_string(&WarmStatus::Error("boom".into())).unwrap(),
      "\"boom\""
    );
  }
}
