//! Source Port - Market Data Provider Interface
//!
//! Defines the adapter contract consumed by both chains. One request
//! enum covers every capability (quotes, bars, snapshots), so the
//! chain logic is written once and parameterized by what the
//! adapter can serve.
//!
//! Adapters must return an error on any failure (network, parse,
//! unexpected emptiness) rather than partially-filled data, and must
//! be idempotent and side-effect-free. Each adapter enforces its own
//! call timeout; the chains add none.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::market::{BarRequest, Capability, NormalizedBar, NormalizedQuote, Snapshot};

/// Failure of a single adapter call.
///
/// Chains treat every variant the same way: record a failure and move
/// on to the next source. The same source is never retried in-chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
  #[error("network error: {0}")]
  Network(String),

  #[error("timed out after {0:?}")]
  Timeout(Duration),

  #[error("rate limited by provider")]
  RateLimited,

  #[error("malformed response: {0}")]
  Malformed(String),

  #[error("empty result")]
  Empty,

  #[error("{0} not supported by this source")]
  Unsupported(Capability),
}

impl SourceError {
  /// Network, timeout and rate-limit failures. The rest are response
  /// or contract failures.
  pub const fn is_transient(&self) -> bool {
    matches!(self, Self::Network(_) | Self::Timeout(_) | Self::RateLimited)
  }
}

/// A single logical request handed to an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRequest {
  /// Real-time quotes for a batch of symbols.
  Quotes { symbols: Vec<String> },
  /// Historical bars for one symbol.
  Bars(BarRequest),
  /// Latest snapshots for a batch of symbols.
  Snapshots { symbols: Vec<String> },
}

impl SourceRequest {
  pub const fn capability(&self) -> Capability {
    match self {
      Self::Quotes { .. } => Capability::Quotes,
      Self::Bars(_) => Capability::Bars,
      Self::Snapshots { .. } => Capability::Snapshots,
    }
  }

  /// Short description for log fields.
  pub fn describe(&self) -> String {
    match self {
      Self::Quotes { symbols } | Self::Snapshots { symbols } => {
        let head: Vec<&str> = symbols.iter().take(3).map(String::as_str).collect();
        if symbols.len() > 3 {
          format!("{}.. ({} symbols)", head.join(","), symbols.len())
        } else {
          head.join(",")
        }
      }
      Self::Bars(req) => format!(
        "{} {} {}..{}",
        req.symbol, req.frequency, req.start, req.end
      ),
    }
  }
}

/// Normalized records returned by an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePayload {
  Quotes(Vec<NormalizedQuote>),
  Bars(Vec<NormalizedBar>),
  Snapshots(Vec<Snapshot>),
}

impl SourcePayload {
  /// The empty payload for a capability.
  pub const fn empty(capability: Capability) -> Self {
    match capability {
      Capability::Quotes => Self::Quotes(Vec::new()),
      Capability::Bars => Self::Bars(Vec::new()),
      Capability::Snapshots => Self::Snapshots(Vec::new()),
    }
  }

  pub const fn capability(&self) -> Capability {
    match self {
      Self::Quotes(_) => Capability::Quotes,
      Self::Bars(_) => Capability::Bars,
      Self::Snapshots(_) => Capability::Snapshots,
    }
  }

  pub fn len(&self) -> usize {
    match self {
      Self::Quotes(q) => q.len(),
      Self::Bars(b) => b.len(),
      Self::Snapshots(s) => s.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Non-empty, and for snapshots at least one row resolved.
  pub fn is_usable(&self) -> bool {
    match self {
      Self::Snapshots(rows) => rows.iter().any(Snapshot::is_ok),
      other => !other.is_empty(),
    }
  }

  /// Bring an adapter payload into the canonical shape.
  ///
  /// Stamps provenance, pins bar key fields to the request, drops bars
  /// with non-finite prices, sorts and de-duplicates bars on timestamp
  /// and snapshots on symbol (last occurrence wins).
  #[must_use]
  pub fn normalize(self, source: &str, request: &SourceRequest) -> Self {
    match self {
      Self::Quotes(mut quotes) => {
        quotes.retain(|q| !q.symbol.trim().is_empty());
        for quote in &mut quotes {
          quote.symbol = quote.symbol.trim().to_string();
          quote.source = source.to_string();
        }
        Self::Quotes(quotes)
      }
      Self::Bars(mut bars) => {
        bars.retain(NormalizedBar::has_finite_prices);
        if let SourceRequest::Bars(req) = request {
          for bar in &mut bars {
            bar.symbol.clone_from(&req.symbol);
            bar.frequency = req.frequency;
            bar.adjustment = req.adjustment;
          }
        }
        for bar in &mut bars {
          bar.source = source.to_string();
        }
        // Stable sort keeps arrival order among equal timestamps, so the
        // reverse walk below keeps the last occurrence.
        bars.sort_by_key(|b| b.timestamp);
        let mut seen = HashSet::new();
        let mut deduped: Vec<NormalizedBar> = bars
          .into_iter()
          .rev()
          .filter(|b| seen.insert(b.timestamp))
          .collect();
        deduped.reverse();
        Self::Bars(deduped)
      }
      Self::Snapshots(rows) => {
        let mut seen = HashSet::new();
        let mut deduped: Vec<Snapshot> = rows
          .into_iter()
          .rev()
          .filter_map(|mut row| {
            row.symbol = row.symbol.trim().to_uppercase();
            row.source = source.to_string();
            (!row.symbol.is_empty() && seen.insert(row.symbol.clone())).then_some(row)
          })
          .collect();
        deduped.reverse();
        Self::Snapshots(deduped)
      }
    }
  }

  pub fn into_quotes(self) -> Vec<NormalizedQuote> {
    match self {
      Self::Quotes(q) => q,
      _ => Vec::new(),
    }
  }

  pub fn into_bars(self) -> Vec<NormalizedBar> {
    match self {
      Self::Bars(b) => b,
      _ => Vec::new(),
    }
  }

  pub fn into_snapshots(self) -> Vec<Snapshot> {
    match self {
      Self::Snapshots(s) => s,
      _ => Vec::new(),
    }
  }
}

/// Asynchronous source adapter, used by the fallback chain.
///
/// Implementors perform network I/O; each call is the chain's only
/// suspension point.
#[async_trait]
pub trait MarketSource: Send + Sync + 'static {
  /// Stable identifier used in chain configuration and reports.
  fn name(&self) -> &str;

  /// What this adapter can serve.
  fn capabilities(&self) -> &[Capability];

  fn supports(&self, capability: Capability) -> bool {
    self.capabilities().contains(&capability)
  }

  /// Perform one request. Never returns partially-filled data.
  async fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError>;

  /// One-shot startup check that the provider is reachable.
  async fn probe(&self) -> Result<(), SourceError> {
    Ok(())
  }

  /// Release connections on shutdown.
  async fn close(&self) {}
}

/// Blocking source adapter, used by the throttled priority chain.
pub trait BlockingSource: Send + Sync + 'static {
  fn name(&self) -> &str;

  fn capabilities(&self) -> &[Capability];

  fn supports(&self, capability: Capability) -> bool {
    self.capabilities().contains(&capability)
  }

  fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError>;

  fn probe(&self) -> Result<(), SourceError> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;
  use crate::domain::market::{Adjustment, Frequency, SnapshotStatus};

  fn bar(day: u32, close: f64) -> NormalizedBar {
    NormalizedBar {
      symbol: "raw".to_string(),
      timestamp: NaiveDate::from_ymd_opt(2024, 3, day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap(),
      open: close,
      high: close,
      low: close,
      close,
      volume: 0.0,
      amount: 0.0,
      source: String::new(),
      frequency: Frequency::Minute(5),
      adjustment: Adjustment::None,
    }
  }

  fn bar_request() -> SourceRequest {
    SourceRequest::Bars(BarRequest {
      symbol: "600519".to_string(),
      start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
      end: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
      frequency: Frequency::Daily,
      adjustment: Adjustment::Forward,
    })
  }

  #[test]
  fn test_normalize_bars_sorts_dedupes_and_stamps() {
    let payload = SourcePayload::Bars(vec![
      bar(3, 3.0),
      bar(1, 1.0),
      bar(3, 3.5),
      bar(2, f64::NAN),
    ]);
    let bars = payload.normalize("sina", &bar_request()).into_bars();
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].close, 1.0);
    assert_eq!(bars[1].close, 3.5);
    assert!(bars.iter().all(|b| b.source == "sina" && b.symbol == "600519"));
    assert!(bars.iter().all(|b| b.frequency == Frequency::Daily));
    assert!(bars.iter().all(|b| b.adjustment == Adjustment::Forward));
  }

  #[test]
  fn test_snapshot_payload_without_ok_rows_is_unusable() {
    let ts = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(16, 0, 0).unwrap();
    let payload = SourcePayload::Snapshots(vec![Snapshot::error_row("AAPL", "x", ts)]);
    assert!(!payload.is_empty());
    assert!(!payload.is_usable());
  }

  #[test]
  fn test_normalize_snapshots_keeps_last_per_symbol() {
    let ts = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(16, 0, 0).unwrap();
    let mut first = Snapshot::error_row(" aapl", "x", ts);
    first.status = SnapshotStatus::Ok;
    first.last = 1.0;
    let mut second = first.clone();
    second.last = 2.0;
    let request = SourceRequest::Snapshots { symbols: vec!["AAPL".into()] };
    let rows = SourcePayload::Snapshots(vec![first, second])
      .normalize("yfinance", &request)
      .into_snapshots();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].symbol, "AAPL");
    assert_eq!(rows[0].last, 2.0);
    assert_eq!(rows[0].source, "yfinance");
  }

  #[test]
  fn test_describe_truncates_long_batches() {
    let request = SourceRequest::Quotes {
      symbols: vec!["a".into(), "b".into(), "c".into(), "d".into()],
    };
    assert_eq!(request.describe(), "a,b,c.. (4 symbols)");
  }

  #[test]
  fn test_transient_classification() {
    assert!(SourceError::Timeout(Duration::from_secs(5)).is_transient());
    assert!(!SourceError::Malformed("bad json".into()).is_transient());
    assert!(!SourceError::Empty.is_transient());
  }
}
