//! Priority Chain - Blocking, Throttled Source Iteration
//!
//! Same ordering and circuit-breaking discipline as the fallback chain,
//! plus a per-source throttle applied before every adapter call. Used
//! for historical bars and snapshots, where bulk warm-up issues many
//! sequential requests to the same provider.
//!
//! Callers must serialize invocations per source (one worker), or the
//! throttle's last-call state stops meaning anything.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::instrument;

use super::chain::{ChainCore, ChainError, ChainOutcome};
use crate::domain::health::{CircuitPolicy, SourceHealthReport};
use crate::domain::market::Category;
use crate::domain::throttle::ThrottleController;
use crate::ports::source::{BlockingSource, SourceRequest};

/// Ordered, throttled fallback over blocking sources.
pub struct PriorityChain {
  core: ChainCore<dyn BlockingSource>,
  throttle: ThrottleController,
}

impl PriorityChain {
  pub fn new(
    sources: Vec<Arc<dyn BlockingSource>>,
    priorities: HashMap<Category, Vec<String>>,
    policy: CircuitPolicy,
    min_interval: Duration,
  ) -> Result<Self, ChainError> {
    Ok(Self {
      core: ChainCore::new(sources, priorities, policy)?,
      throttle: ThrottleController::new(min_interval),
    })
  }

  pub fn core(&self) -> &ChainCore<dyn BlockingSource> {
    &self.core
  }

  pub fn throttle(&self) -> &ThrottleController {
    &self.throttle
  }

  /// Blocking counterpart of `FallbackChain::fetch`.
  ///
  /// Sleeps the calling thread for throttling; the throttle wait is not
  /// part of the latency recorded for the source.
  #[instrument(skip(self, request), fields(%category, request = %request.describe()))]
  pub fn fetch(&self, category: Category, request: &SourceRequest) -> ChainOutcome {
    let mut outcome = ChainOutcome::begin(category);
    if let Err(e) = ChainCore::<dyn BlockingSource>::check_request(category, request) {
      outcome.last_error = Some(e);
      return outcome.exhaust();
    }

    for member in self.core.members(category) {
      if !ChainCore::admit(&member, &mut outcome) {
        continue;
      }
      self.throttle.acquire(member.name);
      let started = Instant::now();
      let result = member.source.fetch(request);
      match ChainCore::settle(&member, request, result, started.elapsed()) {
        Ok(payload) => return outcome.succeed(member.name, payload),
        Err(e) => outcome.last_error = Some(e),
      }
    }

    outcome.exhaust()
  }

  pub fn health_report(&self) -> BTreeMap<String, SourceHealthReport> {
    self.core.health_report()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use chrono::NaiveDate;

  use super::*;
  use crate::domain::market::{Adjustment, BarRequest, Capability, Frequency, NormalizedBar};
  use crate::ports::source::{SourceError, SourcePayload};

  struct Daily {
    name: &'static str,
    rows: usize,
    calls: AtomicUsize,
  }

  impl BlockingSource for Daily {
    fn name(&self) -> &str {
      self.name
    }

    fn capabilities(&self) -> &[Capability] {
      &[Capability::Bars]
    }

    fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let SourceRequest::Bars(req) = request else {
        return Err(SourceError::Unsupported(request.capability()));
      };
      let bars = (0..self.rows)
        .map(|i| NormalizedBar {
          symbol: req.symbol.clone(),
          timestamp: req.start.and_hms_opt(0, 0, 0).unwrap()
            + chrono::Duration::days(i64::try_from(i).unwrap()),
          open: 1.0,
          high: 1.0,
          low: 1.0,
          close: 1.0,
          volume: 0.0,
          amount: 0.0,
          source: String::new(),
          frequency: req.frequency,
          adjustment: req.adjustment,
        })
        .collect();
      Ok(SourcePayload::Bars(bars))
    }
  }

  fn request() -> SourceRequest {
    SourceRequest::Bars(BarRequest {
      symbol: "600519".into(),
      start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
      end: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
      frequency: Frequency::Daily,
      adjustment: Adjustment::None,
    })
  }

  fn chain(sources: &[Arc<Daily>], min_interval: Duration) -> PriorityChain {
    let names = sources.iter().map(|s| s.name.to_string()).collect();
    PriorityChain::new(
      sources.iter().map(|s| Arc::clone(s) as Arc<dyn BlockingSource>).collect(),
      HashMap::from([(Category::Daily, names)]),
      CircuitPolicy::history(),
      min_interval,
    )
    .unwrap()
  }

  #[test]
  fn test_empty_result_counts_as_failure() {
    let empty = Arc::new(Daily { name: "baostock", rows: 0, calls: AtomicUsize::new(0) });
    let full = Arc::new(Daily { name: "sina", rows: 30, calls: AtomicUsize::new(0) });
    let chain = chain(&[Arc::clone(&empty), Arc::clone(&full)], Duration::ZERO);

    let outcome = chain.fetch(Category::Daily, &request());
    assert_eq!(outcome.source.as_deref(), Some("sina"));
    assert_eq!(outcome.payload.len(), 30);
    assert_eq!(outcome.last_error, Some(SourceError::Empty));
    assert_eq!(chain.health_report()["baostock"].fail, 1);
    assert_eq!(chain.health_report()["sina"].success, 1);
  }

  #[test]
  fn test_consecutive_calls_are_spaced() {
    let source = Arc::new(Daily { name: "sina", rows: 5, calls: AtomicUsize::new(0) });
    let chain = chain(&[Arc::clone(&source)], Duration::from_millis(100));

    let started = Instant::now();
    chain.fetch(Category::Daily, &request());
    chain.fetch(Category::Daily, &request());
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_unconfigured_category_is_exhausted() {
    let source = Arc::new(Daily { name: "sina", rows: 5, calls: AtomicUsize::new(0) });
    let chain = chain(&[Arc::clone(&source)], Duration::ZERO);
    let minute = SourceRequest::Bars(BarRequest {
      frequency: Frequency::Minute(5),
      ..match request() {
        SourceRequest::Bars(req) => req,
        _ => unreachable!(),
      }
    });
    let outcome = chain.fetch(Category::Minute, &minute);
    assert!(outcome.is_exhausted());
    assert!(outcome.attempted.is_empty());
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
  }
}
