//! Fallback Chain - Async First-success Source Iteration
//!
//! Runs under cooperative concurrency: the adapter call is the only
//! suspension point and sources are tried strictly one after another.
//! Independent invocations may run concurrently; they share the
//! per-source health trackers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument};

use super::chain::{ChainCore, ChainError, ChainOutcome};
use crate::domain::health::{CircuitPolicy, SourceHealthReport};
use crate::domain::market::Category;
use crate::ports::source::{MarketSource, SourceRequest};

/// Ordered fallback over async sources.
pub struct FallbackChain {
  core: ChainCore<dyn MarketSource>,
}

impl FallbackChain {
  pub fn new(
    sources: Vec<Arc<dyn MarketSource>>,
    priorities: HashMap<Category, Vec<String>>,
    policy: CircuitPolicy,
  ) -> Result<Self, ChainError> {
    Ok(Self {
      core: ChainCore::new(sources, priorities, policy)?,
    })
  }

  pub fn core(&self) -> &ChainCore<dyn MarketSource> {
    &self.core
  }

  /// Try each source of `category` in order until one yields a usable
  /// result. Never fails; check [`ChainOutcome::is_exhausted`].
  #[instrument(skip(self, request), fields(%category, request = %request.describe()))]
  pub async fn fetch(&self, category: Category, request: &SourceRequest) -> ChainOutcome {
    let mut outcome = ChainOutcome::begin(category);
    if let Err(e) = ChainCore::<dyn MarketSource>::check_request(category, request) {
      outcome.last_error = Some(e);
      return outcome.exhaust();
    }

    for member in self.core.members(category) {
      if !ChainCore::admit(&member, &mut outcome) {
        continue;
      }
      let started = Instant::now();
      let result = member.source.fetch(request).await;
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

  /// Release every source's connections.
  pub async fn close(&self) {
    for source in self.core.sources() {
      source.close().await;
    }
    info!("Fallback chain sources closed");
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  use async_trait::async_trait;

  use super::*;
  use crate::domain::market::{Capability, NormalizedQuote};
  use crate::ports::source::{SourceError, SourcePayload};

  struct Scripted {
    name: &'static str,
    fail: bool,
    calls: AtomicUsize,
  }

  impl Scripted {
    fn new(name: &'static str, fail: bool) -> Arc<Self> {
      Arc::new(Self { name, fail, calls: AtomicUsize::new(0) })
    }
  }

  #[async_trait]
  impl MarketSource for Scripted {
    fn name(&self) -> &str {
      self.name
    }

    fn capabilities(&self) -> &[Capability] {
      &[Capability::Quotes]
    }

    async fn fetch(&self, _request: &SourceRequest) -> Result<SourcePayload, SourceError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        Err(SourceError::Timeout(Duration::from_secs(5)))
      } else {
        Ok(SourcePayload::Quotes(vec![NormalizedQuote {
          symbol: "600519".into(),
          price: 1500.0,
          ..NormalizedQuote::default()
        }]))
      }
    }
  }

  fn chain(sources: Vec<Arc<Scripted>>) -> FallbackChain {
    let names = sources.iter().map(|s| s.name.to_string()).collect();
    let sources = sources.into_iter().map(|s| s as Arc<dyn MarketSource>).collect();
    FallbackChain::new(
      sources,
      HashMap::from([(Category::Realtime, names)]),
      CircuitPolicy::realtime(),
    )
    .unwrap()
  }

  fn quotes() -> SourceRequest {
    SourceRequest::Quotes { symbols: vec!["600519".into()] }
  }

  #[tokio::test]
  async fn test_first_success_stamps_provenance() {
    let a = Scripted::new("tencent", false);
    let chain = chain(vec![Arc::clone(&a)]);
    let outcome = chain.fetch(Category::Realtime, &quotes()).await;
    assert_eq!(outcome.source.as_deref(), Some("tencent"));
    assert_eq!(outcome.payload.into_quotes()[0].source, "tencent");
  }

  #[tokio::test]
  async fn test_mismatched_request_is_exhausted_without_calls() {
    let a = Scripted::new("tencent", false);
    let chain = chain(vec![Arc::clone(&a)]);
    let request = SourceRequest::Snapshots { symbols: vec!["AAPL".into()] };
    let outcome = chain.fetch(Category::Realtime, &request).await;
    assert!(outcome.is_exhausted());
    assert_eq!(a.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_close_reaches_every_source() {
    let chain = chain(vec![Scripted::new("tencent", true), Scripted::new("sina", false)]);
    chain.close().await;
    assert_eq!(chain.health_report().len(), 2);
  }

  #[test]
  fn test_unknown_source_rejected() {
    let a: Arc<dyn MarketSource> = Scripted::new("tencent", false);
    let err = FallbackChain::new(
      vec![a],
      HashMap::from([(Category::Realtime, vec!["sina".to_string()])]),
      CircuitPolicy::realtime(),
    )
    .err()
    .unwrap();
    assert_eq!(
      err,
      ChainError::UnknownSource { category: Category::Realtime, name: "sina".into() }
    );
  }

  #[test]
  fn test_unsupported_category_rejected() {
    let a: Arc<dyn MarketSource> = Scripted::new("tencent", false);
    let err = FallbackChain::new(
      vec![a],
      HashMap::from([(Category::Daily, vec!["tencent".to_string()])]),
      CircuitPolicy::history(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, ChainError::UnsupportedCategory { .. }));
  }
}
