//! Chain Core - Shared Ordering, Health and Result Handling
//!
//! Both chain variants iterate a static priority list per category,
//! skip sources whose breaker is open, and stop at the first usable
//! result. Everything except the act of calling the adapter lives
//! here.
//!
//! One `SourceHealth` exists per source per chain and is shared by
//! every category that lists the source.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::domain::health::{CircuitPolicy, SourceHealth, SourceHealthReport};
use crate::domain::market::{Capability, Category};
use crate::ports::source::{BlockingSource, MarketSource, SourceError, SourcePayload, SourceRequest};

/// Misconfiguration detected while building a chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
  #[error("chain {category} lists unregistered source {name}")]
  UnknownSource { category: Category, name: String },

  #[error("source {name} cannot serve {category} ({capability} unsupported)")]
  UnsupportedCategory {
    category: Category,
    name: String,
    capability: Capability,
  },
}

/// What a chain member must expose to be ordered and validated.
pub trait ChainMember: Send + Sync {
  fn member_name(&self) -> &str;
  fn member_supports(&self, capability: Capability) -> bool;
}

impl ChainMember for dyn MarketSource {
  fn member_name(&self) -> &str {
    self.name()
  }

  fn member_supports(&self, capability: Capability) -> bool {
    self.supports(capability)
  }
}

impl ChainMember for dyn BlockingSource {
  fn member_name(&self) -> &str {
    self.name()
  }

  fn member_supports(&self, capability: Capability) -> bool {
    self.supports(capability)
  }
}

/// Result of one chain invocation. Never an error: exhaustion is an
/// empty payload with `source == None` and the last failure attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
  pub category: Category,
  /// Source that produced `payload`, `None` when exhausted.
  pub source: Option<String>,
  pub payload: SourcePayload,
  /// Sources actually invoked, in order.
  pub attempted: Vec<String>,
  /// Sources passed over because their breaker was open.
  pub skipped: Vec<String>,
  pub last_error: Option<SourceError>,
}

impl ChainOutcome {
  pub(crate) fn begin(category: Category) -> Self {
    Self {
      category,
      source: None,
      payload: SourcePayload::empty(category.capability()),
      attempted: Vec::new(),
      skipped: Vec::new(),
      last_error: None,
    }
  }

  /// Every source failed or was unavailable.
  pub fn is_exhausted(&self) -> bool {
    self.source.is_none()
  }

  pub fn into_payload(self) -> SourcePayload {
    self.payload
  }

  pub(crate) fn succeed(mut self, source: &str, payload: SourcePayload) -> Self {
    self.source = Some(source.to_string());
    self.payload = payload;
    self
  }

  pub(crate) fn exhaust(self) -> Self {
    error!(
      category = %self.category,
      attempted = ?self.attempted,
      skipped = ?self.skipped,
      error = ?self.last_error,
      "All sources exhausted"
    );
    self
  }
}

/// One entry of a category's priority list.
pub(crate) struct Member<'a, S: ?Sized> {
  pub name: &'a str,
  pub source: &'a Arc<S>,
  pub health: &'a SourceHealth,
}

/// Registered sources, priorities and per-source health of one chain.
pub struct ChainCore<S: ?Sized> {
  sources: HashMap<String, Arc<S>>,
  priorities: HashMap<Category, Vec<String>>,
  health: BTreeMap<String, Arc<SourceHealth>>,
  policy: CircuitPolicy,
}

impl<S: ChainMember + ?Sized> ChainCore<S> {
  /// Validate `priorities` against `sources` and create health trackers.
  ///
  /// Sources not named by any priority list are dropped.
  pub fn new(
    sources: Vec<Arc<S>>,
    priorities: HashMap<Category, Vec<String>>,
    policy: CircuitPolicy,
  ) -> Result<Self, ChainError> {
    let by_name: HashMap<String, Arc<S>> = sources
      .into_iter()
      .map(|s| (s.member_name().to_string(), s))
      .collect();

    let mut used = HashMap::new();
    let mut health = BTreeMap::new();
    for (&category, names) in &priorities {
      let capability = category.capability();
      for name in names {
        let source = by_name.get(name).ok_or_else(|| ChainError::UnknownSource {
          category,
          name: name.clone(),
        })?;
        if !source.member_supports(capability) {
          return Err(ChainError::UnsupportedCategory {
            category,
            name: name.clone(),
            capability,
          });
        }
        used.insert(name.clone(), Arc::clone(source));
        health
          .entry(name.clone())
          .or_insert_with(|| Arc::new(SourceHealth::new(name.clone(), policy)));
      }
    }

    Ok(Self {
      sources: used,
      priorities,
      health,
      policy,
    })
  }

  pub fn policy(&self) -> CircuitPolicy {
    self.policy
  }

  /// Priority list for `category`; empty when unconfigured.
  pub fn priorities(&self, category: Category) -> &[String] {
    self.priorities.get(&category).map_or(&[], Vec::as_slice)
  }

  /// All priority lists, ordered by category.
  pub fn priority_map(&self) -> BTreeMap<Category, Vec<String>> {
    self
      .priorities
      .iter()
      .map(|(category, names)| (*category, names.clone()))
      .collect()
  }

  pub fn source(&self, name: &str) -> Option<&Arc<S>> {
    self.sources.get(name)
  }

  /// Every source named by at least one priority list.
  pub fn sources(&self) -> impl Iterator<Item = &Arc<S>> {
    self.sources.values()
  }

  pub fn health(&self, name: &str) -> Option<&Arc<SourceHealth>> {
    self.health.get(name)
  }

  /// Per-source health, keyed by source name.
  pub fn health_report(&self) -> BTreeMap<String, SourceHealthReport> {
    self
      .health
      .iter()
      .map(|(name, health)| (name.clone(), health.report()))
      .collect()
  }

  pub(crate) fn members(&self, category: Category) -> impl Iterator<Item = Member<'_, S>> {
    self.priorities(category).iter().filter_map(|name| {
      Some(Member {
        name,
        source: self.sources.get(name)?,
        health: self.health.get(name)?,
      })
    })
  }

  /// Check that `request` belongs to `category`.
  pub(crate) fn check_request(
    category: Category,
    request: &SourceRequest,
  ) -> Result<(), SourceError> {
    if request.capability() == category.capability() {
      Ok(())
    } else {
      error!(%category, request = %request.describe(), "Request does not match chain category");
      Err(SourceError::Unsupported(request.capability()))
    }
  }

  /// Record a skipped member. Returns `true` when it may be called.
  pub(crate) fn admit(member: &Member<'_, S>, outcome: &mut ChainOutcome) -> bool {
    if member.health.is_available() {
      outcome.attempted.push(member.name.to_string());
      true
    } else {
      debug!(source = member.name, category = %outcome.category, "Circuit open, skipping");
      outcome.skipped.push(member.name.to_string());
      false
    }
  }

  /// Normalize an adapter result and feed the breaker.
  ///
  /// Returns the usable payload, or the error that counts as the
  /// failure (adapter error, wrong payload kind, or empty result).
  pub(crate) fn settle(
    member: &Member<'_, S>,
    request: &SourceRequest,
    result: Result<SourcePayload, SourceError>,
    latency: Duration,
  ) -> Result<SourcePayload, SourceError> {
    let checked = result.and_then(|payload| {
      if payload.capability() != request.capability() {
        return Err(SourceError::Malformed(format!(
          "expected {} payload, got {}",
          request.capability(),
          payload.capability()
        )));
      }
      let payload = payload.normalize(member.name, request);
      if payload.is_usable() {
        Ok(payload)
      } else {
        Err(SourceError::Empty)
      }
    });

    match checked {
      Ok(payload) => {
        member.health.record_success(latency);
        debug!(
          source = member.name,
          rows = payload.len(),
          latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
          "Source succeeded"
        );
        Ok(payload)
      }
      Err(e) => {
        member.health.record_failure();
        warn!(
          source = member.name,
          error = %e,
          latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
          "Source failed"
        );
        Err(e)
      }
    }
  }
}
