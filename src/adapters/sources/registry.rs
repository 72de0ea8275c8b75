//! Source Registry - Startup Capability Probe
//!
//! Builds every enabled source from config, probes each one exactly
//! once, and keeps only those that answered. Chain priority lists are
//! filtered against the registered set so a dead or misconfigured
//! provider is reported at startup instead of failing on every call.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use tokio::runtime::Handle;
use tracing::{info, instrument, warn};

use super::bridge::BlockingBridge;
use super::http_relay::HttpRelaySource;
use crate::config::{ChainsConfig, SourceConfig};
use crate::domain::market::Category;
use crate::ports::source::{BlockingSource, MarketSource, SourceError};

/// Sources that passed the startup probe.
#[derive(Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn MarketSource>>,
    rejected: Vec<(String, SourceError)>,
}

impl SourceRegistry {
    /// Build relay sources for every enabled `[[sources]]` entry and probe them.
    pub async fn from_config(configs: &[SourceConfig]) -> Result<Self> {
        let mut candidates: Vec<Arc<dyn MarketSource>> = Vec::new();
        for config in configs {
            if !config.enabled {
                info!(source = %config.name, "Source disabled in config");
                continue;
            }
            candidates.push(Arc::new(HttpRelaySource::new(config)?));
        }
        Ok(Self::probe_all(candidates).await)
    }

    /// Probe each candidate once; keep the ones that answer.
    #[instrument(skip(candidates), fields(candidates = candidates.len()))]
    pub async fn probe_all(candidates: Vec<Arc<dyn MarketSource>>) -> Self {
        let mut registry = Self::default();
        for source in candidates {
            let name = source.name().to_string();
            match source.probe().await {
                Ok(()) => {
                    info!(source = %name, capabilities = ?source.capabilities(), "Source registered");
                    registry.sources.insert(name, source);
                }
                Err(e) => {
                    warn!(source = %name, error = %e, "Source failed startup probe, not registered");
                    registry.rejected.push((name, e));
                }
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MarketSource>> {
        self.sources.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources that failed their probe, with the probe error.
    pub fn rejected(&self) -> &[(String, SourceError)] {
        &self.rejected
    }

    /// All registered sources for the async chain.
    pub fn async_sources(&self) -> Vec<Arc<dyn MarketSource>> {
        self.sources.values().cloned().collect()
    }

    /// All registered sources wrapped for the blocking chain.
    pub fn blocking_sources(&self, handle: &Handle) -> Vec<Arc<dyn BlockingSource>> {
        self.sources
            .values()
            .map(|source| {
                Arc::new(BlockingBridge::new(Arc::clone(source), handle.clone()))
                    as Arc<dyn BlockingSource>
            })
            .collect()
    }

    /// Configured priority lists for `categories`, keeping only sources
    /// that are registered and serve the category.
    pub fn priorities(
        &self,
        chains: &ChainsConfig,
        categories: &[Category],
    ) -> HashMap<Category, Vec<String>> {
        categories
            .iter()
            .map(|&category| {
                let capability = category.capability();
                let kept: Vec<String> = chains
                    .priorities(category)
                    .iter()
                    .filter(|name| match self.sources.get(name.as_str()) {
                        Some(source) if source.supports(capability) => true,
                        Some(_) => {
                            warn!(source = %name, %category, "Source lacks capability, dropped from chain");
                            false
                        }
                        None => {
                            warn!(source = %name, %category, "Source not registered, dropped from chain");
                            false
                        }
                    })
                    .cloned()
                    .collect();
                if kept.is_empty() && !chains.priorities(category).is_empty() {
                    warn!(%category, "No usable source left in chain");
                }
                (category, kept)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::domain::market::Capability;
    use crate::ports::source::{SourcePayload, SourceRequest};

    struct Probed {
        name: &'static str,
        alive: bool,
        caps: Vec<Capability>,
    }

    #[async_trait]
    impl MarketSource for Probed {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> &[Capability] {
            &self.caps
        }

        async fn fetch(&self, _request: &SourceRequest) -> Result<SourcePayload, SourceError> {
            Err(SourceError::Empty)
        }

        async fn probe(&self) -> Result<(), SourceError> {
            if self.alive {
                Ok(())
            } else {
                Err(SourceError::Network("connection refused".into()))
            }
        }
    }

    fn candidate(name: &'static str, alive: bool, caps: &[Capability]) -> Arc<dyn MarketSource> {
        Arc::new(Probed { name, alive, caps: caps.to_vec() })
    }

    #[tokio::test]
    async fn test_only_probed_sources_registered() {
        let registry = SourceRegistry::probe_all(vec![
            candidate("tencent", true, &[Capability::Quotes]),
            candidate("sina", false, &[Capability::Quotes]),
        ])
        .await;
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["tencent"]);
        assert_eq!(registry.rejected().len(), 1);
        assert_eq!(registry.rejected()[0].0, "sina");
    }

    #[tokio::test]
    async fn test_priorities_filtered_by_registration_and_capability() {
        let registry = SourceRegistry::probe_all(vec![
            candidate("tencent", true, &[Capability::Quotes]),
            candidate("sina", true, &[Capability::Quotes, Capability::Bars]),
            candidate("eastmoney", false, &[Capability::Quotes, Capability::Bars]),
        ])
        .await;
        let chains = ChainsConfig {
            realtime: vec!["eastmoney".into(), "tencent".into(), "sina".into()],
            daily: vec!["tencent".into(), "sina".into()],
            ..ChainsConfig::default()
        };
        let priorities = registry.priorities(&chains, &[Category::Realtime, Category::Daily]);
        assert_eq!(priorities[&Category::Realtime], vec!["tencent", "sina"]);
        assert_eq!(priorities[&Category::Daily], vec!["sina"]);
    }

    #[tokio::test]
    async fn test_disabled_sources_skipped() {
        let configs = vec![SourceConfig {
            name: "off".into(),
            base_url: "http://127.0.0.1:1".into(),
            timeout_ms: 100,
            enabled: false,
            capabilities: vec![Capability::Quotes],
        }];
        let registry = SourceRegistry::from_config(&configs).await.unwrap();
        assert!(registry.is_empty());
        assert!(registry.rejected().is_empty());
    }
}
