//! Blocking Bridge - Async Source to Blocking Interface
//!
//! Lets the throttled priority chain drive any async adapter. Each call
//! is executed on a captured tokio runtime handle and blocks the
//! calling thread until the adapter finishes.
//!
//! Must be called from a blocking context (`spawn_blocking` or a plain
//! thread); `Handle::block_on` panics on an async worker thread.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Handle;

use crate::domain::market::Capability;
use crate::ports::source::{BlockingSource, MarketSource, SourceError, SourcePayload, SourceRequest};

/// Blocking view of an async [`MarketSource`].
pub struct BlockingBridge<S: ?Sized> {
    inner: Arc<S>,
    handle: Handle,
}

impl<S: MarketSource + ?Sized> BlockingBridge<S> {
    pub fn new(inner: Arc<S>, handle: Handle) -> Self {
        Self { inner, handle }
    }

    /// Bridge on the runtime the caller is currently inside.
    pub fn on_current_runtime(inner: Arc<S>) -> Result<Self> {
        let handle = Handle::try_current().context("No tokio runtime to bridge onto")?;
        Ok(Self::new(inner, handle))
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }
}

impl<S: MarketSource + ?Sized> BlockingSource for BlockingBridge<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> &[Capability] {
        self.inner.capabilities()
    }

    fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError> {
        self.handle.block_on(self.inner.fetch(request))
    }

    fn probe(&self) -> Result<(), SourceError> {
        self.handle.block_on(self.inner.probe())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::domain::market::NormalizedQuote;

    struct Echo;

    #[async_trait]
    impl MarketSource for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn capabilities(&self) -> &[Capability] {
            &[Capability::Quotes]
        }

        async fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError> {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            match request {
                SourceRequest::Quotes { symbols } => Ok(SourcePayload::Quotes(
                    symbols
                        .iter()
                        .map(|s| NormalizedQuote {
                            symbol: s.clone(),
                            ..NormalizedQuote::default()
                        })
                        .collect(),
                )),
                _ => Err(SourceError::Unsupported(request.capability())),
            }
        }
    }

    #[test]
    fn test_bridge_blocks_on_runtime_from_plain_thread() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let bridge = BlockingBridge::new(Arc::new(Echo), runtime.handle().clone());

        assert_eq!(BlockingSource::name(&bridge), "echo");
        assert!(BlockingSource::supports(&bridge, Capability::Quotes));

        let request = SourceRequest::Quotes { symbols: vec!["600519".into(), "000001".into()] };
        let quotes = BlockingSource::fetch(&bridge, &request).unwrap().into_quotes();
        assert_eq!(quotes.len(), 2);
        assert!(BlockingSource::probe(&bridge).is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bridge_from_spawn_blocking() {
        let bridge = BlockingBridge::on_current_runtime(Arc::new(Echo)).unwrap();
        let result = tokio::task::spawn_blocking(move || {
            let request = SourceRequest::Bars(crate::domain::market::BarRequest {
                symbol: "600519".into(),
                start: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end: chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                frequency: crate::domain::market::Frequency::Daily,
                adjustment: crate::domain::market::Adjustment::None,
            });
            BlockingSource::fetch(&bridge, &request)
        })
        .await
        .unwrap();
        assert_eq!(result, Err(SourceError::Unsupported(Capability::Bars)));
    }
}
