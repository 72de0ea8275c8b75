//! Prometheus Metrics Registry - Acquisition Observability
//!
//! Gauges mirror the manager's health report and are refreshed on every
//! scrape.

use anyhow::Result;
use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::usecases::HealthReport;

/// Centralized Prometheus metrics for the acquisition layer.
///
/// All metrics follow the naming convention `marketdata_*`. Per-source
/// series carry `chain` (`realtime` | `history`) and `source` labels.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Successful calls per source.
    pub source_success: IntGaugeVec,
    /// Failed or empty calls per source.
    pub source_fail: IntGaugeVec,
    /// Mean latency of successful calls (ms).
    pub source_latency_ms: GaugeVec,
    /// Breaker status (1 = open).
    pub source_circuit_open: IntGaugeVec,
    /// Memory cache entries.
    pub cache_size: IntGauge,
    /// Memory cache hits since last clear.
    pub cache_hits: IntGauge,
    /// Memory cache misses since last clear.
    pub cache_misses: IntGauge,
    /// Memory cache hit ratio.
    pub cache_hit_rate: Gauge,
    /// Persistent rows per table.
    pub store_rows: IntGaugeVec,
    /// Symbols force-refetched in this process.
    pub warmed_symbols: IntGauge,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let source_labels = &["chain", "source"];

        let source_success = IntGaugeVec::new(
            Opts::new("marketdata_source_success", "Successful calls per source"),
            source_labels,
        )?;

        let source_fail = IntGaugeVec::new(
            Opts::new("marketdata_source_fail", "Failed or empty calls per source"),
            source_labels,
        )?;

        let source_latency_ms = GaugeVec::new(
            Opts::new(
                "marketdata_source_avg_latency_ms",
                "Mean latency of successful calls in milliseconds",
            ),
            source_labels,
        )?;

        let source_circuit_open = IntGaugeVec::new(
            Opts::new(
                "marketdata_source_circuit_open",
                "Circuit breaker status (1=open, 0=closed)",
            ),
            source_labels,
        )?;

        let cache_size = IntGauge::new("marketdata_cache_size", "Memory cache entries")?;
        let cache_hits = IntGauge::new("marketdata_cache_hits", "Memory cache hits")?;
        let cache_misses = IntGauge::new("marketdata_cache_misses", "Memory cache misses")?;
        let cache_hit_rate = Gauge::new("marketdata_cache_hit_rate", "Memory cache hit ratio")?;

        let store_rows = IntGaugeVec::new(
            Opts::new("marketdata_store_rows", "Persistent rows per table"),
            &["table"],
        )?;

        let warmed_symbols = IntGauge::new(
            "marketdata_warmed_symbols",
            "Symbols force-refetched in this process",
        )?;

        // Register all metrics
        registry.register(Box::new(source_success.clone()))?;
        registry.register(Box::new(source_fail.clone()))?;
        registry.register(Box::new(source_latency_ms.clone()))?;
        registry.register(Box::new(source_circuit_open.clone()))?;
        registry.register(Box::new(cache_size.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_hit_rate.clone()))?;
        registry.register(Box::new(store_rows.clone()))?;
        registry.register(Box::new(warmed_symbols.clone()))?;

        Ok(Self {
            registry,
            source_success,
            source_fail,
            source_latency_ms,
            source_circuit_open,
            cache_size,
            cache_hits,
            cache_misses,
            cache_hit_rate,
            store_rows,
            warmed_symbols,
        })
    }

    /// Copy a health report into the gauges.
    pub fn observe(&self, report: &HealthReport) {
        for (chain, sources) in [("realtime", &report.realtime), ("history", &report.history)] {
            for (source, health) in sources {
                let labels = [chain, source.as_str()];
                self.source_success
                    .with_label_values(&labels)
                    .set(saturating_i64(health.success));
                self.source_fail
                    .with_label_values(&labels)
                    .set(saturating_i64(health.fail));
                self.source_latency_ms
                    .with_label_values(&labels)
                    .set(health.avg_latency_ms);
                self.source_circuit_open
                    .with_label_values(&labels)
                    .set(i64::from(health.circuit_open));
            }
        }

        let cache = &report.memory_cache;
        self.cache_size
            .set(i64::try_from(cache.size).unwrap_or(i64::MAX));
        self.cache_hits.set(saturating_i64(cache.hits));
        self.cache_misses.set(saturating_i64(cache.misses));
        self.cache_hit_rate.set(cache.hit_rate);

        for (table, stats) in [("bars", &report.bar_store), ("snapshots", &report.snapshot_store)] {
            if let Some(stats) = stats {
                self.store_rows
                    .with_label_values(&[table])
                    .set(saturating_i64(stats.rows));
            }
        }

        self.warmed_symbols
            .set(i64::try_from(report.warmed_symbols).unwrap_or(i64::MAX));
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::adapters::cache::CacheStats;
    use crate::domain::health::SourceHealthReport;
    use crate::ports::store::TableStats;

    fn report() -> HealthReport {
        let source = SourceHealthReport {
            success: 4,
            fail: 3,
            avg_latency_ms: 12.5,
            circuit_open: true,
            consecutive_failures: 3,
            last_success: None,
            last_fail: None,
        };
        HealthReport {
            realtime: BTreeMap::from([("tencent".to_string(), source)]),
            history: BTreeMap::new(),
            memory_cache: CacheStats {
                size: 2,
                max_size: 2000,
                hits: 3,
                misses: 1,
                hit_rate: 0.75,
            },
            bar_store: Some(TableStats { rows: 120, latest_update: None }),
            snapshot_store: None,
            warmed_symbols: 5,
            priorities: BTreeMap::new(),
        }
    }

    #[test]
    fn test_observe_and_render() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.observe(&report());
        let text = metrics.render().unwrap();
        assert!(text.contains(r#"marketdata_source_circuit_open{chain="realtime",source="tencent"} 1"#));
        assert!(text.contains(r#"marketdata_store_rows{table="bars"} 120"#));
        assert!(text.contains("marketdata_cache_hit_rate 0.75"));
        assert!(text.contains("marketdata_warmed_symbols 5"));
    }
}
