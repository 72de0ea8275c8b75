//! Normalized market data types.
//!
//! The adapter-agnostic schema every source must produce. Fields a
//! provider cannot supply default to zero or empty, so downstream
//! consumers never need per-source null handling.
//!
//! Also defines the request vocabulary shared by chains and adapters:
//! categories (what a chain priority list is keyed by), capabilities
//! (what an adapter can serve), bar frequency and price adjustment.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Timestamp layout used for bars and snapshots in storage and on the wire.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ────────────────────────────────────────────
// Request vocabulary
// ────────────────────────────────────────────

/// What an adapter is able to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Real-time quotes for a batch of symbols.
    Quotes,
    /// Historical OHLCV bars for one symbol.
    Bars,
    /// Latest-price snapshots for a batch of symbols.
    Snapshots,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quotes => write!(f, "quotes"),
            Self::Bars => write!(f, "bars"),
            Self::Snapshots => write!(f, "snapshots"),
        }
    }
}

/// Request category. Each category owns one static priority list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Real-time quotes (async fallback chain).
    Realtime,
    /// Daily bars (blocking priority chain).
    Daily,
    /// Intraday minute bars (blocking priority chain).
    Minute,
    /// Batch snapshots, first pass.
    Snapshot,
    /// Batch snapshots, second pass for symbols the first pass missed.
    SnapshotFallback,
}

impl Category {
    /// All categories in a stable order.
    pub const ALL: [Self; 5] = [
        Self::Realtime,
        Self::Daily,
        Self::Minute,
        Self::Snapshot,
        Self::SnapshotFallback,
    ];

    /// The adapter capability this category requires.
    pub const fn capability(self) -> Capability {
        match self {
            Self::Realtime => Capability::Quotes,
            Self::Daily | Self::Minute => Capability::Bars,
            Self::Snapshot | Self::SnapshotFallback => Capability::Snapshots,
        }
    }

    /// Stable string form used in config and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Daily => "daily",
            Self::Minute => "minute",
            Self::Snapshot => "snapshot",
            Self::SnapshotFallback => "snapshot_fallback",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bar frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    /// One bar per trading day.
    Daily,
    /// Intraday bars of the given period in minutes.
    Minute(u32),
}

impl Frequency {
    /// Minute periods providers commonly serve.
    pub const MINUTE_PERIODS: [u32; 5] = [1, 5, 15, 30, 60];

    /// Storage key: `daily` or `{period}m`.
    pub fn as_key(self) -> String {
        match self {
            Self::Daily => "daily".to_string(),
            Self::Minute(period) => format!("{period}m"),
        }
    }

    /// Parse a storage key produced by [`Frequency::as_key`].
    pub fn from_key(key: &str) -> Option<Self> {
        if key == "daily" {
            return Some(Self::Daily);
        }
        key.strip_suffix('m')
            .and_then(|p| p.parse().ok())
            .map(Self::Minute)
    }

    /// The category whose priority list serves this frequency.
    pub const fn category(self) -> Category {
        match self {
            Self::Daily => Category::Daily,
            Self::Minute(_) => Category::Minute,
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// Price adjustment applied to historical bars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    /// Raw prices.
    #[default]
    None,
    /// Forward-adjusted (qfq).
    Forward,
    /// Backward-adjusted (hfq).
    Backward,
}

impl Adjustment {
    /// Storage key: `""`, `qfq` or `hfq`.
    pub const fn as_key(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Forward => "qfq",
            Self::Backward => "hfq",
        }
    }

    /// Parse a storage key produced by [`Adjustment::as_key`].
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "" => Some(Self::None),
            "qfq" => Some(Self::Forward),
            "hfq" => Some(Self::Backward),
            _ => None,
        }
    }
}

// ────────────────────────────────────────────
// Normalized records
// ────────────────────────────────────────────

/// Real-time quote snapshot for a single symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizedQuote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change_pct: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub pre_close: f64,
    /// Shares traded.
    pub volume: f64,
    /// Turnover in quote currency.
    pub amount: f64,
    pub turnover_rate: f64,
    pub volume_ratio: f64,
    pub bid1: f64,
    pub ask1: f64,
    pub pe: f64,
    pub pb: f64,
    pub market_cap: f64,
    /// Provider timestamp, verbatim. Empty when unknown.
    pub timestamp: String,
    /// Provenance: name of the adapter that produced this quote.
    pub source: String,
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBar {
    pub symbol: String,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub source: String,
    pub frequency: Frequency,
    #[serde(default)]
    pub adjustment: Adjustment,
}

impl NormalizedBar {
    /// True when every price column is a finite number.
    pub fn has_finite_prices(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Outcome of a snapshot lookup for one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    #[default]
    Ok,
    Error,
}

impl SnapshotStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Latest-price snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: String,
    #[serde(default)]
    pub last: f64,
    #[serde(default)]
    pub prev: f64,
    #[serde(default)]
    pub pct: f64,
    #[serde(with = "timestamp_format")]
    pub quote_time: NaiveDateTime,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub status: SnapshotStatus,
}

impl Snapshot {
    /// Placeholder row for a symbol no source could resolve.
    pub fn error_row(symbol: &str, source: &str, quote_time: NaiveDateTime) -> Self {
        Self {
            symbol: symbol.to_string(),
            last: 0.0,
            prev: 0.0,
            pct: 0.0,
            quote_time,
            source: source.to_string(),
            status: SnapshotStatus::Error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SnapshotStatus::Ok
    }
}

/// Parameters of a historical bar fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarRequest {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub frequency: Frequency,
    pub adjustment: Adjustment,
}

/// Serde glue for `NaiveDateTime` in [`TIMESTAMP_FORMAT`].
pub mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Accepts a full timestamp or a bare `YYYY-MM-DD` date (midnight).
    pub fn parse(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        let raw = raw.trim();
        NaiveDateTime::parse_from_str(raw, super::TIMESTAMP_FORMAT).or_else(|err| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
                .map_err(|_| err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_key_roundtrip() {
        assert_eq!(Frequency::Daily.as_key(), "daily");
        assert_eq!(Frequency::Minute(5).as_key(), "5m");
        assert_eq!(Frequency::from_key("15m"), Some(Frequency::Minute(15)));
        assert_eq!(Frequency::from_key("weekly"), None);
    }

    #[test]
    fn test_category_capabilities() {
        assert_eq!(Category::Realtime.capability(), Capability::Quotes);
        assert_eq!(Category::Minute.capability(), Capability::Bars);
        assert_eq!(Category::SnapshotFallback.capability(), Capability::Snapshots);
    }

    #[test]
    fn test_quote_missing_fields_default_to_zero() {
        let quote: NormalizedQuote =
            serde_json::from_str(r#"{"symbol":"600519","price":1500.5}"#).unwrap();
        assert_eq!(quote.price, 1500.5);
        assert_eq!(quote.market_cap, 0.0);
        assert!(quote.name.is_empty());
    }

    #[test]
    fn test_bar_accepts_date_only_timestamp() {
        let bar: NormalizedBar = serde_json::from_str(
            r#"{"symbol":"600519","timestamp":"2024-03-01","open":1,"high":2,"low":0.5,"close":1.5,"frequency":"Daily"}"#,
        )
        .unwrap();
        assert_eq!(bar.timestamp.format(TIMESTAMP_FORMAT).to_string(), "2024-03-01 00:00:00");
        assert_eq!(bar.adjustment, Adjustment::None);
        assert_eq!(bar.amount, 0.0);
    }
}
