//! Domain layer - Normalized market data and reliability bookkeeping.
//!
//! Pure types and per-source state: the normalized quote/bar/snapshot
//! schema, symbol normalization, the circuit-breaking health tracker
//! and the per-source throttle. No I/O lives here.

pub mod health;
pub mod market;
pub mod symbol;
pub mod throttle;

// Re-export core types for convenience
pub use health::{CircuitPolicy, CircuitState, SourceHealth, SourceHealthReport};
pub use market::{
    Adjustment, BarRequest, Capability, Category, Frequency, NormalizedBar, NormalizedQuote,
    Snapshot, SnapshotStatus,
};
pub use symbol::{AssetClass, SymbolError};
pub use throttle::ThrottleController;
