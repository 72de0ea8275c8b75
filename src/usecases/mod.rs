//! Use Cases Layer - Acquisition Workflows
//!
//! Orchestrates domain bookkeeping with the source and store ports.
//! Nothing in this layer knows a provider's wire format.
//!
//! Use cases:
//! - `chain`: shared ordering, health and result handling
//! - `FallbackChain`: async first-success iteration (real-time quotes)
//! - `PriorityChain`: blocking, throttled iteration (bars, snapshots)
//! - `AcquisitionManager`: cache tiers + chains behind one surface

pub mod acquisition_manager;
pub mod chain;
pub mod fallback_chain;
pub mod priority_chain;

pub use acquisition_manager::{
  AcquisitionError, AcquisitionManager, HealthReport, ManagerConfig, WarmReport, WarmStatus,
};
pub use chain::{ChainCore, ChainError, ChainOutcome};
pub use fallback_chain::FallbackChain;
pub use priority_chain::PriorityChain;
