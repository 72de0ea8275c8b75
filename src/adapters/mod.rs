//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP relays, SQLite, in-process memory).
//! Each sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `cache`: LRU + TTL memory cache for hot quote batches
//! - `metrics`: Prometheus gauges and health endpoints
//! - `persistence`: SQLite bar and snapshot tables
//! - `sources`: HTTP relay adapter, blocking bridge, startup registry

pub mod cache;
pub mod metrics;
pub mod persistence;
pub mod sources;
