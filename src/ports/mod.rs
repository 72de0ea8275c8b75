//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `source`: Market data providers (async and blocking variants)
//! - `store`: Durable bar and snapshot persistence

pub mod source;
pub mod store;
