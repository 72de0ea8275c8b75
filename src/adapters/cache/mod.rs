//! Cache Adapters - Hot-path In-memory Tier

pub mod memory;

pub use memory::{CacheStats, MemoryCache};
