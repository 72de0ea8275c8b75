//! Source Adapters - Market Data Providers
//!
//! - `http_relay`: generic async adapter for relays serving normalized JSON
//! - `bridge`: async-to-blocking wrapper for the throttled chain
//! - `registry`: startup probe deciding which sources enter the chains

pub mod bridge;
pub mod http_relay;
pub mod registry;

pub use bridge::BlockingBridge;
pub use http_relay::HttpRelaySource;
pub use registry::SourceRegistry;
