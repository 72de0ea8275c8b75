//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;
use crate::domain::market::Category;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    sources = config.sources.len(),
    realtime = config.chains.realtime.len(),
    daily = config.chains.daily.len(),
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig =
    toml::from_str(content).with_context(|| "Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Unique, non-empty source names and URLs
/// - Chain entries that refer to defined sources
/// - Positive capacities, thresholds and timeouts
fn validate_config(config: &AppConfig) -> Result<()> {
  // Source validation
  let mut names = HashSet::new();
  for (i, source) in config.sources.iter().enumerate() {
    anyhow::ensure!(!source.name.is_empty(), "Source {i} has an empty name");
    anyhow::ensure!(
      names.insert(source.name.as_str()),
      "Source name {} is defined twice",
      source.name
    );
    anyhow::ensure!(
      !source.base_url.is_empty(),
      "Source {} has an empty base_url",
      source.name
    );
    anyhow::ensure!(
      source.timeout_ms > 0,
      "Source {} timeout_ms must be positive",
      source.name
    );
  }

  // Chain validation
  for category in Category::ALL {
    let list = config.chains.priorities(category);
    let mut seen = HashSet::new();
    for name in list {
      anyhow::ensure!(
        names.contains(name.as_str()),
        "Chain {category} references undefined source {name}"
      );
      anyhow::ensure!(
        seen.insert(name.as_str()),
        "Chain {category} lists source {name} twice"
      );
    }
  }
  anyhow::ensure!(
    !config.chains.realtime.is_empty() || !config.chains.daily.is_empty(),
    "At least one of chains.realtime or chains.daily must be configured"
  );

  // Cache / history validation
  anyhow::ensure!(config.cache.max_size > 0, "cache.max_size must be positive");
  anyhow::ensure!(
    config.cache.realtime_ttl_seconds > 0,
    "cache.realtime_ttl_seconds must be positive"
  );
  anyhow::ensure!(!config.store.path.is_empty(), "store.path must not be empty");

  // Circuit validation
  for (label, settings) in [
    ("realtime", &config.circuit.realtime),
    ("history", &config.circuit.history),
  ] {
    anyhow::ensure!(
      settings.fail_threshold > 0,
      "circuit.{label}.fail_threshold must be positive"
    );
  }

  anyhow::ensure!(config.warmup.days > 0, "warmup.days must be positive");

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const VALID: &str = r#"
[chains]
realtime = ["tencent", "sina"]
daily = ["sina"]

[[sources]]
name = "tencent"
base_url = "http://127.0.0.1:8801"

[[sources]]
name = "sina"
base_url = "http://127.0.0.1:8802"
timeout_ms = 5000
"#;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_defaults_applied() {
    let config = parse_config(VALID).unwrap();
    assert_eq!(config.cache.max_size, 2000);
    assert_eq!(config.cache.realtime_ttl_seconds, 30);
    assert_eq!(config.history.min_bars, 20);
    assert_eq!(config.circuit.realtime.recover_seconds, 300);
    assert_eq!(config.circuit.history.recover_seconds, 600);
    assert_eq!(config.throttle.min_interval_ms, 2000);
    assert_eq!(config.sources[0].timeout_ms, 10_000);
    assert!(config.sources[0].enabled);
  }

  #[test]
  fn test_undefined_chain_source_rejected() {
    let text = VALID.replace(r#"daily = ["sina"]"#, r#"daily = ["baostock"]"#);
    let err = parse_config(&text).unwrap_err();
    assert!(err.to_string().contains("baostock"));
  }

  #[test]
  fn test_duplicate_source_rejected() {
    let text = format!("{VALID}\n[[sources]]\nname = \"sina\"\nbase_url = \"http://x\"\n");
    assert!(parse_config(&text).is_err());
  }
}
