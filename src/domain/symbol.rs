//! Symbol normalization per asset class.
//!
//! Mainland-China equities use a bare 6-digit internal code; US
//! equities use the upper-cased ticker. Adapters render the internal
//! form into whatever style their provider expects.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("invalid stock code: {0}")]
    InvalidCode(String),

    #[error("empty symbol")]
    Empty,
}

/// Asset class served by a manager instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    /// Shanghai / Shenzhen listed equities and ETFs.
    #[default]
    Cn,
    /// US listed equities.
    Us,
}

impl AssetClass {
    /// Normalize a raw symbol into the internal form for this asset class.
    pub fn normalize(self, raw: &str) -> Result<String, SymbolError> {
        match self {
            Self::Cn => normalize_cn_code(raw),
            Self::Us => normalize_us_symbol(raw),
        }
    }
}

/// Normalize into the internal 6-digit numeric code.
///
/// Accepts `600519`, `sh600519`, `SH.600519`, `sz000001` and similar.
pub fn normalize_cn_code(raw: &str) -> Result<String, SymbolError> {
    let lowered = raw.trim().to_lowercase();
    let stripped = ["sh.", "sz.", "sh", "sz"]
        .iter()
        .find_map(|prefix| lowered.strip_prefix(prefix))
        .unwrap_or(&lowered);

    let digits: String = stripped.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 6 {
        return Err(SymbolError::InvalidCode(raw.to_string()));
    }
    Ok(digits)
}

/// Normalize a US ticker: trimmed and upper-cased.
pub fn normalize_us_symbol(raw: &str) -> Result<String, SymbolError> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(SymbolError::Empty);
    }
    Ok(symbol)
}

/// Exchange prefix inferred from a 6-digit code.
///
/// 5xx/6xx/9xx list in Shanghai (ETFs, A-shares, B-shares); the rest in Shenzhen.
pub fn cn_market_prefix(code: &str) -> &'static str {
    if code.starts_with(['5', '6', '9']) {
        "sh"
    } else {
        "sz"
    }
}

/// Render as `sh600519` / `sz002202`.
pub fn to_prefixed_symbol(raw: &str) -> Result<String, SymbolError> {
    let code = normalize_cn_code(raw)?;
    Ok(format!("{}{code}", cn_market_prefix(&code)))
}

/// Render as `sh.600519` / `sz.002202`.
pub fn to_dotted_symbol(raw: &str) -> Result<String, SymbolError> {
    let code = normalize_cn_code(raw)?;
    Ok(format!("{}.{code}", cn_market_prefix(&code)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cn_prefixes_stripped() {
        assert_eq!(normalize_cn_code("sh600519").unwrap(), "600519");
        assert_eq!(normalize_cn_code(" SZ.000001 ").unwrap(), "000001");
        assert_eq!(normalize_cn_code("002202").unwrap(), "002202");
    }

    #[test]
    fn test_cn_rejects_wrong_length() {
        assert_eq!(
            normalize_cn_code("60051"),
            Err(SymbolError::InvalidCode("60051".to_string()))
        );
    }

    #[test]
    fn test_market_styles() {
        assert_eq!(to_prefixed_symbol("600519").unwrap(), "sh600519");
        assert_eq!(to_dotted_symbol("002202").unwrap(), "sz.002202");
        assert_eq!(to_prefixed_symbol("510300").unwrap(), "sh510300");
    }

    #[test]
    fn test_us_symbol() {
        assert_eq!(AssetClass::Us.normalize(" aapl ").unwrap(), "AAPL");
        assert_eq!(AssetClass::Us.normalize("  "), Err(SymbolError::Empty));
    }
}
