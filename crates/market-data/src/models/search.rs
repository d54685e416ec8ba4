//! Search result models for symbol lookup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Result from a symbol search or a symbol-universe listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SymbolResult {
    /// Symbol/ticker (e.g., "BTCUSDT", "AAPL")
    pub symbol: String,

    /// Canonical display name (e.g., "BTC/USDT", "Apple Inc")
    pub name: String,

    /// Asset category (e.g., "Cryptocurrency", "Stocks", "ETF")
    pub category: String,

    /// Exchange name (e.g., "BYBIT", "NASDAQ")
    pub exchange: String,

    /// Provider that produced the result
    pub provider: String,

    /// Provider-specific extras
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SymbolResult {
    /// Create a new result with required fields.
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        exchange: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            category: category.into(),
            exchange: exchange.into(),
            provider: provider.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Case-insensitive substring match against symbol and name.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.symbol.to_lowercase().contains(&query) || self.name.to_lowercase().contains(&query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_symbol_case_insensitive() {
        let result = SymbolResult::new("BTCUSDT", "BTC/USDT", "Cryptocurrency", "BYBIT", "BYBIT");
        assert!(result.matches("btc"));
        assert!(result.matches("USDT"));
        assert!(!result.matches("eth"));
    }

    #[test]
    fn test_matches_name() {
        let result = SymbolResult::new("AAPL", "Apple Inc", "Stocks", "NASDAQ", "FINNHUB");
        assert!(result.matches("apple"));
    }

    #[test]
    fn test_with_metadata() {
        let result = SymbolResult::new("BTCUSDT", "BTC/USDT", "Cryptocurrency", "BYBIT", "BYBIT")
            .with_metadata("baseCoin", serde_json::json!("BTC"));
        assert_eq!(result.metadata.get("baseCoin").unwrap(), "BTC");
    }
}
