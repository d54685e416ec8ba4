//! Finnhub market data provider implementation.
//!
//! This module provides market data from the Finnhub API:
//! - Equities via the /quote endpoint
//! - Symbol search via the /search endpoint
//!
//! Finnhub free tier is limited to 60 API calls per minute.
//! API documentation: https://finnhub.io/docs/api

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::{QuoteRecord, SymbolResult};
use crate::provider::{MarketDataProvider, ProviderCapabilities};

const BASE_URL: &str = "https://finnhub.io/api/v1";
const PROVIDER_ID: &str = "FINNHUB";

/// 60 calls per minute on the free tier.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// API Response Structures
// ============================================================================

/// Response from /quote endpoint
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    /// Current price
    c: Option<f64>,
    /// Change
    d: Option<f64>,
    /// Percent change
    dp: Option<f64>,
    /// High price of the day
    h: Option<f64>,
    /// Low price of the day
    l: Option<f64>,
    /// Open price of the day
    o: Option<f64>,
    /// Previous close price
    pc: Option<f64>,
    /// Timestamp (Unix)
    t: Option<i64>,
}

/// Response from /search endpoint
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchItem>,
    // Note: count field exists but we use result.len() instead
}

/// Individual search result item
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    /// Full description/name
    description: String,
    /// Display symbol
    display_symbol: String,
    /// Symbol for API calls
    symbol: String,
    /// Security type (e.g., "Common Stock", "ETF")
    #[serde(rename = "type", default)]
    security_type: String,
}

/// Error response from Finnhub
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

// ============================================================================
// FinnhubProvider
// ============================================================================

/// Finnhub market data provider.
///
/// Supports equities with global coverage for major exchanges.
pub struct FinnhubProvider {
    client: Client,
    api_key: String,
}

impl FinnhubProvider {
    /// Create a new Finnhub provider with the given API key.
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, api_key }
    }

    /// Make a GET request to the Finnhub API.
    async fn fetch(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<String, MarketDataError> {
        let url = format!("{}{}", BASE_URL, endpoint);

        debug!("Finnhub request: {} with {} params", endpoint, params.len());

        let response = self
            .client
            .get(&url)
            // API key as a header rather than a query param
            .header("X-Finnhub-Token", &self.api_key)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MarketDataError::Timeout {
                        provider: PROVIDER_ID.to_string(),
                    }
                } else {
                    MarketDataError::Upstream {
                        provider: PROVIDER_ID.to_string(),
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
            });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: "Invalid or missing API key".to_string(),
            });
        }

        // Quota exhausted shows up as 403
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(&body) {
                if let Some(error_msg) = error_resp.error {
                    return Err(MarketDataError::Upstream {
                        provider: PROVIDER_ID.to_string(),
                        message: error_msg,
                    });
                }
            }

            return Err(MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {} - {}", status, body),
            });
        }

        response
            .text()
            .await
            .map_err(|e| MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to read response: {}", e),
            })
    }

    /// Map a /quote response into the uniform quote shape.
    fn map_quote(symbol: &str, response: QuoteResponse) -> Result<QuoteRecord, MarketDataError> {
        let close = response.c.ok_or_else(|| {
            MarketDataError::SymbolNotFound(format!("No quote data for symbol: {}", symbol))
        })?;

        // Finnhub returns 0 for unknown symbols instead of an error
        if close == 0.0 && response.o.unwrap_or(0.0) == 0.0 {
            return Err(MarketDataError::SymbolNotFound(format!(
                "Symbol not found or no trading data: {}",
                symbol
            )));
        }

        let price = Decimal::try_from(close).map_err(|_| MarketDataError::Upstream {
            provider: PROVIDER_ID.to_string(),
            message: format!("Invalid price: {}", close),
        })?;

        let timestamp = response
            .t
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);

        let mut quote = QuoteRecord::new(symbol, timestamp, price, PROVIDER_ID);
        quote.change = response.d.and_then(|v| Decimal::try_from(v).ok());
        quote.change_percent = response.dp.and_then(|v| Decimal::try_from(v).ok());
        quote.day_high = response.h.and_then(|v| Decimal::try_from(v).ok());
        quote.day_low = response.l.and_then(|v| Decimal::try_from(v).ok());
        quote.open = response.o.and_then(|v| Decimal::try_from(v).ok());
        quote.previous_close = response.pc.and_then(|v| Decimal::try_from(v).ok());
        // The /quote endpoint doesn't provide volume
        Ok(quote)
    }
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for FinnhubProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn display_name(&self) -> &'static str {
        "Finnhub"
    }

    fn priority(&self) -> u8 {
        4
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::quote_and_search()
    }

    fn min_interval(&self) -> Duration {
        MIN_INTERVAL
    }

    async fn get_quote(&self, symbol: &str) -> Result<QuoteRecord, MarketDataError> {
        debug!("Fetching quote for {} from Finnhub", symbol);

        let text = self.fetch("/quote", &[("symbol", symbol)]).await?;
        let response: QuoteResponse =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse quote response: {}", e),
            })?;

        Self::map_quote(symbol, response)
    }

    async fn search_symbols(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SymbolResult>, MarketDataError> {
        debug!("Searching Finnhub for '{}'", query);

        let text = self.fetch("/search", &[("q", query)]).await?;
        let response: SearchResponse =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse search response: {}", e),
            })?;

        let results: Vec<SymbolResult> = response
            .result
            .into_iter()
            .take(limit)
            .map(|item| {
                SymbolResult::new(
                    &item.symbol,
                    &item.description,
                    categorize_security_type(&item.security_type),
                    "US",
                    PROVIDER_ID,
                )
                .with_metadata("type", serde_json::json!(item.security_type))
                .with_metadata("displaySymbol", serde_json::json!(item.display_symbol))
            })
            .collect();

        debug!(
            "Finnhub: found {} search results for '{}'",
            results.len(),
            query
        );

        Ok(results)
    }

    async fn health_check(&self) -> bool {
        match self.fetch("/quote", &[("symbol", "AAPL")]).await {
            Ok(text) => serde_json::from_str::<QuoteResponse>(&text)
                .map(|q| q.c.unwrap_or(0.0) > 0.0)
                .unwrap_or(false),
            Err(e) => {
                warn!("Finnhub health check failed: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Map a Finnhub security type to an asset category.
fn categorize_security_type(finnhub_type: &str) -> String {
    let lowered = finnhub_type.to_lowercase();
    if lowered.contains("etf") || lowered.contains("etp") {
        "ETF".to_string()
    } else if lowered.contains("fund") {
        "Fund".to_string()
    } else if lowered.contains("bond") {
        "Bond".to_string()
    } else if lowered.contains("reit") {
        "REIT".to_string()
    } else {
        "Stocks".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_provider_identity() {
        let provider = FinnhubProvider::new("test_key".to_string());
        assert_eq!(provider.id(), "FINNHUB");
        assert_eq!(provider.display_name(), "Finnhub");
        assert_eq!(provider.priority(), 4);
        assert_eq!(provider.min_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_capabilities() {
        let caps = FinnhubProvider::new("test_key".to_string()).capabilities();
        assert!(caps.supports_quote);
        assert!(caps.supports_search);
        assert!(!caps.supports_symbol_list);
    }

    #[test]
    fn test_quote_response_parsing() {
        let json = r#"{
            "c": 150.25,
            "d": 1.50,
            "dp": 1.01,
            "h": 152.00,
            "l": 148.50,
            "o": 149.00,
            "pc": 148.75,
            "t": 1704067200
        }"#;

        let response: QuoteResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.c, Some(150.25));
        assert_eq!(response.d, Some(1.50));
        assert_eq!(response.dp, Some(1.01));
        assert_eq!(response.pc, Some(148.75));
    }

    #[test]
    fn test_map_quote_full_fields() {
        let response = QuoteResponse {
            c: Some(150.25),
            d: Some(1.5),
            dp: Some(1.01),
            h: Some(152.0),
            l: Some(148.5),
            o: Some(149.0),
            pc: Some(148.75),
            t: Some(1704067200),
        };

        let quote = FinnhubProvider::map_quote("AAPL", response).unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, dec!(150.25));
        assert_eq!(quote.change, Some(dec!(1.5)));
        assert_eq!(quote.previous_close, Some(dec!(148.75)));
        assert!(quote.volume.is_none());
        assert_eq!(quote.provider, "FINNHUB");
    }

    #[test]
    fn test_map_quote_zero_means_unknown_symbol() {
        let response = QuoteResponse {
            c: Some(0.0),
            d: None,
            dp: None,
            h: None,
            l: None,
            o: Some(0.0),
            pc: None,
            t: None,
        };

        let err = FinnhubProvider::map_quote("NOPE", response).unwrap_err();
        assert!(matches!(err, MarketDataError::SymbolNotFound(_)));
    }

    #[test]
    fn test_map_quote_missing_optionals_stay_absent() {
        let response = QuoteResponse {
            c: Some(42.0),
            d: None,
            dp: None,
            h: None,
            l: None,
            o: Some(41.0),
            pc: None,
            t: None,
        };

        let quote = FinnhubProvider::map_quote("XYZ", response).unwrap();
        assert!(quote.change.is_none());
        assert!(quote.change_percent.is_none());
        assert!(quote.previous_close.is_none());
        assert_eq!(quote.open, Some(dec!(41)));
    }

    #[test]
    fn test_search_response_parsing() {
        let json = r#"{
            "count": 2,
            "result": [
                {
                    "description": "Apple Inc",
                    "displaySymbol": "AAPL",
                    "symbol": "AAPL",
                    "type": "Common Stock"
                },
                {
                    "description": "Apple Hospitality REIT Inc",
                    "displaySymbol": "APLE",
                    "symbol": "APLE",
                    "type": "REIT"
                }
            ]
        }"#;

        let response: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.result.len(), 2);
        assert_eq!(response.result[0].symbol, "AAPL");
        assert_eq!(response.result[1].security_type, "REIT");
    }

    #[test]
    fn test_categorize_security_type() {
        assert_eq!(categorize_security_type("Common Stock"), "Stocks");
        assert_eq!(categorize_security_type("ETF"), "ETF");
        assert_eq!(categorize_security_type("Mutual Fund"), "Fund");
        assert_eq!(categorize_security_type("REIT"), "REIT");
        assert_eq!(categorize_security_type("Something Else"), "Stocks");
    }
}
