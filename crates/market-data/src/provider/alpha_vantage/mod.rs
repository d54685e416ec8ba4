//! Alpha Vantage market data provider implementation.
//!
//! This module provides market data from the Alpha Vantage API:
//! - Equities via the GLOBAL_QUOTE function
//! - Symbol search via the SYMBOL_SEARCH function
//!
//! Note: Alpha Vantage free tier is limited to 5 API calls per minute,
//! and throttling arrives as a 200 response carrying a "Note" or
//! "Information" payload instead of an HTTP 429.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::{QuoteRecord, SymbolResult};
use crate::provider::{MarketDataProvider, ProviderCapabilities};

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER_ID: &str = "ALPHA_VANTAGE";

/// Free tier: 5 requests per minute.
const MIN_INTERVAL: Duration = Duration::from_secs(12);

// ============================================================================
// API Response Structures
// ============================================================================

/// GLOBAL_QUOTE response. Alpha Vantage reports throttling and errors
/// inside a 200 body, so those fields ride along.
#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

/// The positional field names are the API's own.
#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "02. open")]
    open: Option<String>,
    #[serde(rename = "03. high")]
    high: Option<String>,
    #[serde(rename = "04. low")]
    low: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "06. volume")]
    volume: Option<String>,
    #[serde(rename = "07. latest trading day")]
    latest_trading_day: Option<String>,
    #[serde(rename = "08. previous close")]
    previous_close: Option<String>,
    #[serde(rename = "09. change")]
    change: Option<String>,
    #[serde(rename = "10. change percent")]
    change_percent: Option<String>,
}

/// SYMBOL_SEARCH response
#[derive(Debug, Deserialize)]
struct SymbolSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SymbolMatch>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SymbolMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "2. name")]
    name: String,
    #[serde(rename = "3. type")]
    security_type: Option<String>,
    #[serde(rename = "4. region")]
    region: Option<String>,
    #[serde(rename = "7. timezone")]
    timezone: Option<String>,
    #[serde(rename = "8. currency")]
    currency: Option<String>,
    // Note: marketOpen, marketClose, matchScore exist but are not mapped
}

// ============================================================================
// AlphaVantageProvider
// ============================================================================

/// Alpha Vantage market data provider.
///
/// Slow but broad equity coverage; sits at the back of the failover
/// chain because of its restrictive free-tier rate limit.
pub struct AlphaVantageProvider {
    client: Client,
    api_key: String,
}

impl AlphaVantageProvider {
    /// Create a new Alpha Vantage provider with the given API key.
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, api_key }
    }

    /// Make a GET request with the given function and extra params.
    async fn fetch(
        &self,
        function: &str,
        params: &[(&str, &str)],
    ) -> Result<String, MarketDataError> {
        debug!("Alpha Vantage request: {}", function);

        let mut request = self
            .client
            .get(BASE_URL)
            .query(&[("function", function), ("apikey", self.api_key.as_str())]);
        for (key, value) in params {
            request = request.query(&[(key, value)]);
        }

        let response = request.send().await.map_err(|e| {
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

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
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

    /// Reject throttle/error payloads delivered inside a 200 body.
    fn check_payload_errors(
        error_message: &Option<String>,
        note: &Option<String>,
        information: &Option<String>,
    ) -> Result<(), MarketDataError> {
        if let Some(message) = error_message {
            return Err(MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: message.clone(),
            });
        }
        // "Note" and "Information" both mean the free-tier limit hit
        if note.is_some() || information.is_some() {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
            });
        }
        Ok(())
    }

    /// Parse an optional decimal string; absent or unparseable values
    /// stay absent.
    fn parse_optional(value: &Option<String>) -> Option<Decimal> {
        value.as_deref().and_then(|v| Decimal::from_str(v).ok())
    }

    /// Parse the "10. change percent" field, which carries a '%' suffix.
    fn parse_change_percent(value: &Option<String>) -> Option<Decimal> {
        value
            .as_deref()
            .map(|v| v.trim_end_matches('%'))
            .and_then(|v| Decimal::from_str(v).ok())
    }

    /// Parse the "07. latest trading day" date into a UTC timestamp.
    fn parse_trading_day(value: &Option<String>) -> DateTime<Utc> {
        value
            .as_deref()
            .and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Utc.from_utc_datetime(&dt))
            .unwrap_or_else(Utc::now)
    }

    /// Map a GLOBAL_QUOTE payload into the uniform quote shape.
    fn map_quote(symbol: &str, quote: GlobalQuote) -> Result<QuoteRecord, MarketDataError> {
        let price = Self::parse_optional(&quote.price).ok_or_else(|| {
            // An empty "Global Quote" object means the symbol is unknown
            MarketDataError::SymbolNotFound(format!("No data found for symbol: {}", symbol))
        })?;

        let timestamp = Self::parse_trading_day(&quote.latest_trading_day);

        let mut record = QuoteRecord::new(
            quote.symbol.as_deref().unwrap_or(symbol),
            timestamp,
            price,
            PROVIDER_ID,
        );
        record.change = Self::parse_optional(&quote.change);
        record.change_percent = Self::parse_change_percent(&quote.change_percent);
        record.volume = Self::parse_optional(&quote.volume);
        record.day_high = Self::parse_optional(&quote.high);
        record.day_low = Self::parse_optional(&quote.low);
        record.open = Self::parse_optional(&quote.open);
        record.previous_close = Self::parse_optional(&quote.previous_close);
        if let Some(day) = &quote.latest_trading_day {
            record
                .metadata
                .insert("latestTradingDay".to_string(), serde_json::json!(day));
        }
        Ok(record)
    }
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for AlphaVantageProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn display_name(&self) -> &'static str {
        "Alpha Vantage"
    }

    fn priority(&self) -> u8 {
        5
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::quote_and_search()
    }

    fn min_interval(&self) -> Duration {
        MIN_INTERVAL
    }

    async fn get_quote(&self, symbol: &str) -> Result<QuoteRecord, MarketDataError> {
        debug!("Fetching quote for {} from Alpha Vantage", symbol);

        let text = self.fetch("GLOBAL_QUOTE", &[("symbol", symbol)]).await?;
        let response: GlobalQuoteResponse =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse quote response: {}", e),
            })?;

        Self::check_payload_errors(
            &response.error_message,
            &response.note,
            &response.information,
        )?;

        let quote = response.global_quote.ok_or_else(|| {
            MarketDataError::SymbolNotFound(format!("No data found for symbol: {}", symbol))
        })?;

        Self::map_quote(symbol, quote)
    }

    async fn search_symbols(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SymbolResult>, MarketDataError> {
        debug!("Searching Alpha Vantage for '{}'", query);

        let text = self.fetch("SYMBOL_SEARCH", &[("keywords", query)]).await?;
        let response: SymbolSearchResponse =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse search response: {}", e),
            })?;

        Self::check_payload_errors(
            &response.error_message,
            &response.note,
            &response.information,
        )?;

        let results: Vec<SymbolResult> = response
            .best_matches
            .into_iter()
            .take(limit)
            .map(|m| {
                let category = categorize_match(&m);
                let mut result = SymbolResult::new(
                    &m.symbol,
                    &m.name,
                    category,
                    m.region.as_deref().unwrap_or("US"),
                    PROVIDER_ID,
                );
                if let Some(security_type) = &m.security_type {
                    result = result.with_metadata("type", serde_json::json!(security_type));
                }
                if let Some(timezone) = &m.timezone {
                    result = result.with_metadata("timezone", serde_json::json!(timezone));
                }
                if let Some(currency) = &m.currency {
                    result = result.with_metadata("currency", serde_json::json!(currency));
                }
                result
            })
            .collect();

        debug!(
            "Alpha Vantage: found {} search results for '{}'",
            results.len(),
            query
        );

        Ok(results)
    }

    async fn health_check(&self) -> bool {
        match self.fetch("GLOBAL_QUOTE", &[("symbol", "AAPL")]).await {
            Ok(text) => match serde_json::from_str::<GlobalQuoteResponse>(&text) {
                Ok(response) => response.error_message.is_none(),
                Err(_) => false,
            },
            Err(e) => {
                warn!("Alpha Vantage health check failed: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Categorize a search match from its type and name.
fn categorize_match(m: &SymbolMatch) -> String {
    let security_type = m
        .security_type
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let name = m.name.to_lowercase();

    if security_type.contains("etf") || name.contains("etf") || name.contains("trust") {
        "ETF".to_string()
    } else if security_type.contains("fund") || name.contains("fund") {
        "Fund".to_string()
    } else if security_type.contains("bond") {
        "Bond".to_string()
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
        let provider = AlphaVantageProvider::new("demo".to_string());
        assert_eq!(provider.id(), "ALPHA_VANTAGE");
        assert_eq!(provider.display_name(), "Alpha Vantage");
        assert_eq!(provider.priority(), 5);
        assert_eq!(provider.min_interval(), Duration::from_secs(12));
    }

    #[test]
    fn test_global_quote_parsing() {
        let json = r#"{
            "Global Quote": {
                "01. symbol": "AAPL",
                "02. open": "149.00",
                "03. high": "152.00",
                "04. low": "148.50",
                "05. price": "150.25",
                "06. volume": "58499129",
                "07. latest trading day": "2024-01-02",
                "08. previous close": "148.75",
                "09. change": "1.50",
                "10. change percent": "1.0084%"
            }
        }"#;

        let response: GlobalQuoteResponse = serde_json::from_str(json).unwrap();
        let quote = response.global_quote.unwrap();
        assert_eq!(quote.symbol.as_deref(), Some("AAPL"));
        assert_eq!(quote.price.as_deref(), Some("150.25"));
        assert_eq!(quote.change_percent.as_deref(), Some("1.0084%"));
    }

    #[test]
    fn test_map_quote() {
        let quote = GlobalQuote {
            symbol: Some("AAPL".to_string()),
            open: Some("149.00".to_string()),
            high: Some("152.00".to_string()),
            low: Some("148.50".to_string()),
            price: Some("150.25".to_string()),
            volume: Some("58499129".to_string()),
            latest_trading_day: Some("2024-01-02".to_string()),
            previous_close: Some("148.75".to_string()),
            change: Some("1.50".to_string()),
            change_percent: Some("1.0084%".to_string()),
        };

        let record = AlphaVantageProvider::map_quote("AAPL", quote).unwrap();
        assert_eq!(record.price, dec!(150.25));
        assert_eq!(record.change, Some(dec!(1.50)));
        assert_eq!(record.change_percent, Some(dec!(1.0084)));
        assert_eq!(record.volume, Some(dec!(58499129)));
        assert_eq!(record.provider, "ALPHA_VANTAGE");
        assert_eq!(
            record.metadata.get("latestTradingDay").unwrap(),
            "2024-01-02"
        );
    }

    #[test]
    fn test_empty_global_quote_is_symbol_not_found() {
        let quote = GlobalQuote {
            symbol: None,
            open: None,
            high: None,
            low: None,
            price: None,
            volume: None,
            latest_trading_day: None,
            previous_close: None,
            change: None,
            change_percent: None,
        };

        let err = AlphaVantageProvider::map_quote("NOPE", quote).unwrap_err();
        assert!(matches!(err, MarketDataError::SymbolNotFound(_)));
    }

    #[test]
    fn test_note_payload_is_rate_limited() {
        let json = r#"{
            "Note": "Thank you for using Alpha Vantage! Our standard API rate limit is 5 requests per minute."
        }"#;
        let response: GlobalQuoteResponse = serde_json::from_str(json).unwrap();
        let err = AlphaVantageProvider::check_payload_errors(
            &response.error_message,
            &response.note,
            &response.information,
        )
        .unwrap_err();
        assert!(matches!(err, MarketDataError::RateLimited { .. }));
    }

    #[test]
    fn test_error_message_payload_is_upstream() {
        let json = r#"{"Error Message": "Invalid API call."}"#;
        let response: GlobalQuoteResponse = serde_json::from_str(json).unwrap();
        let err = AlphaVantageProvider::check_payload_errors(
            &response.error_message,
            &response.note,
            &response.information,
        )
        .unwrap_err();
        assert!(matches!(err, MarketDataError::Upstream { .. }));
    }

    #[test]
    fn test_symbol_search_parsing() {
        let json = r#"{
            "bestMatches": [
                {
                    "1. symbol": "AAPL",
                    "2. name": "Apple Inc",
                    "3. type": "Equity",
                    "4. region": "United States",
                    "5. marketOpen": "09:30",
                    "6. marketClose": "16:00",
                    "7. timezone": "UTC-04",
                    "8. currency": "USD",
                    "9. matchScore": "1.0000"
                }
            ]
        }"#;

        let response: SymbolSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.best_matches.len(), 1);
        assert_eq!(response.best_matches[0].symbol, "AAPL");
        assert_eq!(response.best_matches[0].currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_categorize_match() {
        let equity = SymbolMatch {
            symbol: "AAPL".to_string(),
            name: "Apple Inc".to_string(),
            security_type: Some("Equity".to_string()),
            region: None,
            timezone: None,
            currency: None,
        };
        assert_eq!(categorize_match(&equity), "Stocks");

        let etf = SymbolMatch {
            symbol: "QQQ".to_string(),
            name: "Invesco QQQ Trust".to_string(),
            security_type: Some("ETF".to_string()),
            region: None,
            timezone: None,
            currency: None,
        };
        assert_eq!(categorize_match(&etf), "ETF");
    }

    #[test]
    fn test_parse_trading_day_fallback() {
        let parsed = AlphaVantageProvider::parse_trading_day(&Some("2024-01-02".to_string()));
        assert_eq!(parsed.date_naive().to_string(), "2024-01-02");
    }
}
