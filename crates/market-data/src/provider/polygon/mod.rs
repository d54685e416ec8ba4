//! Polygon.io market data provider implementation.
//!
//! This module provides equity market data from the Polygon API:
//! - Quotes via /v2/aggs/ticker/{symbol}/prev (previous-day aggregate,
//!   the endpoint available on the basic subscription)
//! - Symbol search via /v3/reference/tickers
//! - Market status via /v1/marketstatus/now (reachability probe)
//!
//! The previous-day aggregate carries no intraday change data, so the
//! change fields of the mapped quote stay absent.
//!
//! API documentation: https://polygon.io/docs/stocks

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

const BASE_URL: &str = "https://api.polygon.io";
const PROVIDER_ID: &str = "POLYGON";

/// 10 requests per second.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// API Response Structures
// ============================================================================

/// Response from /v2/aggs/ticker/{symbol}/prev
#[derive(Debug, Deserialize)]
struct PrevCloseResponse {
    #[serde(default)]
    results: Vec<PrevCloseBar>,
    #[serde(rename = "resultsCount", default)]
    results_count: u32,
    // Note: status, ticker, queryCount fields exist but are not used
}

/// One daily aggregate bar.
#[derive(Debug, Deserialize)]
struct PrevCloseBar {
    /// Close price
    c: Option<f64>,
    /// High price
    h: Option<f64>,
    /// Low price
    l: Option<f64>,
    /// Open price
    o: Option<f64>,
    /// Volume
    v: Option<f64>,
    /// Bar timestamp (Unix ms)
    t: Option<i64>,
}

/// Response from /v3/reference/tickers
#[derive(Debug, Deserialize)]
struct TickerSearchResponse {
    #[serde(default)]
    results: Vec<TickerInfo>,
}

/// One reference ticker.
#[derive(Debug, Deserialize)]
struct TickerInfo {
    ticker: String,
    name: String,
    #[serde(default)]
    market: Option<String>,
    #[serde(rename = "type", default)]
    ticker_type: Option<String>,
    #[serde(default)]
    primary_exchange: Option<String>,
    #[serde(default)]
    currency_name: Option<String>,
}

// ============================================================================
// PolygonProvider
// ============================================================================

/// Polygon.io market data provider.
///
/// Serves equities from the previous-day aggregate; sits behind the
/// real-time providers in the failover chain.
pub struct PolygonProvider {
    client: Client,
    api_key: String,
}

impl PolygonProvider {
    /// Create a new Polygon provider with the given API key.
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, api_key }
    }

    /// Make a GET request to the Polygon API.
    async fn fetch(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<String, MarketDataError> {
        let url = format!("{}{}", BASE_URL, endpoint);

        debug!("Polygon request: {} with {} params", endpoint, params.len());

        let mut request = self.client.get(&url).query(&[("apiKey", &self.api_key)]);
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

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: "Invalid or unauthorized API key".to_string(),
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

    /// Map a previous-day bar into the uniform quote shape.
    ///
    /// The previous close doubles as the current price; there is no
    /// intraday change information on this endpoint, so `change` and
    /// `changePercent` stay absent rather than being zeroed.
    fn map_bar(symbol: &str, bar: PrevCloseBar) -> Result<QuoteRecord, MarketDataError> {
        let close = bar.c.ok_or_else(|| MarketDataError::Upstream {
            provider: PROVIDER_ID.to_string(),
            message: format!("Missing close price for {}", symbol),
        })?;

        let price = Decimal::try_from(close).map_err(|_| MarketDataError::Upstream {
            provider: PROVIDER_ID.to_string(),
            message: format!("Invalid close price: {}", close),
        })?;

        let timestamp = bar
            .t
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        let mut quote = QuoteRecord::new(symbol, timestamp, price, PROVIDER_ID);
        quote.volume = bar.v.and_then(|v| Decimal::try_from(v).ok());
        quote.day_high = bar.h.and_then(|v| Decimal::try_from(v).ok());
        quote.day_low = bar.l.and_then(|v| Decimal::try_from(v).ok());
        quote.open = bar.o.and_then(|v| Decimal::try_from(v).ok());
        quote.previous_close = Some(price);
        quote.metadata.insert(
            "priceSource".to_string(),
            serde_json::json!("previous_close"),
        );
        Ok(quote)
    }

    /// Map a reference ticker into the uniform symbol shape.
    fn map_ticker(info: TickerInfo) -> SymbolResult {
        let category = match info.ticker_type.as_deref() {
            Some("ETF") | Some("ETN") => "ETF",
            Some("FUND") => "Fund",
            _ => "Stocks",
        };

        let mut result = SymbolResult::new(
            &info.ticker,
            &info.name,
            category,
            info.primary_exchange.as_deref().unwrap_or("US"),
            PROVIDER_ID,
        );
        if let Some(market) = &info.market {
            result = result.with_metadata("market", serde_json::json!(market));
        }
        if let Some(currency) = &info.currency_name {
            result = result.with_metadata("currency", serde_json::json!(currency));
        }
        result
    }
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for PolygonProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn display_name(&self) -> &'static str {
        "Polygon.io"
    }

    fn priority(&self) -> u8 {
        3
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::quote_and_search()
    }

    fn min_interval(&self) -> Duration {
        MIN_INTERVAL
    }

    async fn get_quote(&self, symbol: &str) -> Result<QuoteRecord, MarketDataError> {
        debug!("Fetching quote for {} from Polygon", symbol);

        let endpoint = format!("/v2/aggs/ticker/{}/prev", symbol);
        let text = self.fetch(&endpoint, &[]).await?;

        let response: PrevCloseResponse =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse aggregate response: {}", e),
            })?;

        let bar = response.results.into_iter().next().ok_or_else(|| {
            MarketDataError::SymbolNotFound(format!(
                "No previous close data for symbol: {}",
                symbol
            ))
        })?;

        Self::map_bar(symbol, bar)
    }

    async fn search_symbols(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SymbolResult>, MarketDataError> {
        debug!("Searching Polygon for '{}'", query);

        let limit_param = limit.to_string();
        let text = self
            .fetch(
                "/v3/reference/tickers",
                &[
                    ("search", query),
                    ("active", "true"),
                    ("limit", limit_param.as_str()),
                ],
            )
            .await?;

        let response: TickerSearchResponse =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse search response: {}", e),
            })?;

        let results: Vec<SymbolResult> = response
            .results
            .into_iter()
            .take(limit)
            .map(Self::map_ticker)
            .collect();

        debug!(
            "Polygon: found {} search results for '{}'",
            results.len(),
            query
        );

        Ok(results)
    }

    async fn health_check(&self) -> bool {
        match self.fetch("/v1/marketstatus/now", &[]).await {
            Ok(text) => serde_json::from_str::<serde_json::Value>(&text).is_ok(),
            Err(e) => {
                warn!("Polygon health check failed: {}", e);
                false
            }
        }
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
        let provider = PolygonProvider::new("test_key".to_string());
        assert_eq!(provider.id(), "POLYGON");
        assert_eq!(provider.display_name(), "Polygon.io");
        assert_eq!(provider.priority(), 3);
        assert_eq!(provider.min_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_prev_close_parsing() {
        let json = r#"{
            "ticker": "AAPL",
            "queryCount": 1,
            "resultsCount": 1,
            "adjusted": true,
            "results": [{
                "T": "AAPL",
                "c": 185.64,
                "h": 186.95,
                "l": 185.01,
                "o": 186.06,
                "v": 58414460.0,
                "vw": 185.9465,
                "t": 1704229200000,
                "n": 565074
            }],
            "status": "OK"
        }"#;

        let response: PrevCloseResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.results_count, 1);
        assert_eq!(response.results[0].c, Some(185.64));
        assert_eq!(response.results[0].t, Some(1704229200000));
    }

    #[test]
    fn test_map_bar_change_fields_stay_absent() {
        let bar = PrevCloseBar {
            c: Some(185.64),
            h: Some(186.95),
            l: Some(185.01),
            o: Some(186.06),
            v: Some(58414460.0),
            t: Some(1704229200000),
        };

        let quote = PolygonProvider::map_bar("AAPL", bar).unwrap();
        assert_eq!(quote.price, dec!(185.64));
        assert_eq!(quote.previous_close, Some(dec!(185.64)));
        // No intraday change data on this endpoint
        assert!(quote.change.is_none());
        assert!(quote.change_percent.is_none());
        assert_eq!(quote.metadata.get("priceSource").unwrap(), "previous_close");
    }

    #[test]
    fn test_map_bar_missing_close_is_error() {
        let bar = PrevCloseBar {
            c: None,
            h: None,
            l: None,
            o: None,
            v: None,
            t: None,
        };

        assert!(PolygonProvider::map_bar("AAPL", bar).is_err());
    }

    #[test]
    fn test_ticker_search_parsing() {
        let json = r#"{
            "results": [
                {
                    "ticker": "AAPL",
                    "name": "Apple Inc.",
                    "market": "stocks",
                    "locale": "us",
                    "primary_exchange": "XNAS",
                    "type": "CS",
                    "active": true,
                    "currency_name": "usd"
                },
                {
                    "ticker": "QQQ",
                    "name": "Invesco QQQ Trust",
                    "market": "stocks",
                    "type": "ETF",
                    "currency_name": "usd"
                }
            ],
            "status": "OK",
            "count": 2
        }"#;

        let response: TickerSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].ticker, "AAPL");
        assert_eq!(response.results[1].ticker_type.as_deref(), Some("ETF"));
    }

    #[test]
    fn test_map_ticker_categories() {
        let stock = TickerInfo {
            ticker: "AAPL".to_string(),
            name: "Apple Inc.".to_string(),
            market: Some("stocks".to_string()),
            ticker_type: Some("CS".to_string()),
            primary_exchange: Some("XNAS".to_string()),
            currency_name: Some("usd".to_string()),
        };
        let mapped = PolygonProvider::map_ticker(stock);
        assert_eq!(mapped.category, "Stocks");
        assert_eq!(mapped.exchange, "XNAS");

        let etf = TickerInfo {
            ticker: "QQQ".to_string(),
            name: "Invesco QQQ Trust".to_string(),
            market: None,
            ticker_type: Some("ETF".to_string()),
            primary_exchange: None,
            currency_name: None,
        };
        assert_eq!(PolygonProvider::map_ticker(etf).category, "ETF");
    }
}
