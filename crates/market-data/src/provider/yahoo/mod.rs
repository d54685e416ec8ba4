//! Yahoo Finance market data provider.
//!
//! This provider uses the Yahoo Finance API to fetch market data for
//! equities, ETFs and cryptocurrencies (e.g., AAPL, BTC-USD):
//! - Quotes via the quoteSummary price module (crumb/cookie auth)
//! - Symbol search via /v1/finance/search

mod models;

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use num_traits::FromPrimitive;
use reqwest::header;
use reqwest::Client;
use rust_decimal::Decimal;
use tracing::{debug, warn};
use urlencoding::encode;

use crate::errors::MarketDataError;
use crate::models::{QuoteRecord, SymbolResult};
use crate::provider::{MarketDataProvider, ProviderCapabilities};

use models::{YahooPriceData, YahooQuoteSummaryResponse, YahooSearchQuote, YahooSearchResponse};

const PROVIDER_ID: &str = "YAHOO";

/// One request per second.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

// ============================================================================
// Crumb/Cookie Authentication
// ============================================================================

/// Cached Yahoo authentication data
#[derive(Debug, Clone)]
struct CrumbData {
    cookie: String,
    crumb: String,
}

// ============================================================================
// Yahoo Provider
// ============================================================================

/// Yahoo Finance market data provider.
///
/// The quoteSummary endpoint needs a crumb tied to a session cookie;
/// the pair is fetched lazily, held in instance state, and refreshed
/// when Yahoo answers 401.
pub struct YahooProvider {
    client: Client,
    crumb: RwLock<Option<CrumbData>>,
}

impl YahooProvider {
    /// Create a new Yahoo Finance provider.
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            crumb: RwLock::new(None),
        }
    }

    // ========================================================================
    // Crumb/Cookie Authentication
    // ========================================================================

    /// Ensure we have a valid Yahoo authentication crumb.
    async fn ensure_crumb(&self) -> Result<CrumbData, MarketDataError> {
        {
            let guard = self.crumb.read().unwrap_or_else(|p| p.into_inner());
            if let Some(crumb) = guard.as_ref() {
                return Ok(crumb.clone());
            }
        }

        self.fetch_crumb().await
    }

    /// Fetch a new Yahoo authentication crumb.
    async fn fetch_crumb(&self) -> Result<CrumbData, MarketDataError> {
        // Step 1: Get cookie from fc.yahoo.com
        let response = self
            .client
            .get("https://fc.yahoo.com")
            .send()
            .await
            .map_err(|e| MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to get cookie: {}", e),
            })?;

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split_once(';').map(|(v, _)| v.to_string()))
            .ok_or_else(|| MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: "Failed to parse Yahoo cookie".to_string(),
            })?;

        // Step 2: Get crumb using cookie
        let crumb = self
            .client
            .get("https://query1.finance.yahoo.com/v1/test/getcrumb")
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::COOKIE, &cookie)
            .send()
            .await
            .map_err(|e| MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to get crumb: {}", e),
            })?
            .text()
            .await
            .map_err(|e| MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to read crumb: {}", e),
            })?;

        let crumb_data = CrumbData { cookie, crumb };

        let mut guard = self.crumb.write().unwrap_or_else(|p| p.into_inner());
        *guard = Some(crumb_data.clone());

        Ok(crumb_data)
    }

    /// Clear the cached crumb (used when authentication fails)
    fn clear_crumb(&self) {
        let mut guard = self.crumb.write().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    // ========================================================================
    // Quote Fetching
    // ========================================================================

    /// Fetch the quoteSummary price module for a symbol.
    async fn fetch_price_module(&self, symbol: &str) -> Result<YahooPriceData, MarketDataError> {
        let crumb = self.ensure_crumb().await?;

        let url = format!(
            "https://query1.finance.yahoo.com/v10/finance/quoteSummary/{}?modules=price&crumb={}",
            encode(symbol),
            encode(&crumb.crumb)
        );

        let response = self
            .client
            .get(&url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::COOKIE, &crumb.cookie)
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
                        message: format!("Quote request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.clear_crumb();
            return Err(MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: "Yahoo authentication expired".to_string(),
            });
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
            });
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {} - {}", status, body),
            });
        }

        let data: YahooQuoteSummaryResponse =
            response
                .json()
                .await
                .map_err(|e| MarketDataError::Upstream {
                    provider: PROVIDER_ID.to_string(),
                    message: format!("Failed to parse quote response: {}", e),
                })?;

        data.quote_summary
            .result
            .into_iter()
            .next()
            .and_then(|r| r.price)
            .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))
    }

    /// Map the price module into the uniform quote shape.
    fn map_price(symbol: &str, price: YahooPriceData) -> Result<QuoteRecord, MarketDataError> {
        let raw = |detail: &Option<models::YahooPriceDetail>| -> Option<Decimal> {
            detail.as_ref().and_then(|d| d.raw).and_then(Decimal::from_f64)
        };

        let close = raw(&price.regular_market_price).ok_or_else(|| MarketDataError::Upstream {
            provider: PROVIDER_ID.to_string(),
            message: format!("No valid price for {}", symbol),
        })?;

        let timestamp = price
            .regular_market_time
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);

        // changePercent arrives as a fraction (0.0101 = 1.01%)
        let change_percent =
            raw(&price.regular_market_change_percent).map(|p| p * Decimal::from(100));

        let mut quote = QuoteRecord::new(
            price.symbol.as_deref().unwrap_or(symbol),
            timestamp,
            close,
            PROVIDER_ID,
        );
        quote.change = raw(&price.regular_market_change);
        quote.change_percent = change_percent;
        quote.volume = raw(&price.regular_market_volume);
        quote.day_high = raw(&price.regular_market_day_high);
        quote.day_low = raw(&price.regular_market_day_low);
        quote.open = raw(&price.regular_market_open);
        quote.previous_close = raw(&price.regular_market_previous_close);
        if let Some(currency) = &price.currency {
            quote
                .metadata
                .insert("currency".to_string(), serde_json::json!(currency));
        }
        if let Some(name) = price.long_name.as_ref().or(price.short_name.as_ref()) {
            quote
                .metadata
                .insert("name".to_string(), serde_json::json!(name));
        }
        Ok(quote)
    }

    /// Map one search hit into the uniform symbol shape.
    fn map_search_quote(item: YahooSearchQuote) -> SymbolResult {
        let name = item
            .longname
            .as_ref()
            .or(item.shortname.as_ref())
            .cloned()
            .unwrap_or_else(|| item.symbol.clone());

        let mut result = SymbolResult::new(
            &item.symbol,
            name,
            categorize_quote_type(item.quote_type.as_deref()),
            item.exchange.as_deref().unwrap_or(""),
            PROVIDER_ID,
        );
        if let Some(quote_type) = &item.quote_type {
            result = result.with_metadata("quoteType", serde_json::json!(quote_type));
        }
        result
    }
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn display_name(&self) -> &'static str {
        "Yahoo Finance"
    }

    fn priority(&self) -> u8 {
        2
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::quote_and_search()
    }

    fn min_interval(&self) -> Duration {
        MIN_INTERVAL
    }

    async fn get_quote(&self, symbol: &str) -> Result<QuoteRecord, MarketDataError> {
        debug!("Fetching quote for {} from Yahoo", symbol);

        let price = self.fetch_price_module(symbol).await?;
        Self::map_price(symbol, price)
    }

    async fn search_symbols(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SymbolResult>, MarketDataError> {
        debug!("Searching Yahoo for '{}'", query);

        let quotes_count = limit.to_string();
        let response = self
            .client
            .get("https://query1.finance.yahoo.com/v1/finance/search")
            .query(&[
                ("q", query),
                ("quotesCount", quotes_count.as_str()),
                ("newsCount", "0"),
            ])
            .header(header::USER_AGENT, USER_AGENT)
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
                        message: format!("Search request failed: {}", e),
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
            return Err(MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        let data: YahooSearchResponse =
            response
                .json()
                .await
                .map_err(|e| MarketDataError::Upstream {
                    provider: PROVIDER_ID.to_string(),
                    message: format!("Failed to parse search response: {}", e),
                })?;

        let results: Vec<SymbolResult> = data
            .quotes
            .into_iter()
            .take(limit)
            .map(Self::map_search_quote)
            .collect();

        debug!(
            "Yahoo: found {} search results for '{}'",
            results.len(),
            query
        );

        Ok(results)
    }

    async fn health_check(&self) -> bool {
        match self.fetch_crumb().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Yahoo health check failed: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Map a Yahoo quoteType to an asset category.
fn categorize_quote_type(quote_type: Option<&str>) -> String {
    match quote_type.map(|t| t.to_uppercase()).as_deref() {
        Some("CRYPTOCURRENCY") => "Cryptocurrency".to_string(),
        Some("ETF") => "ETF".to_string(),
        Some("MUTUALFUND") => "Fund".to_string(),
        Some("INDEX") => "Index".to_string(),
        Some("FUTURE") => "Futures".to_string(),
        _ => "Stocks".to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn price_detail(raw: f64) -> Option<models::YahooPriceDetail> {
        Some(models::YahooPriceDetail { raw: Some(raw) })
    }

    #[test]
    fn test_provider_identity() {
        let provider = YahooProvider::new();
        assert_eq!(provider.id(), "YAHOO");
        assert_eq!(provider.display_name(), "Yahoo Finance");
        assert_eq!(provider.priority(), 2);
        assert_eq!(provider.min_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_map_price_full() {
        let price = YahooPriceData {
            symbol: Some("AAPL".to_string()),
            currency: Some("USD".to_string()),
            short_name: Some("Apple Inc.".to_string()),
            long_name: Some("Apple Inc.".to_string()),
            quote_type: Some("EQUITY".to_string()),
            regular_market_price: price_detail(150.25),
            regular_market_change: price_detail(1.5),
            regular_market_change_percent: price_detail(0.0101),
            regular_market_open: price_detail(149.0),
            regular_market_day_high: price_detail(152.0),
            regular_market_day_low: price_detail(148.5),
            regular_market_previous_close: price_detail(148.75),
            regular_market_volume: price_detail(58499129.0),
            regular_market_time: Some(1704229200),
        };

        let quote = YahooProvider::map_price("AAPL", price).unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, dec!(150.25));
        assert_eq!(quote.change, Some(dec!(1.5)));
        // Fractional percent scaled to a percentage
        assert_eq!(quote.change_percent, Some(dec!(1.01)));
        assert_eq!(quote.previous_close, Some(dec!(148.75)));
        assert_eq!(quote.metadata.get("currency").unwrap(), "USD");
    }

    #[test]
    fn test_map_price_missing_fields_stay_absent() {
        let price = YahooPriceData {
            symbol: None,
            currency: None,
            short_name: None,
            long_name: None,
            quote_type: None,
            regular_market_price: price_detail(42.0),
            regular_market_change: None,
            regular_market_change_percent: None,
            regular_market_open: None,
            regular_market_day_high: None,
            regular_market_day_low: None,
            regular_market_previous_close: None,
            regular_market_volume: None,
            regular_market_time: None,
        };

        let quote = YahooProvider::map_price("XYZ", price).unwrap();
        assert_eq!(quote.symbol, "XYZ");
        assert!(quote.change.is_none());
        assert!(quote.volume.is_none());
    }

    #[test]
    fn test_map_price_without_price_is_error() {
        let price = YahooPriceData {
            symbol: None,
            currency: None,
            short_name: None,
            long_name: None,
            quote_type: None,
            regular_market_price: None,
            regular_market_change: None,
            regular_market_change_percent: None,
            regular_market_open: None,
            regular_market_day_high: None,
            regular_market_day_low: None,
            regular_market_previous_close: None,
            regular_market_volume: None,
            regular_market_time: None,
        };

        assert!(YahooProvider::map_price("XYZ", price).is_err());
    }

    #[test]
    fn test_map_search_quote_prefers_long_name() {
        let item = YahooSearchQuote {
            symbol: "AAPL".to_string(),
            shortname: Some("Apple".to_string()),
            longname: Some("Apple Inc.".to_string()),
            exchange: Some("NMS".to_string()),
            quote_type: Some("EQUITY".to_string()),
        };

        let result = YahooProvider::map_search_quote(item);
        assert_eq!(result.name, "Apple Inc.");
        assert_eq!(result.category, "Stocks");
        assert_eq!(result.exchange, "NMS");
    }

    #[test]
    fn test_map_search_quote_falls_back_to_symbol() {
        let item = YahooSearchQuote {
            symbol: "MYSTERY".to_string(),
            shortname: None,
            longname: None,
            exchange: None,
            quote_type: None,
        };

        let result = YahooProvider::map_search_quote(item);
        assert_eq!(result.name, "MYSTERY");
    }

    #[test]
    fn test_categorize_quote_type() {
        assert_eq!(
            categorize_quote_type(Some("CRYPTOCURRENCY")),
            "Cryptocurrency"
        );
        assert_eq!(categorize_quote_type(Some("ETF")), "ETF");
        assert_eq!(categorize_quote_type(Some("EQUITY")), "Stocks");
        assert_eq!(categorize_quote_type(None), "Stocks");
    }
}
