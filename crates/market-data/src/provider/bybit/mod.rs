//! Bybit market data provider implementation.
//!
//! This module provides crypto market data from the Bybit v5 API:
//! - Spot tickers via /v5/market/tickers
//! - Instrument universe via /v5/market/instruments-info
//! - Server time via /v5/market/time (reachability probe)
//!
//! Symbol search is a local filter over the instrument universe, which
//! is expensive to fetch and changes rarely, so the adapter keeps it in
//! its own short-lived cache.
//!
//! API documentation: https://bybit-exchange.github.io/docs/v5/intro

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::{QuoteRecord, SymbolResult};
use crate::provider::{MarketDataProvider, ProviderCapabilities};
use crate::registry::TtlCache;

const BASE_URL: &str = "https://api.bybit.com/v5";
const PROVIDER_ID: &str = "BYBIT";

/// Bybit spaces requests 500 ms apart (2 per second).
const MIN_INTERVAL: Duration = Duration::from_millis(500);

/// The instrument universe is refetched at most every 5 minutes.
const UNIVERSE_TTL: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// API Response Structures
// ============================================================================

/// Envelope every v5 endpoint returns.
#[derive(Debug, Deserialize)]
struct V5Response<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<T>,
    /// Server timestamp in milliseconds
    #[serde(default)]
    time: Option<i64>,
}

/// Result of /market/tickers
#[derive(Debug, Deserialize)]
struct TickerResult {
    #[serde(default)]
    list: Vec<Ticker>,
}

/// One spot ticker. All numeric values arrive as strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    symbol: String,
    last_price: String,
    #[serde(default)]
    prev_price24h: Option<String>,
    #[serde(default)]
    high_price24h: Option<String>,
    #[serde(default)]
    low_price24h: Option<String>,
    #[serde(default)]
    volume24h: Option<String>,
    // Note: price24hPcnt, turnover24h, bid1Price, ask1Price exist but are not mapped
}

/// Result of /market/instruments-info
#[derive(Debug, Deserialize)]
struct InstrumentResult {
    #[serde(default)]
    list: Vec<Instrument>,
}

/// One tradable instrument.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    symbol: String,
    base_coin: String,
    quote_coin: String,
    #[serde(default)]
    status: Option<String>,
}

// ============================================================================
// BybitProvider
// ============================================================================

/// Bybit market data provider.
///
/// Covers spot crypto pairs. The public endpoints need no API key.
pub struct BybitProvider {
    client: Client,
    /// Mapped instrument universe, keyed by category.
    universe: TtlCache<String, Vec<SymbolResult>>,
}

impl BybitProvider {
    /// Create a new Bybit provider.
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            universe: TtlCache::new(UNIVERSE_TTL),
        }
    }

    /// Make a GET request to a v5 endpoint and decode the envelope.
    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<V5Response<T>, MarketDataError> {
        let url = format!("{}{}", BASE_URL, endpoint);

        debug!("Bybit request: {} with {} params", endpoint, params.len());

        let response = self
            .client
            .get(&url)
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

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {} - {}", status, body),
            });
        }

        let envelope: V5Response<T> =
            response
                .json()
                .await
                .map_err(|e| MarketDataError::Upstream {
                    provider: PROVIDER_ID.to_string(),
                    message: format!("Failed to parse response: {}", e),
                })?;

        if envelope.ret_code != 0 {
            return Err(MarketDataError::Upstream {
                provider: PROVIDER_ID.to_string(),
                message: format!("retCode {} - {}", envelope.ret_code, envelope.ret_msg),
            });
        }

        Ok(envelope)
    }

    /// Parse a required decimal string field.
    fn parse_decimal(value: &str, field: &str) -> Result<Decimal, MarketDataError> {
        Decimal::from_str(value).map_err(|_| MarketDataError::Upstream {
            provider: PROVIDER_ID.to_string(),
            message: format!("Invalid {}: '{}'", field, value),
        })
    }

    /// Parse an optional decimal string field; unparseable values stay
    /// absent rather than becoming zero.
    fn parse_optional(value: &Option<String>) -> Option<Decimal> {
        value.as_deref().and_then(|v| Decimal::from_str(v).ok())
    }

    /// Map a spot ticker into the uniform quote shape.
    fn map_ticker(ticker: &Ticker, timestamp: DateTime<Utc>) -> Result<QuoteRecord, MarketDataError> {
        let price = Self::parse_decimal(&ticker.last_price, "lastPrice")?;
        let previous_close = Self::parse_optional(&ticker.prev_price24h);

        let change = previous_close.map(|prev| price - prev);
        let change_percent = match (change, previous_close) {
            (Some(change), Some(prev)) if prev > Decimal::ZERO => {
                Some(change / prev * Decimal::from(100))
            }
            _ => None,
        };

        let mut quote = QuoteRecord::new(ticker.symbol.clone(), timestamp, price, PROVIDER_ID);
        quote.change = change;
        quote.change_percent = change_percent;
        quote.volume = Self::parse_optional(&ticker.volume24h);
        quote.day_high = Self::parse_optional(&ticker.high_price24h);
        quote.day_low = Self::parse_optional(&ticker.low_price24h);
        quote.previous_close = previous_close;
        Ok(quote)
    }

    /// Map an instrument into the uniform symbol shape.
    fn map_instrument(instrument: &Instrument) -> SymbolResult {
        let mut result = SymbolResult::new(
            &instrument.symbol,
            format!("{}/{}", instrument.base_coin, instrument.quote_coin),
            "Cryptocurrency",
            "BYBIT",
            PROVIDER_ID,
        )
        .with_metadata("baseCoin", serde_json::json!(instrument.base_coin))
        .with_metadata("quoteCoin", serde_json::json!(instrument.quote_coin));
        if let Some(status) = &instrument.status {
            result = result.with_metadata("status", serde_json::json!(status));
        }
        result
    }

    /// Fetch (or serve from the adapter cache) the spot universe.
    async fn spot_universe(&self) -> Result<Vec<SymbolResult>, MarketDataError> {
        let key = "spot".to_string();
        if let Some(cached) = self.universe.get(&key) {
            return Ok(cached);
        }

        let envelope: V5Response<InstrumentResult> = self
            .fetch(
                "/market/instruments-info",
                &[("category", "spot"), ("status", "Trading")],
            )
            .await?;

        let instruments = envelope.result.map(|r| r.list).unwrap_or_default();
        let symbols: Vec<SymbolResult> = instruments.iter().map(Self::map_instrument).collect();

        debug!("Bybit: fetched {} spot instruments", symbols.len());
        self.universe.put(key, symbols.clone());
        Ok(symbols)
    }
}

impl Default for BybitProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for BybitProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn display_name(&self) -> &'static str {
        "Bybit"
    }

    fn priority(&self) -> u8 {
        1
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::full()
    }

    fn min_interval(&self) -> Duration {
        MIN_INTERVAL
    }

    async fn get_quote(&self, symbol: &str) -> Result<QuoteRecord, MarketDataError> {
        debug!("Fetching quote for {} from Bybit", symbol);

        let envelope: V5Response<TickerResult> = self
            .fetch("/market/tickers", &[("category", "spot"), ("symbol", symbol)])
            .await?;

        let timestamp = envelope
            .time
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        let ticker = envelope
            .result
            .and_then(|r| r.list.into_iter().next())
            .ok_or_else(|| {
                MarketDataError::SymbolNotFound(format!("No ticker data for symbol: {}", symbol))
            })?;

        Self::map_ticker(&ticker, timestamp)
    }

    async fn search_symbols(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SymbolResult>, MarketDataError> {
        debug!("Searching Bybit for '{}'", query);

        let universe = self.spot_universe().await?;
        let results: Vec<SymbolResult> = universe
            .into_iter()
            .filter(|s| s.matches(query))
            .take(limit)
            .collect();

        Ok(results)
    }

    async fn list_symbols(&self) -> Result<Vec<SymbolResult>, MarketDataError> {
        self.spot_universe().await
    }

    async fn health_check(&self) -> bool {
        match self
            .fetch::<serde_json::Value>("/market/time", &[])
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Bybit health check failed: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
