use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;

/// Uniform market data quote.
///
/// Every provider maps its wire format into this shape. Numeric fields
/// other than `price` are nullable: an upstream that does not report a
/// field leaves it `None`, it is never defaulted to zero.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecord {
    /// Symbol as requested (e.g., "BTCUSDT", "AAPL")
    pub symbol: String,

    /// Timestamp of the quote
    pub timestamp: DateTime<Utc>,

    /// Last traded / current price (required)
    pub price: Decimal,

    /// Absolute change since previous close
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<Decimal>,

    /// Percent change since previous close
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<Decimal>,

    /// Trading volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,

    /// Day high
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_high: Option<Decimal>,

    /// Day low
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_low: Option<Decimal>,

    /// Opening price
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<Decimal>,

    /// Previous close
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_close: Option<Decimal>,

    /// Provider that produced the quote (e.g., "BYBIT", "FINNHUB")
    pub provider: String,

    /// Provider-specific extras (base/quote coin, region, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl QuoteRecord {
    /// Create a quote with the minimal required fields.
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        price: Decimal,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            price,
            change: None,
            change_percent: None,
            volume: None,
            day_high: None,
            day_low: None,
            open: None,
            previous_close: None,
            provider: provider.into(),
            metadata: HashMap::new(),
        }
    }

    /// Check the record against the uniform data invariants.
    ///
    /// Price, volume and the OHLC fields must be non-negative when
    /// present. A record that fails here is treated as a malformed
    /// upstream payload, never silently repaired.
    pub fn validate(&self) -> Result<(), MarketDataError> {
        if self.price.is_sign_negative() {
            return Err(MarketDataError::Upstream {
                provider: self.provider.clone(),
                message: format!("negative price {} for {}", self.price, self.symbol),
            });
        }

        let non_negative = [
            ("volume", &self.volume),
            ("dayHigh", &self.day_high),
            ("dayLow", &self.day_low),
            ("open", &self.open),
            ("previousClose", &self.previous_close),
        ];
        for (field, value) in non_negative {
            if let Some(v) = value {
                if v.is_sign_negative() {
                    return Err(MarketDataError::Upstream {
                        provider: self.provider.clone(),
                        message: format!("negative {} {} for {}", field, v, self.symbol),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_new_leaves_optionals_absent() {
        let quote = QuoteRecord::new("AAPL", Utc::now(), dec!(150.25), "FINNHUB");
        assert_eq!(quote.price, dec!(150.25));
        assert!(quote.volume.is_none());
        assert!(quote.previous_close.is_none());
        assert!(quote.metadata.is_empty());
    }

    #[test]
    fn test_validate_accepts_non_negative() {
        let mut quote = QuoteRecord::new("BTCUSDT", Utc::now(), dec!(65000), "BYBIT");
        quote.volume = Some(dec!(1234.5));
        quote.day_high = Some(dec!(66000));
        quote.day_low = Some(dec!(64000));
        assert!(quote.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_price() {
        let quote = QuoteRecord::new("AAPL", Utc::now(), dec!(-1), "FINNHUB");
        assert!(quote.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_volume() {
        let mut quote = QuoteRecord::new("AAPL", Utc::now(), dec!(150), "FINNHUB");
        quote.volume = Some(dec!(-10));
        assert!(quote.validate().is_err());
    }

    #[test]
    fn test_serialized_field_names_are_camel_case() {
        let mut quote = QuoteRecord::new("AAPL", Utc::now(), dec!(150), "FINNHUB");
        quote.change_percent = Some(dec!(1.5));
        quote.previous_close = Some(dec!(148));

        let json = serde_json::to_value(&quote).unwrap();
        assert!(json.get("changePercent").is_some());
        assert!(json.get("previousClose").is_some());
        // Absent optionals are omitted, not zeroed
        assert!(json.get("dayHigh").is_none());
    }
}
