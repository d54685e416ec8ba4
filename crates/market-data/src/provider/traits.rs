//! Market data provider trait definitions.
//!
//! This module defines the core `MarketDataProvider` trait that all
//! market data providers must implement.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::{ProviderDescriptor, QuoteRecord, SymbolResult};

use super::capabilities::ProviderCapabilities;

/// Trait for market data providers.
///
/// Implement this trait to add support for a new upstream source. Each
/// operation is independently optional: the default implementations of
/// `search_symbols` and `list_symbols` report `NotSupported`, and the
/// declared [`ProviderCapabilities`] let the aggregator skip them
/// without making the call.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use nexustrade_market_data::provider::{MarketDataProvider, ProviderCapabilities};
///
/// struct MyProvider {
///     api_key: String,
/// }
///
/// #[async_trait]
/// impl MarketDataProvider for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn display_name(&self) -> &'static str {
///         "My Provider"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities::quote_and_search()
///     }
///
///     fn min_interval(&self) -> Duration {
///         Duration::from_millis(500)
///     }
///
///     // ... implement get_quote and health_check
/// }
/// ```
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "BYBIT", "ALPHA_VANTAGE", etc.
    /// Used for logging, circuit breaker tracking, and caching keys.
    fn id(&self) -> &'static str;

    /// Human-readable name for display and diagnostics.
    fn display_name(&self) -> &'static str;

    /// Provider priority for ordering.
    ///
    /// Lower values = higher priority. Default is 10.
    fn priority(&self) -> u8 {
        10
    }

    /// Describes what this provider can do.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Minimum spacing between two requests to this upstream.
    ///
    /// Enforced by the registry's rate limiter; the provider itself
    /// never sleeps.
    fn min_interval(&self) -> Duration;

    /// Immutable identity card, assembled from the accessors above.
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            id: self.id(),
            display_name: self.display_name(),
            min_interval: self.min_interval(),
            priority: self.priority(),
            capabilities: self.capabilities(),
        }
    }

    /// Fetch the latest quote for a symbol.
    ///
    /// Fails with an upstream error on non-2xx responses, timeouts, or
    /// malformed payloads. Absent numeric fields stay `None` in the
    /// returned record; they are never defaulted to zero.
    async fn get_quote(&self, symbol: &str) -> Result<QuoteRecord, MarketDataError>;

    /// Search for symbols matching the query.
    ///
    /// Case-insensitive match against symbol and name, truncated to
    /// `limit`. Default implementation reports `NotSupported`.
    async fn search_symbols(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SymbolResult>, MarketDataError> {
        let _ = (query, limit);
        Err(MarketDataError::NotSupported {
            operation: "searchSymbols".to_string(),
            provider: self.id().to_string(),
        })
    }

    /// List the provider's full symbol universe.
    ///
    /// Comparatively expensive and slow-changing; the registry caches
    /// it for minutes. Default implementation reports `NotSupported`.
    async fn list_symbols(&self) -> Result<Vec<SymbolResult>, MarketDataError> {
        Err(MarketDataError::NotSupported {
            operation: "listSymbols".to_string(),
            provider: self.id().to_string(),
        })
    }

    /// Lightweight upstream reachability probe.
    ///
    /// Used for startup diagnostics, not for gating ordinary traffic;
    /// independent of the circuit breaker.
    async fn health_check(&self) -> bool;
}
