//! NexusTrade Market Data Crate
//!
//! This crate unifies several external financial-data sources (crypto
//! exchange APIs, equity-quote APIs) behind one interface, protecting
//! each upstream from overload and protecting callers from upstream
//! flakiness.
//!
//! # Overview
//!
//! The market data crate supports:
//! - Multiple providers: Bybit, Yahoo Finance, Polygon, Finnhub,
//!   Alpha Vantage
//! - Per-provider rate limiting and circuit breaking
//! - Short-lived quote and symbol-universe caching
//! - Priority-ordered failover with provenance tagging
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |      Caller      |  (per-symbol request/response)
//! +------------------+
//!          |
//!          v
//! +------------------+     +--------------------+
//! |    Aggregator    | --> | TelemetryReporter  |  (counters/histograms/gauges)
//! +------------------+     +--------------------+
//!          |
//!          v
//! +------------------+
//! | ProviderRegistry |  (rate limits, circuits, caches)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |     Provider     |  (Bybit, Yahoo, Polygon, ...)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |   QuoteRecord    |  (uniform market data)
//! +------------------+
//! ```
//!
//! Per provider, the aggregator applies a fixed gate order: circuit
//! breaker, rate limiter, cache, upstream call. Failures are recorded
//! per provider and failed over; only when every eligible provider
//! fails does the caller see an error, and that error carries each
//! provider's failure reason.
//!
//! # Core Types
//!
//! - [`QuoteRecord`] - Uniform quote with nullable OHLC/change fields
//! - [`SymbolResult`] - Uniform symbol row from search or listing
//! - [`AggregationResult`] - Payload plus provenance (`primary`/`fallback`)
//! - [`ProviderDescriptor`] - Immutable identity card per provider
//! - [`MarketDataError`] - Error taxonomy with failover classification

pub mod aggregator;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;
pub mod telemetry;

// Re-export all public types from models
pub use models::{
    AggregationResult, DataQuality, ProviderDescriptor, ProviderId, QuoteRecord, SymbolResult,
};

// Re-export error types
pub use errors::{MarketDataError, ProviderFailure, RetryClass};

// Re-export provider types
pub use provider::alpha_vantage::AlphaVantageProvider;
pub use provider::bybit::BybitProvider;
pub use provider::finnhub::FinnhubProvider;
pub use provider::polygon::PolygonProvider;
pub use provider::yahoo::YahooProvider;
pub use provider::{MarketDataProvider, ProviderCapabilities};

// Re-export registry types
pub use registry::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ProviderRegistry, RateLimiter,
    RegistryConfig, TtlCache,
};

// Re-export aggregation entry points
pub use aggregator::{Aggregator, ProviderHealth};
pub use telemetry::{NoopTelemetry, PrometheusTelemetry, RequestStatus, TelemetryReporter};
