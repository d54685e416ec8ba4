//! Market data provider abstractions and implementations.
//!
//! This module contains:
//! - The `MarketDataProvider` trait that all providers implement
//! - Provider capability flags
//! - Concrete provider implementations (Bybit, Yahoo, Polygon, ...)
//!
//! # Architecture
//!
//! The provider system is designed to be:
//! - **Provider-agnostic**: The core system doesn't know about specific providers
//! - **Extensible**: New providers can be added by implementing `MarketDataProvider`
//! - **Resilient**: Rate limiting and circuit breakers protect against provider failures
//!
//! Each concrete adapter owns its base endpoint, request shaping, and
//! the mapping of its wire format into the uniform `QuoteRecord` and
//! `SymbolResult` shapes.

mod capabilities;
mod traits;

// Provider implementations
pub mod alpha_vantage;
pub mod bybit;
pub mod finnhub;
pub mod polygon;
pub mod yahoo;

// Re-exports
pub use capabilities::ProviderCapabilities;
pub use traits::MarketDataProvider;
