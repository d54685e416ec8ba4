//! Provider registry: the owned home of all per-provider state.
//!
//! Holds the priority-ordered adapters together with the rate limiter,
//! circuit breaker, and caches that protect them. Everything here is
//! constructed once at startup and lives for the process lifetime; the
//! aggregator borrows it by handle instead of reaching for globals.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, RateLimiter, TtlCache};
use crate::models::{ProviderDescriptor, ProviderId, QuoteRecord, SymbolResult};
use crate::provider::MarketDataProvider;

/// Default lifetime of a cached quote.
const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(10);

/// Default lifetime of a cached symbol universe.
const DEFAULT_SYMBOL_TTL: Duration = Duration::from_secs(5 * 60);

/// Registry construction parameters.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// How long a fetched quote stays servable from cache.
    pub quote_ttl: Duration,
    /// How long a provider's symbol universe stays servable from cache.
    pub symbol_ttl: Duration,
    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            quote_ttl: DEFAULT_QUOTE_TTL,
            symbol_ttl: DEFAULT_SYMBOL_TTL,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Cache key for a quote: (provider id, symbol).
pub type QuoteKey = (String, String);

/// Owns the ordered provider set and their protective state.
pub struct ProviderRegistry {
    /// Adapters sorted by ascending priority rank.
    providers: Vec<Arc<dyn MarketDataProvider>>,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    quote_cache: TtlCache<QuoteKey, QuoteRecord>,
    symbol_cache: TtlCache<String, Vec<SymbolResult>>,
}

impl ProviderRegistry {
    /// Create a registry with default configuration.
    pub fn new(providers: Vec<Arc<dyn MarketDataProvider>>) -> Self {
        Self::with_config(providers, RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    ///
    /// Sorts the adapters by priority and configures the rate limiter
    /// from each adapter's declared minimum interval.
    pub fn with_config(
        mut providers: Vec<Arc<dyn MarketDataProvider>>,
        config: RegistryConfig,
    ) -> Self {
        providers.sort_by_key(|p| p.priority());

        let rate_limiter = RateLimiter::new();
        for provider in &providers {
            let descriptor = provider.descriptor();
            let provider_id: ProviderId = descriptor.id.into();
            rate_limiter.configure(&provider_id, descriptor.min_interval);
            info!(
                "Registered provider '{}' (priority {}, min interval {:?})",
                descriptor.id, descriptor.priority, descriptor.min_interval
            );
        }

        Self {
            providers,
            rate_limiter,
            circuit_breaker: CircuitBreaker::with_config(config.circuit_breaker),
            quote_cache: TtlCache::new(config.quote_ttl),
            symbol_cache: TtlCache::new(config.symbol_ttl),
        }
    }

    /// Registered providers, in priority order.
    pub fn providers(&self) -> &[Arc<dyn MarketDataProvider>] {
        &self.providers
    }

    /// Look up a provider by id.
    pub fn provider(&self, id: &str) -> Option<&Arc<dyn MarketDataProvider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// Identity cards for all registered providers.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.providers.iter().map(|p| p.descriptor()).collect()
    }

    /// The shared rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// The shared circuit breaker.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// The (provider, symbol) quote cache.
    pub fn quote_cache(&self) -> &TtlCache<QuoteKey, QuoteRecord> {
        &self.quote_cache
    }

    /// The per-provider symbol-universe cache.
    pub fn symbol_cache(&self) -> &TtlCache<String, Vec<SymbolResult>> {
        &self.symbol_cache
    }

    /// Drop a cached quote explicitly.
    pub fn invalidate_quote(&self, provider_id: &str, symbol: &str) {
        self.quote_cache
            .invalidate(&(provider_id.to_string(), symbol.to_string()));
    }

    /// Reset a provider's circuit breaker to Closed.
    pub fn reset_circuit(&self, provider_id: &ProviderId) {
        self.circuit_breaker.reset(provider_id);
    }

    /// Snapshot of every tracked circuit.
    pub fn circuit_metrics(&self) -> Vec<CircuitMetrics> {
        self.circuit_breaker.metrics()
    }
}
