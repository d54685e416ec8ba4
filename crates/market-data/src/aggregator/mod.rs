//! Aggregation across the provider registry.
//!
//! The aggregator walks providers in priority order, applying the
//! gates in a fixed sequence per provider: circuit breaker, rate
//! limiter, cache, then the upstream call. Individual provider
//! failures never abort an aggregation; the full priority list is
//! attempted before the request fails, and every attempt's outcome is
//! recorded so an exhausted aggregation can explain itself.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;

use crate::errors::MarketDataError;
use crate::models::{AggregationResult, DataQuality, ProviderId, QuoteRecord, SymbolResult};
use crate::provider::MarketDataProvider;
use crate::registry::{AttemptLog, CircuitCheck, CircuitState, ProviderRegistry, SkipReason};
use crate::telemetry::{NoopTelemetry, RequestStatus, TelemetryReporter};

/// Result of one provider's reachability probe.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: String,
    pub display_name: String,
    pub healthy: bool,
}

/// Orchestrates market data requests across the registry.
///
/// Holds the registry and the telemetry sink by handle; all
/// per-provider mutable state (limits, circuits, caches) lives in the
/// registry.
pub struct Aggregator {
    registry: Arc<ProviderRegistry>,
    telemetry: Arc<dyn TelemetryReporter>,
}

impl Aggregator {
    /// Create an aggregator with no telemetry sink.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self::with_telemetry(registry, Arc::new(NoopTelemetry))
    }

    /// Create an aggregator that reports into the given sink.
    pub fn with_telemetry(
        registry: Arc<ProviderRegistry>,
        telemetry: Arc<dyn TelemetryReporter>,
    ) -> Self {
        Self {
            registry,
            telemetry,
        }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Forward a circuit transition to the telemetry sink.
    fn emit_transition(&self, provider: &str, transition: Option<CircuitState>) {
        if let Some(state) = transition {
            self.telemetry.record_circuit_state(provider, state);
        }
    }

    /// Fetch a quote with priority-ordered failover.
    ///
    /// Per provider: circuit gate, rate-limit wait, cache lookup, then
    /// the upstream call. A cache hit returns immediately; a fetched
    /// quote is validated, recorded into the breaker, cached, and
    /// returned tagged with provenance. On failure the next provider
    /// is tried; when the list is exhausted the accumulated failure
    /// reasons are surfaced.
    pub async fn get_quote(
        &self,
        symbol: &str,
    ) -> Result<AggregationResult<QuoteRecord>, MarketDataError> {
        let eligible: Vec<&Arc<dyn MarketDataProvider>> = self
            .registry
            .providers()
            .iter()
            .filter(|p| p.capabilities().supports_quote)
            .collect();

        if eligible.is_empty() {
            warn!("No quote-capable providers registered");
            return Err(MarketDataError::AllProvidersExhausted { failures: vec![] });
        }

        let primary_id = eligible[0].id();
        let breaker = self.registry.circuit_breaker();
        let mut log = AttemptLog::new();

        for provider in eligible {
            let provider_id: ProviderId = Cow::Borrowed(provider.id());

            let trial = match breaker.check(&provider_id) {
                CircuitCheck::Rejected => {
                    debug!(
                        "Circuit breaker open for provider '{}', skipping",
                        provider_id
                    );
                    log.record_skip(provider_id, SkipReason::CircuitOpen);
                    continue;
                }
                CircuitCheck::Proceed { transition, trial } => {
                    self.emit_transition(provider.id(), transition);
                    trial
                }
            };

            self.registry.rate_limiter().acquire(&provider_id).await;

            let key = (provider.id().to_string(), symbol.to_string());
            if let Some(cached) = self.registry.quote_cache().get(&key) {
                debug!(
                    "Serving {} from cache for provider '{}'",
                    symbol, provider_id
                );
                if trial {
                    breaker.cancel_trial(&provider_id);
                }
                let quality = quality_for(provider.id(), primary_id);
                return Ok(AggregationResult::new(cached, provider.id(), quality));
            }

            let start = Instant::now();
            let outcome = provider.get_quote(symbol).await.and_then(|quote| {
                quote.validate()?;
                Ok(quote)
            });
            self.telemetry.record_duration(provider.id(), start.elapsed());

            match outcome {
                Ok(quote) => {
                    self.telemetry
                        .record_request(provider.id(), RequestStatus::Success);
                    let transition = breaker.record_success(&provider_id);
                    self.emit_transition(provider.id(), transition);

                    self.registry.quote_cache().put(key, quote.clone());

                    let quality = quality_for(provider.id(), primary_id);
                    info!(
                        "Quote for {} served by '{}' ({})",
                        symbol, provider_id, quality
                    );
                    return Ok(AggregationResult::new(quote, provider.id(), quality));
                }
                Err(e) => {
                    self.telemetry
                        .record_request(provider.id(), RequestStatus::Failure);
                    if e.retry_class().penalizes() {
                        let transition = breaker.record_failure(&provider_id);
                        self.emit_transition(provider.id(), transition);
                        warn!("Provider '{}' failed for {}: {}", provider_id, symbol, e);
                    } else {
                        if trial {
                            breaker.cancel_trial(&provider_id);
                        }
                        debug!(
                            "Provider '{}' cannot serve {}: {}, trying next",
                            provider_id, symbol, e
                        );
                    }
                    log.record_error(provider_id, e.to_string());
                }
            }
        }

        warn!(
            "All providers exhausted for {}: {}",
            symbol,
            log.summary()
        );
        Err(MarketDataError::AllProvidersExhausted {
            failures: log.into_failures(),
        })
    }

    /// Search all eligible providers concurrently and merge.
    ///
    /// Providers whose circuit is open or that don't support search
    /// are skipped; a failing provider is dropped from the merge. The
    /// merged results keep priority order, deduplicate so each symbol
    /// appears once (the highest-priority provider's row wins), and
    /// truncate to `limit`. Only when every eligible provider fails
    /// does the search fail.
    pub async fn search_symbols(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<AggregationResult<Vec<SymbolResult>>, MarketDataError> {
        let eligible: Vec<&Arc<dyn MarketDataProvider>> = self
            .registry
            .providers()
            .iter()
            .filter(|p| p.capabilities().supports_search)
            .collect();

        if eligible.is_empty() {
            warn!("No search-capable providers registered");
            return Err(MarketDataError::AllProvidersExhausted { failures: vec![] });
        }

        let primary_id = eligible[0].id();

        let tasks = eligible
            .iter()
            .map(|provider| self.search_one(provider, query, limit));
        let outcomes = join_all(tasks).await;

        let mut log = AttemptLog::new();
        let mut merged: Vec<SymbolResult> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut answering: Option<&'static str> = None;

        for (id, outcome) in outcomes {
            match outcome {
                Ok(results) => {
                    log.record_success(Cow::Borrowed(id));
                    answering.get_or_insert(id);
                    for result in results {
                        if seen.insert(result.symbol.clone()) {
                            merged.push(result);
                        }
                    }
                }
                Err(e) => match e {
                    MarketDataError::CircuitOpen { .. } => {
                        log.record_skip(Cow::Borrowed(id), SkipReason::CircuitOpen);
                    }
                    e => {
                        debug!("Dropping '{}' from search merge: {}", id, e);
                        log.record_error(Cow::Borrowed(id), e.to_string());
                    }
                },
            }
        }

        if !log.has_success() {
            warn!(
                "All providers exhausted searching '{}': {}",
                query,
                log.summary()
            );
            return Err(MarketDataError::AllProvidersExhausted {
                failures: log.into_failures(),
            });
        }

        merged.truncate(limit);

        let answering = answering.unwrap_or(primary_id);
        let quality = quality_for(answering, primary_id);
        Ok(AggregationResult::new(merged, answering, quality))
    }

    /// Run one provider's search through the gates.
    async fn search_one(
        &self,
        provider: &Arc<dyn MarketDataProvider>,
        query: &str,
        limit: usize,
    ) -> (&'static str, Result<Vec<SymbolResult>, MarketDataError>) {
        let provider_id: ProviderId = Cow::Borrowed(provider.id());
        let breaker = self.registry.circuit_breaker();

        match breaker.check(&provider_id) {
            CircuitCheck::Rejected => {
                return (
                    provider.id(),
                    Err(MarketDataError::CircuitOpen {
                        provider: provider.id().to_string(),
                    }),
                );
            }
            CircuitCheck::Proceed { transition, .. } => {
                self.emit_transition(provider.id(), transition);
            }
        }

        self.registry.rate_limiter().acquire(&provider_id).await;

        let start = Instant::now();
        let result = provider.search_symbols(query, limit).await;
        self.telemetry.record_duration(provider.id(), start.elapsed());

        match &result {
            Ok(_) => {
                self.telemetry
                    .record_request(provider.id(), RequestStatus::Success);
                let transition = breaker.record_success(&provider_id);
                self.emit_transition(provider.id(), transition);
            }
            Err(e) => {
                self.telemetry
                    .record_request(provider.id(), RequestStatus::Failure);
                if e.retry_class().penalizes() {
                    let transition = breaker.record_failure(&provider_id);
                    self.emit_transition(provider.id(), transition);
                }
            }
        }

        (provider.id(), result)
    }

    /// The symbol universe of one provider, served through the
    /// registry's symbol cache.
    pub async fn list_symbols(
        &self,
        provider_id: &str,
    ) -> Result<Vec<SymbolResult>, MarketDataError> {
        let provider = self.registry.provider(provider_id).ok_or_else(|| {
            MarketDataError::NotSupported {
                operation: "listSymbols".to_string(),
                provider: provider_id.to_string(),
            }
        })?;

        if !provider.capabilities().supports_symbol_list {
            return Err(MarketDataError::NotSupported {
                operation: "listSymbols".to_string(),
                provider: provider_id.to_string(),
            });
        }

        let id: ProviderId = Cow::Borrowed(provider.id());
        let breaker = self.registry.circuit_breaker();

        let trial = match breaker.check(&id) {
            CircuitCheck::Rejected => {
                return Err(MarketDataError::CircuitOpen {
                    provider: provider.id().to_string(),
                });
            }
            CircuitCheck::Proceed { transition, trial } => {
                self.emit_transition(provider.id(), transition);
                trial
            }
        };

        self.registry.rate_limiter().acquire(&id).await;

        let cache_key = provider.id().to_string();
        if let Some(cached) = self.registry.symbol_cache().get(&cache_key) {
            debug!("Serving symbol universe for '{}' from cache", id);
            if trial {
                breaker.cancel_trial(&id);
            }
            return Ok(cached);
        }

        let start = Instant::now();
        let result = provider.list_symbols().await;
        self.telemetry.record_duration(provider.id(), start.elapsed());

        match result {
            Ok(symbols) => {
                self.telemetry
                    .record_request(provider.id(), RequestStatus::Success);
                let transition = breaker.record_success(&id);
                self.emit_transition(provider.id(), transition);
                self.registry.symbol_cache().put(cache_key, symbols.clone());
                info!("Cached {} symbols for provider '{}'", symbols.len(), id);
                Ok(symbols)
            }
            Err(e) => {
                self.telemetry
                    .record_request(provider.id(), RequestStatus::Failure);
                if e.retry_class().penalizes() {
                    let transition = breaker.record_failure(&id);
                    self.emit_transition(provider.id(), transition);
                }
                Err(e)
            }
        }
    }

    /// Probe every registered provider concurrently.
    ///
    /// Bypasses the circuit breaker (the probe is diagnostics, not
    /// traffic) but still respects each provider's request spacing.
    pub async fn health_check_all(&self) -> Vec<ProviderHealth> {
        let tasks = self.registry.providers().iter().map(|provider| async {
            let provider_id: ProviderId = Cow::Borrowed(provider.id());
            self.registry.rate_limiter().acquire(&provider_id).await;
            let healthy = provider.health_check().await;
            ProviderHealth {
                provider: provider.id().to_string(),
                display_name: provider.display_name().to_string(),
                healthy,
            }
        });

        join_all(tasks).await
    }
}

/// Provenance: primary only when the answering provider is the head of
/// the priority-ordered capable list.
fn quality_for(answering: &str, primary_id: &str) -> DataQuality {
    if answering == primary_id {
        DataQuality::Primary
    } else {
        DataQuality::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderCapabilities;
    use crate::registry::{CircuitBreakerConfig, RegistryConfig};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockProvider {
        id: &'static str,
        priority: u8,
        should_fail: bool,
        symbols: Vec<&'static str>,
        capabilities: ProviderCapabilities,
        call_count: AtomicUsize,
    }

    impl MockProvider {
        fn new(id: &'static str, priority: u8, should_fail: bool) -> Self {
            Self {
                id,
                priority,
                should_fail,
                symbols: vec![],
                capabilities: ProviderCapabilities::full(),
                call_count: AtomicUsize::new(0),
            }
        }

        fn with_symbols(mut self, symbols: Vec<&'static str>) -> Self {
            self.symbols = symbols;
            self
        }

        fn quote_only(mut self) -> Self {
            self.capabilities = ProviderCapabilities {
                supports_quote: true,
                supports_search: false,
                supports_symbol_list: false,
            };
            self
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        fn display_name(&self) -> &'static str {
            self.id
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn capabilities(&self) -> ProviderCapabilities {
            self.capabilities
        }

        fn min_interval(&self) -> Duration {
            Duration::ZERO
        }

        async fn get_quote(&self, symbol: &str) -> Result<QuoteRecord, MarketDataError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                Err(MarketDataError::Timeout {
                    provider: self.id.to_string(),
                })
            } else {
                let mut quote = QuoteRecord::new(symbol, Utc::now(), dec!(100.5), self.id);
                quote.volume = Some(dec!(1000));
                Ok(quote)
            }
        }

        async fn search_symbols(
            &self,
            query: &str,
            limit: usize,
        ) -> Result<Vec<SymbolResult>, MarketDataError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                return Err(MarketDataError::Upstream {
                    provider: self.id.to_string(),
                    message: "search down".to_string(),
                });
            }
            Ok(self
                .symbols
                .iter()
                .filter(|s| s.to_lowercase().contains(&query.to_lowercase()))
                .take(limit)
                .map(|s| SymbolResult::new(*s, *s, "Cryptocurrency", "TEST", self.id))
                .collect())
        }

        async fn list_symbols(&self) -> Result<Vec<SymbolResult>, MarketDataError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                return Err(MarketDataError::Upstream {
                    provider: self.id.to_string(),
                    message: "listing down".to_string(),
                });
            }
            Ok(self
                .symbols
                .iter()
                .map(|s| SymbolResult::new(*s, *s, "Cryptocurrency", "TEST", self.id))
                .collect())
        }

        async fn health_check(&self) -> bool {
            !self.should_fail
        }
    }

    fn aggregator(providers: Vec<Arc<dyn MarketDataProvider>>) -> Aggregator {
        Aggregator::new(Arc::new(ProviderRegistry::new(providers)))
    }

    #[tokio::test]
    async fn test_primary_provider_answers_tagged_primary() {
        let agg = aggregator(vec![
            Arc::new(MockProvider::new("PRIMARY", 1, false)),
            Arc::new(MockProvider::new("BACKUP", 2, false)),
        ]);

        let result = agg.get_quote("BTCUSDT").await.unwrap();
        assert_eq!(result.provider, "PRIMARY");
        assert_eq!(result.data_quality, DataQuality::Primary);
        assert_eq!(result.data.symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn test_failover_is_tagged_fallback_and_counts_failure() {
        let bybit = Arc::new(MockProvider::new("BYBIT", 1, true));
        let alpha = Arc::new(MockProvider::new("ALPHA_VANTAGE", 2, false));
        let agg = aggregator(vec![bybit.clone(), alpha.clone()]);

        let result = agg.get_quote("BTCUSDT").await.unwrap();
        assert_eq!(result.provider, "ALPHA_VANTAGE");
        assert_eq!(result.data_quality, DataQuality::Fallback);

        // The failing provider's breaker counted exactly one failure
        let provider_id: ProviderId = Cow::Borrowed("BYBIT");
        assert_eq!(agg.registry().circuit_breaker().failure_count(&provider_id), 1);
        assert_eq!(bybit.calls(), 1);
        assert_eq!(alpha.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_exhausted_carries_every_failure_reason() {
        let failing = Arc::new(MockProvider::new("FAILING", 1, true));
        let open = Arc::new(MockProvider::new("OPEN", 2, false));
        let agg = aggregator(vec![failing, open.clone()]);

        // Open the second provider's circuit up front
        let open_id: ProviderId = Cow::Borrowed("OPEN");
        for _ in 0..3 {
            agg.registry().circuit_breaker().record_failure(&open_id);
        }

        let err = agg.get_quote("BTCUSDT").await.unwrap_err();
        match err {
            MarketDataError::AllProvidersExhausted { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].provider, "FAILING");
                assert!(failures[0].reason.contains("Timeout"));
                assert_eq!(failures[1].provider, "OPEN");
                assert_eq!(failures[1].reason, "circuit open");
            }
            other => panic!("expected AllProvidersExhausted, got {:?}", other),
        }
        // The open provider was never called
        assert_eq!(open.calls(), 0);
    }

    #[tokio::test]
    async fn test_open_circuit_skipped_without_new_failure() {
        let primary = Arc::new(MockProvider::new("PRIMARY", 1, false));
        let agg = aggregator(vec![
            primary.clone(),
            Arc::new(MockProvider::new("BACKUP", 2, false)),
        ]);

        let primary_id: ProviderId = Cow::Borrowed("PRIMARY");
        for _ in 0..3 {
            agg.registry().circuit_breaker().record_failure(&primary_id);
        }

        let result = agg.get_quote("AAPL").await.unwrap();
        assert_eq!(result.provider, "BACKUP");
        assert_eq!(result.data_quality, DataQuality::Fallback);
        assert_eq!(primary.calls(), 0);
        // Skipping didn't add a failure
        assert_eq!(
            agg.registry().circuit_breaker().failure_count(&primary_id),
            3
        );
    }

    #[tokio::test]
    async fn test_quote_cache_hit_skips_upstream() {
        let provider = Arc::new(MockProvider::new("CACHED", 1, false));
        let agg = aggregator(vec![provider.clone()]);

        let first = agg.get_quote("BTCUSDT").await.unwrap();
        let second = agg.get_quote("BTCUSDT").await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(first.data.price, second.data.price);
        assert_eq!(second.data_quality, DataQuality::Primary);
    }

    #[tokio::test]
    async fn test_cache_is_per_symbol() {
        let provider = Arc::new(MockProvider::new("CACHED", 1, false));
        let agg = aggregator(vec![provider.clone()]);

        agg.get_quote("BTCUSDT").await.unwrap();
        agg.get_quote("ETHUSDT").await.unwrap();

        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_search_merges_and_dedups() {
        let a = Arc::new(MockProvider::new("A", 1, false).with_symbols(vec!["BTCUSDT"]));
        let b = Arc::new(
            MockProvider::new("B", 2, false).with_symbols(vec!["BTCUSDT", "ETHUSDT"]),
        );
        let agg = aggregator(vec![a, b]);

        let result = agg.search_symbols("usdt", 10).await.unwrap();
        let symbols: Vec<&str> = result.data.iter().map(|s| s.symbol.as_str()).collect();

        // Both symbols once each, the duplicate resolved to the
        // higher-priority provider
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
        let btc = &result.data[0];
        assert_eq!(btc.provider, "A");
        let eth = &result.data[1];
        assert_eq!(eth.provider, "B");
    }

    #[tokio::test]
    async fn test_search_drops_failing_provider() {
        let agg = aggregator(vec![
            Arc::new(MockProvider::new("DOWN", 1, true)),
            Arc::new(MockProvider::new("UP", 2, false).with_symbols(vec!["ETHUSDT"])),
        ]);

        let result = agg.search_symbols("eth", 10).await.unwrap();
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].provider, "UP");
        assert_eq!(result.data_quality, DataQuality::Fallback);

        // The failed search penalized the breaker
        let down_id: ProviderId = Cow::Borrowed("DOWN");
        assert_eq!(agg.registry().circuit_breaker().failure_count(&down_id), 1);
    }

    #[tokio::test]
    async fn test_search_all_failing_is_exhausted() {
        let agg = aggregator(vec![
            Arc::new(MockProvider::new("DOWN_A", 1, true)),
            Arc::new(MockProvider::new("DOWN_B", 2, true)),
        ]);

        let err = agg.search_symbols("btc", 10).await.unwrap_err();
        match err {
            MarketDataError::AllProvidersExhausted { failures } => {
                assert_eq!(failures.len(), 2);
            }
            other => panic!("expected AllProvidersExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_respects_limit() {
        let agg = aggregator(vec![Arc::new(
            MockProvider::new("A", 1, false).with_symbols(vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]),
        )]);

        let result = agg.search_symbols("usdt", 2).await.unwrap();
        assert_eq!(result.data.len(), 2);
    }

    #[tokio::test]
    async fn test_search_skips_quote_only_providers() {
        let quote_only = Arc::new(MockProvider::new("QUOTES", 1, false).quote_only());
        let searchable =
            Arc::new(MockProvider::new("SEARCH", 2, false).with_symbols(vec!["BTCUSDT"]));
        let agg = aggregator(vec![quote_only.clone(), searchable]);

        let result = agg.search_symbols("btc", 10).await.unwrap();
        assert_eq!(result.data.len(), 1);
        assert_eq!(quote_only.calls(), 0);
    }

    #[tokio::test]
    async fn test_list_symbols_cached() {
        let provider =
            Arc::new(MockProvider::new("UNIVERSE", 1, false).with_symbols(vec!["BTCUSDT"]));
        let agg = aggregator(vec![provider.clone()]);

        let first = agg.list_symbols("UNIVERSE").await.unwrap();
        let second = agg.list_symbols("UNIVERSE").await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_list_symbols_unknown_provider() {
        let agg = aggregator(vec![]);
        let err = agg.list_symbols("MISSING").await.unwrap_err();
        assert!(matches!(err, MarketDataError::NotSupported { .. }));
    }

    #[tokio::test]
    async fn test_list_symbols_unsupported_provider() {
        let agg = aggregator(vec![Arc::new(
            MockProvider::new("QUOTES", 1, false).quote_only(),
        )]);
        let err = agg.list_symbols("QUOTES").await.unwrap_err();
        assert!(matches!(err, MarketDataError::NotSupported { .. }));
    }

    #[tokio::test]
    async fn test_health_check_all() {
        let agg = aggregator(vec![
            Arc::new(MockProvider::new("UP", 1, false)),
            Arc::new(MockProvider::new("DOWN", 2, true)),
        ]);

        let statuses = agg.health_check_all().await;
        assert_eq!(statuses.len(), 2);
        let up = statuses.iter().find(|s| s.provider == "UP").unwrap();
        let down = statuses.iter().find(|s| s.provider == "DOWN").unwrap();
        assert!(up.healthy);
        assert!(!down.healthy);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_repeated_aggregations() {
        let failing = Arc::new(MockProvider::new("FLAKY", 1, true));
        let backup = Arc::new(MockProvider::new("BACKUP", 2, false));
        let registry = Arc::new(ProviderRegistry::with_config(
            vec![failing.clone(), backup],
            RegistryConfig {
                // Quotes must not be served from cache across calls here
                quote_ttl: Duration::ZERO,
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: 3,
                    reset_timeout: Duration::from_secs(60),
                },
                ..Default::default()
            },
        ));
        let agg = Aggregator::new(registry);

        for _ in 0..4 {
            let result = agg.get_quote("AAPL").await.unwrap();
            assert_eq!(result.provider, "BACKUP");
        }

        // After three failures the circuit opened, so the fourth
        // aggregation skipped the flaky provider entirely
        assert_eq!(failing.calls(), 3);
        let flaky_id: ProviderId = Cow::Borrowed("FLAKY");
        assert_eq!(
            agg.registry().circuit_breaker().state(&flaky_id),
            CircuitState::Open
        );
    }

    #[tokio::test]
    async fn test_invalid_quote_is_failed_over() {
        struct NegativePriceProvider;

        #[async_trait]
        impl MarketDataProvider for NegativePriceProvider {
            fn id(&self) -> &'static str {
                "BROKEN"
            }
            fn display_name(&self) -> &'static str {
                "Broken"
            }
            fn priority(&self) -> u8 {
                1
            }
            fn capabilities(&self) -> ProviderCapabilities {
                ProviderCapabilities::quote_and_search()
            }
            fn min_interval(&self) -> Duration {
                Duration::ZERO
            }
            async fn get_quote(&self, symbol: &str) -> Result<QuoteRecord, MarketDataError> {
                Ok(QuoteRecord::new(symbol, Utc::now(), dec!(-5), "BROKEN"))
            }
            async fn health_check(&self) -> bool {
                true
            }
        }

        let agg = aggregator(vec![
            Arc::new(NegativePriceProvider),
            Arc::new(MockProvider::new("GOOD", 2, false)),
        ]);

        let result = agg.get_quote("AAPL").await.unwrap();
        assert_eq!(result.provider, "GOOD");

        // A malformed payload counts as an upstream failure
        let broken_id: ProviderId = Cow::Borrowed("BROKEN");
        assert_eq!(
            agg.registry().circuit_breaker().failure_count(&broken_id),
            1
        );
    }
}
