//! Error types and failover classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`RetryClass`]: Classification for determining failover behavior
//! - [`ProviderFailure`]: One provider's failure reason inside an
//!   exhausted aggregation

mod retry;

pub use retry::RetryClass;

use thiserror::Error;

/// One provider's failure reason, carried by
/// [`MarketDataError::AllProvidersExhausted`] for diagnostics.
#[derive(Clone, Debug)]
pub struct ProviderFailure {
    /// The provider that failed or was skipped
    pub provider: String,
    /// Human-readable reason
    pub reason: String,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur during market data operations.
///
/// Each variant is classified into a [`RetryClass`] via the
/// [`retry_class`](Self::retry_class) method, which determines how the
/// aggregator handles the error. Only `AllProvidersExhausted` is ever
/// surfaced to callers; everything else is recorded per-provider and
/// failed over.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The requested symbol was not found by the provider.
    /// Another provider may still know it; no health penalty.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The provider does not implement this operation.
    /// Reported instead of panicking so the aggregator can skip it.
    #[error("Operation '{operation}' not supported by {provider}")]
    NotSupported {
        /// The operation that was requested
        operation: String,
        /// The provider that doesn't support it
        provider: String,
    },

    /// A failed or malformed response from one provider.
    /// Recorded against that provider's circuit breaker.
    #[error("Upstream error: {provider} - {message}")]
    Upstream {
        /// The provider that returned the error
        provider: String,
        /// What went wrong
        message: String,
    },

    /// The request to the provider timed out.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// The provider rate limited the request (HTTP 429).
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
    },

    /// The circuit breaker is open for this provider.
    /// Skip this provider until the circuit closes.
    #[error("Circuit open: {provider}")]
    CircuitOpen {
        /// The provider with an open circuit
        provider: String,
    },

    /// Every eligible provider failed or was circuit-open.
    /// The only error surfaced to callers; carries the per-provider
    /// failure reasons for diagnostics.
    #[error("All providers exhausted: {}", join_failures(.failures))]
    AllProvidersExhausted {
        /// Per-provider failure reasons, in attempt order
        failures: Vec<ProviderFailure>,
    },
}

impl MarketDataError {
    /// Returns the failover classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use nexustrade_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::Timeout { provider: "BYBIT".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
    ///
    /// let error = MarketDataError::SymbolNotFound("NOPE".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::NextProvider);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            // Upstream health problems - penalize and fail over
            Self::Upstream { .. } | Self::Timeout { .. } | Self::RateLimited { .. } => {
                RetryClass::FailoverWithPenalty
            }

            // This provider can't serve the request - fail over silently
            Self::SymbolNotFound(_) | Self::NotSupported { .. } => RetryClass::NextProvider,

            // Circuit breaker open
            Self::CircuitOpen { .. } => RetryClass::CircuitOpen,

            // Exhausted all options
            Self::AllProvidersExhausted { .. } => RetryClass::Terminal,
        }
    }

    /// The provider this error is attributed to, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Upstream { provider, .. }
            | Self::Timeout { provider }
            | Self::RateLimited { provider }
            | Self::CircuitOpen { provider }
            | Self::NotSupported { provider, .. } => Some(provider),
            Self::SymbolNotFound(_) | Self::AllProvidersExhausted { .. } => None,
        }
    }
}
