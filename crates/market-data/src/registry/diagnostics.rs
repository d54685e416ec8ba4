//! Attempt tracking for aggregation diagnostics.
//!
//! The aggregator walks providers in priority order; this log records
//! what happened to each one so an exhausted aggregation can report
//! every provider's failure reason instead of only the last error.

use crate::errors::ProviderFailure;
use crate::models::ProviderId;

/// Why a provider was skipped without an upstream call.
#[derive(Clone, Debug)]
pub enum SkipReason {
    /// Circuit breaker is open for this provider.
    CircuitOpen,

    /// Provider doesn't implement the requested operation.
    NotSupported,
}

impl SkipReason {
    fn describe(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit open",
            Self::NotSupported => "operation not supported",
        }
    }
}

/// Record of a single provider attempt during an aggregation.
#[derive(Clone, Debug)]
pub struct ProviderAttempt {
    pub provider_id: ProviderId,
    pub skipped: Option<SkipReason>,
    pub error: Option<String>,
    pub success: bool,
}

/// Ordered log of every provider touched by one aggregation.
#[derive(Clone, Debug, Default)]
pub struct AttemptLog {
    pub attempts: Vec<ProviderAttempt>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }

    pub fn record_skip(&mut self, provider_id: ProviderId, reason: SkipReason) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: Some(reason),
            error: None,
            success: false,
        });
    }

    pub fn record_error(&mut self, provider_id: ProviderId, error: String) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: None,
            error: Some(error),
            success: false,
        });
    }

    pub fn record_success(&mut self, provider_id: ProviderId) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: None,
            error: None,
            success: true,
        });
    }

    /// Summary for logging.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                if a.success {
                    format!("{}: SUCCESS", a.provider_id)
                } else if let Some(skip) = &a.skipped {
                    format!("{}: SKIPPED ({})", a.provider_id, skip.describe())
                } else if let Some(err) = &a.error {
                    format!("{}: ERROR ({})", a.provider_id, err)
                } else {
                    format!("{}: UNKNOWN", a.provider_id)
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Check if any provider succeeded.
    pub fn has_success(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    /// Convert the non-successful attempts into the failure list
    /// carried by `AllProvidersExhausted`.
    pub fn into_failures(self) -> Vec<ProviderFailure> {
        self.attempts
            .into_iter()
            .filter(|a| !a.success)
            .map(|a| {
                let reason = match (a.skipped, a.error) {
                    (Some(skip), _) => skip.describe().to_string(),
                    (None, Some(err)) => err,
                    (None, None) => "unknown".to_string(),
                };
                ProviderFailure {
                    provider: a.provider_id.to_string(),
                    reason,
                }
            })
            .collect()
    }
}
