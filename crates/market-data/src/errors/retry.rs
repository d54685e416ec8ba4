/// Classification for failover policy.
///
/// Used to determine how the aggregation loop should respond to errors
/// from providers.
///
/// # Behavior Summary
///
/// | Class | Try Next Provider? | Record Circuit Breaker Failure? |
/// |-------|-------------------|--------------------------------|
/// | `FailoverWithPenalty` | Yes | Yes (affects future requests) |
/// | `NextProvider` | Yes | No |
/// | `CircuitOpen` | Yes (skip this one) | No (already recorded) |
/// | `Terminal` | No | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Failover to the next provider and record a circuit breaker penalty.
    ///
    /// Used for upstream failures: bad responses, timeouts, upstream
    /// rate limiting (429). Enough of these in a row opens the circuit
    /// and temporarily excludes the provider from the pool.
    FailoverWithPenalty,

    /// Try the next provider without recording any penalty.
    ///
    /// Used when this provider can't serve the request (unknown symbol,
    /// unsupported operation) but another provider might. Not a health
    /// signal, so the circuit breaker is left alone.
    NextProvider,

    /// Circuit breaker is open for this provider.
    /// Skip it without counting a new failure.
    CircuitOpen,

    /// The aggregation itself failed; there is no next provider.
    Terminal,
}

impl RetryClass {
    /// Whether this failure counts against the provider's circuit.
    pub fn penalizes(self) -> bool {
        matches!(self, Self::FailoverWithPenalty)
    }
}
