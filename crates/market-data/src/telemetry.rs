//! Telemetry boundary.
//!
//! The aggregator emits request counts, call durations, and circuit
//! state changes through the [`TelemetryReporter`] trait. The metrics
//! registry itself belongs to the host application: the Prometheus
//! implementation registers its collectors into a registry the caller
//! provides and never owns one.

use std::time::Duration;

use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

use crate::registry::CircuitState;

/// Outcome label for a provider call attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestStatus {
    Success,
    Failure,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "error",
        }
    }
}

/// Numeric encoding of a circuit state for the state gauge:
/// 0 = closed, 1 = open, 2 = half-open.
fn circuit_state_value(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    }
}

/// Sink for the aggregator's observability signals.
pub trait TelemetryReporter: Send + Sync {
    /// One provider call attempt finished with the given status.
    fn record_request(&self, provider: &str, status: RequestStatus);

    /// Wall-clock duration of one provider call attempt.
    fn record_duration(&self, provider: &str, elapsed: Duration);

    /// A provider's circuit breaker changed state.
    fn record_circuit_state(&self, provider: &str, state: CircuitState);
}

/// Reporter that drops everything. The default when the host doesn't
/// wire up metrics.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl TelemetryReporter for NoopTelemetry {
    fn record_request(&self, _provider: &str, _status: RequestStatus) {}

    fn record_duration(&self, _provider: &str, _elapsed: Duration) {}

    fn record_circuit_state(&self, _provider: &str, _state: CircuitState) {}
}

/// Prometheus-backed reporter.
///
/// Registers a request counter keyed by (provider, status), a duration
/// histogram keyed by provider, and a circuit-state gauge keyed by
/// provider into the caller's registry.
pub struct PrometheusTelemetry {
    requests: CounterVec,
    durations: HistogramVec,
    circuit_state: GaugeVec,
}

impl PrometheusTelemetry {
    /// Build the collectors and register them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = CounterVec::new(
            Opts::new(
                "marketdata_provider_requests_total",
                "Provider call attempts by outcome",
            ),
            &["provider", "status"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let durations = HistogramVec::new(
            HistogramOpts::new(
                "marketdata_provider_request_duration_ms",
                "Provider call duration in milliseconds",
            )
            .buckets(vec![
                10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
            ]),
            &["provider"],
        )?;
        registry.register(Box::new(durations.clone()))?;

        let circuit_state = GaugeVec::new(
            Opts::new(
                "marketdata_provider_circuit_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["provider"],
        )?;
        registry.register(Box::new(circuit_state.clone()))?;

        Ok(Self {
            requests,
            durations,
            circuit_state,
        })
    }
}

impl TelemetryReporter for PrometheusTelemetry {
    fn record_request(&self, provider: &str, status: RequestStatus) {
        self.requests
            .with_label_values(&[provider, status.as_str()])
            .inc();
    }

    fn record_duration(&self, provider: &str, elapsed: Duration) {
        self.durations
            .with_label_values(&[provider])
            .observe(elapsed.as_secs_f64() * 1000.0);
    }

    fn record_circuit_state(&self, provider: &str, state: CircuitState) {
        self.circuit_state
            .with_label_values(&[provider])
            .set(circuit_state_value(state));
    }
}
