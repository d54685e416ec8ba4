//! Provider identity card.

use std::time::Duration;

use crate::provider::ProviderCapabilities;

/// Immutable description of a registered provider.
///
/// Assembled once from the provider's trait accessors when the registry
/// is constructed; used to configure the rate limiter and to label
/// diagnostics. Never mutated after registration.
#[derive(Clone, Debug)]
pub struct ProviderDescriptor {
    /// Unique provider key (e.g., "BYBIT")
    pub id: &'static str,

    /// Human-readable name (e.g., "Bybit")
    pub display_name: &'static str,

    /// Minimum spacing between two requests to this provider
    pub min_interval: Duration,

    /// Ordering rank; lower values are tried first
    pub priority: u8,

    /// Operations this provider supports
    pub capabilities: ProviderCapabilities,
}
