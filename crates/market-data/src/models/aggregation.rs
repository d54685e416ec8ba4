//! Aggregation result wrapper with provenance.

use serde::{Deserialize, Serialize};

/// Whether the answer came from the first-priority provider for the
/// operation or from a lower-priority substitute.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    Primary,
    Fallback,
}

impl std::fmt::Display for DataQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Uniform result envelope returned by the aggregator.
///
/// Wraps the payload (a quote or a symbol list) together with the name
/// of the provider that actually answered and the provenance tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult<T> {
    /// The payload
    pub data: T,

    /// Provider the payload came from
    pub provider: String,

    /// Provenance tag
    pub data_quality: DataQuality,
}

impl<T> AggregationResult<T> {
    pub fn new(data: T, provider: impl Into<String>, data_quality: DataQuality) -> Self {
        Self {
            data,
            provider: provider.into(),
            data_quality,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.data_quality == DataQuality::Fallback
    }
}
