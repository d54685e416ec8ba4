//! Provider capability flags.
//!
//! Not every upstream supports every operation; the aggregator uses
//! these flags to skip providers statically instead of probing them
//! with calls that would only come back `NotSupported`.

/// Describes which operations a market data provider implements.
#[derive(Clone, Copy, Debug)]
pub struct ProviderCapabilities {
    /// Whether the provider can serve live quotes.
    pub supports_quote: bool,

    /// Whether the provider supports symbol search.
    pub supports_search: bool,

    /// Whether the provider can list its full symbol universe.
    pub supports_symbol_list: bool,
}

impl ProviderCapabilities {
    /// Quote + search, no universe listing (the common REST vendor shape).
    pub const fn quote_and_search() -> Self {
        Self {
            supports_quote: true,
            supports_search: true,
            supports_symbol_list: false,
        }
    }

    /// Everything, including the symbol universe.
    pub const fn full() -> Self {
        Self {
            supports_quote: true,
            supports_search: true,
            supports_symbol_list: true,
        }
    }
}
