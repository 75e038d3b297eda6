//! Error handling foundation for vouch.
//!
//! Each crate defines its own domain errors. Collaborator seams (session
//! storage, the correlation store, the provider exchange) return them wrapped
//! in a rootcause `Report` through this alias, so callers can attach context
//! as errors propagate.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
