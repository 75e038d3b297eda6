//! Error types for the correlation crate.
//!
//! Errors are designed for layered context using rootcause. Absence of a
//! ticket is never an error: `consume_once` returns `None` for missing,
//! expired and already-consumed tickets alike.

use std::fmt;

/// Errors from a correlation store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the operation.
    Unavailable { reason: String },
    /// A stored ticket could not be encoded or decoded.
    Encoding { reason: String },
    /// The operating system could not provide random bytes for a ticket id.
    Entropy { reason: String },
    /// The configured time-to-live cannot be represented.
    InvalidTtl { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "correlation store unavailable: {reason}"),
            Self::Encoding { reason } => write!(f, "failed to encode ticket: {reason}"),
            Self::Entropy { reason } => write!(f, "failed to generate ticket id: {reason}"),
            Self::InvalidTtl { reason } => write!(f, "invalid ticket ttl: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}
