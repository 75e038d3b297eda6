//! Core types shared by every vouch crate.
//!
//! This crate provides the identifier types used across the delegated
//! authentication subsystem and the `Result` alias for rootcause reports.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{CredentialId, ParseIdError, ProviderId, ServiceId, SessionId};
