//! Delegated authentication orchestration for vouch.
//!
//! This crate provides:
//! - Request normalization for fresh logins, provider selections and callbacks (`DelegationRequest`)
//! - The decision state machine (`DelegationOrchestrator`, `Decision`, `DelegationOutcome`)
//! - The provider-protocol collaborator seam (`ProviderClient`, `DelegatedCredential`)
//! - User-safe failures (`DelegationError`, `DelegationFailure`, `ErrorView`)
//! - Provider logout coordination (`LogoutCoordinator`)
//!
//! # Flow
//!
//! A login request enters `DelegationOrchestrator::decide`. The orchestrator
//! either reuses an existing session, asks the user to choose a provider,
//! mints a correlation ticket and returns a redirect, or validates a returning
//! callback by consuming its ticket exactly once. Side effects other than the
//! ticket store (cookies, session invalidation, creating the new session) are
//! performed by the caller from the returned `Decision`.

pub mod client;
pub mod error;
pub mod logout;
pub mod orchestrator;
pub mod outcome;
pub mod request;

// Re-export main types at crate root
pub use client::{DelegatedCredential, ExchangeError, ExchangeOutcome, ProviderClient};
pub use error::{DelegationError, DelegationFailure, ErrorView, FailureKind, html_escape};
pub use logout::{LogoutCoordinator, LogoutOutcome};
pub use orchestrator::{DEFAULT_EXCHANGE_TIMEOUT, DelegationOrchestrator};
pub use outcome::{Decision, DelegationOutcome, DelegationState};
pub use request::{CANCEL_PARAM, DelegationRequest, ProviderErrorPayload, RENEW_PARAM};
