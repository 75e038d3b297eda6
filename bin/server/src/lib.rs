//! vouch HTTP server.
//!
//! This crate provides the HTTP surface over the delegation crates:
//! - `/login` for fresh logins, provider selections and provider callbacks
//! - `/logout` with front-channel provider logout
//! - `/providers` listing the providers authorized for a service
//! - Session storage in PostgreSQL or memory
//! - A JSON relay to the protocol collaborators that validate callback proof

pub mod config;
pub mod db;
pub mod error;
pub mod exchange;
pub mod routes;
pub mod sessions;
pub mod state;

pub use routes::router;
pub use state::AppState;
