//! Single-use correlation tickets for vouch.
//!
//! A delegated login leaves the server as a browser redirect and comes back
//! as an unrelated request. The correlation ticket is the only state that
//! survives the round trip:
//! - `CorrelationTicket`: binds `(service, provider)` plus request context to an unguessable id
//! - `CorrelationStore`: creates tickets and consumes them at most once
//! - `InMemoryCorrelationStore`: single-process backend
//! - `NatsCorrelationStore`: JetStream KV backend shared by every server instance

pub mod error;
pub mod nats;
pub mod store;
pub mod ticket;

pub use error::StoreError;
pub use nats::{NatsCorrelationStore, NatsStoreConfig};
pub use store::{CorrelationStore, DEFAULT_TTL, InMemoryCorrelationStore};
pub use ticket::{CorrelationTicket, TicketId, properties};
