//! The correlation store seam and its in-process implementation.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, instrument};
use vouch_core::{ProviderId, ServiceId};

use crate::error::StoreError;
use crate::ticket::{CorrelationTicket, TicketId};

/// Default ticket lifetime.
pub const DEFAULT_TTL: std::time::Duration = std::time::Duration::from_secs(300);

/// Converts a configured lifetime into the ticket clock's duration type.
///
/// # Errors
///
/// Returns an error if `ttl` is zero or too large to represent.
pub fn ticket_ttl(ttl: std::time::Duration) -> Result<Duration, StoreError> {
    if ttl.is_zero() {
        return Err(StoreError::InvalidTtl {
            reason: "ttl must be positive".to_string(),
        });
    }
    Duration::from_std(ttl).map_err(|e| StoreError::InvalidTtl {
        reason: e.to_string(),
    })
}

/// Creates, atomically consumes, and expires correlation tickets.
///
/// Implementations must be safe to share between server instances: a
/// ticket created by one instance can be consumed by any other.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Mints and persists a fresh ticket for `(service, provider)`.
    async fn create(
        &self,
        service: Option<ServiceId>,
        provider: ProviderId,
        properties: BTreeMap<String, String>,
    ) -> vouch_core::Result<CorrelationTicket, StoreError>;

    /// Atomically consumes a ticket.
    ///
    /// Under concurrent calls with the same id, exactly one caller receives
    /// the ticket. Missing, expired and already-consumed tickets yield `None`.
    async fn consume_once(
        &self,
        id: &TicketId,
    ) -> vouch_core::Result<Option<CorrelationTicket>, StoreError>;
}

/// Single-process correlation store.
///
/// Suitable for tests and for deployments with exactly one server instance.
#[derive(Debug, Clone)]
pub struct InMemoryCorrelationStore {
    tickets: Arc<Mutex<HashMap<TicketId, CorrelationTicket>>>,
    ttl: Duration,
}

impl InMemoryCorrelationStore {
    /// Creates a store issuing tickets valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error if `ttl` is not a usable lifetime.
    pub fn new(ttl: std::time::Duration) -> vouch_core::Result<Self, StoreError> {
        Ok(Self {
            tickets: Arc::new(Mutex::new(HashMap::new())),
            ttl: ticket_ttl(ttl)?,
        })
    }

    /// Returns the number of stored tickets, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no tickets are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    #[instrument(skip(self, properties), fields(provider = %provider))]
    async fn create(
        &self,
        service: Option<ServiceId>,
        provider: ProviderId,
        properties: BTreeMap<String, String>,
    ) -> vouch_core::Result<CorrelationTicket, StoreError> {
        let ticket =
            CorrelationTicket::issue(TicketId::generate()?, service, provider, properties, self.ttl);

        let mut tickets = self.tickets.lock().unwrap_or_else(PoisonError::into_inner);
        tickets.retain(|_, t| !t.is_expired());
        tickets.insert(ticket.id().clone(), ticket.clone());

        debug!(ticket = ticket.id().short(), "correlation ticket created");
        Ok(ticket)
    }

    #[instrument(skip(self), fields(ticket = id.short()))]
    async fn consume_once(
        &self,
        id: &TicketId,
    ) -> vouch_core::Result<Option<CorrelationTicket>, StoreError> {
        let removed = self
            .tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        let consumed = removed
            .filter(CorrelationTicket::is_live)
            .map(CorrelationTicket::into_consumed);
        debug!(found = consumed.is_some(), "correlation ticket consumed");
        Ok(consumed)
    }
}
