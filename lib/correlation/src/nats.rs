//! NATS JetStream key-value backed correlation store.
//!
//! Tickets live in a KV bucket whose `max_age` equals the ticket lifetime, so
//! NATS itself evicts abandoned attempts. Consumption is a revision-checked
//! update that flips `consumed`; only the caller whose update lands on the
//! revision it read observes the ticket.

use async_nats::jetstream;
use async_nats::jetstream::kv;
use async_trait::async_trait;
use chrono::Duration;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};
use vouch_core::{ProviderId, ServiceId};

use crate::error::StoreError;
use crate::store::{CorrelationStore, DEFAULT_TTL, ticket_ttl};
use crate::ticket::{CorrelationTicket, TicketId};

/// Default bucket name.
pub const DEFAULT_BUCKET: &str = "vouch-correlation";

/// Configuration for the NATS correlation store.
#[derive(Debug, Clone)]
pub struct NatsStoreConfig {
    /// NATS server URL.
    pub url: String,
    /// Key-value bucket name (defaults to `vouch-correlation`).
    pub bucket: Option<String>,
    /// Ticket lifetime.
    pub ttl: std::time::Duration,
}

impl NatsStoreConfig {
    /// Creates a config with the given NATS URL and default bucket and lifetime.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bucket: None,
            ttl: DEFAULT_TTL,
        }
    }

    /// Sets the bucket name.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Sets the ticket lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn bucket(&self) -> &str {
        self.bucket.as_deref().unwrap_or(DEFAULT_BUCKET)
    }
}

/// Cluster-visible correlation store on a JetStream KV bucket.
pub struct NatsCorrelationStore {
    store: kv::Store,
    ttl: Duration,
}

impl NatsCorrelationStore {
    /// Connects to NATS and opens (or creates) the ticket bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the lifetime is invalid or NATS is unreachable.
    pub async fn connect(config: &NatsStoreConfig) -> vouch_core::Result<Self, StoreError> {
        let ttl = ticket_ttl(config.ttl)?;

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| StoreError::Unavailable {
                reason: format!("failed to connect: {e}"),
            })?;
        let jetstream = jetstream::new(client);

        let store = match jetstream.get_key_value(config.bucket()).await {
            Ok(store) => store,
            Err(_) => jetstream
                .create_key_value(kv::Config {
                    bucket: config.bucket().to_string(),
                    history: 1,
                    max_age: config.ttl,
                    ..Default::default()
                })
                .await
                .map_err(|e| StoreError::Unavailable {
                    reason: format!("failed to create bucket: {e}"),
                })?,
        };

        info!(bucket = config.bucket(), ttl_secs = config.ttl.as_secs(), "correlation bucket ready");
        Ok(Self { store, ttl })
    }
}

#[async_trait]
impl CorrelationStore for NatsCorrelationStore {
    #[instrument(skip(self, properties), fields(provider = %provider))]
    async fn create(
        &self,
        service: Option<ServiceId>,
        provider: ProviderId,
        properties: BTreeMap<String, String>,
    ) -> vouch_core::Result<CorrelationTicket, StoreError> {
        let ticket =
            CorrelationTicket::issue(TicketId::generate()?, service, provider, properties, self.ttl);
        let bytes = ticket.to_json_bytes()?;

        self.store
            .create(ticket.id().as_str(), bytes.into())
            .await
            .map_err(|e| StoreError::Unavailable {
                reason: format!("failed to store ticket: {e}"),
            })?;

        debug!(ticket = ticket.id().short(), "correlation ticket created");
        Ok(ticket)
    }

    #[instrument(skip(self), fields(ticket = id.short()))]
    async fn consume_once(
        &self,
        id: &TicketId,
    ) -> vouch_core::Result<Option<CorrelationTicket>, StoreError> {
        let entry = self
            .store
            .entry(id.as_str())
            .await
            .map_err(|e| StoreError::Unavailable {
                reason: format!("failed to read ticket: {e}"),
            })?;

        let Some(entry) = entry else {
            debug!("correlation ticket not found");
            return Ok(None);
        };
        if !matches!(entry.operation, kv::Operation::Put) {
            return Ok(None);
        }

        let ticket = CorrelationTicket::from_json_bytes(&entry.value)?;
        if !ticket.is_live() {
            debug!(consumed = ticket.is_consumed(), "correlation ticket no longer live");
            return Ok(None);
        }

        let consumed = ticket.into_consumed();
        let bytes = consumed.to_json_bytes()?;
        match self
            .store
            .update(id.as_str(), bytes.into(), entry.revision)
            .await
        {
            Ok(_) => {
                debug!("correlation ticket consumed");
                Ok(Some(consumed))
            }
            Err(e) if e.kind() == kv::UpdateErrorKind::WrongLastRevision => {
                warn!("correlation ticket consumed concurrently");
                Ok(None)
            }
            Err(e) => Err(StoreError::Unavailable {
                reason: format!("failed to consume ticket: {e}"),
            }
            .into()),
        }
    }
}
