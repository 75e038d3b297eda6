//! PostgreSQL session repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use vouch_access::{SessionError, SessionService, SsoSession};
use vouch_core::{ProviderId, SessionId};

use crate::sessions::SessionStore;

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    id: String,
    principal: String,
    provider: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn try_into_session(self) -> Result<SsoSession, SessionError> {
        let id = SessionId::from_str(&self.id).map_err(|e| SessionError::StoreUnavailable {
            reason: format!("invalid session id '{}': {e}", self.id),
        })?;
        Ok(SsoSession::from_parts(
            id,
            self.principal,
            self.provider.map(ProviderId::from),
            self.created_at,
            self.expires_at,
        ))
    }
}

fn unavailable(e: sqlx::Error) -> SessionError {
    SessionError::StoreUnavailable {
        reason: e.to_string(),
    }
}

/// Repository for SSO sessions.
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    /// Creates a new session repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionService for PgSessionRepository {
    async fn get(&self, id: &SessionId) -> vouch_core::Result<Option<SsoSession>, SessionError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, principal, provider, created_at, expires_at
            FROM sso_sessions
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        match row {
            Some(r) => Ok(Some(r.try_into_session()?)),
            None => Ok(None),
        }
    }

    async fn invalidate(&self, id: &SessionId) -> vouch_core::Result<(), SessionError> {
        sqlx::query(
            r#"
            DELETE FROM sso_sessions
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionRepository {
    async fn create(&self, session: &SsoSession) -> vouch_core::Result<(), SessionError> {
        sqlx::query(
            r#"
            INSERT INTO sso_sessions (id, principal, provider, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(session.id().to_string())
        .bind(session.principal())
        .bind(session.originating_provider().map(ProviderId::as_str))
        .bind(session.created_at())
        .bind(session.expires_at())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn delete_expired(&self) -> vouch_core::Result<u64, SessionError> {
        let result = sqlx::query(
            r#"
            DELETE FROM sso_sessions
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(result.rows_affected())
    }
}
