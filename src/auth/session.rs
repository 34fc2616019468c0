use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::auth::repo::{SessionStore, UserStore};
use crate::auth::repo_types::{NewSession, Session, SessionStatus, User};
use crate::crypto::{constant_time_eq, generate_token, hash_token};
use crate::error::{AppError, AppResult};

/// Returned once at creation. `secret` is never retrievable again.
#[derive(Clone)]
pub struct IssuedSession {
    pub session_id: Uuid,
    pub secret: String,
    pub expires_at: OffsetDateTime,
}

impl std::fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedSession")
            .field("session_id", &self.session_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Validated {
    Valid { session: Session, user: User },
    Invalid,
}

/// Creates, validates and revokes server-side sessions with a fixed lifetime.
#[derive(Clone)]
pub struct SessionService {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    ttl: Duration,
}

impl SessionService {
    pub fn new(sessions: Arc<dyn SessionStore>, users: Arc<dyn UserStore>, ttl: Duration) -> Self {
        Self {
            sessions,
            users,
            ttl,
        }
    }

    #[instrument(skip(self, user_agent))]
    pub async fn create(&self, user_id: Uuid, user_agent: Option<String>) -> AppResult<IssuedSession> {
        let now = OffsetDateTime::now_utc();
        let expires_at = now.checked_add(self.ttl).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("session lifetime {} overflows", self.ttl))
        })?;
        self.purge(now).await;

        let secret = generate_token();
        let session = self
            .sessions
            .insert(NewSession {
                id: Uuid::new_v4(),
                user_id,
                token_hash: hash_token(&secret),
                user_agent,
                expires_at,
            })
            .await?;
        info!(session_id = %session.id, %user_id, "session created");
        Ok(IssuedSession {
            session_id: session.id,
            secret,
            expires_at: session.expires_at,
        })
    }

    /// Fails closed: anything but a live session for an existing user is `Invalid`.
    #[instrument(skip_all)]
    pub async fn validate(&self, secret: &str) -> AppResult<Validated> {
        let token_hash = hash_token(secret);
        let found = match self.sessions.find_by_token_hash(&token_hash).await {
            Err(e) if e.is_transient() => {
                warn!(error = %e, "session lookup failed, retrying once");
                self.sessions.find_by_token_hash(&token_hash).await?
            }
            other => other?,
        };

        let now = OffsetDateTime::now_utc();
        let live = match found {
            Some(s) if constant_time_eq(s.token_hash.as_bytes(), token_hash.as_bytes()) => {
                match s.status(now) {
                    SessionStatus::Active => Some(s),
                    status => {
                        debug!(session_id = %s.id, ?status, "session not active");
                        None
                    }
                }
            }
            _ => {
                debug!("no session for presented secret");
                None
            }
        };

        // The owner lookup runs on every path so hits and misses cost the same.
        let owner_id = live.as_ref().map_or(Uuid::nil(), |s| s.user_id);
        let owner = self.users.find_by_id(owner_id).await?;

        match (live, owner) {
            (Some(session), Some(user)) => Ok(Validated::Valid { session, user }),
            (Some(session), None) => {
                warn!(session_id = %session.id, "session references missing user");
                Ok(Validated::Invalid)
            }
            (None, _) => Ok(Validated::Invalid),
        }
    }

    /// Drops expired and revoked rows. Failures only cost disk space.
    async fn purge(&self, now: OffsetDateTime) {
        match self.sessions.delete_expired(now).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "dead sessions purged"),
            Err(e) => warn!(error = %e, "session purge failed"),
        }
    }

    #[instrument(skip(self))]
    pub async fn revoke(&self, session_id: Uuid) -> AppResult<()> {
        if self.sessions.revoke(session_id).await? {
            info!(%session_id, "session revoked");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn revoke_all(&self, user_id: Uuid) -> AppResult<u64> {
        let count = self.sessions.revoke_all(user_id).await?;
        info!(%user_id, count, "all sessions revoked");
        Ok(count)
    }
}
