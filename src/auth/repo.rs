use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{
    LinkedAccount, NewOAuthState, NewSession, NewUser, OAuthState, Session, User,
};
use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write; carries the field name.
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some("23505") {
                return StoreError::Conflict(conflict_field(db.constraint()));
            }
        }
        if matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut) {
            return StoreError::Transient(e.to_string());
        }
        StoreError::Database(e.into())
    }
}

fn conflict_field(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some(c) if c.contains("email") => "email",
        Some(c) if c.contains("username") => "username",
        Some(c) if c.contains("provider") => "account",
        _ => "record",
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(field) => AppError::Conflict(field),
            StoreError::Transient(msg) => AppError::Internal(anyhow::anyhow!(msg)),
            StoreError::Database(e) => AppError::Internal(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> StoreResult<User>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Case-insensitive.
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: NewSession) -> StoreResult<Session>;
    /// Returns the row whatever its status; callers decide liveness.
    async fn find_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<Session>>;
    /// Sets `revoked_at` once. Returns whether this call changed the row.
    async fn revoke(&self, id: Uuid) -> StoreResult<bool>;
    /// Revokes every live session of the user, returns the count.
    async fn revoke_all(&self, user_id: Uuid) -> StoreResult<u64>;
    /// Deletes sessions that expired at or before `now` or were revoked.
    async fn delete_expired(&self, now: OffsetDateTime) -> StoreResult<u64>;
}

#[async_trait]
pub trait OAuthStore: Send + Sync {
    async fn insert_state(&self, state: NewOAuthState) -> StoreResult<OAuthState>;
    /// Atomically marks a matching, unconsumed, unexpired state consumed.
    async fn consume_state(
        &self,
        state_hash: &str,
        session_id: Uuid,
        provider: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<OAuthState>>;
    /// Links or re-links the user's account at `provider`.
    async fn link_account(
        &self,
        user_id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<LinkedAccount>;
    /// Deletes states that are consumed or expired at `now`.
    async fn delete_expired(&self, now: OffsetDateTime) -> StoreResult<u64>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, username, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, email, username, password_hash, created_at, updated_at
            "#,
        )
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, username, password_hash, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, username, password_hash, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, username, password_hash, created_at, updated_at
            FROM users
            WHERE lower(username) = lower($1)
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: NewSession) -> StoreResult<Session> {
        let row = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, token_hash, user_agent, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, token_hash, user_agent, created_at, expires_at, revoked_at
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(&session.user_agent)
        .bind(session.expires_at)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        let row = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, token_hash, user_agent, created_at, expires_at, revoked_at
            FROM sessions
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn revoke(&self, id: Uuid) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE sessions SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL")
                .bind(id)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all(&self, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM sessions WHERE expires_at <= $1 OR revoked_at IS NOT NULL")
                .bind(now)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgOAuthStore {
    db: PgPool,
}

impl PgOAuthStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OAuthStore for PgOAuthStore {
    async fn insert_state(&self, state: NewOAuthState) -> StoreResult<OAuthState> {
        let row = sqlx::query_as::<_, OAuthState>(
            r#"
            INSERT INTO oauth_states (state_hash, session_id, provider, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, state_hash, session_id, provider, created_at, expires_at, consumed_at
            "#,
        )
        .bind(&state.state_hash)
        .bind(state.session_id)
        .bind(&state.provider)
        .bind(state.expires_at)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn consume_state(
        &self,
        state_hash: &str,
        session_id: Uuid,
        provider: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<OAuthState>> {
        let row = sqlx::query_as::<_, OAuthState>(
            r#"
            UPDATE oauth_states
            SET consumed_at = $4
            WHERE state_hash = $1
              AND session_id = $2
              AND provider = $3
              AND consumed_at IS NULL
              AND expires_at > $4
            RETURNING id, state_hash, session_id, provider, created_at, expires_at, consumed_at
            "#,
        )
        .bind(state_hash)
        .bind(session_id)
        .bind(provider)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn link_account(
        &self,
        user_id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<LinkedAccount> {
        let row = sqlx::query_as::<_, LinkedAccount>(
            r#"
            INSERT INTO linked_accounts (user_id, provider, provider_user_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, provider)
            DO UPDATE SET provider_user_id = EXCLUDED.provider_user_id
            RETURNING id, user_id, provider, provider_user_id, created_at
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(provider_user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM oauth_states WHERE expires_at <= $1 OR consumed_at IS NOT NULL")
                .bind(now)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected())
    }
}
