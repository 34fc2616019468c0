use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,      // Argon2 PHC string, not exposed in JSON
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
}

/// Server-side session. Only the hash of the client secret is stored.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub user_agent: Option<String>,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

impl Session {
    /// Revoked wins over expired; both are terminal.
    pub fn status(&self, now: OffsetDateTime) -> SessionStatus {
        if self.revoked_at.is_some() {
            SessionStatus::Revoked
        } else if now >= self.expires_at {
            SessionStatus::Expired
        } else {
            SessionStatus::Active
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub user_agent: Option<String>,
    pub expires_at: OffsetDateTime,
}

/// Issued OAuth state, bound to one session and one provider.
#[derive(Debug, Clone, FromRow)]
pub struct OAuthState {
    pub id: Uuid,
    pub state_hash: String,
    pub session_id: Uuid,
    pub provider: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub consumed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewOAuthState {
    pub state_hash: String,
    pub session_id: Uuid,
    pub provider: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LinkedAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_user_id: String,
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn session(expires_in: Duration, revoked: bool) -> Session {
        let now = OffsetDateTime::now_utc();
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "h".into(),
            user_agent: None,
            created_at: now,
            expires_at: now + expires_in,
            revoked_at: revoked.then_some(now),
        }
    }

    #[test]
    fn status_transitions() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(session(Duration::hours(1), false).status(now), SessionStatus::Active);
        assert_eq!(session(Duration::hours(-1), false).status(now), SessionStatus::Expired);
        assert_eq!(session(Duration::hours(1), true).status(now), SessionStatus::Revoked);
        assert_eq!(session(Duration::hours(-1), true).status(now), SessionStatus::Revoked);
    }

    #[test]
    fn user_serialization_hides_hash() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@x.com".into(),
            username: "alice".into(),
            password_hash: "$argon2id$secret".into(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(json.contains("alice"));
    }
}
