//! In-process stores with the same semantics as the Postgres ones. Used by
//! tests and by embedders that do not need persistence across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo::{OAuthStore, SessionStore, StoreError, StoreResult, UserStore};
use crate::auth::repo_types::{
    LinkedAccount, NewOAuthState, NewSession, NewUser, OAuthState, Session, User,
};

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == new.email) {
            return Err(StoreError::Conflict("email"));
        }
        if users
            .values()
            .any(|u| u.username.to_lowercase() == new.username.to_lowercase())
        {
            return Err(StoreError::Conflict("username"));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            username: new.username,
            password_hash: new.password_hash,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let wanted = username.to_lowercase();
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username.to_lowercase() == wanted)
            .cloned())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.password_hash = password_hash.to_string();
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, new: NewSession) -> StoreResult<Session> {
        let mut sessions = self.sessions.write().await;
        if sessions.values().any(|s| s.token_hash == new.token_hash) {
            return Err(StoreError::Conflict("record"));
        }
        let session = Session {
            id: new.id,
            user_id: new.user_id,
            token_hash: new.token_hash,
            user_agent: new.user_agent,
            created_at: OffsetDateTime::now_utc(),
            expires_at: new.expires_at,
            revoked_at: None,
        };
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn revoke(&self, id: Uuid) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(s) if s.revoked_at.is_none() => {
                s.revoked_at = Some(OffsetDateTime::now_utc());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all(&self, user_id: Uuid) -> StoreResult<u64> {
        let now = OffsetDateTime::now_utc();
        let mut revoked = 0;
        for s in self.sessions.write().await.values_mut() {
            if s.user_id == user_id && s.revoked_at.is_none() {
                s.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.revoked_at.is_none() && s.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryOAuthStore {
    states: RwLock<HashMap<Uuid, OAuthState>>,
    links: RwLock<Vec<LinkedAccount>>,
}

#[async_trait]
impl OAuthStore for MemoryOAuthStore {
    async fn insert_state(&self, new: NewOAuthState) -> StoreResult<OAuthState> {
        let state = OAuthState {
            id: Uuid::new_v4(),
            state_hash: new.state_hash,
            session_id: new.session_id,
            provider: new.provider,
            created_at: OffsetDateTime::now_utc(),
            expires_at: new.expires_at,
            consumed_at: None,
        };
        self.states.write().await.insert(state.id, state.clone());
        Ok(state)
    }

    async fn consume_state(
        &self,
        state_hash: &str,
        session_id: Uuid,
        provider: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<OAuthState>> {
        let mut states = self.states.write().await;
        let found = states.values_mut().find(|s| {
            s.state_hash == state_hash
                && s.session_id == session_id
                && s.provider == provider
                && s.consumed_at.is_none()
                && s.expires_at > now
        });
        Ok(found.map(|s| {
            s.consumed_at = Some(now);
            s.clone()
        }))
    }

    async fn link_account(
        &self,
        user_id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> StoreResult<LinkedAccount> {
        let mut links = self.links.write().await;
        if links.iter().any(|l| {
            l.provider == provider && l.provider_user_id == provider_user_id && l.user_id != user_id
        }) {
            return Err(StoreError::Conflict("account"));
        }
        if let Some(existing) = links
            .iter_mut()
            .find(|l| l.user_id == user_id && l.provider == provider)
        {
            existing.provider_user_id = provider_user_id.to_string();
            return Ok(existing.clone());
        }
        let link = LinkedAccount {
            id: Uuid::new_v4(),
            user_id,
            provider: provider.to_string(),
            provider_user_id: provider_user_id.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        links.push(link.clone());
        Ok(link)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, s| s.consumed_at.is_none() && s.expires_at > now);
        Ok((before - states.len()) as u64)
    }
}
