//! OAuth connect flow: `NotStarted -> StateIssued -> Consumed`, with
//! expired or mismatched states as terminal failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::exchange::{CallbackPayload, ExchangeError, TokenExchange};
use super::provider::ProviderRegistry;
use crate::auth::repo::OAuthStore;
use crate::auth::repo_types::{LinkedAccount, NewOAuthState};
use crate::crypto::{constant_time_eq, generate_token, hash_token};
use crate::error::{AppError, AppResult, FieldError};

pub const STATE_COOKIE: &str = "agenthub_oauth_state";
const STATE_COOKIE_PATH: &str = "/oauth";

/// Result of `start_connect`; `state` goes only into the state cookie and the URL.
#[derive(Debug, Clone)]
pub struct ConnectStart {
    pub redirect_url: Url,
    pub state: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct OAuthFlow {
    store: Arc<dyn OAuthStore>,
    registry: ProviderRegistry,
    exchange: Arc<dyn TokenExchange>,
    state_ttl: Duration,
    exchange_timeout: StdDuration,
    secure_cookie: bool,
}

impl OAuthFlow {
    pub fn new(
        store: Arc<dyn OAuthStore>,
        registry: ProviderRegistry,
        exchange: Arc<dyn TokenExchange>,
        state_ttl: Duration,
        exchange_timeout: StdDuration,
        secure_cookie: bool,
    ) -> Self {
        Self {
            store,
            registry,
            exchange,
            state_ttl,
            exchange_timeout,
            secure_cookie,
        }
    }

    /// Issues a state bound to `(session_id, provider)`. Nothing is persisted
    /// when the provider is refused.
    #[instrument(skip(self))]
    pub async fn start_connect(&self, session_id: Uuid, provider: &str) -> AppResult<ConnectStart> {
        let provider = self.registry.resolve(provider)?;
        let now = OffsetDateTime::now_utc();
        let expires_at = now.checked_add(self.state_ttl).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("oauth state lifetime {} overflows", self.state_ttl))
        })?;
        match self.store.delete_expired(now).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "spent oauth states purged"),
            Err(e) => warn!(error = %e, "oauth state purge failed"),
        }

        let state = generate_token();
        self.store
            .insert_state(NewOAuthState {
                state_hash: hash_token(&state),
                session_id,
                provider: provider.name.clone(),
                expires_at,
            })
            .await?;
        info!(provider = %provider.name, "oauth state issued");
        Ok(ConnectStart {
            redirect_url: provider.authorization_url(&state),
            state,
            expires_at,
        })
    }

    /// Verifies and consumes the state, then exchanges the code and links the
    /// identity. The exchange never runs unless the state was consumed here.
    #[instrument(skip(self, received_state, cookie_state, params))]
    pub async fn handle_callback(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        provider: &str,
        received_state: Option<&str>,
        cookie_state: Option<&str>,
        mut params: HashMap<String, String>,
    ) -> AppResult<LinkedAccount> {
        let provider = self.registry.resolve(provider)?;

        let state = match (received_state, cookie_state) {
            (Some(received), Some(cookie))
                if !received.is_empty() && constant_time_eq(received.as_bytes(), cookie.as_bytes()) =>
            {
                received
            }
            _ => {
                warn!(provider = %provider.name, "oauth state missing or not matching cookie");
                return Err(AppError::StateMismatch);
            }
        };

        let consumed = self
            .store
            .consume_state(
                &hash_token(state),
                session_id,
                &provider.name,
                OffsetDateTime::now_utc(),
            )
            .await?;
        if consumed.is_none() {
            warn!(provider = %provider.name, "oauth state unknown, expired or already used");
            return Err(AppError::StateMismatch);
        }

        if let Some(err) = params.remove("error") {
            return Err(ExchangeError::Denied(provider.name.clone(), err).into());
        }
        let Some(code) = params.remove("code").filter(|c| !c.is_empty()) else {
            return Err(AppError::Validation(vec![FieldError::new("code", "missing authorization code")]));
        };

        let payload = CallbackPayload { code, params };
        let identity = match tokio::time::timeout(
            self.exchange_timeout,
            self.exchange.exchange(&provider, &payload),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExchangeError::Unreachable(
                    provider.name.clone(),
                    format!("timed out after {:?}", self.exchange_timeout),
                )
                .into())
            }
        };

        let linked = self
            .store
            .link_account(user_id, &provider.name, &identity.provider_user_id)
            .await?;
        info!(provider = %provider.name, %user_id, "provider account linked");
        Ok(linked)
    }

    pub fn state_cookie(&self, start: &ConnectStart) -> Cookie<'static> {
        Cookie::build((STATE_COOKIE, start.state.clone()))
            .http_only(true)
            .secure(self.secure_cookie)
            .same_site(SameSite::Lax)
            .path(STATE_COOKIE_PATH)
            .expires(start.expires_at)
            .build()
    }

    pub fn state_removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((STATE_COOKIE, ""))
            .path(STATE_COOKIE_PATH)
            .build()
    }
}
