use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::cookie::Decoded;
use super::dto::PublicUser;
use super::repo_types::User;
use super::session::Validated;
use crate::error::AppResult;
use crate::state::AppState;

/// Identity of an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub session_id: Uuid,
}

impl AuthContext {
    pub fn public_user(&self) -> PublicUser {
        PublicUser::from(&self.user)
    }
}

#[derive(Debug)]
pub enum GuardOutcome {
    Authenticated(AuthContext),
    /// `stale` is set when a cookie was presented but did not authenticate.
    Unauthenticated { stale: bool },
}

/// Decodes the session cookie and validates it. Read-only.
#[instrument(skip_all)]
pub async fn check(state: &AppState, jar: &CookieJar) -> AppResult<GuardOutcome> {
    let Some(cookie) = jar.get(state.cookies.name()) else {
        return Ok(GuardOutcome::Unauthenticated { stale: false });
    };

    let (session_id, secret) = match state.cookies.decode(cookie.value()) {
        Decoded::Valid { session_id, secret } => (session_id, secret),
        Decoded::Invalid => {
            debug!("undecodable session cookie");
            return Ok(GuardOutcome::Unauthenticated { stale: true });
        }
    };

    match state.sessions.validate(&secret).await? {
        Validated::Valid { session, user } if session.id == session_id => {
            Ok(GuardOutcome::Authenticated(AuthContext {
                user,
                session_id: session.id,
            }))
        }
        Validated::Valid { .. } => {
            debug!(%session_id, "cookie session id does not match record");
            Ok(GuardOutcome::Unauthenticated { stale: true })
        }
        Validated::Invalid => Ok(GuardOutcome::Unauthenticated { stale: true }),
    }
}

/// Requires a live session; otherwise redirects to the login page and drops
/// a stale cookie.
pub struct AuthUser(pub AuthContext);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        match check(state, &jar).await {
            Ok(GuardOutcome::Authenticated(ctx)) => Ok(AuthUser(ctx)),
            Ok(GuardOutcome::Unauthenticated { stale }) => {
                let redirect = Redirect::to(&state.config.login_path);
                if stale {
                    Err((jar.remove(state.cookies.removal_cookie()), redirect).into_response())
                } else {
                    Err(redirect.into_response())
                }
            }
            Err(e) => Err(e.into_response()),
        }
    }
}
