use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{header::LOCATION, HeaderName, StatusCode},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::instrument;

use super::flow::STATE_COOKIE;
use crate::{
    auth::extractors::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/oauth/:provider", get(start_connect))
        .route("/oauth/:provider/callback", get(callback))
}

type Found = (StatusCode, [(HeaderName, String); 1]);

// axum's Redirect has no 302 constructor; providers expect a plain Found.
fn found(location: &str) -> Found {
    (StatusCode::FOUND, [(LOCATION, location.to_string())])
}

#[instrument(skip(state, jar, ctx))]
pub async fn start_connect(
    State(state): State<AppState>,
    jar: CookieJar,
    AuthUser(ctx): AuthUser,
    Path(provider): Path<String>,
) -> AppResult<(CookieJar, Found)> {
    let start = state.oauth.start_connect(ctx.session_id, &provider).await?;
    let cookie = state.oauth.state_cookie(&start);
    Ok((jar.add(cookie), found(start.redirect_url.as_str())))
}

/// The state cookie is dropped whatever the outcome.
#[instrument(skip(state, jar, ctx, params))]
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    AuthUser(ctx): AuthUser,
    Path(provider): Path<String>,
    Query(mut params): Query<HashMap<String, String>>,
) -> Result<(CookieJar, Found), (CookieJar, AppError)> {
    let received = params.remove("state");
    let cookie_state = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(state.oauth.state_removal_cookie());

    let outcome = state
        .oauth
        .handle_callback(
            ctx.user.id,
            ctx.session_id,
            &provider,
            received.as_deref(),
            cookie_state.as_deref(),
            params,
        )
        .await;
    match outcome {
        Ok(_) => Ok((jar, found(&state.config.oauth.success_path))),
        Err(e) => Err((jar, e)),
    }
}
