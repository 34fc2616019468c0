use axum::{
    extract::State,
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::{cookie::CookieJar, WithRejection};
use tracing::{info, instrument};

use crate::{
    auth::{
        cookie::Decoded,
        dto::{
            ChangePasswordRequest, LoginRequest, LoginResponse, PublicUser, RevokedResponse,
            SignupRequest, SignupResponse,
        },
        extractors::AuthUser,
        services,
        session::Validated,
    },
    error::{AppError, AppResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/logout/all", post(logout_all))
        .route("/password", post(change_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.chars().take(256).collect())
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<SignupRequest>, AppError>,
) -> AppResult<(StatusCode, Json<SignupResponse>)> {
    let user = services::signup(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(SignupResponse { user_id: user.id })))
}

#[instrument(skip(state, jar, headers, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    WithRejection(Json(payload), _): WithRejection<Json<LoginRequest>, AppError>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let (user, issued) = services::login(&state, payload, user_agent(&headers)).await?;
    let cookie = state
        .cookies
        .session_cookie(issued.session_id, &issued.secret, issued.expires_at);
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            user: PublicUser::from(&user),
            expires_at: issued.expires_at,
        }),
    ))
}

/// Always clears the cookie; revokes the session only when the cookie proves it.
#[instrument(skip(state, jar))]
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> AppResult<(CookieJar, StatusCode)> {
    if let Some(cookie) = jar.get(state.cookies.name()) {
        if let Decoded::Valid { session_id, secret } = state.cookies.decode(cookie.value()) {
            if let Validated::Valid { session, .. } = state.sessions.validate(&secret).await? {
                if session.id == session_id {
                    state.sessions.revoke(session.id).await?;
                    info!(user_id = %session.user_id, "user logged out");
                }
            }
        }
    }
    Ok((jar.remove(state.cookies.removal_cookie()), StatusCode::OK))
}

#[instrument(skip(state, jar, ctx))]
pub async fn logout_all(
    State(state): State<AppState>,
    jar: CookieJar,
    AuthUser(ctx): AuthUser,
) -> AppResult<(CookieJar, Json<RevokedResponse>)> {
    let revoked = state.sessions.revoke_all(ctx.user.id).await?;
    Ok((
        jar.remove(state.cookies.removal_cookie()),
        Json(RevokedResponse { revoked }),
    ))
}

#[instrument(skip(state, jar, headers, ctx, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    AuthUser(ctx): AuthUser,
    WithRejection(Json(payload), _): WithRejection<Json<ChangePasswordRequest>, AppError>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    payload.validate()?;
    let issued = services::change_password(
        &state,
        &ctx,
        &payload.current_password,
        &payload.new_password,
        user_agent(&headers),
    )
    .await?;
    let cookie = state
        .cookies
        .session_cookie(issued.session_id, &issued.secret, issued.expires_at);
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            user: ctx.public_user(),
            expires_at: issued.expires_at,
        }),
    ))
}

#[instrument(skip(ctx))]
pub async fn get_me(AuthUser(ctx): AuthUser) -> Json<PublicUser> {
    Json(ctx.public_user())
}
