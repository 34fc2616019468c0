use tracing::{info, instrument, warn};

use crate::auth::dto::{LoginIdentifier, LoginRequest, SignupRequest, MAX_PASSWORD_LEN};
use crate::auth::extractors::AuthContext;
use crate::auth::repo_types::{NewUser, User};
use crate::auth::session::IssuedSession;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Creates the account. Does not log the user in.
#[instrument(skip_all)]
pub async fn signup(state: &AppState, mut req: SignupRequest) -> AppResult<User> {
    req.normalize_and_validate()?;

    if state.users.find_by_email(&req.email).await?.is_some() {
        warn!("signup with taken email");
        return Err(AppError::Conflict("email"));
    }
    if state.users.find_by_username(&req.username).await?.is_some() {
        warn!("signup with taken username");
        return Err(AppError::Conflict("username"));
    }

    let password_hash = state.hasher.hash_async(req.password).await?;
    // The unique constraints still decide concurrent signups.
    let user = state
        .users
        .create(NewUser {
            email: req.email,
            username: req.username,
            password_hash,
        })
        .await?;

    info!(user_id = %user.id, "user signed up");
    Ok(user)
}

/// Unknown account and wrong password are indistinguishable to the caller,
/// including in timing.
#[instrument(skip_all)]
pub async fn login(
    state: &AppState,
    req: LoginRequest,
    user_agent: Option<String>,
) -> AppResult<(User, IssuedSession)> {
    // Argon2 never sees input no stored password could match.
    if req.password.len() > MAX_PASSWORD_LEN {
        warn!("login with overlong password");
        return Err(AppError::Authentication);
    }

    let found = match req.identifier() {
        LoginIdentifier::Email(email) => state.users.find_by_email(&email).await?,
        LoginIdentifier::Username(name) => state.users.find_by_username(&name).await?,
    };

    let user = match found {
        Some(user) => {
            let ok = state
                .hasher
                .verify_async(req.password, user.password_hash.clone())
                .await?;
            if !ok {
                warn!(user_id = %user.id, "login with wrong password");
                return Err(AppError::Authentication);
            }
            user
        }
        None => {
            state.hasher.verify_dummy_async(req.password).await?;
            warn!("login for unknown account");
            return Err(AppError::Authentication);
        }
    };

    let issued = state.sessions.create(user.id, user_agent).await?;
    info!(user_id = %user.id, session_id = %issued.session_id, "user logged in");
    Ok((user, issued))
}

/// Rotates the password, revokes every session of the user and issues a
/// fresh one for the caller.
#[instrument(skip_all, fields(user_id = %ctx.user.id))]
pub async fn change_password(
    state: &AppState,
    ctx: &AuthContext,
    current_password: &str,
    new_password: &str,
    user_agent: Option<String>,
) -> AppResult<IssuedSession> {
    let verified = current_password.len() <= MAX_PASSWORD_LEN
        && state
            .hasher
            .verify_async(current_password.to_string(), ctx.user.password_hash.clone())
            .await?;
    if !verified {
        warn!("password change with wrong current password");
        return Err(AppError::Authentication);
    }
    let password_hash = state.hasher.hash_async(new_password.to_string()).await?;
    state.users.update_password(ctx.user.id, &password_hash).await?;
    let revoked = state.sessions.revoke_all(ctx.user.id).await?;
    info!(revoked, "password changed");
    state.sessions.create(ctx.user.id, user_agent).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::Validated;

    fn signup_req(email: &str, username: &str, password: &str) -> SignupRequest {
        SignupRequest {
            email: email.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn login_req(who: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username_or_email: who.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn signup_then_login_validates_to_same_user() {
        let state = AppState::for_tests();
        for (email, name, pw) in [
            ("a@x.com", "alice", "Secret123!"),
            ("Bob@Example.org", "Bob_2", "correct horse battery"),
            ("c@d.io", "carol", "pässwörd-ünicode"),
        ] {
            let user = signup(&state, signup_req(email, name, pw)).await.unwrap();
            for who in [email.to_string(), name.to_uppercase()] {
                let (logged_in, issued) = login(&state, login_req(&who, pw), None).await.unwrap();
                assert_eq!(logged_in.id, user.id);
                match state.sessions.validate(&issued.secret).await.unwrap() {
                    Validated::Valid { user: v, .. } => assert_eq!(v.id, user.id),
                    Validated::Invalid => panic!("session should validate"),
                }
            }
        }
    }

    #[tokio::test]
    async fn duplicate_signup_conflicts() {
        let state = AppState::for_tests();
        signup(&state, signup_req("a@x.com", "alice", "Secret123!")).await.unwrap();
        let err = signup(&state, signup_req("A@x.com", "other", "Secret123!")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict("email")));
        let err = signup(&state, signup_req("b@x.com", "Alice", "Secret123!")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict("username")));
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let state = AppState::for_tests();
        signup(&state, signup_req("a@x.com", "alice", "Secret123!")).await.unwrap();
        let wrong_pw = login(&state, login_req("alice", "wrong"), None).await.unwrap_err();
        let unknown = login(&state, login_req("mallory", "Secret123!"), None).await.unwrap_err();
        assert!(matches!(wrong_pw, AppError::Authentication));
        assert!(matches!(unknown, AppError::Authentication));
        assert_eq!(wrong_pw.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn password_change_revokes_old_sessions() {
        let state = AppState::for_tests();
        let user = signup(&state, signup_req("a@x.com", "alice", "Secret123!")).await.unwrap();
        let (_, first) = login(&state, login_req("alice", "Secret123!"), None).await.unwrap();
        let (_, second) = login(&state, login_req("alice", "Secret123!"), None).await.unwrap();
        let ctx = AuthContext {
            user,
            session_id: first.session_id,
        };

        let err = change_password(&state, &ctx, "nope", "NewSecret456!", None).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication));

        let fresh = change_password(&state, &ctx, "Secret123!", "NewSecret456!", None)
            .await
            .unwrap();
        for old in [&first, &second] {
            assert!(matches!(
                state.sessions.validate(&old.secret).await.unwrap(),
                Validated::Invalid
            ));
        }
        assert!(matches!(
            state.sessions.validate(&fresh.secret).await.unwrap(),
            Validated::Valid { .. }
        ));
        assert!(login(&state, login_req("alice", "Secret123!"), None).await.is_err());
        assert!(login(&state, login_req("alice", "NewSecret456!"), None).await.is_ok());
    }

    #[tokio::test]
    async fn overlong_passwords_are_rejected_before_hashing() {
        let state = AppState::for_tests();
        let user = signup(&state, signup_req("a@x.com", "alice", "Secret123!")).await.unwrap();
        let huge = "x".repeat(MAX_PASSWORD_LEN + 1);

        let err = login(&state, login_req("alice", &huge), None).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication));

        let ctx = AuthContext {
            user,
            session_id: uuid::Uuid::new_v4(),
        };
        let err = change_password(&state, &ctx, &huge, "NewSecret456!", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authentication));
        assert!(login(&state, login_req("alice", "Secret123!"), None).await.is_ok());
    }
}
