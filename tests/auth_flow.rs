mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::*;

const PASSWORD: &str = "correct horse battery";

#[tokio::test]
async fn health_is_public() {
    let app = app();
    let res = send(&app, get("/health", None)).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn signup_login_me_logout() {
    let app = app();

    let res = signup(&app, "alice@example.com", "alice", PASSWORD).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created = json_body(res).await;
    assert!(created["user_id"].is_string());

    let res = login(&app, "alice", "wrong password!").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookies(&res, SESSION_COOKIE).is_empty());

    let res = login(&app, "alice", PASSWORD).await;
    assert_eq!(res.status(), StatusCode::OK);
    let raw = set_cookies(&res, SESSION_COOKIE);
    assert_eq!(raw.len(), 1);
    assert!(raw[0].contains("HttpOnly"));
    assert!(raw[0].contains("Path=/"));
    assert!(raw[0].contains("Expires="));
    let cookie = cookie_pair(&res, SESSION_COOKIE).unwrap();
    let body = json_body(res).await;
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["id"], created["user_id"]);
    assert!(body["user"].get("password_hash").is_none());

    let res = send(&app, get("/me", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::OK);
    let me = json_body(res).await;
    assert_eq!(me["email"], "alice@example.com");

    let res = send(&app, post_json("/logout", json!({}), Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::OK);
    let cleared = set_cookies(&res, SESSION_COOKIE);
    assert_eq!(cleared.len(), 1);
    assert!(cleared[0].starts_with(&format!("{SESSION_COOKIE}=;")));
    assert!(cleared[0].contains("Max-Age=0"));

    // The old cookie no longer authenticates and is cleared on sight.
    let res = send(&app, get("/me", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/login");
    assert!(set_cookies(&res, SESSION_COOKIE)[0].contains("Max-Age=0"));
}

#[tokio::test]
async fn login_accepts_email_in_any_case() {
    let app = app();
    signup(&app, "Bob@Example.com", "bob", PASSWORD).await;
    let res = login(&app, "BOB@example.COM", PASSWORD).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_user_and_wrong_password_look_alike() {
    let app = app();
    signup(&app, "carol@example.com", "carol", PASSWORD).await;

    let wrong = login(&app, "carol", "not the password").await;
    let missing = login(&app, "nobody", "not the password").await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(wrong).await, json_body(missing).await);
}

#[tokio::test]
async fn anonymous_me_redirects_without_touching_cookies() {
    let app = app();
    let res = send(&app, get("/me", None)).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/login");
    assert!(set_cookies(&res, SESSION_COOKIE).is_empty());
}

#[tokio::test]
async fn tampered_cookie_is_rejected() {
    let app = app();
    let cookie = signed_in(&app, "dave@example.com", "dave", PASSWORD).await;

    let mut tampered = cookie.clone();
    let last = tampered.pop().unwrap();
    tampered.push(if last == 'A' { 'B' } else { 'A' });

    let res = send(&app, get("/me", Some(&tampered))).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    let res = send(&app, get("/me", Some(&format!("{SESSION_COOKIE}=garbage")))).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    let res = send(&app, get("/me", Some(&cookie))).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn duplicate_signup_conflicts() {
    let app = app();
    let res = signup(&app, "erin@example.com", "erin", PASSWORD).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = signup(&app, "ERIN@example.com", "erin2", PASSWORD).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(res).await["error"], "email already taken");

    let res = signup(&app, "erin2@example.com", "ERIN", PASSWORD).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(res).await["error"], "username already taken");
}

#[tokio::test]
async fn invalid_signup_lists_fields() {
    let app = app();
    let res = signup(&app, "not-an-email", "x", "short").await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(res).await;
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["email", "username", "password"]);
}

#[tokio::test]
async fn logout_without_cookie_is_ok() {
    let app = app();
    let res = send(&app, post_json("/logout", json!({}), None)).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn logout_all_ends_every_session() {
    let app = app();
    let first = signed_in(&app, "frank@example.com", "frank", PASSWORD).await;
    let second = cookie_pair(&login(&app, "frank", PASSWORD).await, SESSION_COOKIE).unwrap();

    let res = send(&app, post_json("/logout/all", json!({}), Some(&first))).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["revoked"], 2);

    for cookie in [&first, &second] {
        let res = send(&app, get("/me", Some(cookie))).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
    }
}

#[tokio::test]
async fn password_change_rotates_sessions() {
    let app = app();
    let old = signed_in(&app, "grace@example.com", "grace", PASSWORD).await;

    let res = send(
        &app,
        post_json(
            "/password",
            json!({ "current_password": "not it at all", "new_password": "a brand new secret" }),
            Some(&old),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = send(
        &app,
        post_json(
            "/password",
            json!({ "current_password": PASSWORD, "new_password": "a brand new secret" }),
            Some(&old),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let fresh = cookie_pair(&res, SESSION_COOKIE).unwrap();

    assert_eq!(send(&app, get("/me", Some(&old))).await.status(), StatusCode::SEE_OTHER);
    assert_eq!(send(&app, get("/me", Some(&fresh))).await.status(), StatusCode::OK);

    assert_eq!(login(&app, "grace", PASSWORD).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(login(&app, "grace", "a brand new secret").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn unreadable_bodies_use_the_error_format() {
    let app = app();

    let res = send(
        &app,
        post_json("/signup", json!({ "email": "a@x.com", "username": "alice" }), None),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        res.headers()[axum::http::header::CONTENT_TYPE],
        "application/json"
    );
    let body = json_body(res).await;
    assert_eq!(body["error"], "validation failed");
    assert_eq!(body["fields"][0]["field"], "body");
    assert!(body["fields"][0]["message"].as_str().unwrap().contains("password"));

    let req = axum::http::Request::post("/login")
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let res = send(&app, req).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(res).await["fields"][0]["field"], "body");
}
