//! HTTP tests for the session, admin and public endpoints.

mod common;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use common::{
    PASSWORD, TestSetup, authed_request, create_user, json_body, json_request, setup_app,
};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn login(app: &Router, username: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/auth/login",
            json!({ "username": username, "password": PASSWORD }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

fn access_token(body: &Value) -> String {
    body["access_token"].as_str().unwrap().to_string()
}

fn refresh_token(body: &Value) -> String {
    body["refresh_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_login_response_shape() {
    let (app, env) = setup_app().await;
    let (_, uuid) = create_user(&env.db, "alice", "user").await;

    let body = login(&app, "alice").await;
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    assert_eq!(body["expires_in"], 900);
    assert_eq!(body["user"]["uuid"], uuid.as_str());
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["role"], "user");
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_login_wrong_password() {
    let (app, env) = setup_app().await;
    create_user(&env.db, "alice", "user").await;

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/api/auth/login",
            json!({ "username": "alice", "password": "nope" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "Invalid credentials");
}

#[tokio::test]
async fn test_refresh_and_replay_over_http() {
    let (app, env) = TestSetup::new().with_reuse_grace(0).build_app().await;
    create_user(&env.db, "alice", "user").await;
    let body = login(&app, "alice").await;
    let original = refresh_token(&body);

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/auth/refresh",
            json!({ "refresh_token": original }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let rotated = json_body(response).await;
    assert_ne!(refresh_token(&rotated), original);

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/auth/refresh",
            json!({ "refresh_token": original }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        json_body(response).await["error"],
        "Invalid or expired credential"
    );

    // The replay took the rotated token down with it.
    let response = app
        .oneshot(json_request(
            Method::POST,
            "/api/auth/refresh",
            json!({ "refresh_token": refresh_token(&rotated) }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_always_succeeds() {
    let (app, env) = setup_app().await;
    create_user(&env.db, "alice", "user").await;
    let body = login(&app, "alice").await;

    for token in [refresh_token(&body), refresh_token(&body), "junk".to_string()] {
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/logout",
                json!({ "refresh_token": token }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_me_requires_bearer_token() {
    let (app, env) = setup_app().await;
    create_user(&env.db, "alice", "manager").await;
    let body = login(&app, "alice").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::AUTHORIZATION, format!("bearer {}", access_token(&body)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(authed_request(Method::GET, "/api/auth/me", &access_token(&body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let me = json_body(response).await;
    assert_eq!(me["username"], "alice");
    assert_eq!(me["role"], "manager");
    assert_eq!(me["capabilities"], json!(["tasks:read", "tasks:write"]));
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let (app, env) = setup_app().await;
    create_user(&env.db, "alice", "user").await;
    let body = login(&app, "alice").await;

    let response = app
        .oneshot(authed_request(
            Method::GET,
            "/api/auth/me",
            &refresh_token(&body),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sessions_and_logout_all() {
    let (app, env) = setup_app().await;
    create_user(&env.db, "alice", "user").await;
    let first = login(&app, "alice").await;
    let second = login(&app, "alice").await;
    let access = access_token(&second);

    let response = app
        .clone()
        .oneshot(authed_request(Method::GET, "/api/auth/sessions", &access))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let sessions = json_body(response).await;
    let sessions = sessions["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions[0].get("identity").is_none());

    let response = app
        .clone()
        .oneshot(authed_request(Method::POST, "/api/auth/logout-all", &access))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["revoked"], 2);

    for body in [&first, &second] {
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/refresh",
                json!({ "refresh_token": refresh_token(body) }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Access tokens are stateless and stay valid until they expire.
    let response = app
        .oneshot(authed_request(Method::GET, "/api/auth/me", &access))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_gate_unauthorized_vs_forbidden() {
    let (app, env) = setup_app().await;
    create_user(&env.db, "mia", "manager").await;
    let body = login(&app, "mia").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/admin/users")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(authed_request(
            Method::GET,
            "/api/admin/users",
            &access_token(&body),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "Insufficient permissions");
}

#[tokio::test]
async fn test_admin_endpoints() {
    let (app, env) = setup_app().await;
    create_user(&env.db, "root", "admin").await;
    let (_, alice_uuid) = create_user(&env.db, "alice", "user").await;
    let admin = access_token(&login(&app, "root").await);
    let alice = login(&app, "alice").await;

    let response = app
        .clone()
        .oneshot(authed_request(Method::GET, "/api/admin/users", &admin))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let users = json_body(response).await;
    assert_eq!(users["users"].as_array().unwrap().len(), 2);

    let response = app
        .clone()
        .oneshot(authed_request(
            Method::POST,
            &format!("/api/admin/users/{}/logout-all", alice_uuid),
            &admin,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["revoked"], 1);

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/auth/refresh",
            json!({ "refresh_token": refresh_token(&alice) }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(authed_request(
            Method::POST,
            &format!("/api/admin/users/{}/disable", alice_uuid),
            &admin,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/auth/login",
            json!({ "username": "alice", "password": PASSWORD }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "Account disabled");

    let response = app
        .oneshot(authed_request(
            Method::POST,
            "/api/admin/users/67e55044-10b1-426f-9247-bb680e5fe0c8/disable",
            &admin,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_cannot_disable_self() {
    let (app, env) = setup_app().await;
    let (_, uuid) = create_user(&env.db, "root", "admin").await;
    let admin = access_token(&login(&app, "root").await);

    let response = app
        .oneshot(authed_request(
            Method::POST,
            &format!("/api/admin/users/{}/disable", uuid),
            &admin,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_rejects_malformed_uuid() {
    let (app, env) = setup_app().await;
    create_user(&env.db, "root", "admin").await;
    let admin = access_token(&login(&app, "root").await);

    let response = app
        .oneshot(authed_request(
            Method::POST,
            "/api/admin/users/not-a-uuid/logout-all",
            &admin,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_role_gate_ignores_capabilities() {
    // Managers hold no "admin" role, so disabling is refused even before the
    // target is looked up.
    let (app, env) = setup_app().await;
    create_user(&env.db, "mia", "manager").await;
    let (_, alice_uuid) = create_user(&env.db, "alice", "user").await;
    let manager = access_token(&login(&app, "mia").await);

    let response = app
        .oneshot(authed_request(
            Method::POST,
            &format!("/api/admin/users/{}/disable", alice_uuid),
            &manager,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_audit_log_over_http() {
    let (app, env) = setup_app().await;
    create_user(&env.db, "root", "admin").await;
    let admin = access_token(&login(&app, "root").await);

    let response = app
        .clone()
        .oneshot(authed_request(Method::GET, "/api/admin/audit?limit=10", &admin))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(json_body(response).await["events"].is_array());

    // The in-memory sink saw the login.
    assert_eq!(env.audit.count("login_success"), 1);

    create_user(&env.db, "alice", "user").await;
    let user = access_token(&login(&app, "alice").await);
    let response = app
        .oneshot(authed_request(Method::GET, "/api/admin/audit", &user))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_whoami_optional_auth() {
    let (app, env) = setup_app().await;
    create_user(&env.db, "alice", "user").await;
    let body = login(&app, "alice").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/public/whoami")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, Value::Null);

    let response = app
        .clone()
        .oneshot(authed_request(
            Method::GET,
            "/api/public/whoami",
            "not-a-token",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, Value::Null);

    let response = app
        .oneshot(authed_request(
            Method::GET,
            "/api/public/whoami",
            &access_token(&body),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["username"], "alice");
}

#[tokio::test]
async fn test_manager_end_to_end() {
    let (app, env) = setup_app().await;
    create_user(&env.db, "mia", "manager").await;
    let body = login(&app, "mia").await;

    let claims = env.jwt.verify_access(&access_token(&body)).unwrap();
    let caps: Vec<&str> = claims.capabilities.iter().map(|p| p.as_str()).collect();
    assert_eq!(caps, vec!["tasks:read", "tasks:write"]);

    let identity = steward::auth::Identity::from(claims);
    assert_eq!(
        steward::auth::require_permission("tasks:delete").check(Some(&identity)),
        Err(steward::auth::AuthErrorKind::Forbidden)
    );
    assert_eq!(
        steward::auth::require_permission("tasks:read").check(Some(&identity)),
        Ok(())
    );
}

#[tokio::test]
async fn test_login_rate_limit() {
    let (app, _env) = TestSetup::new().with_login_rate_limit().build_app().await;

    // Unknown user, so no password hashing slows the burst down.
    let attempt = |ip: &'static str| {
        Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(
                json!({ "username": "nobody", "password": "wrong" }).to_string(),
            ))
            .unwrap()
    };

    let mut statuses = Vec::new();
    for _ in 0..6 {
        let response = app.clone().oneshot(attempt("203.0.113.9")).await.unwrap();
        statuses.push(response.status());
    }
    assert!(statuses[..5].iter().all(|s| *s == StatusCode::UNAUTHORIZED));
    assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);

    // Other clients are unaffected.
    let response = app.oneshot(attempt("203.0.113.10")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
