//! Whole-surface tests driving the tracker router in-process.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use trellis_api::{AppStateInner, router};
use trellis_db::Database;

fn app() -> Router {
    let db = Database::open_in_memory().expect("in-memory db");
    let state = Arc::new(AppStateInner {
        db,
        jwt_secret: "test-secret".into(),
    });
    router(state)
}

async fn send(
    app: &Router,
    method: &str,
    path: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post(app: &Router, path: &str, cookie: Option<&str>, body: Value) -> (StatusCode, Value) {
    send(app, "POST", path, cookie, Some(body)).await
}

async fn get(app: &Router, path: &str, cookie: Option<&str>) -> (StatusCode, Value) {
    send(app, "GET", path, cookie, None).await
}

/// Register a user and log in, returning the session cookie to echo back.
async fn login_as(app: &Router, username: &str) -> String {
    let creds = json!({"username": username, "password": format!("{}-password", username)});
    let (status, _) = post(app, "/register", None, creds.clone()).await;
    assert_eq!(status, StatusCode::OK, "register {}", username);

    let request = Request::builder()
        .method("POST")
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(creds.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK, "login {}", username);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("login sets a session cookie")
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn register_rejects_duplicates_and_bad_input() {
    let app = app();

    let creds = json!({"username": "alice", "password": "correct-horse"});
    let (status, body) = post(&app, "/register", None, creds.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, _) = post(&app, "/register", None, creds).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = post(
        &app,
        "/register",
        None,
        json!({"username": "xy", "password": "correct-horse"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &app,
        "/register",
        None,
        json!({"username": "carol", "password": "short"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_verifies_credentials() {
    let app = app();
    login_as(&app, "alice").await;

    let (status, _) = post(
        &app,
        "/login",
        None,
        json!({"username": "alice", "password": "wrong-password"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post(
        &app,
        "/login",
        None,
        json!({"username": "nobody", "password": "wrong-password"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_routes_need_a_valid_cookie() {
    let app = app();

    let (status, _) = get(&app, "/get-list/", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = get(&app, "/get-list/", Some("session=not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Health stays public.
    let (status, body) = get(&app, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = app();
    let request = Request::builder()
        .method("POST")
        .uri("/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn presence_registration_is_idempotent_and_lists_self() {
    let app = app();
    let alice = login_as(&app, "alice").await;

    let endpoint = json!({"ip": "10.0.0.5", "port": 9002});
    let (status, _) = post(&app, "/submit-info/", Some(&alice), endpoint.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(&app, "/submit-info/", Some(&alice), endpoint).await;
    assert_eq!(status, StatusCode::OK);

    // The snapshot includes the caller's own row exactly once; excluding
    // oneself is the node's job, never the tracker's.
    let (status, body) = get(&app, "/get-list/", Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["username"], "alice");
    assert_eq!(rows[0]["port"], 9002);
}

#[tokio::test]
async fn logout_scopes_to_endpoint_or_everything() {
    let app = app();
    let bob = login_as(&app, "bob").await;

    post(&app, "/submit-info/", Some(&bob), json!({"ip": "10.0.0.5", "port": 9002})).await;
    post(&app, "/submit-info/", Some(&bob), json!({"ip": "10.0.0.5", "port": 9003})).await;

    // Exact endpoint removes only the matching row.
    let (status, _) = post(
        &app,
        "/logout/",
        Some(&bob),
        json!({"ip": "10.0.0.5", "port": 9002}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = get(&app, "/get-list/", Some(&bob)).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    // No endpoint removes every remaining session.
    post(&app, "/submit-info/", Some(&bob), json!({"ip": "10.0.0.5", "port": 9002})).await;
    let (status, _) = post(&app, "/logout/", Some(&bob), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = get(&app, "/get-list/", Some(&bob)).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn private_channel_enforces_membership_on_every_operation() {
    let app = app();
    let admin = login_as(&app, "admin").await;
    let user1 = login_as(&app, "user1").await;
    let user2 = login_as(&app, "user2").await;

    let (status, _) = post(
        &app,
        "/create-channel/",
        Some(&admin),
        json!({
            "name": "ops",
            "topic": "operations",
            "is_private": true,
            "allowed_users": ["admin", "user2", "ghost"]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // History: outsider forbidden, member and owner fine (empty history).
    let ops = json!({"channel_name": "ops"});
    let (status, _) = post(&app, "/get-history/", Some(&user1), ops.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = post(&app, "/get-history/", Some(&user2), ops.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
    let (status, _) = post(&app, "/get-history/", Some(&admin), ops.clone()).await;
    assert_eq!(status, StatusCode::OK);

    // Writes run the identical check.
    let msg = json!({"channel_name": "ops", "content": "deploy at noon"});
    let (status, _) = post(&app, "/log-message/", Some(&user1), msg.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = post(&app, "/log-message/", Some(&user2), msg).await;
    assert_eq!(status, StatusCode::OK);

    // Member listing too.
    let (status, _) = post(&app, "/get-channel-members/", Some(&user1), ops.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = post(&app, "/get-channel-members/", Some(&user2), ops).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner"], "admin");
    assert!(
        body["members"]
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m.as_str() == Some("user2"))
    );

    // The unknown name in allowed_users was skipped silently.
    let (_, body) = get(&app, "/list-channels/", Some(&admin)).await;
    let listed = &body.as_array().unwrap()[0];
    assert_eq!(listed["name"], "ops");
    assert_eq!(listed["is_private"], true);
    assert!(
        !listed["allowed_users"]
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m.as_str() == Some("ghost"))
    );
}

#[tokio::test]
async fn channel_names_are_unique() {
    let app = app();
    let alice = login_as(&app, "alice").await;

    let req = json!({"name": "general", "topic": "", "is_private": false, "allowed_users": []});
    let (status, _) = post(&app, "/create-channel/", Some(&alice), req.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(&app, "/create-channel/", Some(&alice), req).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn membership_changes_are_owner_only() {
    let app = app();
    let admin = login_as(&app, "admin").await;
    let user1 = login_as(&app, "user1").await;
    let user2 = login_as(&app, "user2").await;

    post(
        &app,
        "/create-channel/",
        Some(&admin),
        json!({"name": "ops", "topic": "", "is_private": true, "allowed_users": []}),
    )
    .await;
    post(
        &app,
        "/create-channel/",
        Some(&admin),
        json!({"name": "lounge", "topic": "", "is_private": false, "allowed_users": []}),
    )
    .await;

    let add_user2 = json!({"channel_name": "ops", "username": "user2"});

    let (status, _) = post(&app, "/add-channel-member/", Some(&user1), add_user2.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = post(
        &app,
        "/add-channel-member/",
        Some(&admin),
        json!({"channel_name": "lounge", "username": "user2"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &app,
        "/add-channel-member/",
        Some(&admin),
        json!({"channel_name": "nowhere", "username": "user2"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post(
        &app,
        "/add-channel-member/",
        Some(&admin),
        json!({"channel_name": "ops", "username": "ghost"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post(&app, "/add-channel-member/", Some(&admin), add_user2.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(&app, "/add-channel-member/", Some(&admin), add_user2.clone()).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // The new member can post; once removed, access is gone again.
    let msg = json!({"channel_name": "ops", "content": "hello"});
    let (status, _) = post(&app, "/log-message/", Some(&user2), msg.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&app, "/remove-channel-member/", Some(&user1), add_user2.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = post(&app, "/remove-channel-member/", Some(&admin), add_user2).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(&app, "/log-message/", Some(&user2), msg).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn channel_history_returns_appended_messages_ascending() {
    let app = app();
    let alice = login_as(&app, "alice").await;

    post(
        &app,
        "/create-channel/",
        Some(&alice),
        json!({"name": "general", "topic": "", "is_private": false, "allowed_users": []}),
    )
    .await;

    for i in 0..4 {
        let (status, _) = post(
            &app,
            "/log-message/",
            Some(&alice),
            json!({"channel_name": "general", "content": format!("message {}", i)}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = post(
        &app,
        "/get-history/",
        Some(&alice),
        json!({"channel_name": "general"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 4);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry["content"], format!("message {}", i));
        assert_eq!(entry["username"], "alice");
    }
    let timestamps: Vec<&str> = entries.iter().map(|e| e["timestamp"].as_str().unwrap()).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted);
}

#[tokio::test]
async fn dm_round_trip_reads_identically_from_both_sides() {
    let app = app();
    let alice = login_as(&app, "alice").await;
    let bob = login_as(&app, "bob").await;

    let (status, _) = post(
        &app,
        "/log-dm/",
        Some(&alice),
        json!({"receiver": "bob", "content": "hi bob"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(
        &app,
        "/log-dm/",
        Some(&bob),
        json!({"receiver": "alice", "content": "hi alice"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(
        &app,
        "/log-dm/",
        Some(&alice),
        json!({"receiver": "ghost", "content": "anyone there?"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, from_alice) = post(
        &app,
        "/get-dm-history/",
        Some(&alice),
        json!({"other_user": "bob"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, from_bob) = post(
        &app,
        "/get-dm-history/",
        Some(&bob),
        json!({"other_user": "alice"}),
    )
    .await;

    let entries = from_alice.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["content"], "hi bob");
    assert_eq!(entries[0]["sender"], "alice");
    assert_eq!(entries[0]["receiver"], "bob");
    assert_eq!(entries[1]["sender"], "bob");
    assert_eq!(from_alice, from_bob);

    let (status, _) = post(
        &app,
        "/get-dm-history/",
        Some(&alice),
        json!({"other_user": "ghost"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
