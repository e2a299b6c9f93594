//! Request-level tests through the `/api` dispatcher

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use http_body_util::BodyExt;
use hyper::header::{LOCATION, SET_COOKIE};
use hyper::{Method, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;

use keykeeper::auth::{IdentityProvider, Role};
use keykeeper::db::schemas::UserDoc;
use keykeeper::routes::{ApiRequest, FullBody};
use keykeeper::services::LogNotifier;
use keykeeper::store::Stores;
use keykeeper::{server, AppState, Args};

/// Accepts exactly one ticket
struct FakeCas;

#[async_trait]
impl IdentityProvider for FakeCas {
    fn login_url(&self, destination: &str) -> String {
        format!("https://cas.test/login?service={}", urlencoding::encode(destination))
    }

    fn logout_url(&self) -> String {
        "https://cas.test/logout".into()
    }

    async fn validate_ticket(
        &self,
        ticket: &str,
        _destination: &str,
    ) -> keykeeper::Result<Option<String>> {
        Ok((ticket == "ST-good").then(|| "newbie42".to_string()))
    }
}

async fn state() -> AppState {
    let args = Args::parse_from([
        "keykeeper",
        "--storage",
        "memory",
        "--session-secret",
        "integration-test-secret-0123456789abcdef",
    ]);
    let stores = Stores::memory();
    stores
        .users
        .insert(UserDoc::new("adm001".into(), "Ada Admin".into(), Role::Administrator))
        .await
        .unwrap();
    AppState::new(args, &stores, Arc::new(LogNotifier))
        .unwrap()
        .with_identity(Arc::new(FakeCas))
}

fn request(method: Method, path: &str, principal: Option<&str>, body: Option<Value>) -> ApiRequest {
    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (path, None),
    };
    let mut req = ApiRequest::new(method, path);
    req.query = query;
    req.principal = principal.map(str::to_string);
    if let Some(body) = body {
        req.body = Bytes::from(body.to_string());
    }
    req
}

async fn body_json(response: Response<FullBody>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_key_lifecycle_over_routes() {
    let state = state().await;
    let admin = Some("adm001");

    let response = server::route(
        &state,
        request(
            Method::POST,
            "/users",
            admin,
            Some(json!({"pid": "jdoe123", "full_name": "Jane Doe"})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server::route(
        &state,
        request(
            Method::POST,
            "/keys",
            admin,
            Some(json!({
                "tag_number": "101",
                "series_id": "A1",
                "sequence_id": "1",
                "building": "McB",
                "key_type": "door",
                "location": "1F"
            })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], true);

    let response = server::route(&state, request(Method::POST, "/users/jdoe123/keys/101", admin, None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server::route(&state, request(Method::GET, "/keys/101/owner", admin, None)).await;
    assert_eq!(body_json(response).await["pid"], "jdoe123");

    let response = server::route(&state, request(Method::PATCH, "/keys/101/return", admin, None)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");

    let response = server::route(
        &state,
        request(Method::GET, "/keys?is_available=false", admin, None),
    )
    .await;
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["tag_number"], "101");

    // Holders may drop their own keys
    let response = server::route(
        &state,
        request(Method::DELETE, "/users/jdoe123/keys/101", Some("jdoe123"), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server::route(&state, request(Method::PATCH, "/keys/101/return", admin, None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server::route(&state, request(Method::GET, "/audit", admin, None)).await;
    let report = body_json(response).await;
    assert_eq!(report["checked_keys"], 1);
    assert_eq!(report["dangling_references"], json!([]));
}

#[tokio::test]
async fn test_unknown_body_field_is_invalid_input() {
    let state = state().await;
    let response = server::route(
        &state,
        request(
            Method::POST,
            "/users",
            Some("adm001"),
            Some(json!({"pid": "jdoe123", "full_name": "Jane Doe", "is_admin": true})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_name_segment_cannot_be_a_pid() {
    let state = state().await;
    let response = server::route(
        &state,
        request(
            Method::POST,
            "/users",
            Some("adm001"),
            Some(json!({"pid": "name", "full_name": "Nat Name"})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_name_lookup_decodes_path() {
    let state = state().await;
    let response = server::route(
        &state,
        request(Method::GET, "/users/name/Ada%20Admin", Some("adm001"), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["pid"], "adm001");
}

#[tokio::test]
async fn test_cas_callback_provisions_and_sets_cookie() {
    let state = state().await;

    let response = server::route(
        &state,
        request(
            Method::GET,
            "/cas/login_callback?destination=http%3A%2F%2Flocalhost%3A3000%2F&ticket=ST-good",
            None,
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "http://localhost:3000/");
    let cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with("kms_session="));

    let response = server::route(&state, request(Method::GET, "/cas/info", Some("newbie42"), None)).await;
    let info = body_json(response).await;
    assert_eq!(info["full_name"], "NA");
    assert_eq!(info["role"], "requestor");

    let response = server::route(
        &state,
        request(
            Method::GET,
            "/cas/login_callback?destination=http%3A%2F%2Flocalhost%3A3000%2F&ticket=ST-bad",
            None,
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_requires_destination() {
    let state = state().await;
    let response = server::route(&state, request(Method::GET, "/cas/login", None, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server::route(
        &state,
        request(Method::GET, "/cas/login?destination=http%3A%2F%2Fapp.test%2F", None, None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(response.headers()[LOCATION]
        .to_str()
        .unwrap()
        .starts_with("https://cas.test/login"));
}

#[tokio::test]
async fn test_email_admin_address_round() {
    let state = state().await;
    let response = server::route(
        &state,
        request(Method::PATCH, "/email/keys%40cs.example.edu", Some("adm001"), None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server::route(&state, request(Method::GET, "/email", Some("adm001"), None)).await;
    assert_eq!(body_json(response).await["admin_email"], "keys@cs.example.edu");
}
