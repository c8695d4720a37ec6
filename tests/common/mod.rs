#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use courseorganizer::authentication::{AuthContext, Claims};
use courseorganizer::config::Config;
use courseorganizer::memory_store::MemoryStore;
use courseorganizer::storage::MemoryBucket;
use courseorganizer::{create_app, AppState};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-secret";

pub struct TestApp {
    pub app: Router,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryBucket>,
    pub auth: Arc<AuthContext>,
}

pub fn test_app() -> TestApp {
    test_app_with(|_| None)
}

/// Memory-backed app; `overrides` is consulted before the test defaults.
pub fn test_app_with(overrides: impl Fn(&str) -> Option<String>) -> TestApp {
    let config = Config::from_lookup(|key| {
        overrides(key).or_else(|| match key {
            "JWT_SECRET" => Some(JWT_SECRET.to_string()),
            "STORE_BACKEND" => Some("memory".to_string()),
            "STORAGE_BACKEND" => Some("memory".to_string()),
            _ => None,
        })
    })
    .expect("test config");

    let store = Arc::new(MemoryStore::new());
    let storage = Arc::new(MemoryBucket::new());
    let auth = Arc::new(AuthContext::new(JWT_SECRET, None));
    let state = AppState {
        store: store.clone(),
        storage: storage.clone(),
        auth: auth.clone(),
    };

    TestApp {
        app: create_app(state, &config),
        store,
        storage,
        auth,
    }
}

pub fn token_for(user: Uuid) -> String {
    let claims = Claims {
        sub: user,
        email: Some(format!("{}@example.com", user.simple())),
        exp: (Utc::now().timestamp() + 3600) as u64,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).expect("encode token")
}

pub fn json_request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub fn upload_request(uri: &str, token: &str, filename: &str, mime_type: &str, data: &[u8]) -> Request<Body> {
    let boundary = "organizer-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n", filename).as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(body))
        .expect("request")
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let body = hyper::body::to_bytes(response.into_body()).await.expect("read body").to_vec();
    TestResponse { status, headers, body }
}

pub async fn create_course(app: &Router, token: &str, title: &str) -> Value {
    let response = send(
        app,
        json_request(Method::POST, "/v1/courses", Some(token), Some(serde_json::json!({ "title": title }))),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED, "create course {}", title);
    response.json()
}
