use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use studyhub_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    services::AppState,
    store::{MemoryQuizStore, MemorySubmissionStore, MemoryTaskStore},
};

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

/// App over in-memory stores; no live MongoDB or Redis needed.
pub fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::WARN)
        .try_init();

    let config = Config::for_tests();
    let state = Arc::new(AppState::with_stores(
        config,
        Arc::new(MemoryQuizStore::new()),
        Arc::new(MemorySubmissionStore::new()),
        Arc::new(MemoryTaskStore::new()),
        None,
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

pub fn token_for(claims: JwtClaims) -> String {
    JwtService::new("test-secret")
        .generate_token(claims)
        .expect("token generation")
}

pub fn teacher_claims(sub: &str) -> JwtClaims {
    base_claims(sub, "teacher")
}

pub fn student_claims(sub: &str, grade: i32) -> JwtClaims {
    let mut claims = base_claims(sub, "student");
    claims.grade = Some(grade);
    claims
}

fn base_claims(sub: &str, role: &str) -> JwtClaims {
    let now = Utc::now().timestamp() as usize;
    JwtClaims {
        sub: sub.to_string(),
        role: role.to_string(),
        email: format!("{}@example.com", sub),
        grade: None,
        other_grade: None,
        program: None,
        school_id: None,
        exp: now + 3600,
        iat: now,
    }
}

pub async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    token: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token));

    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).expect("request build"))
        .await
        .expect("request dispatch");

    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collect")
        .to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}
