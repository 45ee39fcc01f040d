//! Common test utilities
//!
//! Drives the production router in-process through `oneshot`: in-memory
//! users, a manual clock and a local rate limiter. No network, no Redis.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use portico_core::clock::{Clock, ManualClock};
use portico_core::config::Config;
use portico_core::crypto::PasswordHasher;
use portico_core::ratelimit::LocalRateLimiter;
use portico_core::repository::InMemoryUserStore;
use portico_core::server::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "test-secret-key-for-http-testing";
pub const START: i64 = 1_700_000_000;

/// Reversible "hash" so tests don't pay for Argon2.
pub struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, plain: &str) -> portico_core::Result<String> {
        Ok(format!("plain:{plain}"))
    }

    fn verify(&self, plain: &str, digest: &str) -> bool {
        digest == format!("plain:{plain}")
    }
}

pub fn test_config() -> Config {
    Config::with_secret(TEST_SECRET)
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: ManualClock,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = ManualClock::at_timestamp(START);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let state = AppState::new(
            config,
            Arc::new(InMemoryUserStore::new()),
            Arc::new(PlainHasher),
            shared.clone(),
            Arc::new(LocalRateLimiter::new(shared)),
        )
        .expect("test state");

        Self {
            router: build_router(state.clone()),
            state,
            clock,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            json,
        }
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> TestResponse {
        self.send_json(Method::POST, path, body, None).await
    }

    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: &Value,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn register(&self, email: &str, username: &str, password: &str) -> TestResponse {
        self.post_json(
            "/api/auth/register",
            &json!({
                "email": email,
                "username": username,
                "password": password,
            }),
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> TestResponse {
        self.post_json(
            "/api/auth/login",
            &json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Register a user and return the `(access, refresh)` tokens from logging in.
    pub async fn register_and_login(&self, email: &str, password: &str) -> (String, String) {
        let username = email.split('@').next().unwrap_or("user");
        let registered = self.register(email, &format!("{username}-user"), password).await;
        assert_eq!(registered.status, StatusCode::CREATED, "{:?}", registered.json);

        let login = self.login(email, password).await;
        assert_eq!(login.status, StatusCode::OK, "{:?}", login.json);
        (
            login.json["access_token"].as_str().unwrap().to_string(),
            login.json["refresh_token"].as_str().unwrap().to_string(),
        )
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn error_code(&self) -> u64 {
        self.json["error_code"].as_u64().unwrap_or_default()
    }
}
