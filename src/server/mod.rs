//! Server initialization and routing

use crate::api;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::crypto::{Argon2PasswordHasher, PasswordHasher};
use crate::jwt::TokenService;
use crate::middleware::{pipeline::Pipeline, trace::SanitizedMakeSpan, ErrorAlerter};
use crate::ratelimit::{LocalRateLimiter, RateLimiter, RedisRateLimiter};
use crate::repository::{InMemoryUserStore, UserStore};
use crate::security::InjectionScreen;
use crate::service::AuthService;
use crate::state::{HasServices, HasTokens};
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub token_service: Arc<TokenService>,
    pub auth_service: Arc<AuthService>,
    pub pipeline: Pipeline,
    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire every component from explicit collaborators. No globals.
    pub fn new(
        config: Config,
        users: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Result<Self> {
        let token_service = Arc::new(
            TokenService::new(&config.jwt, clock).context("invalid JWT configuration")?,
        );
        let auth_service = Arc::new(AuthService::new(users, hasher, token_service.clone()));
        let screen = Arc::new(InjectionScreen::new().context("invalid injection pattern")?);
        let alerter = Arc::new(ErrorAlerter::new(&config.error_alert));
        let pipeline = Pipeline::new(&config, limiter, screen, alerter)?;

        Ok(Self {
            config: Arc::new(config),
            token_service,
            auth_service,
            pipeline,
            prometheus_handle: None,
        })
    }

    pub fn with_prometheus(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.prometheus_handle = handle;
        self
    }
}

impl HasTokens for AppState {
    fn token_service(&self) -> &TokenService {
        &self.token_service
    }
}

impl HasServices for AppState {
    fn config(&self) -> &Config {
        &self.config
    }

    fn auth_service(&self) -> &AuthService {
        &self.auth_service
    }

    fn prometheus_handle(&self) -> Option<&PrometheusHandle> {
        self.prometheus_handle.as_ref()
    }
}

/// Run the HTTP server
pub async fn run(config: Config, prometheus_handle: Option<PrometheusHandle>) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let limiter = rate_limiter(&config, clock.clone()).await;

    // Users live in memory; a persistent store plugs in through `UserStore`.
    let users: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());
    let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2PasswordHasher::new());

    let http_addr = config.http_addr();
    let state =
        AppState::new(config, users, hasher, clock, limiter)?.with_prometheus(prometheus_handle);
    let app = build_router(state);

    let listener = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("failed to bind {http_addr}"))?;
    info!("HTTP server started on {}", http_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Redis-backed limiter when `REDIS_URL` is set, otherwise process-local.
async fn rate_limiter(config: &Config, clock: Arc<dyn Clock>) -> Arc<dyn RateLimiter> {
    let Some(redis) = &config.redis else {
        info!("Rate limiting with in-process counters");
        return Arc::new(LocalRateLimiter::new(clock));
    };

    match RedisRateLimiter::connect(redis, clock.clone()).await {
        Ok(limiter) => {
            info!("Rate limiting with Redis counters");
            Arc::new(limiter)
        }
        Err(e) => {
            warn!(error = %e, "Redis unavailable, rate limiting with in-process counters");
            Arc::new(LocalRateLimiter::new(clock))
        }
    }
}

/// Build the HTTP router: routes, the middleware pipeline, CORS and tracing.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/register", post(api::auth::register::<AppState>))
        .route("/auth/login", post(api::auth::login::<AppState>))
        .route("/auth/refresh", post(api::auth::refresh::<AppState>))
        .route(
            "/auth/me",
            get(api::auth::me::<AppState>).put(api::auth::update_me::<AppState>),
        );

    let prefix = state.config.api_prefix.trim_end_matches('/');
    let router = Router::new()
        .route("/health", get(api::health::health))
        .route("/metrics", get(api::metrics::metrics_handler::<AppState>));
    let router = if prefix.is_empty() {
        router.merge(auth_routes)
    } else {
        router.nest(prefix, auth_routes)
    };

    let router = router
        .layer(DefaultBodyLimit::max(
            state.config.request_validation.max_body_bytes,
        ))
        .with_state(state.clone());
    let router = state.pipeline.apply(router);

    let router = match cors_layer(&state.config.cors_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };
    router.layer(TraceLayer::new_for_http().make_span_with(SanitizedMakeSpan))
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true),
    )
}
