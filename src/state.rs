//! Application state traits for dependency injection
//!
//! Handlers and extractors are generic over these traits so the same code
//! runs against the production `AppState` and lighter test states.

use crate::config::Config;
use crate::jwt::TokenService;
use crate::service::AuthService;
use metrics_exporter_prometheus::PrometheusHandle;

/// States that can verify bearer tokens.
pub trait HasTokens: Clone + Send + Sync + 'static {
    fn token_service(&self) -> &TokenService;
}

/// Trait for application state that provides access to all services.
pub trait HasServices: HasTokens {
    /// Get the application configuration
    fn config(&self) -> &Config;

    /// Get the authentication service
    fn auth_service(&self) -> &AuthService;

    /// Prometheus handle, when a recorder is installed
    fn prometheus_handle(&self) -> Option<&PrometheusHandle>;
}
