//! Configuration management for Portico Core
//!
//! Every component receives its slice of [`Config`] by value at construction
//! time. Nothing reads the environment after startup.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server host
    pub http_host: String,
    /// HTTP server port
    pub http_port: u16,
    /// Debug mode: error envelopes carry internal detail
    pub debug: bool,
    /// Prefix for the API routes
    pub api_prefix: String,
    /// Allowed CORS origins (empty disables CORS)
    pub cors_origins: Vec<String>,
    /// JWT configuration
    pub jwt: JwtConfig,
    /// Redis configuration (shared rate limit store)
    pub redis: Option<RedisConfig>,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Content-type / payload-size validation
    pub request_validation: RequestValidationConfig,
    /// SQL injection screening
    pub injection_screen: InjectionScreenConfig,
    /// Security response headers
    pub security_headers: SecurityHeadersConfig,
    /// Request logging and timing
    pub request_logging: RequestLoggingConfig,
    /// Unexpected error alerting
    pub error_alert: ErrorAlertConfig,
    /// Logging and metrics
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub private_key_pem: Option<String>,
    pub public_key_pem: Option<String>,
    /// Single-use refresh tokens
    pub rotate_refresh_tokens: bool,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "portico".to_string(),
            access_token_ttl_secs: 60 * 60 * 24 * 8,
            refresh_token_ttl_secs: 60 * 60 * 24 * 30,
            private_key_pem: None,
            public_key_pem: None,
            rotate_refresh_tokens: true,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,
    /// Default requests per window
    pub default_requests: u64,
    /// Window size in seconds
    pub window_secs: u64,
    /// Per-route limits keyed by request path
    pub routes: HashMap<String, u64>,
    /// Paths that are never limited
    pub exempt_paths: HashSet<String>,
    /// Derive the client key from X-Forwarded-For / X-Real-IP
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_requests: 100,
            window_secs: 60,
            routes: HashMap::new(),
            exempt_paths: default_exempt_paths(),
            trust_forwarded_for: false,
        }
    }
}

impl RateLimitConfig {
    /// Limit for a path: the route override if declared, the default otherwise.
    pub fn limit_for(&self, path: &str) -> u64 {
        self.routes
            .get(path)
            .copied()
            .unwrap_or(self.default_requests)
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.contains(path)
    }
}

#[derive(Debug, Clone)]
pub struct RequestValidationConfig {
    pub max_body_bytes: usize,
    pub allowed_content_types: HashSet<String>,
}

impl Default for RequestValidationConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 1024 * 1024,
            allowed_content_types: [
                "application/json",
                "application/x-www-form-urlencoded",
                "multipart/form-data",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InjectionScreenConfig {
    pub enabled: bool,
    /// Reject suspicious requests (otherwise only log them)
    pub block_suspicious: bool,
    /// Field names whose values are opaque credentials and never screened
    pub exempt_fields: HashSet<String>,
}

impl Default for InjectionScreenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_suspicious: true,
            exempt_fields: ["password", "refresh_token", "access_token"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityHeadersConfig {
    pub hsts_enabled: bool,
    /// Only emit HSTS for requests that arrived over HTTPS
    pub hsts_https_only: bool,
    pub hsts_trust_x_forwarded_proto: bool,
    pub hsts_max_age_secs: u64,
    pub hsts_include_subdomains: bool,
    pub hsts_preload: bool,
    pub content_security_policy: String,
    pub permissions_policy: String,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            hsts_enabled: true,
            hsts_https_only: false,
            hsts_trust_x_forwarded_proto: true,
            hsts_max_age_secs: 31_536_000,
            hsts_include_subdomains: true,
            hsts_preload: false,
            content_security_policy: "default-src 'self'".to_string(),
            permissions_policy: "geolocation=(), microphone=()".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestLoggingConfig {
    /// Paths that produce no request/response log lines
    pub exclude_paths: HashSet<String>,
    /// Header names masked in logs (lowercase)
    pub sensitive_headers: HashSet<String>,
    pub slow_request_threshold: Duration,
}

impl Default for RequestLoggingConfig {
    fn default() -> Self {
        Self {
            exclude_paths: default_exempt_paths(),
            sensitive_headers: ["authorization", "cookie"]
                .into_iter()
                .map(String::from)
                .collect(),
            slow_request_threshold: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorAlertConfig {
    pub threshold: u64,
    pub interval_secs: u64,
}

impl Default for ErrorAlertConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// "json" or "pretty"
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: "pretty".to_string(),
            metrics_enabled: false,
        }
    }
}

fn default_exempt_paths() -> HashSet<String> {
    ["/health", "/metrics"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|s| matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|s| {
        s.split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    })
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    parse_value(name, env::var(name).ok(), default)
}

/// Unset means the default; a value that is set but does not parse is an error.
fn parse_value<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {name}: {raw:?}")),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let jwt_defaults = JwtConfig::default();
        let rate_defaults = RateLimitConfig::default();
        let validation_defaults = RequestValidationConfig::default();
        let screen_defaults = InjectionScreenConfig::default();
        let headers_defaults = SecurityHeadersConfig::default();
        let logging_defaults = RequestLoggingConfig::default();
        let alert_defaults = ErrorAlertConfig::default();

        Ok(Self {
            http_host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "9527".to_string())
                .parse()
                .context("Invalid HTTP_PORT")?,
            debug: env_bool("APP_DEBUG", false),
            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),
            cors_origins: env_list("CORS_ORIGINS").unwrap_or_default(),
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").context("JWT_SECRET is required")?,
                issuer: env::var("JWT_ISSUER").unwrap_or(jwt_defaults.issuer),
                access_token_ttl_secs: env_parse(
                    "JWT_ACCESS_TOKEN_TTL_SECS",
                    jwt_defaults.access_token_ttl_secs,
                )?,
                refresh_token_ttl_secs: env_parse(
                    "JWT_REFRESH_TOKEN_TTL_SECS",
                    jwt_defaults.refresh_token_ttl_secs,
                )?,
                private_key_pem: env::var("JWT_PRIVATE_KEY")
                    .ok()
                    .map(|value| value.replace("\\n", "\n")),
                public_key_pem: env::var("JWT_PUBLIC_KEY")
                    .ok()
                    .map(|value| value.replace("\\n", "\n")),
                rotate_refresh_tokens: env_bool(
                    "JWT_REFRESH_ROTATION",
                    jwt_defaults.rotate_refresh_tokens,
                ),
            },
            redis: env::var("REDIS_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .map(|url| RedisConfig { url }),
            rate_limit: {
                let routes: HashMap<String, u64> = match env::var("RATE_LIMIT_ROUTES") {
                    Ok(raw) => serde_json::from_str(&raw).context("Invalid RATE_LIMIT_ROUTES")?,
                    Err(_) => HashMap::new(),
                };

                RateLimitConfig {
                    enabled: env_bool("RATE_LIMIT_ENABLED", rate_defaults.enabled),
                    default_requests: env_parse(
                        "RATE_LIMIT_DEFAULT_REQUESTS",
                        rate_defaults.default_requests,
                    )?,
                    window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", rate_defaults.window_secs)?,
                    routes,
                    exempt_paths: env_list("RATE_LIMIT_EXEMPT_PATHS")
                        .map(|v| v.into_iter().collect())
                        .unwrap_or(rate_defaults.exempt_paths),
                    trust_forwarded_for: env_bool("TRUST_FORWARDED_FOR", false),
                }
            },
            request_validation: RequestValidationConfig {
                max_body_bytes: env_parse(
                    "REQUEST_MAX_BODY_BYTES",
                    validation_defaults.max_body_bytes,
                )?,
                allowed_content_types: env_list("REQUEST_ALLOWED_CONTENT_TYPES")
                    .map(|v| v.into_iter().map(|t| t.to_lowercase()).collect())
                    .unwrap_or(validation_defaults.allowed_content_types),
            },
            injection_screen: InjectionScreenConfig {
                enabled: env_bool("INJECTION_SCREEN_ENABLED", screen_defaults.enabled),
                block_suspicious: env_bool(
                    "INJECTION_SCREEN_BLOCK",
                    screen_defaults.block_suspicious,
                ),
                exempt_fields: env_list("INJECTION_SCREEN_EXEMPT_FIELDS")
                    .map(|v| v.into_iter().collect())
                    .unwrap_or(screen_defaults.exempt_fields),
            },
            security_headers: SecurityHeadersConfig {
                hsts_enabled: env_bool("HSTS_ENABLED", headers_defaults.hsts_enabled),
                hsts_https_only: env_bool("HSTS_HTTPS_ONLY", headers_defaults.hsts_https_only),
                hsts_trust_x_forwarded_proto: env_bool(
                    "HSTS_TRUST_X_FORWARDED_PROTO",
                    headers_defaults.hsts_trust_x_forwarded_proto,
                ),
                hsts_max_age_secs: env_parse(
                    "HSTS_MAX_AGE_SECS",
                    headers_defaults.hsts_max_age_secs,
                )?,
                hsts_include_subdomains: env_bool(
                    "HSTS_INCLUDE_SUBDOMAINS",
                    headers_defaults.hsts_include_subdomains,
                ),
                hsts_preload: env_bool("HSTS_PRELOAD", headers_defaults.hsts_preload),
                ..headers_defaults
            },
            request_logging: RequestLoggingConfig {
                exclude_paths: env_list("LOG_EXCLUDE_PATHS")
                    .map(|v| v.into_iter().collect())
                    .unwrap_or(logging_defaults.exclude_paths),
                sensitive_headers: env_list("LOG_SENSITIVE_HEADERS")
                    .map(|v| v.into_iter().map(|h| h.to_lowercase()).collect())
                    .unwrap_or(logging_defaults.sensitive_headers),
                slow_request_threshold: Duration::from_millis(env_parse(
                    "SLOW_REQUEST_THRESHOLD_MS",
                    1000,
                )?),
            },
            error_alert: ErrorAlertConfig {
                threshold: env_parse("ERROR_ALERT_THRESHOLD", alert_defaults.threshold)?,
                interval_secs: env_parse(
                    "ERROR_ALERT_INTERVAL_SECS",
                    alert_defaults.interval_secs,
                )?,
            },
            telemetry: TelemetryConfig {
                log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
                metrics_enabled: env_bool("METRICS_ENABLED", false),
            },
        })
    }

    /// Get HTTP server address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// A configuration usable without any environment (tests, embedding).
    pub fn with_secret(secret: &str) -> Self {
        Self {
            http_host: "127.0.0.1".to_string(),
            http_port: 9527,
            debug: false,
            api_prefix: "/api".to_string(),
            cors_origins: Vec::new(),
            jwt: JwtConfig {
                secret: secret.to_string(),
                ..JwtConfig::default()
            },
            redis: None,
            rate_limit: RateLimitConfig::default(),
            request_validation: RequestValidationConfig::default(),
            injection_screen: InjectionScreenConfig::default(),
            security_headers: SecurityHeadersConfig::default(),
            request_logging: RequestLoggingConfig::default(),
            error_alert: ErrorAlertConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}
