//! Portico Core - HTTP backend core
//!
//! This crate provides the request-processing pipeline (request context,
//! validation, rate limiting, injection screening, security headers, logging
//! and error translation) together with the JWT access/refresh token
//! lifecycle and the authentication endpoints built on top of them.

pub mod api;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod ratelimit;
pub mod repository;
pub mod security;
pub mod server;
pub mod service;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
