//! Business logic layer

pub mod auth;

pub use auth::AuthService;
