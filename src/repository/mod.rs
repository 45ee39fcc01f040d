//! Data access layer (Repository pattern)

pub mod user;

pub use user::{InMemoryUserStore, UserStore};

use thiserror::Error;

/// Failures reported by a store backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend failure: {0}")]
    Backend(String),
}
