//! Cryptographic utilities for Portico Core

pub mod password;

pub use password::{Argon2PasswordHasher, PasswordHasher};
