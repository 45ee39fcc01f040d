//! Domain models for Portico Core

pub mod user;

pub use user::*;
