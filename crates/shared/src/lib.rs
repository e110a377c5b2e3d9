//! Shared library for the book catalog builder.
//!
//! This crate provides common functionality used by the catalog crates:
//! - Configuration management
//! - Book data models and text normalization
//! - ISBN helpers
//! - Logging infrastructure

pub mod config;
pub mod isbn;
pub mod logging;
pub mod models;

// Re-export commonly used types
pub use config::{Config, GenreConfig};
pub use logging::LogConfig;
pub use models::*;

/// Common result type using anyhow::Error
pub type Result<T> = anyhow::Result<T>;
