//! Metadata search API client.
//!
//! This module provides a queued, credential-rotating client for the
//! volumes search API that enrichment resolves book stubs against.

pub mod client;
pub mod rate_limiter;
pub mod transport;
pub mod types;

pub use client::{ClientOptions, ClientStats, MetadataClient};
pub use rate_limiter::RateLimiter;
pub use transport::{GoogleBooksTransport, MetadataTransport, SearchError};
pub use types::*;
