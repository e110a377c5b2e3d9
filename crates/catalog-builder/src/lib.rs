//! Book catalog builder library.
//!
//! Scrapes shelf and list pages, enriches each stub against a rate-limited
//! metadata search API, validates the result and merges it into a persisted,
//! genre-indexed master catalog. `CacheGenerator` drives the whole pipeline
//! in batches of genres.

pub mod api;
pub mod cache;
pub mod covers;
pub mod enrichment;
pub mod error;
pub mod generator;
pub mod merge;
pub mod persist;
pub mod shelf;
pub mod store;
pub mod validator;

pub use api::{MetadataClient, RateLimiter};
pub use cache::{CacheStats, DailyCache, DailyCacheDocument};
pub use covers::CoverChain;
pub use enrichment::Enricher;
pub use error::CatalogError;
pub use generator::{CacheGenerator, GenerationOptions, GenerationReport, RefreshReport, RunMode};
pub use shelf::{ShelfScraper, ShelfSource};
pub use store::{AddOutcome, MasterStats, MasterStore};
pub use validator::{validate, RejectReason, Validation};
