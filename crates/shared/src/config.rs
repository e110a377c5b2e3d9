//! Configuration management for the catalog builder.
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory settings
    pub data: DataConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Persisted catalog documents
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Metadata search API settings
    pub metadata: MetadataConfig,

    /// Shelf/list scraper settings
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Cover and rating fallback providers
    #[serde(default)]
    pub covers: CoverConfig,

    /// Batch generation settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Genres to maintain, with the shelf or list each one is scraped from
    #[serde(default = "default_genres")]
    pub genres: Vec<GenreConfig>,
}

/// Data directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root data directory path
    pub root_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log directory path (relative to data directory or absolute)
    pub log_dir: String,

    /// Default log level (trace, debug, info, warn, error)
    pub default_level: String,

    /// Enable console output
    pub console: bool,

    /// Enable file output
    pub file: bool,

    /// Enable JSON formatting for file logs
    pub json_format: bool,
}

/// Catalog persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Master catalog document (relative to data directory or absolute)
    pub master_file: String,

    /// Daily genre-pool document (relative to data directory or absolute)
    pub daily_cache_file: String,

    /// Quiet period before a debounced save is flushed
    pub save_debounce_ms: u64,
}

/// Metadata search API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Search API base URL
    pub base_url: String,

    /// API keys rotated through on HTTP 429 (empty = anonymous access)
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Minimum gap between the end of one call and the start of the next
    pub min_spacing_ms: u64,

    /// Maximum retries for transient failures
    pub max_retries: u32,

    /// Base delay for exponential backoff
    pub retry_delay_ms: u64,

    /// Full credential rotations tolerated before pausing
    pub max_rate_limit_rounds: u32,

    /// Length of the global pause once rotations are exhausted
    pub pause_seconds: u64,

    /// Results requested per search
    pub max_results: u32,

    /// Per-request timeout
    pub timeout_secs: u64,
}

/// Shelf scraper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Catalog site base URL
    pub base_url: String,

    /// User agent sent with page requests
    pub user_agent: String,

    /// Per-request timeout
    pub timeout_secs: u64,

    /// Fixed delay inserted between page fetches
    pub page_delay_ms: u64,

    /// Attempts per page before giving up on it
    pub max_page_retries: u32,

    /// Linear backoff step between page attempts
    pub retry_delay_ms: u64,

    /// Items per page on shelf pages
    pub shelf_page_size: usize,

    /// Items per page on list pages
    pub list_page_size: usize,
}

/// Cover/rating provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverConfig {
    /// Books-community cover lookup API
    pub community_base_url: String,

    /// Public cover-by-identifier service
    pub public_covers_base_url: String,

    /// Retailer image host used for cover guesses
    pub retailer_base_url: String,

    /// Secondary ratings provider
    pub ratings_base_url: String,

    /// Timeout for each probe
    pub probe_timeout_secs: u64,

    /// Bytes below which a probed image is treated as a placeholder
    pub min_image_bytes: u64,
}

/// Generation (orchestrator) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Genres processed concurrently per batch
    pub batch_width: usize,

    /// Stubs scraped per genre on initial population
    pub initial_count: usize,

    /// Stubs scraped per genre on incremental refresh
    pub refresh_count: usize,

    /// Stubs enriched concurrently within one genre pipeline
    pub enrich_concurrency: usize,
}

/// A maintained genre
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenreConfig {
    /// Canonical genre key
    pub key: String,

    /// Display name
    pub name: String,

    /// Source identifier, `shelf:<name>` or `list:<id>`
    pub source: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            master_file: "master_catalog.json".to_string(),
            daily_cache_file: "daily_cache.json".to_string(),
            save_debounce_ms: 2000,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.googleapis.com/books/v1".to_string(),
            api_keys: Vec::new(),
            min_spacing_ms: 1000,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_rate_limit_rounds: 3,
            pause_seconds: 300,
            max_results: 10,
            timeout_secs: 15,
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.goodreads.com".to_string(),
            user_agent: "Mozilla/5.0 (compatible; shelf-catalog/0.1)".to_string(),
            timeout_secs: 20,
            page_delay_ms: 1500,
            max_page_retries: 3,
            retry_delay_ms: 2000,
            shelf_page_size: 50,
            list_page_size: 100,
        }
    }
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            community_base_url: "https://bookcover.longitood.com/bookcover".to_string(),
            public_covers_base_url: "https://covers.openlibrary.org/b".to_string(),
            retailer_base_url: "https://images-na.ssl-images-amazon.com/images/P".to_string(),
            ratings_base_url: "https://openlibrary.org".to_string(),
            probe_timeout_secs: 8,
            min_image_bytes: 1000,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            batch_width: 4,
            initial_count: 100,
            refresh_count: 30,
            enrich_concurrency: 4,
        }
    }
}

fn genre(key: &str, name: &str, source: &str) -> GenreConfig {
    GenreConfig {
        key: key.to_string(),
        name: name.to_string(),
        source: source.to_string(),
    }
}

fn default_genres() -> Vec<GenreConfig> {
    vec![
        genre("fantasy", "Fantasy", "shelf:fantasy"),
        genre("scifi", "Science Fiction", "shelf:science-fiction"),
        genre("mystery", "Mystery", "shelf:mystery"),
        genre("thriller", "Thriller", "shelf:thriller"),
        genre("romance", "Romance", "shelf:romance"),
        genre("horror", "Horror", "shelf:horror"),
        genre("historical-fiction", "Historical Fiction", "shelf:historical-fiction"),
        genre("literary-fiction", "Literary Fiction", "shelf:literary-fiction"),
        genre("young-adult", "Young Adult", "shelf:young-adult"),
        genre("nonfiction", "Nonfiction", "shelf:non-fiction"),
        genre("biography", "Biography", "shelf:biography"),
        genre("classics", "Classics", "list:1.Best_Books_Ever"),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                root_dir: "data".to_string(),
            },
            logging: LoggingConfig {
                log_dir: "logs".to_string(),
                default_level: "info".to_string(),
                console: true,
                file: true,
                json_format: false,
            },
            catalog: CatalogConfig::default(),
            metadata: MetadataConfig::default(),
            scraper: ScraperConfig::default(),
            covers: CoverConfig::default(),
            generation: GenerationConfig::default(),
            genres: default_genres(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// If the file doesn't exist, returns the default configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            genres = config.genres.len(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration saved successfully"
        );

        Ok(())
    }

    /// Get the absolute path for the data directory
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data.root_dir)
    }

    /// Get the absolute path for the log directory
    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.logging.log_dir)
    }

    /// Get the path of the master catalog document
    pub fn master_cache_path(&self) -> PathBuf {
        self.resolve(&self.catalog.master_file)
    }

    /// Get the path of the daily genre-pool document
    pub fn daily_cache_path(&self) -> PathBuf {
        self.resolve(&self.catalog.daily_cache_file)
    }

    fn resolve(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir().join(path)
        }
    }
}
