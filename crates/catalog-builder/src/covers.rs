//! Cover and rating providers.
//!
//! Covers are resolved through an ordered chain of providers; the first one
//! returning a non-placeholder image wins. Every provider swallows its own
//! failures, so a broken source only costs a log line.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use shared::config::CoverConfig;
use shared::{is_placeholder_cover, isbn};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What a cover provider gets to work with
#[derive(Debug, Clone, Copy)]
pub struct CoverQuery<'a> {
    pub title: &'a str,
    pub author: &'a str,
    pub isbn13: Option<&'a str>,
    /// Thumbnail from the metadata hit, if any
    pub thumbnail: Option<&'a str>,
}

/// One link in the cover fallback chain
#[async_trait]
pub trait CoverProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn find_cover(&self, query: &CoverQuery<'_>) -> Option<String>;
}

/// Ordered cover providers, short-circuiting on the first usable image
#[derive(Clone, Default)]
pub struct CoverChain {
    providers: Vec<Arc<dyn CoverProvider>>,
}

impl CoverChain {
    pub fn new(providers: Vec<Arc<dyn CoverProvider>>) -> Self {
        Self { providers }
    }

    /// Community API, public cover probe, metadata thumbnail, retailer guess
    pub fn from_config(config: &CoverConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .build()
            .context("Failed to create cover HTTP client")?;

        let providers: Vec<Arc<dyn CoverProvider>> = vec![
            Arc::new(CommunityCoverProvider::new(client.clone(), &config.community_base_url)),
            Arc::new(PublicCoverProvider::new(
                client.clone(),
                &config.public_covers_base_url,
                config.min_image_bytes,
            )),
            Arc::new(ThumbnailProvider),
            Arc::new(RetailerCoverProvider::new(
                client,
                &config.retailer_base_url,
                config.min_image_bytes,
            )),
        ];

        Ok(Self::new(providers))
    }

    pub async fn resolve(&self, query: &CoverQuery<'_>) -> Option<String> {
        for provider in &self.providers {
            if let Some(url) = provider.find_cover(query).await {
                if !is_placeholder_cover(&url) {
                    debug!(provider = provider.name(), title = %query.title, "Cover resolved");
                    return Some(url);
                }
            }
        }
        None
    }
}

/// Whether `url` serves an image of at least `min_bytes`
async fn probe_image(client: &Client, url: &str, min_bytes: u64) -> bool {
    match client.head(url).send().await {
        Ok(response) if response.status().is_success() => response
            .content_length()
            .map(|len| len >= min_bytes)
            .unwrap_or(true),
        Ok(response) => {
            debug!(url = %url, status = %response.status(), "Cover probe missed");
            false
        }
        Err(e) => {
            debug!(url = %url, error = %e, "Cover probe failed");
            false
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommunityCoverResponse {
    url: Option<String>,
}

/// Books-community cover lookup by ISBN, or by title and author
pub struct CommunityCoverProvider {
    client: Client,
    base_url: String,
}

impl CommunityCoverProvider {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn lookup_url(&self, query: &CoverQuery<'_>) -> String {
        match query.isbn13 {
            Some(isbn13) => format!("{}/{}", self.base_url, isbn13),
            None => format!(
                "{}?book_title={}&author_name={}",
                self.base_url,
                urlencoding::encode(query.title),
                urlencoding::encode(query.author)
            ),
        }
    }
}

#[async_trait]
impl CoverProvider for CommunityCoverProvider {
    fn name(&self) -> &str {
        "community"
    }

    async fn find_cover(&self, query: &CoverQuery<'_>) -> Option<String> {
        let url = self.lookup_url(query);
        let response = self.client.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json::<CommunityCoverResponse>().await.ok()?.url
    }
}

/// Public cover-by-ISBN service, probed before use
pub struct PublicCoverProvider {
    client: Client,
    base_url: String,
    min_bytes: u64,
}

impl PublicCoverProvider {
    pub fn new(client: Client, base_url: &str, min_bytes: u64) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            min_bytes,
        }
    }
}

#[async_trait]
impl CoverProvider for PublicCoverProvider {
    fn name(&self) -> &str {
        "public"
    }

    async fn find_cover(&self, query: &CoverQuery<'_>) -> Option<String> {
        let isbn13 = query.isbn13?;
        let url = format!("{}/isbn/{}-L.jpg", self.base_url, isbn13);
        let probe = format!("{}?default=false", url);
        probe_image(&self.client, &probe, self.min_bytes)
            .await
            .then_some(url)
    }
}

/// The metadata hit's own thumbnail
pub struct ThumbnailProvider;

#[async_trait]
impl CoverProvider for ThumbnailProvider {
    fn name(&self) -> &str {
        "thumbnail"
    }

    async fn find_cover(&self, query: &CoverQuery<'_>) -> Option<String> {
        query.thumbnail.map(str::to_string)
    }
}

/// Retailer image URL guessed from the ISBN-10, probed before use
pub struct RetailerCoverProvider {
    client: Client,
    base_url: String,
    min_bytes: u64,
}

impl RetailerCoverProvider {
    pub fn new(client: Client, base_url: &str, min_bytes: u64) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            min_bytes,
        }
    }

    fn guess_url(&self, isbn13: &str) -> Option<String> {
        let isbn10 = isbn::isbn13_to_isbn10(isbn13)?;
        Some(format!("{}/{}.01.L.jpg", self.base_url, isbn10))
    }
}

#[async_trait]
impl CoverProvider for RetailerCoverProvider {
    fn name(&self) -> &str {
        "retailer"
    }

    async fn find_cover(&self, query: &CoverQuery<'_>) -> Option<String> {
        let url = self.guess_url(query.isbn13?)?;
        probe_image(&self.client, &url, self.min_bytes)
            .await
            .then_some(url)
    }
}

/// Aggregate rating from a secondary provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    pub average: f64,
    pub count: u32,
}

/// Secondary source of ratings for books the metadata API has none for
#[async_trait]
pub trait RatingsProvider: Send + Sync {
    async fn lookup(&self, isbn13: &str) -> Result<Option<Rating>>;
}

#[derive(Debug, Deserialize)]
struct EditionResponse {
    #[serde(default)]
    works: Vec<WorkRef>,
}

#[derive(Debug, Deserialize)]
struct WorkRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct RatingsResponse {
    summary: RatingsSummary,
}

#[derive(Debug, Deserialize)]
struct RatingsSummary {
    average: Option<f64>,
    #[serde(default)]
    count: u32,
}

/// Ratings from the public library catalog: edition → work → ratings
pub struct OpenLibraryRatings {
    client: Client,
    base_url: String,
}

impl OpenLibraryRatings {
    pub fn from_config(config: &CoverConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .build()
            .context("Failed to create ratings HTTP client")?;

        Ok(Self {
            client,
            base_url: config.ratings_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RatingsProvider for OpenLibraryRatings {
    async fn lookup(&self, isbn13: &str) -> Result<Option<Rating>> {
        let edition_url = format!("{}/isbn/{}.json", self.base_url, isbn13);
        let response = self.client.get(&edition_url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let edition: EditionResponse = response.error_for_status()?.json().await?;

        let work = edition
            .works
            .first()
            .ok_or_else(|| anyhow!("Edition {} has no work", isbn13))?;
        let ratings_url = format!("{}{}/ratings.json", self.base_url, work.key);
        let ratings: RatingsResponse = self
            .client
            .get(&ratings_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(ratings
            .summary
            .average
            .filter(|average| *average > 0.0)
            .map(|average| Rating {
                average,
                count: ratings.summary.count,
            }))
    }
}
