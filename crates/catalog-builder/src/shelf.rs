//! Shelf and list page scraper.
//!
//! Walks the paginated shelf or list pages of the catalog site and extracts
//! raw book stubs (title, author, cover guess). Failures never abort a
//! scrape: whatever was gathered before the failure is returned.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use shared::config::ScraperConfig;
use shared::{normalize_text, BookStub};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Upper bound on pages requested for one scrape
const MAX_PAGES: usize = 500;

/// Kind of catalog page a source points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Shelf,
    List,
}

impl SourceKind {
    pub fn as_str(&self) -> &str {
        match self {
            SourceKind::Shelf => "shelf",
            SourceKind::List => "list",
        }
    }
}

/// A scrapeable source, written as `shelf:<name>` or `list:<id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShelfSource {
    pub kind: SourceKind,
    pub id: String,
}

impl FromStr for ShelfSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid source '{}': expected kind:id", s))?;
        let kind = match kind.trim() {
            "shelf" => SourceKind::Shelf,
            "list" => SourceKind::List,
            other => return Err(anyhow!("Invalid source kind '{}' in '{}'", other, s)),
        };
        let id = id.trim();
        if id.is_empty() {
            return Err(anyhow!("Invalid source '{}': empty id", s));
        }
        Ok(Self {
            kind,
            id: id.to_string(),
        })
    }
}

impl std::fmt::Display for ShelfSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl ShelfSource {
    /// URL of the given 1-based page
    pub fn page_url(&self, base_url: &str, page: usize) -> String {
        format!(
            "{}/{}/show/{}?page={}",
            base_url.trim_end_matches('/'),
            self.kind.as_str(),
            self.id,
            page
        )
    }
}

/// Fetches the HTML body of a page
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Page fetcher over HTTP
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// CSS selectors for one page layout
struct PageSelectors {
    row: Selector,
    title: Selector,
    author: Selector,
    cover: Selector,
}

impl PageSelectors {
    fn for_kind(kind: SourceKind) -> Result<Self> {
        let row = match kind {
            SourceKind::Shelf => "div.elementList",
            SourceKind::List => "tr[itemtype=\"http://schema.org/Book\"]",
        };

        Ok(Self {
            row: parse_selector(row)?,
            title: parse_selector("a.bookTitle")?,
            author: parse_selector("a.authorName")?,
            cover: parse_selector("img")?,
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow!("Invalid selector '{}': {:?}", s, e))
}

static SERIES_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\([^()]*#\d+(\.\d+)?\)\s*$").expect("valid regex"));
static THUMBNAIL_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\._[A-Z]{2}\d+_\.").expect("valid regex"));

fn element_text(element: &ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop a trailing "(Series, #1)" marker from a shelf title
pub fn clean_title(raw: &str) -> String {
    SERIES_SUFFIX.replace(raw.trim(), "").trim().to_string()
}

/// Turn a list thumbnail URL into the full-size image URL
pub fn upgrade_thumbnail(url: &str) -> String {
    THUMBNAIL_SIZE.replace(url, ".").to_string()
}

/// Parse one page into stubs, dropping rows without a title or author
pub fn parse_page(kind: SourceKind, html: &str) -> Result<Vec<BookStub>> {
    let selectors = PageSelectors::for_kind(kind)?;
    let document = Html::parse_document(html);
    let mut stubs = Vec::new();

    for row in document.select(&selectors.row) {
        let title = row
            .select(&selectors.title)
            .next()
            .map(|el| clean_title(&element_text(&el)))
            .unwrap_or_default();
        let author = row
            .select(&selectors.author)
            .next()
            .map(|el| element_text(&el))
            .unwrap_or_default();

        if title.is_empty() || author.is_empty() {
            continue;
        }

        let source_cover_guess = row
            .select(&selectors.cover)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(upgrade_thumbnail);

        stubs.push(BookStub {
            title,
            author,
            source_cover_guess,
        });
    }

    Ok(stubs)
}

/// Scraper timing and page-size settings
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub base_url: String,
    pub page_delay: Duration,
    pub max_page_retries: u32,
    pub retry_delay: Duration,
    pub shelf_page_size: usize,
    pub list_page_size: usize,
}

impl From<&ScraperConfig> for ScrapeOptions {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            page_delay: Duration::from_millis(config.page_delay_ms),
            max_page_retries: config.max_page_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            shelf_page_size: config.shelf_page_size.max(1),
            list_page_size: config.list_page_size.max(1),
        }
    }
}

impl ScrapeOptions {
    fn page_size(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::Shelf => self.shelf_page_size,
            SourceKind::List => self.list_page_size,
        }
    }
}

/// Paginating shelf/list scraper
pub struct ShelfScraper {
    fetcher: Arc<dyn PageFetcher>,
    options: ScrapeOptions,
}

impl ShelfScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>, options: ScrapeOptions) -> Self {
        Self { fetcher, options }
    }

    pub fn from_config(config: &ScraperConfig) -> Result<Self> {
        let fetcher = HttpPageFetcher::new(config)?;
        Ok(Self::new(Arc::new(fetcher), ScrapeOptions::from(config)))
    }

    /// Collect up to `count` stubs from `source`.
    ///
    /// Pages until `count` stubs are gathered, a page comes back empty (end
    /// of data) or a page exhausts its retries; the last two return what was
    /// gathered so far.
    pub async fn scrape(&self, source: &ShelfSource, count: usize) -> Vec<BookStub> {
        let page_size = self.options.page_size(source.kind);

        info!(
            source = %source,
            count = count,
            page_size = page_size,
            "Scraping source"
        );

        let mut stubs = Vec::with_capacity(count);
        let mut seen = HashSet::new();

        for page in 1..=MAX_PAGES {
            if stubs.len() >= count {
                break;
            }
            if page > 1 {
                sleep(self.options.page_delay).await;
            }

            let url = source.page_url(&self.options.base_url, page);
            let Some(html) = self.fetch_with_retry(&url).await else {
                warn!(
                    source = %source,
                    page = page,
                    gathered = stubs.len(),
                    "Page retries exhausted, returning partial results"
                );
                break;
            };

            let parsed = match parse_page(source.kind, &html) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(source = %source, page = page, error = %e, "Failed to parse page");
                    break;
                }
            };

            if parsed.is_empty() {
                debug!(source = %source, page = page, "Empty page, end of data");
                break;
            }

            for stub in parsed {
                if stubs.len() >= count {
                    break;
                }
                let identity = (normalize_text(&stub.title), normalize_text(&stub.author));
                if seen.insert(identity) {
                    stubs.push(stub);
                }
            }

            debug!(source = %source, page = page, gathered = stubs.len(), "Page scraped");
        }

        info!(source = %source, stubs = stubs.len(), "Scrape complete");
        stubs
    }

    /// Fetch a page with linear backoff, `None` once retries are spent
    async fn fetch_with_retry(&self, url: &str) -> Option<String> {
        for attempt in 1..=self.options.max_page_retries {
            match self.fetcher.fetch(url).await {
                Ok(html) => return Some(html),
                Err(e) => {
                    warn!(url = %url, attempt = attempt, error = %e, "Page fetch failed");
                    if attempt < self.options.max_page_retries {
                        sleep(self.options.retry_delay * attempt).await;
                    }
                }
            }
        }
        None
    }
}
