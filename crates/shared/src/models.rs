//! Data models for the catalog pipeline.
//!
//! This module defines the structures that flow between the scraper, the
//! enrichment engine, and the master catalog: raw shelf stubs, canonical
//! book records, and genre keys.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Canonical lowercase identifier for a content category
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenreKey(String);

impl GenreKey {
    /// Create a genre key, lowercasing and trimming the input
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(key.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GenreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GenreKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unenriched scrape result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookStub {
    pub title: String,
    pub author: String,
    pub source_cover_guess: Option<String>,
}

impl BookStub {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            source_cover_guess: None,
        }
    }
}

/// Fully enriched book record, as stored in the master catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalBook {
    pub title: String,
    pub authors: Vec<String>,
    pub isbn13: Option<String>,
    pub synthetic_key: Option<String>,
    pub cover_url: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub average_rating: f64,
    #[serde(default)]
    pub ratings_count: u32,
    pub published_date: Option<String>,
    pub page_count: Option<u32>,
    pub publisher: Option<String>,
    pub external_id: Option<String>,
    #[serde(default)]
    pub genres: BTreeSet<GenreKey>,
    pub added_at: DateTime<Utc>,
    pub last_verified_at: DateTime<Utc>,
}

impl CanonicalBook {
    /// Create a bare record with the given title and authors
    pub fn new(title: impl Into<String>, authors: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            title: title.into(),
            authors,
            isbn13: None,
            synthetic_key: None,
            cover_url: None,
            description: String::new(),
            average_rating: 0.0,
            ratings_count: 0,
            published_date: None,
            page_count: None,
            publisher: None,
            external_id: None,
            genres: BTreeSet::new(),
            added_at: now,
            last_verified_at: now,
        }
    }

    /// Storage key: the ISBN-13 when present, else the synthetic key
    pub fn key(&self) -> Option<&str> {
        self.isbn13.as_deref().or(self.synthetic_key.as_deref())
    }

    /// First listed author, or an empty string
    pub fn primary_author(&self) -> &str {
        self.authors.first().map(String::as_str).unwrap_or("")
    }

    /// Whether the record carries a usable (non-placeholder) cover
    pub fn has_real_cover(&self) -> bool {
        self.cover_url
            .as_deref()
            .map(|url| !is_placeholder_cover(url))
            .unwrap_or(false)
    }

    /// Whether `self` matches a title/author pair after normalization
    pub fn matches_title_author(&self, title: &str, author: &str) -> bool {
        let title = normalize_text(title);
        let author = normalize_text(author);
        normalize_text(&self.title) == title
            && self.authors.iter().any(|a| normalize_text(a) == author)
    }
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Lowercase and collapse whitespace runs into single spaces
pub fn normalize_text(value: &str) -> String {
    WHITESPACE
        .replace_all(value.trim(), " ")
        .to_lowercase()
}

/// Markers found in "no cover" images served by the various cover sources
const PLACEHOLDER_MARKERS: &[&str] = &[
    "nophoto",
    "no_photo",
    "no-cover",
    "nocover",
    "no_cover",
    "placeholder",
    "image_not_available",
    "default_cover",
];

/// Whether a cover URL points at a known placeholder image
pub fn is_placeholder_cover(url: &str) -> bool {
    let url = url.trim();
    if url.is_empty() {
        return true;
    }
    let lower = url.to_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|marker| lower.contains(marker))
}
