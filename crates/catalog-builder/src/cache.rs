//! Daily genre-pool cache.
//!
//! The working pools the orchestrator merges into: one list of books per
//! genre, persisted as a single document after every batch.

use crate::error::CatalogError;
use crate::merge::{merge_into_pool, MergeOutcome};
use crate::persist;
use crate::store::shuffle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{CanonicalBook, Config, GenreKey};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// One genre's working pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenrePool {
    pub books: Vec<CanonicalBook>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted snapshot of every pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCacheDocument {
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub genres: BTreeMap<GenreKey, GenrePool>,
}

impl DailyCacheDocument {
    pub fn total_books(&self) -> usize {
        self.genres.values().map(|pool| pool.books.len()).sum()
    }
}

/// Cache manager for the genre pools
pub struct DailyCache {
    path: PathBuf,
    document: Mutex<DailyCacheDocument>,
}

impl DailyCache {
    /// Load the pools at `path`; a missing or corrupt file starts empty.
    ///
    /// Reads with blocking `std::fs`, so call it at startup only.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = persist::read_json::<DailyCacheDocument>(&path).unwrap_or_default();
        info!(
            path = %path.display(),
            genres = document.genres.len(),
            books = document.total_books(),
            "Daily cache loaded"
        );

        Self {
            path,
            document: Mutex::new(document),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::load(config.daily_cache_path())
    }

    fn document(&self) -> MutexGuard<'_, DailyCacheDocument> {
        self.document.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Books in `genre`'s pool
    pub fn pool(&self, genre: &GenreKey) -> Vec<CanonicalBook> {
        self.document()
            .genres
            .get(genre)
            .map(|pool| pool.books.clone())
            .unwrap_or_default()
    }

    pub fn pool_len(&self, genre: &GenreKey) -> usize {
        self.document()
            .genres
            .get(genre)
            .map(|pool| pool.books.len())
            .unwrap_or(0)
    }

    /// Additively merge `incoming` into `genre`'s pool; returns the counts
    /// and the pool size afterwards
    pub fn merge(&self, genre: &GenreKey, incoming: Vec<CanonicalBook>) -> (MergeOutcome, usize) {
        let mut doc = self.document();
        let now = Utc::now();
        let pool = doc.genres.entry(genre.clone()).or_insert_with(|| GenrePool {
            books: Vec::new(),
            updated_at: now,
        });

        let outcome = merge_into_pool(&mut pool.books, incoming);
        pool.updated_at = now;
        debug!(
            genre = %genre,
            added = outcome.added,
            improved = outcome.improved,
            total = pool.books.len(),
            "Pool merged"
        );
        (outcome, pool.books.len())
    }

    /// Up to `count` random books from `genre`'s pool
    pub fn sample(&self, genre: &GenreKey, count: usize) -> Vec<CanonicalBook> {
        let mut books = self.pool(genre);
        shuffle(&mut books);
        books.truncate(count);
        books
    }

    pub fn snapshot(&self) -> DailyCacheDocument {
        self.document().clone()
    }

    /// Stamp the generation time and write the pools
    pub async fn save(&self) -> Result<(), CatalogError> {
        let bytes = {
            let mut doc = self.document();
            doc.generated_at = Some(Utc::now());
            serde_json::to_vec_pretty(&*doc)?
        };
        persist::write_atomic(&self.path, &bytes).await
    }

    pub fn stats(&self) -> CacheStats {
        let doc = self.document();
        CacheStats {
            generated_at: doc.generated_at,
            total_books: doc.total_books(),
            genres: doc
                .genres
                .iter()
                .map(|(genre, pool)| {
                    (
                        genre.clone(),
                        PoolStats {
                            count: pool.books.len(),
                            updated_at: pool.updated_at,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Per-genre pool statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub generated_at: Option<DateTime<Utc>>,
    pub total_books: usize,
    pub genres: BTreeMap<GenreKey, PoolStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    fn book(title: &str, isbn13: &str) -> CanonicalBook {
        let mut book = CanonicalBook::new(title, vec!["Ursula K. Le Guin".to_string()]);
        book.isbn13 = Some(isbn13.to_string());
        book
    }

    #[test]
    fn test_merge_grows_pool() -> Result<()> {
        let dir = TempDir::new()?;
        let cache = DailyCache::load(dir.path().join("daily_cache.json"));
        let fantasy = GenreKey::new("fantasy");

        let (_, total) = cache.merge(&fantasy, vec![book("A Wizard of Earthsea", "9780547773742")]);
        assert_eq!(total, 1);

        let (outcome, total) = cache.merge(
            &fantasy,
            vec![
                book("A Wizard of Earthsea", "9780547773742"),
                book("The Tombs of Atuan", "9781481465564"),
            ],
        );
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.kept, 1);
        assert_eq!(total, 2);
        assert_eq!(cache.pool_len(&fantasy), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_and_reload() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("daily_cache.json");
        let cache = DailyCache::load(&path);
        cache.merge(&GenreKey::new("fantasy"), vec![book("Tehanu", "9781481465595")]);

        cache.save().await?;

        let reloaded = DailyCache::load(&path);
        assert_eq!(reloaded.pool_len(&GenreKey::new("fantasy")), 1);
        assert!(reloaded.stats().generated_at.is_some());
        assert_eq!(reloaded.snapshot(), cache.snapshot());
        Ok(())
    }

    #[test]
    fn test_stats_and_sample() -> Result<()> {
        let dir = TempDir::new()?;
        let cache = DailyCache::load(dir.path().join("daily_cache.json"));
        let fantasy = GenreKey::new("fantasy");
        cache.merge(
            &fantasy,
            vec![
                book("A Wizard of Earthsea", "9780547773742"),
                book("The Tombs of Atuan", "9781481465564"),
                book("The Farthest Shore", "9781481465588"),
            ],
        );

        let stats = cache.stats();
        assert_eq!(stats.total_books, 3);
        assert_eq!(stats.genres[&fantasy].count, 3);
        assert_eq!(stats.generated_at, None);

        assert_eq!(cache.sample(&fantasy, 2).len(), 2);
        assert!(cache.sample(&GenreKey::new("horror"), 2).is_empty());
        Ok(())
    }
}
