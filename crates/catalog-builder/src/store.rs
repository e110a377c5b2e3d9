//! Master catalog store.
//!
//! One persisted JSON document holding every canonical book, keyed by ISBN-13
//! (or a synthetic key when there is none), plus a genre index derived from
//! each book's genre set. The document lives in memory; mutations schedule a
//! debounced write and `save()` forces one.

use crate::error::CatalogError;
use crate::merge::{absorb, is_improvement};
use crate::persist;
use crate::validator::{validate, RejectReason};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use shared::{CanonicalBook, Config, GenreKey};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Current on-disk document version
pub const CATALOG_VERSION: u32 = 1;

/// Aggregate counts, maintained incrementally on every mutation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total_books: usize,
    pub books_with_isbn: usize,
    pub books_with_cover: usize,
    #[serde(default)]
    pub genre_counts: BTreeMap<GenreKey, usize>,
    #[serde(default)]
    pub last_scrape_timestamp: BTreeMap<GenreKey, DateTime<Utc>>,
}

impl CatalogStats {
    fn count_book(&mut self, book: &CanonicalBook) {
        self.total_books += 1;
        if book.isbn13.is_some() {
            self.books_with_isbn += 1;
        }
        if book.has_real_cover() {
            self.books_with_cover += 1;
        }
    }

    fn uncount_book(&mut self, book: &CanonicalBook) {
        self.total_books = self.total_books.saturating_sub(1);
        if book.isbn13.is_some() {
            self.books_with_isbn = self.books_with_isbn.saturating_sub(1);
        }
        if book.has_real_cover() {
            self.books_with_cover = self.books_with_cover.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogDocument {
    version: u32,
    last_update_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    books: BTreeMap<String, CanonicalBook>,
    #[serde(default)]
    genre_index: BTreeMap<GenreKey, Vec<String>>,
    #[serde(default)]
    stats: CatalogStats,
}

impl Default for CatalogDocument {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION,
            last_update_timestamp: None,
            books: BTreeMap::new(),
            genre_index: BTreeMap::new(),
            stats: CatalogStats::default(),
        }
    }
}

/// Debounced-save state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Clean,
    Dirty,
    FlushScheduled,
}

#[derive(Debug)]
struct FlushControl {
    state: FlushState,
    /// Bumped on every mutation; a flush waits until it stops moving
    generation: u64,
}

/// Result of [`MasterStore::add`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted { key: String },
    Merged { key: String, improved: bool },
}

impl AddOutcome {
    pub fn key(&self) -> &str {
        match self {
            AddOutcome::Inserted { key } | AddOutcome::Merged { key, .. } => key,
        }
    }
}

/// A book removed by [`MasterStore::cleanup_invalid`]
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedBook {
    pub key: String,
    pub title: String,
    pub reason: RejectReason,
}

/// Per-genre view of the master catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenreSummary {
    pub count: usize,
    pub last_scrape: Option<DateTime<Utc>>,
}

/// Master catalog statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterStats {
    pub total_books: usize,
    pub books_with_isbn: usize,
    pub books_with_cover: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub genres: BTreeMap<GenreKey, GenreSummary>,
}

struct StoreInner {
    path: PathBuf,
    debounce: Duration,
    document: Mutex<CatalogDocument>,
    flush: Mutex<FlushControl>,
    /// Serializes writers so two renames never race on the temp file
    write_lock: tokio::sync::Mutex<()>,
    saves: AtomicU64,
}

/// Shared handle to the master catalog
#[derive(Clone)]
pub struct MasterStore {
    inner: Arc<StoreInner>,
}

impl MasterStore {
    /// Load the catalog at `path`; a missing or corrupt file yields an empty store.
    ///
    /// Reads with blocking `std::fs`, so call it at startup only.
    pub fn load(path: impl Into<PathBuf>, debounce: Duration) -> Self {
        let path = path.into();
        let document = persist::read_json::<CatalogDocument>(&path).unwrap_or_default();
        let store = Self::with_document(path, debounce, document);

        store.rebuild_genre_index();
        let stats = store.stats();
        info!(
            path = %store.path().display(),
            books = stats.total_books,
            genres = stats.genres.len(),
            "Master catalog loaded"
        );
        store
    }

    pub fn from_config(config: &Config) -> Self {
        Self::load(
            config.master_cache_path(),
            Duration::from_millis(config.catalog.save_debounce_ms),
        )
    }

    fn with_document(path: PathBuf, debounce: Duration, document: CatalogDocument) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                path,
                debounce,
                document: Mutex::new(document),
                flush: Mutex::new(FlushControl {
                    state: FlushState::Clean,
                    generation: 0,
                }),
                write_lock: tokio::sync::Mutex::new(()),
                saves: AtomicU64::new(0),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn len(&self) -> usize {
        self.inner.document().books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<CanonicalBook> {
        self.inner.document().books.get(key).cloned()
    }

    /// Key of a stored book matching `title` and `author` after normalization.
    ///
    /// Linear scan over the catalog.
    pub fn exists(&self, title: &str, author: &str) -> Option<String> {
        let doc = self.inner.document();
        doc.books
            .iter()
            .find(|(_, book)| book.matches_title_author(title, author))
            .map(|(key, _)| key.clone())
    }

    /// Insert `candidate`, or merge it into the stored book with the same key.
    ///
    /// Genres are unioned. Metadata is only overwritten when the candidate is
    /// an improvement.
    pub fn add(&self, mut candidate: CanonicalBook, genres: &[GenreKey]) -> AddOutcome {
        let now = Utc::now();
        let mut wanted: BTreeSet<GenreKey> = std::mem::take(&mut candidate.genres);
        wanted.extend(genres.iter().cloned());

        let outcome = {
            let mut doc = self.inner.document();
            let CatalogDocument {
                books,
                genre_index,
                stats,
                last_update_timestamp,
                ..
            } = &mut *doc;

            let existing = candidate
                .key()
                .map(str::to_string)
                .and_then(|key| books.get_mut(&key).map(|book| (key, book)));

            let outcome = match existing {
                Some((key, book)) => {
                    let improved = is_improvement(book, &candidate);
                    if improved {
                        let had_cover = book.has_real_cover();
                        absorb(book, &candidate);
                        if book.has_real_cover() && !had_cover {
                            stats.books_with_cover += 1;
                        }
                    }
                    book.last_verified_at = now;
                    for genre in &wanted {
                        tag(book, &key, genre, genre_index, stats);
                    }
                    AddOutcome::Merged { key, improved }
                }
                None => {
                    let key = match &candidate.isbn13 {
                        Some(isbn13) => {
                            candidate.synthetic_key = None;
                            isbn13.clone()
                        }
                        None => {
                            let key = synthetic_key();
                            candidate.synthetic_key = Some(key.clone());
                            key
                        }
                    };
                    candidate.added_at = now;
                    candidate.last_verified_at = now;
                    stats.count_book(&candidate);
                    for genre in &wanted {
                        tag(&mut candidate, &key, genre, genre_index, stats);
                    }
                    books.insert(key.clone(), candidate);
                    AddOutcome::Inserted { key }
                }
            };

            *last_update_timestamp = Some(now);
            outcome
        };

        debug!(key = %outcome.key(), outcome = ?outcome, "Catalog add");
        self.schedule_save();
        outcome
    }

    /// Record a fresh sighting of a stored book under `genre`: stamps
    /// `last_verified_at` and tags the genre. Returns whether the genre was
    /// new; unknown keys are ignored.
    pub fn confirm(&self, key: &str, genre: &GenreKey) -> bool {
        let added = {
            let mut doc = self.inner.document();
            let CatalogDocument {
                books,
                genre_index,
                stats,
                last_update_timestamp,
                ..
            } = &mut *doc;

            let Some(book) = books.get_mut(key) else {
                return false;
            };
            let now = Utc::now();
            book.last_verified_at = now;
            *last_update_timestamp = Some(now);
            tag(book, key, genre, genre_index, stats)
        };

        self.schedule_save();
        added
    }

    /// Up to `count` random books of `genre`; order differs between calls
    pub fn sample(&self, genre: &GenreKey, count: usize) -> Vec<CanonicalBook> {
        let doc = self.inner.document();
        let mut keys = doc.genre_index.get(genre).cloned().unwrap_or_default();
        shuffle(&mut keys);

        keys.iter()
            .take(count)
            .filter_map(|key| doc.books.get(key).cloned())
            .collect()
    }

    /// Every book of `genre`, in index order
    pub fn genre_books(&self, genre: &GenreKey) -> Vec<CanonicalBook> {
        let doc = self.inner.document();
        doc.genre_index
            .get(genre)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| doc.books.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn genre_len(&self, genre: &GenreKey) -> usize {
        self.inner
            .document()
            .genre_index
            .get(genre)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Stamp the genre's last scrape time
    pub fn record_scrape(&self, genre: &GenreKey) {
        {
            let mut doc = self.inner.document();
            let now = Utc::now();
            doc.stats.last_scrape_timestamp.insert(genre.clone(), now);
            doc.last_update_timestamp = Some(now);
        }
        self.schedule_save();
    }

    /// Re-validate every stored book and drop the ones that fail
    pub fn cleanup_invalid(&self) -> Vec<RemovedBook> {
        let removed = {
            let mut doc = self.inner.document();
            let failing: Vec<(String, RejectReason)> = doc
                .books
                .iter()
                .filter_map(|(key, book)| validate(book).reason.map(|reason| (key.clone(), reason)))
                .collect();

            let mut removed = Vec::with_capacity(failing.len());
            for (key, reason) in failing {
                let CatalogDocument {
                    books,
                    genre_index,
                    stats,
                    ..
                } = &mut *doc;
                let Some(book) = books.remove(&key) else {
                    continue;
                };
                stats.uncount_book(&book);
                for genre in &book.genres {
                    if let Some(keys) = genre_index.get_mut(genre) {
                        keys.retain(|k| k != &key);
                    }
                    if let Some(count) = stats.genre_counts.get_mut(genre) {
                        *count = count.saturating_sub(1);
                    }
                }
                removed.push(RemovedBook {
                    key,
                    title: book.title,
                    reason,
                });
            }

            if !removed.is_empty() {
                doc.genre_index.retain(|_, keys| !keys.is_empty());
                doc.stats.genre_counts.retain(|_, count| *count > 0);
                doc.last_update_timestamp = Some(Utc::now());
            }
            removed
        };

        if !removed.is_empty() {
            info!(removed = removed.len(), "Removed invalid catalog entries");
            self.schedule_save();
        }
        removed
    }

    /// Derive the genre index (and counts) from the books' genre sets
    pub fn rebuild_genre_index(&self) {
        let mut doc = self.inner.document();

        let mut ordered: Vec<(&String, &CanonicalBook)> = doc.books.iter().collect();
        ordered.sort_by(|a, b| a.1.added_at.cmp(&b.1.added_at).then_with(|| a.0.cmp(b.0)));

        let mut index: BTreeMap<GenreKey, Vec<String>> = BTreeMap::new();
        let mut stats = CatalogStats {
            last_scrape_timestamp: doc.stats.last_scrape_timestamp.clone(),
            ..CatalogStats::default()
        };
        for (key, book) in ordered {
            stats.count_book(book);
            for genre in &book.genres {
                index.entry(genre.clone()).or_default().push(key.clone());
                *stats.genre_counts.entry(genre.clone()).or_default() += 1;
            }
        }

        if index != doc.genre_index {
            warn!("Genre index drifted from book genres, rebuilt it");
        }
        doc.genre_index = index;
        doc.stats = stats;
    }

    /// Whether the genre index and the books' genre sets agree exactly
    pub fn index_consistent(&self) -> bool {
        let doc = self.inner.document();

        let forward = doc.genre_index.iter().all(|(genre, keys)| {
            let unique: BTreeSet<&String> = keys.iter().collect();
            unique.len() == keys.len()
                && keys.iter().all(|key| {
                    doc.books
                        .get(key)
                        .map(|book| book.genres.contains(genre))
                        .unwrap_or(false)
                })
        });

        let backward = doc.books.iter().all(|(key, book)| {
            book.genres.iter().all(|genre| {
                doc.genre_index
                    .get(genre)
                    .map(|keys| keys.contains(key))
                    .unwrap_or(false)
            })
        });

        forward && backward
    }

    pub fn stats(&self) -> MasterStats {
        let doc = self.inner.document();
        let mut genres: BTreeMap<GenreKey, GenreSummary> = doc
            .genre_index
            .iter()
            .map(|(genre, keys)| {
                (
                    genre.clone(),
                    GenreSummary {
                        count: keys.len(),
                        last_scrape: doc.stats.last_scrape_timestamp.get(genre).copied(),
                    },
                )
            })
            .collect();
        for (genre, at) in &doc.stats.last_scrape_timestamp {
            genres.entry(genre.clone()).or_insert(GenreSummary {
                count: 0,
                last_scrape: Some(*at),
            });
        }

        MasterStats {
            total_books: doc.stats.total_books,
            books_with_isbn: doc.stats.books_with_isbn,
            books_with_cover: doc.stats.books_with_cover,
            last_update: doc.last_update_timestamp,
            genres,
        }
    }

    /// Incrementally maintained counts, as persisted
    pub fn raw_stats(&self) -> CatalogStats {
        self.inner.document().stats.clone()
    }

    /// Write the catalog now; failures propagate
    pub async fn save(&self) -> Result<(), CatalogError> {
        let generation = self.inner.flush().generation;
        self.inner.write().await?;

        let mut flush = self.inner.flush();
        if flush.generation == generation && flush.state == FlushState::Dirty {
            flush.state = FlushState::Clean;
        }
        Ok(())
    }

    /// Arm a debounced write; bursts of calls coalesce into one write
    pub fn schedule_save(&self) {
        let mut flush = self.inner.flush();
        flush.generation += 1;

        if flush.state == FlushState::Clean {
            flush.state = FlushState::Dirty;
        }
        if flush.state != FlushState::Dirty {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                flush.state = FlushState::FlushScheduled;
                handle.spawn(self.inner.clone().run_flusher());
            }
            Err(_) => debug!("No async runtime, leaving catalog dirty"),
        }
    }

    pub fn flush_state(&self) -> FlushState {
        self.inner.flush().state
    }

    /// Completed writes, explicit and debounced
    pub fn save_count(&self) -> u64 {
        self.inner.saves.load(Ordering::SeqCst)
    }
}

impl StoreInner {
    fn document(&self) -> MutexGuard<'_, CatalogDocument> {
        self.document.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn flush(&self) -> MutexGuard<'_, FlushControl> {
        self.flush.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn write(&self) -> Result<(), CatalogError> {
        let _writer = self.write_lock.lock().await;
        let bytes = {
            let doc = self.document();
            serde_json::to_vec_pretty(&*doc)?
        };
        persist::write_atomic(&self.path, &bytes).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run_flusher(self: Arc<Self>) {
        loop {
            let target = loop {
                let seen = self.flush().generation;
                sleep(self.debounce).await;
                if self.flush().generation == seen {
                    break seen;
                }
            };

            let result = self.write().await;
            if let Err(e) = &result {
                warn!(path = %self.path.display(), error = %e, "Debounced catalog save failed");
            }

            let settled = {
                let mut flush = self.flush();
                if flush.generation == target {
                    flush.state = if result.is_ok() {
                        FlushState::Clean
                    } else {
                        FlushState::Dirty
                    };
                    true
                } else {
                    false
                }
            };
            if settled {
                return;
            }
        }
    }
}

/// Add `genre` to `book` and the index; returns whether it was new
fn tag(
    book: &mut CanonicalBook,
    key: &str,
    genre: &GenreKey,
    index: &mut BTreeMap<GenreKey, Vec<String>>,
    stats: &mut CatalogStats,
) -> bool {
    if !book.genres.insert(genre.clone()) {
        return false;
    }
    index.entry(genre.clone()).or_default().push(key.to_string());
    *stats.genre_counts.entry(genre.clone()).or_default() += 1;
    true
}

/// Fisher-Yates shuffle in place
pub fn shuffle<T>(items: &mut [T]) {
    let mut rng = rand::thread_rng();
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Identity for a book without an ISBN-13
fn synthetic_key() -> String {
    format!(
        "syn-{}-{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}
