//! Cache generation: the per-genre scrape → enrich → validate → store
//! pipelines, run in fixed-width batches with persistence between batches.

use crate::api::{ClientStats, MetadataClient};
use crate::cache::{CacheStats, DailyCache, DailyCacheDocument};
use crate::enrichment::Enricher;
use crate::error::CatalogError;
use crate::shelf::{ShelfScraper, ShelfSource};
use crate::store::{MasterStats, MasterStore};
use crate::validator::validate;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use shared::config::GenerationConfig;
use shared::{BookStub, CanonicalBook, Config, GenreConfig, GenreKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Batch and pipeline sizing
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub batch_width: usize,
    pub initial_count: usize,
    pub refresh_count: usize,
    pub enrich_concurrency: usize,
}

impl From<&GenerationConfig> for GenerationOptions {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            batch_width: config.batch_width.max(1),
            initial_count: config.initial_count,
            refresh_count: config.refresh_count,
            enrich_concurrency: config.enrich_concurrency.max(1),
        }
    }
}

/// How a genre pipeline treats books already in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Large scrape, everything enriched
    Initial,
    /// Small scrape, known books only re-tagged
    Incremental,
}

/// Outcome of one genre pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenreReport {
    pub genre: GenreKey,
    pub scraped: usize,
    pub skipped_existing: usize,
    pub not_found: usize,
    pub rejected: usize,
    pub stored: usize,
    /// Books new to the genre's pool
    pub books_added: usize,
    pub total_in_genre: usize,
    pub error: Option<String>,
}

impl GenreReport {
    fn new(genre: GenreKey) -> Self {
        Self {
            genre,
            scraped: 0,
            skipped_existing: 0,
            not_found: 0,
            rejected: 0,
            stored: 0,
            books_added: 0,
            total_in_genre: 0,
            error: None,
        }
    }
}

/// Result of refreshing one genre
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub genre: GenreKey,
    pub books_added: usize,
    pub total_in_genre: usize,
    pub generated_at: DateTime<Utc>,
}

/// Result of a multi-genre run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub batches_total: usize,
    pub batches_completed: usize,
    pub stopped_early: bool,
    pub genres: Vec<GenreReport>,
    pub snapshot: DailyCacheDocument,
}

impl GenerationReport {
    pub fn failed_genres(&self) -> impl Iterator<Item = &GenreReport> {
        self.genres.iter().filter(|g| g.error.is_some())
    }
}

/// Drives the genre pipelines over the shared client, store and pools
pub struct CacheGenerator {
    genres: Vec<GenreConfig>,
    scraper: ShelfScraper,
    enricher: Enricher,
    store: MasterStore,
    daily: DailyCache,
    options: GenerationOptions,
    stop_requested: AtomicBool,
}

impl CacheGenerator {
    pub fn new(
        genres: Vec<GenreConfig>,
        scraper: ShelfScraper,
        enricher: Enricher,
        store: MasterStore,
        daily: DailyCache,
        options: GenerationOptions,
    ) -> Self {
        Self {
            genres,
            scraper,
            enricher,
            store,
            daily,
            options,
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Wire up the HTTP-backed services described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Arc::new(
            MetadataClient::from_config(&config.metadata)
                .context("Failed to create metadata client")?,
        );
        let enricher = Enricher::from_config(client, &config.covers)
            .context("Failed to create enrichment providers")?;
        let scraper =
            ShelfScraper::from_config(&config.scraper).context("Failed to create shelf scraper")?;

        Ok(Self::new(
            config.genres.clone(),
            scraper,
            enricher,
            MasterStore::from_config(config),
            DailyCache::from_config(config),
            GenerationOptions::from(&config.generation),
        ))
    }

    pub fn store(&self) -> &MasterStore {
        &self.store
    }

    /// Random books of `genre`; unknown or empty genres give an empty list.
    ///
    /// Falls back to the daily pool while the master index has nothing.
    pub fn get_books(&self, genre: &str, count: usize) -> Vec<CanonicalBook> {
        let key = GenreKey::new(genre);
        let books = self.store.sample(&key, count);
        if !books.is_empty() {
            return books;
        }

        let books = self.daily.sample(&key, count);
        if books.is_empty() {
            debug!(genre = %key, "No books available for genre");
        }
        books
    }

    /// Incrementally refresh one genre and persist the result
    pub async fn refresh_genre(&self, genre: &str) -> Result<RefreshReport, CatalogError> {
        let config = self.genre_config(genre)?.clone();
        let report = self.run_genre(&config, RunMode::Incremental).await;
        self.persist().await?;

        Ok(RefreshReport {
            genre: report.genre,
            books_added: report.books_added,
            total_in_genre: report.total_in_genre,
            generated_at: Utc::now(),
        })
    }

    /// Incrementally refresh every configured genre
    pub async fn refresh_all(&self) -> Result<GenerationReport, CatalogError> {
        self.run_batches(RunMode::Incremental).await
    }

    /// Build the daily cache for every genre.
    ///
    /// Runs the initial population when forced or when the catalog is
    /// empty, an incremental sweep otherwise.
    pub async fn generate_daily_cache(
        &self,
        force_initial: bool,
    ) -> Result<GenerationReport, CatalogError> {
        let mode = if force_initial || self.store.is_empty() {
            RunMode::Initial
        } else {
            RunMode::Incremental
        };
        self.run_batches(mode).await
    }

    /// Finish the running batch, then skip the rest
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.daily.stats()
    }

    pub fn master_stats(&self) -> MasterStats {
        self.store.stats()
    }

    pub fn metadata_stats(&self) -> ClientStats {
        self.enricher.client().stats()
    }

    fn genre_config(&self, genre: &str) -> Result<&GenreConfig, CatalogError> {
        let key = GenreKey::new(genre);
        self.genres
            .iter()
            .find(|g| GenreKey::new(&g.key) == key)
            .ok_or(CatalogError::UnknownGenre(key))
    }

    async fn run_batches(&self, mode: RunMode) -> Result<GenerationReport, CatalogError> {
        let started_at = Utc::now();
        let batches: Vec<&[GenreConfig]> = self.genres.chunks(self.options.batch_width).collect();
        let mut report = GenerationReport {
            mode,
            started_at,
            finished_at: started_at,
            batches_total: batches.len(),
            batches_completed: 0,
            stopped_early: false,
            genres: Vec::new(),
            snapshot: DailyCacheDocument::default(),
        };

        info!(
            mode = ?mode,
            genres = self.genres.len(),
            batches = batches.len(),
            "Starting cache generation"
        );

        for (index, batch) in batches.iter().enumerate() {
            if self.stop_requested.load(Ordering::SeqCst) {
                warn!(
                    completed = index,
                    remaining = batches.len() - index,
                    "Stopping before next batch"
                );
                report.stopped_early = true;
                break;
            }

            let keys: Vec<&str> = batch.iter().map(|g| g.key.as_str()).collect();
            info!(batch = index + 1, of = batches.len(), genres = ?keys, "Running batch");

            let results = join_all(batch.iter().map(|genre| self.run_genre(genre, mode))).await;
            report.genres.extend(results);

            if let Err(e) = self.persist().await {
                self.stop_requested.store(false, Ordering::SeqCst);
                return Err(e);
            }
            report.batches_completed += 1;
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        report.finished_at = Utc::now();
        report.snapshot = self.daily.snapshot();

        let failed = report.failed_genres().count();
        info!(
            batches = report.batches_completed,
            genres = report.genres.len(),
            failed = failed,
            books = report.snapshot.total_books(),
            "Cache generation finished"
        );
        Ok(report)
    }

    /// Run one genre pipeline; failures become an empty contribution
    async fn run_genre(&self, genre: &GenreConfig, mode: RunMode) -> GenreReport {
        let key = GenreKey::new(&genre.key);
        let span = info_span!("genre", genre = %key);

        async {
            match self.genre_pipeline(genre, &key, mode).await {
                Ok(report) => {
                    info!(
                        scraped = report.scraped,
                        skipped = report.skipped_existing,
                        stored = report.stored,
                        added = report.books_added,
                        total = report.total_in_genre,
                        "Genre pipeline complete"
                    );
                    report
                }
                Err(e) => {
                    warn!(error = %format!("{:#}", e), "Genre pipeline failed");
                    let mut report = GenreReport::new(key.clone());
                    report.total_in_genre = self.daily.pool_len(&key);
                    report.error = Some(format!("{:#}", e));
                    report
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn genre_pipeline(
        &self,
        genre: &GenreConfig,
        key: &GenreKey,
        mode: RunMode,
    ) -> Result<GenreReport> {
        let source: ShelfSource = genre
            .source
            .parse()
            .with_context(|| format!("Genre '{}' has an unusable source", key))?;
        let count = match mode {
            RunMode::Initial => self.options.initial_count,
            RunMode::Incremental => self.options.refresh_count,
        };

        let stubs = self.scraper.scrape(&source, count).await;
        self.store.record_scrape(key);

        let mut report = GenreReport::new(key.clone());
        report.scraped = stubs.len();

        let mut pool_incoming = Vec::new();
        let mut to_enrich: Vec<BookStub> = Vec::new();
        for stub in stubs {
            if mode == RunMode::Incremental {
                if let Some(existing) = self.store.exists(&stub.title, &stub.author) {
                    self.store.confirm(&existing, key);
                    pool_incoming.extend(self.store.get(&existing));
                    report.skipped_existing += 1;
                    continue;
                }
            }
            to_enrich.push(stub);
        }

        let enriched: Vec<(BookStub, Option<CanonicalBook>)> = stream::iter(to_enrich)
            .map(|stub| async move {
                let candidate = self.enricher.enrich(&stub).await;
                (stub, candidate)
            })
            .buffered(self.options.enrich_concurrency)
            .collect()
            .await;

        for (stub, candidate) in enriched {
            let Some(candidate) = candidate else {
                debug!(title = %stub.title, author = %stub.author, "No metadata match");
                report.not_found += 1;
                continue;
            };

            if let Some(reason) = validate(&candidate).reason {
                debug!(title = %candidate.title, reason = %reason, "Candidate rejected");
                report.rejected += 1;
                continue;
            }

            let outcome = self.store.add(candidate, std::slice::from_ref(key));
            report.stored += 1;
            pool_incoming.extend(self.store.get(outcome.key()));
        }

        let (merged, total) = self.daily.merge(key, pool_incoming);
        report.books_added = merged.added;
        report.total_in_genre = total;
        Ok(report)
    }

    /// Write the pools and the master catalog
    async fn persist(&self) -> Result<(), CatalogError> {
        self.daily.save().await?;
        self.store.save().await
    }
}
