//! Stub enrichment against the metadata search API.
//!
//! Turns a scraped title/author pair into a canonical record: a short list
//! of query formulations is tried in order, the best hit is picked, and the
//! cover and rating gaps are filled from the fallback providers.

use crate::api::{MetadataClient, Volume};
use crate::covers::{CoverChain, CoverQuery, OpenLibraryRatings, RatingsProvider};
use anyhow::Result;
use shared::config::CoverConfig;
use shared::{is_placeholder_cover, normalize_text, BookStub, CanonicalBook};
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves stubs into canonical book candidates
pub struct Enricher {
    client: Arc<MetadataClient>,
    covers: CoverChain,
    ratings: Option<Arc<dyn RatingsProvider>>,
}

impl Enricher {
    pub fn new(
        client: Arc<MetadataClient>,
        covers: CoverChain,
        ratings: Option<Arc<dyn RatingsProvider>>,
    ) -> Self {
        Self {
            client,
            covers,
            ratings,
        }
    }

    /// Build the default provider chain and ratings source over a shared client
    pub fn from_config(client: Arc<MetadataClient>, config: &CoverConfig) -> Result<Self> {
        let covers = CoverChain::from_config(config)?;
        let ratings: Arc<dyn RatingsProvider> = Arc::new(OpenLibraryRatings::from_config(config)?);
        Ok(Self::new(client, covers, Some(ratings)))
    }

    pub fn client(&self) -> &Arc<MetadataClient> {
        &self.client
    }

    /// Resolve `stub` to a candidate, or `None` when no formulation had a hit
    pub async fn enrich(&self, stub: &BookStub) -> Option<CanonicalBook> {
        let hits = self.search_hits(stub).await;
        let best = pick_best(&hits, stub)?;

        let mut candidate = best.to_candidate();
        let thumbnail = best.thumbnail();
        candidate.cover_url = self.resolve_cover(stub, &candidate, thumbnail.as_deref()).await;

        if candidate.average_rating <= 0.0 {
            self.fill_rating(&mut candidate).await;
        }

        debug!(
            title = %candidate.title,
            isbn13 = candidate.isbn13.as_deref().unwrap_or("-"),
            has_cover = candidate.cover_url.is_some(),
            "Stub enriched"
        );
        Some(candidate)
    }

    /// Hits of the first formulation that returns any
    async fn search_hits(&self, stub: &BookStub) -> Vec<Volume> {
        for query in query_formulations(stub) {
            match self.client.search(&query).await {
                Ok(hits) if !hits.is_empty() => return hits,
                Ok(_) => debug!(query = %query, "No hits"),
                Err(e) => warn!(query = %query, error = %e, "Search failed, trying next query"),
            }
        }

        debug!(title = %stub.title, author = %stub.author, "No metadata found");
        Vec::new()
    }

    async fn resolve_cover(
        &self,
        stub: &BookStub,
        candidate: &CanonicalBook,
        thumbnail: Option<&str>,
    ) -> Option<String> {
        let query = CoverQuery {
            title: &candidate.title,
            author: candidate.primary_author(),
            isbn13: candidate.isbn13.as_deref(),
            thumbnail,
        };
        if let Some(url) = self.covers.resolve(&query).await {
            return Some(url);
        }

        stub.source_cover_guess
            .as_deref()
            .filter(|guess| !is_placeholder_cover(guess))
            .or(thumbnail.filter(|thumb| !thumb.trim().is_empty()))
            .map(str::to_string)
    }

    async fn fill_rating(&self, candidate: &mut CanonicalBook) {
        let (Some(provider), Some(isbn13)) = (&self.ratings, candidate.isbn13.clone()) else {
            return;
        };

        match provider.lookup(&isbn13).await {
            Ok(Some(rating)) => {
                candidate.average_rating = rating.average;
                candidate.ratings_count = rating.count;
            }
            Ok(None) => {}
            Err(e) => debug!(isbn13 = %isbn13, error = %e, "Ratings lookup failed"),
        }
    }
}

/// Queries tried in order: field-scoped phrase, quoted pair, bare words
pub fn query_formulations(stub: &BookStub) -> Vec<String> {
    let title = stub.title.replace('"', "");
    let title = title.trim();
    let author = stub.author.replace('"', "");
    let author = author.trim();

    vec![
        format!("intitle:\"{}\" inauthor:\"{}\"", title, author),
        format!("\"{}\" \"{}\"", title, author),
        format!("{} {}", title, author),
    ]
}

/// Prefer a hit matching both title and author; otherwise the top hit
pub fn pick_best<'a>(hits: &'a [Volume], stub: &BookStub) -> Option<&'a Volume> {
    let title = normalize_text(&stub.title);
    let author = normalize_text(&stub.author);

    hits.iter()
        .find(|hit| {
            let info = &hit.volume_info;
            normalize_text(&info.title).contains(&title)
                && info
                    .authors
                    .iter()
                    .any(|a| normalize_text(a).contains(&author))
        })
        .or_else(|| hits.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::{hit, options, ScriptedTransport};
    use crate::api::types::{ImageLinks, IndustryIdentifier, VolumeInfo, VolumesResponse};
    use crate::api::SearchError;
    use crate::covers::tests::StaticCover;
    use crate::covers::{CoverProvider, Rating};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedRating {
        result: Option<Rating>,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RatingsProvider for FixedRating {
        async fn lookup(&self, _isbn13: &str) -> Result<Option<Rating>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("ratings service down");
            }
            Ok(self.result)
        }
    }

    fn volume(id: &str, title: &str, author: &str) -> Volume {
        Volume {
            id: id.to_string(),
            volume_info: VolumeInfo {
                title: title.to_string(),
                authors: vec![author.to_string()],
                industry_identifiers: vec![IndustryIdentifier {
                    id_type: "ISBN_13".to_string(),
                    identifier: "9780441013593".to_string(),
                }],
                image_links: Some(ImageLinks {
                    small_thumbnail: None,
                    thumbnail: Some("http://books.test/thumb.jpg".to_string()),
                }),
                ..Default::default()
            },
        }
    }

    fn response(items: Vec<Volume>) -> VolumesResponse {
        VolumesResponse {
            total_items: items.len() as u32,
            items,
        }
    }

    fn enricher(
        transport: &Arc<ScriptedTransport>,
        covers: Vec<Arc<dyn CoverProvider>>,
        ratings: Option<Arc<FixedRating>>,
    ) -> Enricher {
        let ratings = ratings.map(|r| r as Arc<dyn RatingsProvider>);
        let client = Arc::new(MetadataClient::new(transport.clone(), options(&["k1"])));
        Enricher::new(client, CoverChain::new(covers), ratings)
    }

    fn miss() -> Arc<dyn CoverProvider> {
        StaticCover::new("miss", None)
    }

    fn dune() -> BookStub {
        BookStub::new("Dune", "Frank Herbert")
    }

    #[test]
    fn test_query_formulations_order() {
        let queries = query_formulations(&BookStub::new("The \"Hobbit\"", " J.R.R. Tolkien "));
        assert_eq!(
            queries,
            vec![
                "intitle:\"The Hobbit\" inauthor:\"J.R.R. Tolkien\"".to_string(),
                "\"The Hobbit\" \"J.R.R. Tolkien\"".to_string(),
                "The Hobbit J.R.R. Tolkien".to_string(),
            ]
        );
    }

    #[test]
    fn test_pick_best_prefers_title_and_author_match() {
        let hits = vec![
            volume("a", "Dune Coloring Book", "Someone Else"),
            volume("b", "Dune (Deluxe Edition)", "Frank Herbert"),
        ];
        assert_eq!(pick_best(&hits, &dune()).map(|v| v.id.as_str()), Some("b"));

        let unrelated = vec![volume("x", "Arrakis Atlas", "Someone Else")];
        assert_eq!(pick_best(&unrelated, &dune()).map(|v| v.id.as_str()), Some("x"));

        assert!(pick_best(&[], &dune()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_formulation_with_hits() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(VolumesResponse::default()),
            Ok(hit("v1", "Dune")),
        ]));
        let enricher = enricher(&transport, Vec::new(), None);

        let candidate = enricher.enrich(&dune()).await.unwrap();

        assert_eq!(candidate.title, "Dune");
        assert_eq!(candidate.external_id.as_deref(), Some("v1"));
        let queries = transport.queries.lock().unwrap().clone();
        assert_eq!(queries.len(), 2);
        assert!(queries[1].starts_with("\"Dune\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_only_after_every_formulation() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let enricher = enricher(&transport, Vec::new(), None);

        assert!(enricher.enrich(&dune()).await.is_none());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_error_falls_through_to_next_formulation() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(SearchError::Decode("bad body".to_string())),
            Ok(hit("v1", "Dune")),
        ]));
        let enricher = enricher(&transport, Vec::new(), None);

        assert!(enricher.enrich(&dune()).await.is_some());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cover_chain_result_used() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(response(vec![volume(
            "v1", "Dune", "Frank Herbert",
        )]))]));
        let covers: Vec<Arc<dyn CoverProvider>> = vec![
            StaticCover::new("community", None),
            StaticCover::new("public", Some("https://covers.test/dune-L.jpg")),
        ];
        let enricher = enricher(&transport, covers, None);

        let candidate = enricher.enrich(&dune()).await.unwrap();
        assert_eq!(candidate.cover_url.as_deref(), Some("https://covers.test/dune-L.jpg"));
        assert_eq!(candidate.isbn13.as_deref(), Some("9780441013593"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cover_falls_back_to_stub_guess_then_thumbnail() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(response(vec![volume("v1", "Dune", "Frank Herbert")])),
            Ok(response(vec![volume("v1", "Dune", "Frank Herbert")])),
        ]));
        let enricher = enricher(&transport, vec![miss()], None);

        let mut stub = dune();
        stub.source_cover_guess = Some("https://shelf.test/dune.jpg".to_string());
        let candidate = enricher.enrich(&stub).await.unwrap();
        assert_eq!(candidate.cover_url.as_deref(), Some("https://shelf.test/dune.jpg"));

        stub.source_cover_guess = Some("https://shelf.test/nophoto/book.png".to_string());
        let candidate = enricher.enrich(&stub).await.unwrap();
        assert_eq!(candidate.cover_url.as_deref(), Some("https://books.test/thumb.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coverless_when_every_source_misses() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(hit("v1", "Dune"))]));
        let enricher = enricher(&transport, vec![miss()], None);

        let candidate = enricher.enrich(&dune()).await.unwrap();
        assert_eq!(candidate.cover_url, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_rating_filled_from_secondary_provider() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(response(vec![volume(
            "v1", "Dune", "Frank Herbert",
        )]))]));
        let ratings = Arc::new(FixedRating {
            result: Some(Rating {
                average: 4.27,
                count: 1200,
            }),
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let enricher = enricher(&transport, Vec::new(), Some(ratings.clone()));

        let candidate = enricher.enrich(&dune()).await.unwrap();
        assert_eq!(candidate.average_rating, 4.27);
        assert_eq!(candidate.ratings_count, 1200);
        assert_eq!(ratings.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ratings_failure_is_ignored() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(response(vec![volume(
            "v1", "Dune", "Frank Herbert",
        )]))]));
        let ratings = Arc::new(FixedRating {
            result: None,
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let enricher = enricher(&transport, Vec::new(), Some(ratings));

        let candidate = enricher.enrich(&dune()).await.unwrap();
        assert_eq!(candidate.average_rating, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ratings_skipped_without_isbn() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(hit("v1", "Dune"))]));
        let ratings = Arc::new(FixedRating {
            result: None,
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let enricher = enricher(&transport, Vec::new(), Some(ratings.clone()));

        enricher.enrich(&dune()).await.unwrap();
        assert_eq!(ratings.calls.load(Ordering::SeqCst), 0);
    }
}
