//! Metadata search client with queueing, credential rotation and backoff.

use super::rate_limiter::RateLimiter;
use super::transport::{GoogleBooksTransport, MetadataTransport, SearchError};
use super::types::Volume;
use anyhow::{anyhow, Result};
use shared::config::MetadataConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Tuning knobs for [`MetadataClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// API keys rotated through on HTTP 429 (empty = anonymous access)
    pub credentials: Vec<String>,
    /// Minimum gap between calls
    pub min_spacing: Duration,
    /// Maximum retries for transient failures
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub retry_delay: Duration,
    /// Exhausted rotations tolerated before pausing
    pub max_rate_limit_rounds: u32,
    /// Length of the global pause
    pub pause_duration: Duration,
}

impl From<&MetadataConfig> for ClientOptions {
    fn from(config: &MetadataConfig) -> Self {
        Self {
            credentials: config.api_keys.clone(),
            min_spacing: Duration::from_millis(config.min_spacing_ms),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_rate_limit_rounds: config.max_rate_limit_rounds,
            pause_duration: Duration::from_secs(config.pause_seconds),
        }
    }
}

/// Counters describing client activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub calls: u64,
    pub rate_limit_hits: u64,
    pub rotations: u64,
    pub pauses: u64,
    pub short_circuited: u64,
    pub active_credential: usize,
}

#[derive(Debug, Default)]
struct RotationState {
    /// Index of the credential used for the next call
    active: usize,
    /// Requests short-circuit until this instant
    paused_until: Option<Instant>,
}

/// Rate-limited metadata search client.
///
/// One instance is shared by every pipeline in the process, so all
/// searches dispatch one at a time in submission order.
pub struct MetadataClient {
    transport: Arc<dyn MetadataTransport>,
    limiter: RateLimiter,
    options: ClientOptions,
    state: Mutex<RotationState>,
    calls: AtomicU64,
    rate_limit_hits: AtomicU64,
    rotations: AtomicU64,
    pauses: AtomicU64,
    short_circuited: AtomicU64,
}

impl MetadataClient {
    /// Create a client over an arbitrary transport
    pub fn new(transport: Arc<dyn MetadataTransport>, options: ClientOptions) -> Self {
        Self {
            transport,
            limiter: RateLimiter::new(options.min_spacing),
            options,
            state: Mutex::new(RotationState::default()),
            calls: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            pauses: AtomicU64::new(0),
            short_circuited: AtomicU64::new(0),
        }
    }

    /// Create a client talking to the configured search API
    pub fn from_config(config: &MetadataConfig) -> Result<Self> {
        let transport = GoogleBooksTransport::new(
            config.base_url.clone(),
            config.max_results,
            Duration::from_secs(config.timeout_secs),
        )?;

        info!(
            base_url = %config.base_url,
            credentials = config.api_keys.len(),
            min_spacing_ms = config.min_spacing_ms,
            "Metadata client initialized"
        );

        Ok(Self::new(Arc::new(transport), ClientOptions::from(config)))
    }

    /// Search for volumes matching `query`.
    ///
    /// Rate limiting is absorbed here and never surfaces as an error. While
    /// the client is paused the result is empty. Other failures propagate
    /// once the retry bound is spent.
    pub async fn search(&self, query: &str) -> Result<Vec<Volume>> {
        if self.is_paused() {
            self.short_circuited.fetch_add(1, Ordering::Relaxed);
            debug!(query = %query, "Client paused, skipping search");
            return Ok(Vec::new());
        }

        self.limiter.enqueue(|| self.dispatch(query)).await
    }

    async fn dispatch(&self, query: &str) -> Result<Vec<Volume>> {
        // A pause may have started while this call waited in the queue
        if self.is_paused() {
            self.short_circuited.fetch_add(1, Ordering::Relaxed);
            return Ok(Vec::new());
        }

        let slots = self.options.credentials.len().max(1);
        let mut tried_in_rotation = 0usize;
        let mut rate_limit_rounds = 0u32;
        let mut attempt = 0u32;

        loop {
            let credential = self.current_credential();
            self.calls.fetch_add(1, Ordering::Relaxed);

            match self.transport.search(query, credential.as_deref()).await {
                Ok(response) => {
                    debug!(query = %query, hits = response.items.len(), "Search successful");
                    return Ok(response.items);
                }
                Err(SearchError::RateLimited) => {
                    self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                    tried_in_rotation += 1;

                    if tried_in_rotation < slots {
                        let next = self.rotate();
                        warn!(
                            query = %query,
                            credential = next,
                            "Rate limited, rotating credential"
                        );
                        continue;
                    }

                    rate_limit_rounds += 1;
                    if rate_limit_rounds > self.options.max_rate_limit_rounds {
                        self.enter_pause();
                        return Ok(Vec::new());
                    }

                    let delay = self.backoff(rate_limit_rounds - 1);
                    warn!(
                        query = %query,
                        delay_ms = delay.as_millis(),
                        round = rate_limit_rounds,
                        "All credentials rate limited, backing off"
                    );
                    sleep(delay).await;
                    tried_in_rotation = 0;
                    self.rotate();
                }
                Err(e) if e.is_transient() && attempt < self.options.max_retries => {
                    let delay = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        query = %query,
                        error = %e,
                        attempt = attempt,
                        delay_ms = delay.as_millis(),
                        "Search failed, retrying after delay"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "Search failed");
                    return Err(anyhow!(e).context(format!("Search failed for '{}'", query)));
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.options.retry_delay * 2u32.saturating_pow(attempt)
    }

    fn current_credential(&self) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.options.credentials.get(state.active).cloned()
    }

    /// Advance to the next credential, wrapping around; returns the new index
    fn rotate(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let slots = self.options.credentials.len().max(1);
        state.active = (state.active + 1) % slots;
        self.rotations.fetch_add(1, Ordering::Relaxed);
        state.active
    }

    fn enter_pause(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.paused_until = Some(Instant::now() + self.options.pause_duration);
        self.pauses.fetch_add(1, Ordering::Relaxed);
        warn!(
            pause_secs = self.options.pause_duration.as_secs(),
            "Rate limits exhausted, pausing metadata searches"
        );
    }

    /// Whether new searches currently short-circuit
    pub fn is_paused(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.paused_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                state.paused_until = None;
                info!("Metadata search pause elapsed");
                false
            }
            None => false,
        }
    }

    /// Current activity counters
    pub fn stats(&self) -> ClientStats {
        let active = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active;

        ClientStats {
            calls: self.calls.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            pauses: self.pauses.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
            active_credential: active,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::types::{VolumeInfo, VolumesResponse};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Transport replaying scripted outcomes and recording credentials used
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub script: Mutex<VecDeque<Result<VolumesResponse, SearchError>>>,
        pub credentials_used: Mutex<Vec<Option<String>>>,
        pub queries: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<VolumesResponse, SearchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MetadataTransport for ScriptedTransport {
        async fn search(
            &self,
            query: &str,
            credential: Option<&str>,
        ) -> Result<VolumesResponse, SearchError> {
            self.queries.lock().unwrap().push(query.to_string());
            self.credentials_used
                .lock()
                .unwrap()
                .push(credential.map(str::to_string));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(VolumesResponse::default()))
        }
    }

    pub(crate) fn hit(id: &str, title: &str) -> VolumesResponse {
        VolumesResponse {
            total_items: 1,
            items: vec![Volume {
                id: id.to_string(),
                volume_info: VolumeInfo {
                    title: title.to_string(),
                    authors: vec!["Frank Herbert".to_string()],
                    ..Default::default()
                },
            }],
        }
    }

    pub(crate) fn options(credentials: &[&str]) -> ClientOptions {
        ClientOptions {
            credentials: credentials.iter().map(|c| c.to_string()).collect(),
            min_spacing: Duration::from_millis(100),
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
            max_rate_limit_rounds: 1,
            pause_duration: Duration::from_secs(60),
        }
    }

    fn client(transport: &Arc<ScriptedTransport>, credentials: &[&str]) -> MetadataClient {
        MetadataClient::new(transport.clone(), options(credentials))
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotates_credential_immediately_after_429() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(SearchError::RateLimited),
            Ok(hit("v1", "Dune")),
            Ok(hit("v2", "Dune Messiah")),
        ]));
        let client = client(&transport, &["k1", "k2"]);
        let origin = Instant::now();

        let hits = client.search("dune").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(origin.elapsed(), Duration::ZERO);

        client.search("dune messiah").await.unwrap();

        let used = transport.credentials_used.lock().unwrap().clone();
        assert_eq!(
            used,
            vec![
                Some("k1".to_string()),
                Some("k2".to_string()),
                Some("k2".to_string())
            ]
        );
        assert_eq!(client.stats().rate_limit_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backs_off_then_wraps_when_all_credentials_exhausted() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(SearchError::RateLimited),
            Err(SearchError::RateLimited),
            Ok(hit("v1", "Dune")),
        ]));
        let client = client(&transport, &["k1", "k2"]);
        let origin = Instant::now();

        let hits = client.search("dune").await.unwrap();

        assert_eq!(hits.len(), 1);
        assert!(origin.elapsed() >= Duration::from_millis(1000));
        let used = transport.credentials_used.lock().unwrap().clone();
        assert_eq!(
            used,
            vec![
                Some("k1".to_string()),
                Some("k2".to_string()),
                Some("k1".to_string())
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_exhaustion_enters_pause() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(SearchError::RateLimited),
            Err(SearchError::RateLimited),
            Err(SearchError::RateLimited),
            Err(SearchError::RateLimited),
        ]));
        let client = client(&transport, &["k1", "k2"]);

        let hits = client.search("dune").await.unwrap();
        assert!(hits.is_empty());
        assert!(client.is_paused());
        let calls_before = transport.calls();

        // Paused: short-circuits without touching the transport
        let hits = client.search("dune messiah").await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(transport.calls(), calls_before);
        assert_eq!(client.stats().short_circuited, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!client.is_paused());
        client.search("children of dune").await.unwrap();
        assert_eq!(transport.calls(), calls_before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_anonymous_client_backs_off_on_429() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(SearchError::RateLimited),
            Ok(hit("v1", "Dune")),
        ]));
        let client = client(&transport, &[]);

        let hits = client.search("dune").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            *transport.credentials_used.lock().unwrap(),
            vec![None, None]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(SearchError::Status { code: 503 }),
            Ok(hit("v1", "Dune")),
        ]));
        let client = client(&transport, &["k1"]);

        let hits = client.search("dune").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_propagates_after_retry_bound() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(SearchError::Network("timeout".to_string())),
            Err(SearchError::Network("timeout".to_string())),
            Err(SearchError::Network("timeout".to_string())),
            Ok(hit("v1", "Dune")),
        ]));
        let client = client(&transport, &["k1"]);

        let result = client.search("dune").await;
        assert!(result.is_err());
        // One attempt plus max_retries
        assert_eq!(transport.calls(), 3);
        assert!(!client.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(SearchError::Decode(
            "unexpected eof".to_string(),
        ))]));
        let client = client(&transport, &["k1"]);

        assert!(client.search("dune").await.is_err());
        assert_eq!(transport.calls(), 1);
    }
}
