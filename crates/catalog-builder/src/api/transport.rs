//! HTTP transport for the volumes search endpoint.

use super::types::VolumesResponse;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failure of a single search call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    /// HTTP 429 from the search API
    #[error("Rate limited by search API")]
    RateLimited,

    /// Any other non-success status
    #[error("Search API returned status {code}")]
    Status { code: u16 },

    /// Timeout or connection failure
    #[error("Network error: {0}")]
    Network(String),

    /// Body did not parse as a volumes response
    #[error("Failed to decode search response: {0}")]
    Decode(String),
}

impl SearchError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::RateLimited | SearchError::Network(_) => true,
            SearchError::Status { code } => *code >= 500 || *code == 408,
            SearchError::Decode(_) => false,
        }
    }
}

/// One outbound search call, made with an optional API credential
#[async_trait]
pub trait MetadataTransport: Send + Sync {
    async fn search(
        &self,
        query: &str,
        credential: Option<&str>,
    ) -> Result<VolumesResponse, SearchError>;
}

/// Volumes search over HTTP
pub struct GoogleBooksTransport {
    client: Client,
    base_url: String,
    max_results: u32,
}

impl GoogleBooksTransport {
    pub fn new(base_url: String, max_results: u32, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("catalog-builder/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_results,
        })
    }

    fn url(&self, query: &str, credential: Option<&str>) -> String {
        let mut url = format!(
            "{}/volumes?q={}&maxResults={}&printType=books",
            self.base_url,
            urlencoding::encode(query),
            self.max_results
        );
        if let Some(key) = credential {
            url.push_str("&key=");
            url.push_str(&urlencoding::encode(key));
        }
        url
    }
}

#[async_trait]
impl MetadataTransport for GoogleBooksTransport {
    async fn search(
        &self,
        query: &str,
        credential: Option<&str>,
    ) -> Result<VolumesResponse, SearchError> {
        let url = self.url(query, credential);
        debug!(query = %query, "Making search request");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SearchError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SearchError::RateLimited);
        }
        if !status.is_success() {
            return Err(SearchError::Status {
                code: status.as_u16(),
            });
        }

        response
            .json::<VolumesResponse>()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SearchError::RateLimited.is_transient());
        assert!(SearchError::Network("reset".to_string()).is_transient());
        assert!(SearchError::Status { code: 503 }.is_transient());
        assert!(!SearchError::Status { code: 400 }.is_transient());
        assert!(!SearchError::Decode("eof".to_string()).is_transient());
    }

    #[test]
    fn test_url_encodes_query_and_key() {
        let transport = GoogleBooksTransport::new(
            "https://example.test/books/v1/".to_string(),
            5,
            Duration::from_secs(1),
        )
        .unwrap();

        let url = transport.url("intitle:\"Dune\" inauthor:\"Frank Herbert\"", Some("k 1"));
        assert!(url.starts_with("https://example.test/books/v1/volumes?q=intitle%3A%22Dune%22"));
        assert!(url.contains("maxResults=5"));
        assert!(url.ends_with("&key=k%201"));

        let anonymous = transport.url("dune", None);
        assert!(!anonymous.contains("key="));
    }
}
