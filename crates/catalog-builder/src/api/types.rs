//! Metadata search API response types.
//!
//! These types represent the JSON responses of the volumes search endpoint.

use serde::{Deserialize, Serialize};
use shared::{isbn, CanonicalBook};

/// Volumes search response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumesResponse {
    #[serde(default)]
    pub total_items: u32,
    #[serde(default)]
    pub items: Vec<Volume>,
}

/// One search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: String,
    pub volume_info: VolumeInfo,
}

/// Bibliographic data for a hit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    #[serde(default)]
    pub title: String,
    pub subtitle: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub industry_identifiers: Vec<IndustryIdentifier>,
    pub page_count: Option<u32>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub average_rating: Option<f64>,
    pub ratings_count: Option<u32>,
    pub image_links: Option<ImageLinks>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndustryIdentifier {
    #[serde(rename = "type")]
    pub id_type: String,
    pub identifier: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLinks {
    pub small_thumbnail: Option<String>,
    pub thumbnail: Option<String>,
}

impl Volume {
    /// ISBN-13 of the hit, converting an ISBN-10 when that is all there is
    pub fn isbn13(&self) -> Option<String> {
        let identifiers = &self.volume_info.industry_identifiers;

        identifiers
            .iter()
            .find(|id| id.id_type == "ISBN_13")
            .map(|id| isbn::normalize(&id.identifier))
            .filter(|value| isbn::is_isbn13(value))
            .or_else(|| {
                identifiers
                    .iter()
                    .find(|id| id.id_type == "ISBN_10")
                    .and_then(|id| isbn::isbn10_to_isbn13(&id.identifier))
            })
    }

    /// Thumbnail URL, upgraded to https
    pub fn thumbnail(&self) -> Option<String> {
        let links = self.volume_info.image_links.as_ref()?;
        links
            .thumbnail
            .as_ref()
            .or(links.small_thumbnail.as_ref())
            .map(|url| url.replacen("http://", "https://", 1))
    }

    /// Map the hit onto a canonical record (cover resolved separately)
    pub fn to_candidate(&self) -> CanonicalBook {
        let info = &self.volume_info;
        let mut book = CanonicalBook::new(info.title.trim(), info.authors.clone());
        book.isbn13 = self.isbn13();
        book.external_id = Some(self.id.clone());
        book.description = info.description.clone().unwrap_or_default();
        book.average_rating = info.average_rating.unwrap_or(0.0);
        book.ratings_count = info.ratings_count.unwrap_or(0);
        book.published_date = info.published_date.clone();
        book.page_count = info.page_count;
        book.publisher = info.publisher.clone();
        book
    }
}
