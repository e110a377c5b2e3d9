//! Typed errors for the catalog operations exposed to callers.

use std::path::PathBuf;

use shared::GenreKey;
use thiserror::Error;

/// Errors surfaced by the exposed catalog operations.
///
/// Everything else in the pipeline degrades to empty or partial results.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The caller asked for a genre that is not configured
    #[error("Unknown genre '{0}'")]
    UnknownGenre(GenreKey),

    /// Writing a catalog document failed
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serializing a catalog document failed
    #[error("Failed to serialize catalog document: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CatalogError {
    /// Create a persistence error for the given path.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_genre_message() {
        let err = CatalogError::UnknownGenre(GenreKey::new("Westerns"));
        assert_eq!(err.to_string(), "Unknown genre 'westerns'");
    }

    #[test]
    fn test_persistence_message_names_path() {
        let err = CatalogError::persistence(
            "/tmp/catalog.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/catalog.json"));
    }
}
