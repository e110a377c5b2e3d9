//! Whole-document persistence with temp-file-plus-rename atomicity.

use crate::error::CatalogError;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Sibling temp path the document is staged at before the rename
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to `path` so readers only ever see a complete document
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CatalogError::persistence(parent, e))?;
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| CatalogError::persistence(&tmp, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| CatalogError::persistence(&tmp, e))?;
    file.sync_all()
        .await
        .map_err(|e| CatalogError::persistence(&tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| CatalogError::persistence(path, e))?;

    debug!(path = %path.display(), bytes = bytes.len(), "Document written");
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CatalogError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

/// Read a JSON document, treating a missing or unreadable file as absent
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No document on disk");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read document");
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Document is corrupt, ignoring it");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        id: u32,
        name: String,
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let tmp = temp_path(Path::new("/data/master_catalog.json"));
        assert_eq!(tmp, PathBuf::from("/data/master_catalog.json.tmp"));
    }

    #[tokio::test]
    async fn test_write_then_read() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested/doc.json");
        let doc = Doc {
            id: 7,
            name: "dune".to_string(),
        };

        write_json(&path, &doc).await?;

        assert_eq!(read_json::<Doc>(&path), Some(doc));
        assert!(!temp_path(&path).exists());
        Ok(())
    }

    #[test]
    fn test_missing_and_corrupt_documents_read_as_absent() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("doc.json");
        assert_eq!(read_json::<Doc>(&path), None);

        std::fs::write(&path, "{\"id\": 7, \"na")?;
        assert_eq!(read_json::<Doc>(&path), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_write_reports_path() -> Result<()> {
        let dir = TempDir::new()?;
        // A directory squatting on the temp path makes the create fail
        let path = dir.path().join("doc.json");
        std::fs::create_dir(temp_path(&path))?;

        let err = write_json(&path, &Doc { id: 1, name: "x".to_string() })
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Persistence { .. }));
        Ok(())
    }
}
