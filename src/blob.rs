//! Blob storage: an opaque key → bytes store.
//!
//! Production deployments point this at a mounted bucket; everything the
//! pipeline needs is `put` and `get`, so the filesystem implementation below
//! doubles as the local/demo backend and the test fixture.
//!
//! Key conventions (the only contract the rest of the system relies on):
//!
//! - `{session_id}/source.pdf` — the uploaded paper
//! - `{session_id}/tables/table-{n}.csv` — one extracted table; re-running
//!   the same extraction overwrites the same key
//! - `{dataset_id}/csv/{filename}` — imported dataset files

use crate::error::PipelineError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Blob key for a session's uploaded PDF.
pub fn source_pdf_key(session_id: &str) -> String {
    format!("{session_id}/source.pdf")
}

/// Blob key for one extracted table's CSV.
pub fn table_csv_key(session_id: &str, table_number: &str) -> String {
    format!(
        "{session_id}/tables/table-{}.csv",
        sanitize_key_component(table_number)
    )
}

/// Blob key for an imported dataset CSV.
pub fn dataset_csv_key(dataset_id: &str, filename: &str) -> String {
    format!("{dataset_id}/csv/{}", sanitize_key_component(filename))
}

/// Keep key components to a filesystem- and URL-safe alphabet.
fn sanitize_key_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// A key → bytes store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write (or overwrite) the blob at `key`.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError>;

    /// Read the blob at `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, PipelineError>;
}

/// Filesystem-backed blob store rooted at a directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root from `PAPER2DATA_BLOB_ROOT`, defaulting to `./blobs`.
    pub fn from_env() -> Self {
        let root = std::env::var("PAPER2DATA_BLOB_ROOT").unwrap_or_else(|_| "blobs".to_string());
        Self::new(root)
    }

    /// Resolve a key to a path under the root, rejecting traversal.
    fn resolve(&self, key: &str) -> Result<PathBuf, PipelineError> {
        let rel = Path::new(key);
        let traverses = rel.components().any(|c| {
            matches!(
                c,
                std::path::Component::ParentDir
                    | std::path::Component::RootDir
                    | std::path::Component::Prefix(_)
            )
        });
        if traverses || key.is_empty() {
            return Err(PipelineError::Blob {
                key: key.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "blob key must be a relative path without '..'",
                ),
            });
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Blob {
                    key: key.to_string(),
                    source: e,
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PipelineError::Blob {
                key: key.to_string(),
                source: e,
            })?;
        debug!("blob put: {key} ({} bytes)", bytes.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, PipelineError> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| PipelineError::Blob {
                key: key.to_string(),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn key_conventions() {
        assert_eq!(source_pdf_key("abc"), "abc/source.pdf");
        assert_eq!(table_csv_key("abc", "3"), "abc/tables/table-3.csv");
        assert_eq!(table_csv_key("abc", "S1"), "abc/tables/table-S1.csv");
        assert_eq!(dataset_csv_key("d1", "ages.csv"), "d1/csv/ages.csv");
    }

    #[test]
    fn key_components_are_sanitized() {
        assert_eq!(
            table_csv_key("abc", "../../etc/passwd"),
            "abc/tables/table-.._.._etc_passwd.csv"
        );
        assert_eq!(dataset_csv_key("d1", "a b/c.csv"), "d1/csv/a_b_c.csv");
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.put("s1/tables/table-1.csv", b"a,b\n1,2\n").await.unwrap();
        let bytes = store.get("s1/tables/table-1.csv").await.unwrap();
        assert_eq!(bytes, b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn put_overwrites_same_key() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.put("k", b"first").await.unwrap();
        store.put("k", b"second").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn missing_key_is_an_error() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.get("absent").await.is_err());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.put("../outside", b"x").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
    }
}
