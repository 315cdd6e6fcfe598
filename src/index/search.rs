//! Search indexer boundary and a content-addressed in-memory index.
//!
//! Each record's hash is `SHA256` over its canonical JSON form (content
//! normalized to LF newlines and trimmed), hex-encoded and truncated, with
//! the record language as prefix: `en_3f1c9a0b2d7e6f41a5c8`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use crate::canonical::to_canonical_bytes;
use crate::types::AssetMetadata;

/// Hex characters kept from the record digest.
pub const RECORD_HASH_LENGTH: usize = 20;

/// One record handed to the search indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    /// Page URL of the asset.
    pub url: String,
    /// Searchable text.
    pub content: String,
    /// Record language.
    pub language: String,
    /// Facet filters (`tags`, `designations`).
    pub filters: BTreeMap<String, Vec<String>>,
    /// Metadata returned with search hits.
    pub meta: AssetMetadata,
}

/// External full-text search indexer.
#[async_trait]
pub trait SearchIndexer: Send + Sync {
    /// Error type for indexer operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Add a record, returning its hash.
    async fn add_custom_record(&mut self, record: SearchRecord) -> Result<String, Self::Error>;

    /// Every indexed record as `(hash, serialized entry)`; entries carry the record `meta`.
    async fn index_catalogue(&self) -> Result<Vec<(String, String)>, Self::Error>;

    /// Write the portable index under `output`.
    async fn write_files(&self, output: &Path) -> Result<(), Self::Error>;
}

/// Error type for [`InMemorySearchIndex`].
#[derive(Debug, thiserror::Error)]
pub enum SearchIndexError {
    /// Record or catalogue serialization failed.
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Writing index files failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Canonical hashing failed.
    #[error("Hashing failed: {0}")]
    Hash(String),
}

/// Normalize record content: CRLF and lone CR become LF, outer whitespace is trimmed.
pub fn normalize_content(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Content-addressed hash of a record.
pub fn record_hash(record: &SearchRecord) -> Result<String, SearchIndexError> {
    let bytes = to_canonical_bytes(record).map_err(|e| SearchIndexError::Hash(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());
    Ok(format!("{}_{}", record.language, &digest[..RECORD_HASH_LENGTH]))
}

/// In-memory search index writing a JSON catalogue.
#[derive(Debug, Default)]
pub struct InMemorySearchIndex {
    records: BTreeMap<String, SearchRecord>,
}

impl InMemorySearchIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the index holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record by hash.
    pub fn get(&self, hash: &str) -> Option<&SearchRecord> {
        self.records.get(hash)
    }
}

#[async_trait]
impl SearchIndexer for InMemorySearchIndex {
    type Error = SearchIndexError;

    async fn add_custom_record(&mut self, mut record: SearchRecord) -> Result<String, Self::Error> {
        record.content = normalize_content(&record.content);
        let hash = record_hash(&record)?;
        self.records.insert(hash.clone(), record);
        Ok(hash)
    }

    async fn index_catalogue(&self) -> Result<Vec<(String, String)>, Self::Error> {
        self.records
            .iter()
            .map(|(hash, record)| Ok((hash.clone(), serde_json::to_string(record)?)))
            .collect()
    }

    async fn write_files(&self, output: &Path) -> Result<(), Self::Error> {
        tokio::fs::create_dir_all(output).await?;
        let catalogue = serde_json::to_vec(&self.records)?;
        tokio::fs::write(output.join("catalogue.json"), catalogue).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, ResourceId};

    fn record(slug: &str, content: &str) -> SearchRecord {
        let asset = Asset::new(&ResourceId::new("r1"), "g1", None, None, "Mill", slug, "HeritageAsset");
        SearchRecord {
            url: format!("/asset/?slug={slug}"),
            content: content.to_string(),
            language: "en".into(),
            filters: BTreeMap::new(),
            meta: asset.meta,
        }
    }

    #[test]
    fn test_normalize_content() {
        assert_eq!(normalize_content("  Old\r\nMill\r"), "Old\nMill");
    }

    #[tokio::test]
    async fn test_hash_is_content_addressed() {
        let mut index = InMemorySearchIndex::new();
        let a = index.add_custom_record(record("mill-r1", "Mill")).await.unwrap();
        let b = index.add_custom_record(record("mill-r1", "Mill\r\n")).await.unwrap();
        let c = index.add_custom_record(record("fort-r1", "Mill")).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("en_"));
        assert_eq!(a.len(), 3 + RECORD_HASH_LENGTH);
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_catalogue_carries_meta() {
        let mut index = InMemorySearchIndex::new();
        let hash = index.add_custom_record(record("mill-r1", "Mill")).await.unwrap();
        let catalogue = index.index_catalogue().await.unwrap();
        assert_eq!(catalogue.len(), 1);
        assert_eq!(catalogue[0].0, hash);
        let entry: serde_json::Value = serde_json::from_str(&catalogue[0].1).unwrap();
        assert_eq!(entry["meta"]["slug"], "mill-r1");
    }

    #[tokio::test]
    async fn test_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = InMemorySearchIndex::new();
        index.add_custom_record(record("mill-r1", "Mill")).await.unwrap();
        index.write_files(&dir.path().join("search")).await.unwrap();
        assert!(dir.path().join("search/catalogue.json").exists());
    }
}
