//! Registry table and bitmask encoding.
//!
//! A registry's bit position is its index in the [`RegistryTable`]. The
//! pre-index and reindex phases run in separate processes and compute
//! bitmasks independently, so the table is persisted by pre-index
//! ([`RegistryTable::save`]) and replayed by reindex ([`RegistryTable::load`])
//! before any bitmask is computed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::canonical::canonical_hash_hex;
use crate::error::Result;
use crate::safe_fs::{exists, read_json, write_json};
use crate::slug::slugify;

/// Widest bitmask the encoder can produce.
pub const MAX_REGISTRIES: usize = u64::BITS as usize;

/// Ordered list of registry slugs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryTable {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

/// On-disk form of the registry table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryTableFile {
    /// Registry slugs in bit order.
    pub registries: Vec<String>,
    /// xxh64 fingerprint of `registries`.
    pub fingerprint: String,
    /// When the file was written.
    pub written_at: chrono::DateTime<chrono::Utc>,
}

impl RegistryTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from names in order.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        for name in names {
            table.insert(name.as_ref());
        }
        table
    }

    /// Append a registry if it is not present yet.
    ///
    /// Names are slugified before insertion; returns the bit position, or
    /// `None` if the name has no slug form.
    pub fn insert(&mut self, name: &str) -> Option<usize> {
        let slug = match slugify(name) {
            Ok(slug) => slug,
            Err(e) => {
                tracing::warn!(registry = name, error = %e, "Ignoring registry without a usable name");
                return None;
            }
        };
        if let Some(&position) = self.positions.get(&slug) {
            return Some(position);
        }
        let position = self.names.len();
        if position >= MAX_REGISTRIES {
            tracing::warn!(registry = %slug, position, "Registry beyond bitmask width will never be encoded");
        }
        self.positions.insert(slug.clone(), position);
        self.names.push(slug);
        Some(position)
    }

    /// Bit position of a registry, if present.
    pub fn position(&self, name: &str) -> Option<usize> {
        let slug = slugify(name).ok()?;
        self.positions.get(&slug).copied()
    }

    /// Encode registry names as a bitmask.
    ///
    /// Names absent from the table contribute nothing and are not inserted.
    pub fn encode<S: AsRef<str>>(&self, names: &[S]) -> u64 {
        names
            .iter()
            .filter_map(|name| self.position(name.as_ref()))
            .filter_map(|position| 1u64.checked_shl(position as u32))
            .fold(0, |acc, bit| acc | bit)
    }

    /// Registry slugs in bit order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of registries.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Fingerprint of the ordered names.
    pub fn fingerprint(&self) -> Result<String> {
        canonical_hash_hex(&self.names)
    }

    /// Persist the table.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = RegistryTableFile {
            registries: self.names.clone(),
            fingerprint: self.fingerprint()?,
            written_at: chrono::Utc::now(),
        };
        write_json(path, &file, true).await
    }

    /// Load a persisted table.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file: RegistryTableFile = read_json(path).await?;
        let table = Self::from_names(&file.registries);
        let fingerprint = table.fingerprint()?;
        if fingerprint != file.fingerprint {
            tracing::warn!(
                path = %path.display(),
                stored = %file.fingerprint,
                computed = %fingerprint,
                "Registry table fingerprint mismatch, file was edited by hand"
            );
        }
        tracing::info!(path = %path.display(), fingerprint = %fingerprint, registries = table.len(), "Replaying registry table");
        Ok(table)
    }

    /// Load a persisted table, or start empty if none exists.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if exists(path).await {
            Self::load(path).await
        } else {
            Ok(Self::new())
        }
    }
}
