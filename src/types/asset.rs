//! Asset types produced by the pre-index phase.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PipelineError, Result};
use super::geo::{point_from_value, Point};

/// Serialized empty list, the initial value of every list facet.
pub const EMPTY_LIST: &str = "[]";

/// Stable identifier of a resource instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Wrap an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `n` characters, used to disambiguate same-titled slugs.
    pub fn short(&self, n: usize) -> &str {
        match self.0.char_indices().nth(n) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }

    /// Whether the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Metadata fields a configured filter may not be named after.
///
/// The list facets (`registries`, `designations`, `scopes`) are not
/// reserved; a filter with one of those names fills that facet.
pub const RESERVED_FACET_NAMES: [&str; 6] =
    ["resourceinstanceid", "graphid", "geometry", "location", "title", "slug"];

fn empty_list() -> String {
    EMPTY_LIST.to_string()
}

/// Serializable projection of an [`Asset`].
///
/// Every facet is a string holding a JSON-serialized list so that the
/// search indexer can consume the bag without knowing its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Resource identifier.
    pub resourceinstanceid: String,
    /// Owning graph identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub graphid: String,
    /// Raw geometry, JSON-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    /// Reduced `[x, y]` point, JSON-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Display title.
    pub title: String,
    /// Generated slug.
    pub slug: String,
    /// Designations facet.
    #[serde(default = "empty_list")]
    pub designations: String,
    /// Scopes facet.
    #[serde(default = "empty_list")]
    pub scopes: String,
    /// Registries facet.
    #[serde(default = "empty_list")]
    pub registries: String,
    /// Configured filter facets.
    #[serde(flatten)]
    pub facets: BTreeMap<String, String>,
}

impl AssetMetadata {
    /// Parse the registries facet.
    pub fn registry_names(&self) -> Result<Vec<String>> {
        parse_list(&self.registries, &format!("asset {} registries", self.slug))
    }

    /// Replace the registries facet.
    pub fn set_registries(&mut self, registries: &[String]) -> Result<()> {
        self.registries = serde_json::to_string(registries)
            .map_err(|e| PipelineError::json(format!("asset {} registries", self.slug), e))?;
        Ok(())
    }

    /// Parse the designations facet.
    pub fn designation_names(&self) -> Result<Vec<String>> {
        parse_list(&self.designations, &format!("asset {} designations", self.slug))
    }

    /// Parse the scopes facet.
    pub fn scope_names(&self) -> Result<Vec<String>> {
        parse_list(&self.scopes, &format!("asset {} scopes", self.slug))
    }

    /// The reduced location, if it is a valid 2-element coordinate pair.
    pub fn point(&self) -> Option<Point> {
        let raw = self.location.as_deref()?;
        let value: Value = serde_json::from_str(raw).ok()?;
        point_from_value(&value)
    }
}

fn parse_list(raw: &str, context: &str) -> Result<Vec<String>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| PipelineError::json(context, e))
}

/// One published entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Metadata bag written to intermediate files and search records.
    pub meta: AssetMetadata,
    /// Rendered text content.
    pub content: String,
    /// Generated slug, unique within one run.
    pub slug: String,
    /// Model class name of the owning graph.
    #[serde(rename = "type")]
    pub model_type: String,
}

impl Asset {
    /// Build an asset from its extracted parts.
    ///
    /// `location`, when present, must already be a reduced point.
    pub fn new(
        resource_id: &ResourceId,
        graph_id: &str,
        geometry: Option<&Value>,
        location: Option<Point>,
        title: &str,
        slug: &str,
        model_type: &str,
    ) -> Self {
        let meta = AssetMetadata {
            resourceinstanceid: resource_id.to_string(),
            graphid: graph_id.to_string(),
            geometry: geometry.map(Value::to_string),
            location: location.map(|p| Value::from(p.to_vec()).to_string()),
            title: title.to_string(),
            slug: slug.to_string(),
            designations: empty_list(),
            scopes: empty_list(),
            registries: empty_list(),
            facets: BTreeMap::new(),
        };
        Self {
            meta,
            content: String::new(),
            slug: slug.to_string(),
            model_type: model_type.to_string(),
        }
    }

    /// Raw geometry, parsed back from the metadata bag.
    pub fn geometry(&self) -> Option<Value> {
        self.meta
            .geometry
            .as_deref()
            .and_then(|g| serde_json::from_str(g).ok())
    }

    /// The reduced location point.
    pub fn location(&self) -> Option<Point> {
        self.meta.point()
    }
}

/// Spatial index input: a point joined with its search hash and registry bitmask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Coordinate pair.
    pub loc: Point,
    /// Content-addressed search record hash.
    pub hash: String,
    /// Registry bitmask.
    pub regcode: u64,
}
