//! Run configuration.
//!
//! ## Files
//!
//! - `prebuild/prebuild.json` ([`PrebuildConfig`]): field paths, filter
//!   facets, source declarations, permissions file location.
//! - `prebuild/graphs.json` ([`GraphConfiguration`]): models to load.
//! - the permissions file, `prebuild/permissions.json` by default
//!   ([`PermissionPolicy`]).
//!
//! ## Environment
//!
//! [`PipelineConfig::from_env`] reads:
//! - `OUTPUT_DIR`: publish root (default: `docs`)
//! - `FOR_ARCHES`: `true` selects chunked business-data output, anything
//!   else spatial output
//! - `PUBLIC_MODELS`: comma-separated model classes exported by public builds
//! - `CHUNK_SIZE_CHARS`, `RESOLVE_BATCH_SIZE`, `EXTRACT_BATCH_SIZE`
//! - `REGISTRY_GRAPH_ID`: graph id of the registry model

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::policy::PermissionPolicy;
use crate::safe_fs::{exists, read_json};
use crate::store::FieldPath;
use crate::types::ModelEntry;
use crate::{CHUNK_SIZE_CHARS, DEFAULT_LANGUAGE};

/// Default path of the geometry field.
pub const DEFAULT_GEOMETRY_PATH: &str = "location.geometry.coordinates";

/// Default path of the logical-deletion flag.
pub const DEFAULT_SOFT_DELETED_PATH: &str = "soft_deleted";

/// Default permissions file, relative to the base directory.
pub const DEFAULT_PERMISSIONS_FILE: &str = "prebuild/permissions.json";

/// Model classes exported by public builds unless overridden.
pub const DEFAULT_PUBLIC_MODELS: [&str; 2] = ["HeritageAsset", "Registry"];

/// Graph id of the registry model unless overridden.
pub const DEFAULT_REGISTRY_GRAPH_ID: &str = "Registry";

/// Which business-data output the reindex phase produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Per-model chunk files bounded by a byte budget.
    Chunked,
    /// Per-registry spatial files and a point index.
    Spatial,
}

/// Pipeline settings with environment overrides.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Project root holding `prebuild/`.
    pub base_dir: PathBuf,
    /// Publish root.
    pub output_dir: PathBuf,
    /// Byte budget per chunk file (default: 10,000,000).
    pub chunk_size_chars: usize,
    /// Lookups issued concurrently per resolve batch (default: 50).
    pub resolve_batch_size: usize,
    /// Assets extracted concurrently per batch (default: 10).
    pub extract_batch_size: usize,
    /// Model classes exported by public builds.
    pub public_models: Vec<String>,
    /// Model class subject to logical deletion.
    pub primary_model: String,
    /// Business-data output mode.
    pub output_mode: OutputMode,
    /// Language of search records.
    pub language: String,
    /// Graph id of the registry model, loaded before everything else.
    pub registry_graph_id: String,
    /// Bypass publishing restrictions.
    pub include_private: bool,
}

impl PipelineConfig {
    /// Defaults rooted at `base_dir`, without consulting the environment.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            output_dir: base_dir.join("docs"),
            base_dir,
            chunk_size_chars: CHUNK_SIZE_CHARS,
            resolve_batch_size: 50,
            extract_batch_size: 10,
            public_models: DEFAULT_PUBLIC_MODELS.iter().map(|s| s.to_string()).collect(),
            primary_model: "HeritageAsset".to_string(),
            output_mode: OutputMode::Spatial,
            language: DEFAULT_LANGUAGE.to_string(),
            registry_graph_id: DEFAULT_REGISTRY_GRAPH_ID.to_string(),
            include_private: false,
        }
    }

    /// Defaults for the current directory with environment overrides applied.
    pub fn from_env() -> Self {
        Self::new(".").with_env_overrides()
    }

    /// Apply environment overrides to this configuration.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        self.output_mode = match std::env::var("FOR_ARCHES").as_deref() {
            Ok("true") => OutputMode::Chunked,
            _ => self.output_mode,
        };
        if let Ok(models) = std::env::var("PUBLIC_MODELS") {
            self.public_models = models
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }
        self.chunk_size_chars = std::env::var("CHUNK_SIZE_CHARS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.chunk_size_chars);
        self.resolve_batch_size = std::env::var("RESOLVE_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.resolve_batch_size);
        self.extract_batch_size = std::env::var("EXTRACT_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.extract_batch_size);
        if let Ok(graph_id) = std::env::var("REGISTRY_GRAPH_ID") {
            self.registry_graph_id = graph_id;
        }
        self
    }

    /// Whether a model class is exported by public builds.
    pub fn is_public_model(&self, model_class_name: &str) -> bool {
        self.public_models.iter().any(|m| m == model_class_name)
    }

    /// `prebuild/`.
    pub fn prebuild_dir(&self) -> PathBuf {
        self.base_dir.join("prebuild")
    }

    /// `prebuild/business_data`, where source files live.
    pub fn business_data_dir(&self) -> PathBuf {
        self.prebuild_dir().join("business_data")
    }

    /// `prebuild/preindex`, where metadata lists are written.
    pub fn preindex_dir(&self) -> PathBuf {
        self.prebuild_dir().join("preindex")
    }

    /// `prebuild/fgb`, where per-registry point lists are written.
    pub fn point_list_dir(&self) -> PathBuf {
        self.prebuild_dir().join("fgb")
    }

    /// Persisted registry table.
    pub fn registry_table_path(&self) -> PathBuf {
        self.preindex_dir().join("registries.json")
    }

    /// `prebuild/graphs`.
    pub fn graphs_dir(&self) -> PathBuf {
        self.prebuild_dir().join("graphs")
    }

    /// `prebuild/reference_data/collections`.
    pub fn collections_dir(&self) -> PathBuf {
        self.prebuild_dir().join("reference_data").join("collections")
    }

    /// `{output}/definitions`.
    pub fn definitions_dir(&self) -> PathBuf {
        self.output_dir.join("definitions")
    }

    /// `{output}/definitions/business_data`, where resource documents and chunks go.
    pub fn content_dir(&self) -> PathBuf {
        self.definitions_dir().join("business_data")
    }

    /// `{output}/definitions/reference_data`.
    pub fn reference_data_output_dir(&self) -> PathBuf {
        self.definitions_dir().join("reference_data")
    }

    /// `{output}/fgb`.
    pub fn spatial_output_dir(&self) -> PathBuf {
        self.output_dir.join("fgb")
    }

    /// `{output}/search`.
    pub fn search_output_dir(&self) -> PathBuf {
        self.output_dir.join("search")
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Configurable field paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrebuildPaths {
    /// Path of the raw geometry.
    #[serde(default)]
    pub geometry: Option<String>,
    /// Path of the location, falling back to the geometry.
    #[serde(default)]
    pub location: Option<String>,
    /// Path of the logical-deletion flag of primary assets.
    #[serde(default)]
    pub soft_deleted: Option<String>,
}

impl PrebuildPaths {
    /// Parsed geometry path.
    pub fn geometry_path(&self) -> FieldPath {
        FieldPath::parse(self.geometry.as_deref().unwrap_or(DEFAULT_GEOMETRY_PATH))
    }

    /// Parsed location path.
    pub fn location_path(&self) -> FieldPath {
        FieldPath::parse(self.location.as_deref().unwrap_or(DEFAULT_GEOMETRY_PATH))
    }

    /// Parsed logical-deletion path.
    pub fn soft_deleted_path(&self) -> FieldPath {
        FieldPath::parse(self.soft_deleted.as_deref().unwrap_or(DEFAULT_SOFT_DELETED_PATH))
    }
}

/// Shape of a filter facet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// A list value, kept as a list.
    Array,
    /// A single value, wrapped in a one-element list.
    #[default]
    #[serde(other)]
    Scalar,
}

/// A configured filter facet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Dotted path of the value.
    pub path: String,
    /// Value shape.
    #[serde(rename = "type", default)]
    pub kind: FilterKind,
}

/// A source-data declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuildSource {
    /// Pattern matching source files.
    pub resources: String,
    /// Graph ids whose resources this source provides.
    #[serde(default)]
    pub search_for: Vec<String>,
    /// Patterns of files loaded alongside matching sources.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Registries assigned to assets of this source.
    #[serde(default)]
    pub registries: Vec<String>,
}

impl PrebuildSource {
    /// Compiled resources pattern.
    pub fn resources_pattern(&self) -> Result<Regex> {
        compile(&self.resources)
    }

    /// Compiled dependency patterns.
    pub fn dependency_patterns(&self) -> Result<Vec<Regex>> {
        self.dependencies.iter().map(|d| compile(d)).collect()
    }

    /// Whether `path` is covered by this source.
    pub fn matches(&self, path: &Path) -> Result<bool> {
        Ok(self.resources_pattern()?.is_match(&path.to_string_lossy()))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| PipelineError::InvalidInput(format!("invalid pattern {pattern:?}: {e}")))
}

/// `prebuild/prebuild.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuildConfig {
    /// Field paths.
    #[serde(default)]
    pub paths: PrebuildPaths,
    /// Filter facets by name.
    #[serde(default)]
    pub filters: BTreeMap<String, FilterConfig>,
    /// Source declarations.
    #[serde(default)]
    pub sources: Vec<PrebuildSource>,
    /// Permissions file, relative to the base directory.
    #[serde(default)]
    pub permissions_file: Option<String>,
    /// Index templates by model class.
    #[serde(default)]
    pub index_templates: BTreeMap<String, String>,
}

impl PrebuildConfig {
    /// Find the source declaration covering `path`.
    ///
    /// The first match wins; later matches are reported and ignored.
    pub fn source_for(&self, path: &Path) -> Result<Option<&PrebuildSource>> {
        let mut found: Option<&PrebuildSource> = None;
        for source in &self.sources {
            if !source.matches(path)? {
                continue;
            }
            match found {
                Some(first) => tracing::warn!(
                    path = %path.display(),
                    taken = %first.resources,
                    ignored = %source.resources,
                    "Resource file matches multiple sources, taking the first"
                ),
                None => found = Some(source),
            }
        }
        Ok(found)
    }
}

/// `prebuild/graphs.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphConfiguration {
    /// Models by graph id.
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
}

/// Every configuration file of one run.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// `prebuild.json`.
    pub prebuild: PrebuildConfig,
    /// `graphs.json`.
    pub graphs: GraphConfiguration,
    /// Permissions file.
    pub permissions: PermissionPolicy,
}

/// Load `prebuild.json`, `graphs.json` and the permissions file.
pub async fn load(config: &PipelineConfig) -> Result<LoadedConfig> {
    let prebuild_path = config.prebuild_dir().join("prebuild.json");
    let graphs_path = config.prebuild_dir().join("graphs.json");
    let prebuild: PrebuildConfig = read_required(&prebuild_path).await?;
    let graphs: GraphConfiguration = read_required(&graphs_path).await?;

    let permissions_path = config.base_dir.join(
        prebuild
            .permissions_file
            .as_deref()
            .unwrap_or(DEFAULT_PERMISSIONS_FILE),
    );
    let permissions: PermissionPolicy = read_required(&permissions_path).await?;

    tracing::info!(
        models = graphs.models.len(),
        sources = prebuild.sources.len(),
        filters = prebuild.filters.len(),
        permissions = %permissions_path.display(),
        "Loaded configuration"
    );
    Ok(LoadedConfig {
        prebuild,
        graphs,
        permissions,
    })
}

async fn read_required<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !exists(path).await {
        return Err(PipelineError::MissingConfiguration(format!(
            "you need to set up {} first",
            path.display()
        )));
    }
    read_json(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::new("/site");
        assert_eq!(config.chunk_size_chars, 10_000_000);
        assert_eq!(config.resolve_batch_size, 50);
        assert_eq!(config.extract_batch_size, 10);
        assert_eq!(config.content_dir(), PathBuf::from("/site/docs/definitions/business_data"));
        assert_eq!(config.preindex_dir(), PathBuf::from("/site/prebuild/preindex"));
        assert!(config.is_public_model("HeritageAsset"));
        assert_eq!(config.registry_graph_id, "Registry");
    }

    #[test]
    fn test_public_models_default_to_assets_and_registries() {
        let config = PipelineConfig::new("/site");
        assert_eq!(config.public_models, vec!["HeritageAsset", "Registry"]);
        assert!(config.is_public_model("Registry"));
        for private in ["Person", "Organization", "Event"] {
            assert!(!config.is_public_model(private));
        }
    }

    #[test]
    fn test_paths_default_location_to_geometry() {
        let paths = PrebuildPaths::default();
        assert_eq!(paths.geometry_path(), paths.location_path());
        assert_eq!(paths.soft_deleted_path().to_string(), "soft_deleted");
    }

    #[test]
    fn test_prebuild_config_parse() {
        let config: PrebuildConfig = serde_json::from_value(json!({
            "paths": {"geometry": "geo.shape"},
            "filters": {
                "period": {"path": "dating.period", "type": "array"},
                "county": {"path": "address.county"}
            },
            "sources": [{"resources": "prebuild/business_data/ha.*\\.json", "searchFor": ["g1"]}],
            "permissionsFile": "prebuild/perm.json",
            "indexTemplates": {"HeritageAsset": "ha.md"}
        }))
        .unwrap();
        assert_eq!(config.filters["period"].kind, FilterKind::Array);
        assert_eq!(config.filters["county"].kind, FilterKind::Scalar);
        assert_eq!(config.sources[0].search_for, vec!["g1"]);
        assert_eq!(config.paths.location_path().to_string(), DEFAULT_GEOMETRY_PATH);
    }

    #[test]
    fn test_source_for_takes_first_match() {
        let config: PrebuildConfig = serde_json::from_value(json!({
            "sources": [
                {"resources": "ha_.*", "registries": ["first"]},
                {"resources": "ha_1", "registries": ["second"]},
                {"resources": "other"}
            ]
        }))
        .unwrap();
        let source = config
            .source_for(Path::new("prebuild/business_data/ha_1.json"))
            .unwrap()
            .unwrap();
        assert_eq!(source.registries, vec!["first"]);
        assert!(config.source_for(Path::new("x.json")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_missing_is_missing_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&PipelineConfig::new(dir.path())).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingConfiguration(_)));
    }

    #[tokio::test]
    async fn test_load_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let prebuild = dir.path().join("prebuild");
        std::fs::create_dir_all(&prebuild).unwrap();
        std::fs::write(prebuild.join("prebuild.json"), "{}").unwrap();
        std::fs::write(
            prebuild.join("graphs.json"),
            r#"{"models": {"g1": {"name": "Heritage Asset"}}}"#,
        )
        .unwrap();
        std::fs::write(prebuild.join("permissions.json"), r#"{"HeritageAsset": true}"#).unwrap();

        let loaded = load(&PipelineConfig::new(dir.path())).await.unwrap();
        assert_eq!(loaded.graphs.models["g1"].name, "Heritage Asset");
        assert!(loaded.permissions.get("HeritageAsset").is_some());
    }
}
