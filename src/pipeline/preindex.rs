//! Pre-index phase: batch extraction and intermediate artifacts.
//!
//! ## Artifacts
//!
//! For a source file `ha.json`:
//!
//! | File | Content |
//! |------|---------|
//! | `prebuild/preindex/ha.json.pi` | assets to index |
//! | `prebuild/preindex/ha.json.pi.assoc` | associated assets, not indexed |
//! | `prebuild/fgb/{registry}---ha.json` | `[x, y]` points per registry |
//! | `prebuild/preindex/registries.json` | registry table, merged across runs |
//! | `{output}/definitions/business_data/{slug}.json` | resource documents |
//!
//! Without a source file the stems are `ix.pi`, `ix.pi.assoc` and
//! `{registry}---ix.json`.

use futures::future::try_join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{LoadedConfig, PipelineConfig};
use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::policy::PermissionGate;
use crate::progress::Progress;
use crate::registry::RegistryTable;
use crate::safe_fs::{create_dir_all, expand_numbered, files_matching, safe_join, write_json};
use crate::slug::slugify;
use crate::store::{FieldAccessor, FieldPath, GraphClient, ResourceView};
use crate::types::{Asset, Point};
use super::extract::{snapshot, MetadataExtractor, ResourceSnapshot};
use super::loader::get_all_from;

/// Decides whether an asset goes to the search index or the associated list.
pub type IndexFilter = Arc<dyn Fn(&Asset, bool) -> bool + Send + Sync>;

/// Result of extracting one resource set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreindexOutput {
    /// Assets to index.
    pub metadata: Vec<Asset>,
    /// Assets kept out of the index.
    pub associated: Vec<Asset>,
    /// Points per registry name.
    pub points: BTreeMap<String, Vec<Point>>,
    /// Logically deleted assets skipped.
    pub deleted: usize,
}

/// Paths written by [`BatchExtractor::write_outputs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreindexFiles {
    /// Metadata list.
    pub metadata: PathBuf,
    /// Associated list.
    pub associated: PathBuf,
    /// Point lists.
    pub point_lists: Vec<PathBuf>,
}

/// Drives metadata extraction over resolved resources in batches.
pub struct BatchExtractor<'a> {
    config: &'a PipelineConfig,
    extractor: MetadataExtractor,
    soft_deleted_path: FieldPath,
    should_index: IndexFilter,
    warned_no_soft_delete: bool,
}

impl fmt::Debug for BatchExtractor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExtractor")
            .field("extractor", &self.extractor)
            .field("soft_deleted_path", &self.soft_deleted_path)
            .finish_non_exhaustive()
    }
}

impl<'a> BatchExtractor<'a> {
    /// Create a driver indexing every asset.
    pub fn new(config: &'a PipelineConfig, loaded: &LoadedConfig) -> Result<Self> {
        Ok(Self {
            config,
            extractor: MetadataExtractor::new(&loaded.prebuild)?,
            soft_deleted_path: loaded.prebuild.paths.soft_deleted_path(),
            should_index: Arc::new(|_: &Asset, _: bool| true),
            warned_no_soft_delete: false,
        })
    }

    /// Replace the index filter.
    pub fn with_index_filter(mut self, filter: IndexFilter) -> Self {
        self.should_index = filter;
        self
    }

    /// Extract every resource, in batches of the configured size.
    ///
    /// Members of a batch are read and written concurrently; slugs,
    /// registries and accumulators are updated between reads and writes,
    /// in resource order. `registries` (names or registry resource ids) are
    /// assigned to every extracted asset.
    pub async fn extract<R: ResourceView>(
        &mut self,
        resources: &[R],
        ctx: &mut RunContext,
        registries: &[String],
        prefix: Option<&str>,
        progress: &dyn Progress,
    ) -> Result<PreindexOutput> {
        let batch_size = self.config.extract_batch_size.max(1);
        let total = resources.len();
        let registry_names: Vec<String> = registries
            .iter()
            .map(|r| ctx.registry_name(r).to_string())
            .collect();
        for name in &registry_names {
            ctx.registries.insert(name);
        }

        let content_dir = self.config.content_dir();
        create_dir_all(&content_dir).await?;

        let mut output = PreindexOutput::default();
        for (b, batch) in resources.chunks(batch_size).enumerate() {
            progress.progress("batch-processing", "Processing assets", b * batch_size, total);

            let snapshots = try_join_all(batch.iter().map(snapshot)).await?;

            let mut extracted = Vec::with_capacity(snapshots.len());
            for resource in snapshots {
                if self.is_deleted(&resource) {
                    output.deleted += 1;
                    continue;
                }
                let mut asset = self.extractor.get_meta(&resource, &mut ctx.slugs, prefix)?;
                if !registry_names.is_empty() {
                    asset.meta.set_registries(&registry_names)?;
                }
                extracted.push((asset, resource.document));
            }

            try_join_all(
                extracted
                    .iter()
                    .map(|(asset, document)| write_document(&content_dir, asset, document)),
            )
            .await?;

            for (asset, _) in extracted {
                if let Some(point) = asset.location() {
                    for registry in asset.meta.registry_names()? {
                        output.points.entry(registry).or_default().push(point);
                    }
                }
                if (self.should_index)(&asset, ctx.include_private) {
                    output.metadata.push(asset);
                } else {
                    output.associated.push(asset);
                }
            }
            tokio::task::yield_now().await;
        }
        progress.progress("batch-processing", "Processing assets", total, total);

        tracing::info!(
            indexed = output.metadata.len(),
            associated = output.associated.len(),
            deleted = output.deleted,
            registries = output.points.len(),
            "Extracted assets"
        );
        Ok(output)
    }

    fn is_deleted(&mut self, snapshot: &ResourceSnapshot) -> bool {
        if snapshot.model_class_name != self.config.primary_model {
            if !self.warned_no_soft_delete {
                tracing::warn!(
                    model = %snapshot.model_class_name,
                    "No soft deletion, assuming all present"
                );
                self.warned_no_soft_delete = true;
            }
            return false;
        }
        matches!(
            snapshot.view.try_get(&self.soft_deleted_path),
            Some(Value::Bool(true))
        )
    }

    /// Write the metadata list, associated list and per-registry point lists.
    ///
    /// Both lists are always written, empty or not. A point list is written
    /// for every registry that accumulated at least one point.
    pub async fn write_outputs(&self, output: &PreindexOutput, source_file: Option<&Path>) -> Result<PreindexFiles> {
        let preindex_dir = self.config.preindex_dir();
        let point_dir = self.config.point_list_dir();
        create_dir_all(&preindex_dir).await?;
        create_dir_all(&point_dir).await?;

        let (name, stem) = match source_file {
            Some(file) => (
                file_name(file, |p| p.file_name())?,
                file_name(file, |p| p.file_stem())?,
            ),
            None => ("ix".to_string(), "ix".to_string()),
        };

        let metadata = safe_join(&preindex_dir, format!("{name}.pi"))?;
        write_json(&metadata, &output.metadata, true).await?;
        let associated = safe_join(&preindex_dir, format!("{name}.pi.assoc"))?;
        write_json(&associated, &output.associated, true).await?;

        let mut point_lists = Vec::new();
        for (registry, points) in &output.points {
            if points.is_empty() {
                continue;
            }
            let Ok(registry_slug) = slugify(registry) else {
                tracing::warn!(registry = %registry, "Registry name has no slug form, skipping points");
                continue;
            };
            let path = safe_join(&point_dir, format!("{registry_slug}---{stem}.json"))?;
            write_json(&path, points, false).await?;
            point_lists.push(path);
        }

        Ok(PreindexFiles {
            metadata,
            associated,
            point_lists,
        })
    }
}

fn file_name(path: &Path, part: impl Fn(&Path) -> Option<&std::ffi::OsStr>) -> Result<String> {
    part(path)
        .map(|p| p.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::InvalidInput(format!("{} has no file name", path.display())))
}

async fn write_document(content_dir: &Path, asset: &Asset, document: &Value) -> Result<()> {
    let path = safe_join(content_dir, format!("{}.json", asset.slug))?;
    let mut document = document.clone();
    if let Value::Object(fields) = &mut document {
        let metadata = serde_json::to_value(&asset.meta)
            .map_err(|e| PipelineError::json(format!("asset {} metadata", asset.slug), e))?;
        fields.insert("__scopes".to_string(), Value::from(asset.meta.scope_names()?));
        fields.insert("metadata".to_string(), metadata);
    }
    write_json(&path, &document, true).await
}

/// Summary of one pre-index invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PreindexSummary {
    /// Source files whose resources were resolved.
    pub source_files: Vec<PathBuf>,
    /// Extracted assets.
    pub output: PreindexOutput,
    /// Artifacts written.
    pub files: PreindexFiles,
}

/// Collect the business-data files backing `resource_file`.
///
/// `%` in the path expands to consecutive numbered files. Dependencies of
/// the first matching source and the files of every source declaring
/// `searchFor` graphs are added from `prebuild/business_data`.
pub async fn source_files(config: &PipelineConfig, loaded: &LoadedConfig, resource_file: &str) -> Result<Vec<PathBuf>> {
    let mut files = expand_numbered(resource_file).await;
    let business_data_dir = config.business_data_dir();

    if let Some(source) = loaded.prebuild.source_for(Path::new(resource_file))? {
        tracing::info!(source = %source.resources, "Found matching source in prebuild.json");
        for pattern in source.dependency_patterns()? {
            for dependency in files_matching(&business_data_dir, &pattern).await? {
                tracing::info!(dependency = %dependency.display(), "Dependency added");
                files.push(dependency);
            }
        }
    }
    for source in loaded.prebuild.sources.iter().filter(|s| !s.search_for.is_empty()) {
        files.extend(files_matching(&business_data_dir, &source.resources_pattern()?).await?);
    }

    let mut seen = std::collections::HashSet::new();
    files.retain(|f| seen.insert(f.clone()));
    Ok(files)
}

/// Run the pre-index phase for one resource file.
pub async fn run_preindex<C: GraphClient>(
    client: &C,
    config: &PipelineConfig,
    loaded: &LoadedConfig,
    gate: &mut PermissionGate,
    resource_file: &str,
    prefix: Option<&str>,
    progress: &dyn Progress,
) -> Result<PreindexSummary> {
    if !resource_file.ends_with(".json") {
        return Err(PipelineError::InvalidInput(format!(
            "tried to run with a non .json file: {resource_file}"
        )));
    }
    progress.log(&format!("Pre-indexing {resource_file}"));
    if config.include_private {
        progress.log("Building for NON-PUBLIC assets");
    }

    let files = source_files(config, loaded, resource_file).await?;
    let added = client
        .add_source_files(&files)
        .await
        .map_err(|e| PipelineError::from_collaborator("graph client", e))?;
    tracing::debug!(files = files.len(), resources = added, "Registered source files");

    let table_path = config.registry_table_path();
    let mut ctx = RunContext::with_registries(
        RegistryTable::load_or_default(&table_path).await?,
        config.include_private,
    );

    let requested: Vec<PathBuf> = expand_numbered(resource_file).await;
    let model_ids: Vec<String> = loaded.graphs.models.keys().cloned().collect();
    let resources = get_all_from(client, &mut ctx, config, model_ids, gate, &requested, progress).await?;
    progress.log(&format!("Loaded {} assets", resources.len()));

    let registries = loaded
        .prebuild
        .source_for(Path::new(resource_file))?
        .map(|s| s.registries.clone())
        .unwrap_or_default();

    let mut driver = BatchExtractor::new(config, loaded)?;
    let output = driver
        .extract(&resources, &mut ctx, &registries, prefix, progress)
        .await?;
    let written = driver
        .write_outputs(&output, Some(Path::new(resource_file)))
        .await?;
    ctx.registries.save(&table_path).await?;

    Ok(PreindexSummary {
        source_files: files,
        output,
        files: written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphConfiguration, PrebuildConfig};
    use crate::policy::PermissionPolicy;
    use crate::progress::RecordingProgress;
    use crate::store::{GraphClient, InMemoryGraphClient, StoredResource};
    use serde_json::json;

    fn loaded() -> LoadedConfig {
        LoadedConfig {
            prebuild: PrebuildConfig::default(),
            graphs: GraphConfiguration::default(),
            permissions: PermissionPolicy::default(),
        }
    }

    fn geometry(x: f64, y: f64) -> Value {
        json!({"geometry": {"coordinates": {
            "type": "FeatureCollection",
            "features": [{"type": "Feature", "geometry": {"type": "Point", "coordinates": [x, y]}}]
        }}})
    }

    async fn resources(client: &mut InMemoryGraphClient) -> Vec<crate::store::MemoryResource> {
        client.add_graph(&json!({"graphid": "g1", "name": "Heritage Asset", "nodes": []}));
        client.add_graph(&json!({"graphid": "g2", "name": "Person", "nodes": []}));
        client
            .add_resource(
                "g1",
                StoredResource::new("aaaaaa-1", Some("Old Mill")).with_tile("location", geometry(1.0, 2.0)),
            )
            .unwrap();
        client
            .add_resource(
                "g1",
                StoredResource::new("bbbbbb-2", Some("Gone")).with_tile("soft_deleted", json!(true)),
            )
            .unwrap();
        client
            .add_resource("g2", StoredResource::new("cccccc-3", Some("Jane Doe")))
            .unwrap();
        client.load_graph("g1", true).await.unwrap();
        client.load_graph("g2", true).await.unwrap();
        let mut out = Vec::new();
        for (graph, id) in [("g1", "aaaaaa-1"), ("g1", "bbbbbb-2"), ("g2", "cccccc-3")] {
            out.push(client.find(graph, &id.into()).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_extract_batches_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path());
        config.extract_batch_size = 2;
        let loaded = loaded();
        let mut client = InMemoryGraphClient::new();
        let resources = resources(&mut client).await;

        let mut ctx = RunContext::new(true);
        let progress = RecordingProgress::new();
        let mut driver = BatchExtractor::new(&config, &loaded).unwrap();
        let output = driver
            .extract(&resources, &mut ctx, &["Record of Monuments".to_string()], None, &progress)
            .await
            .unwrap();

        assert_eq!(output.deleted, 1);
        assert_eq!(output.metadata.len(), 2);
        assert!(output.associated.is_empty());
        assert_eq!(output.points["Record of Monuments"], vec![[1.0, 2.0]]);
        assert_eq!(ctx.registries.names(), &["record-of-monuments"]);
        assert_eq!(
            progress.updates_for("batch-processing"),
            vec![(0, 3), (2, 3), (3, 3)]
        );

        let document: Value = serde_json::from_str(
            &std::fs::read_to_string(config.content_dir().join("old-mill-aaaaaa.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(document["metadata"]["slug"], "old-mill-aaaaaa");
        assert_eq!(document["__scopes"], json!([]));

        let files = driver
            .write_outputs(&output, Some(Path::new("prebuild/business_data/ha.json")))
            .await
            .unwrap();
        assert_eq!(files.metadata, config.preindex_dir().join("ha.json.pi"));
        assert_eq!(files.associated, config.preindex_dir().join("ha.json.pi.assoc"));
        let associated: Vec<Asset> =
            serde_json::from_str(&std::fs::read_to_string(&files.associated).unwrap()).unwrap();
        assert!(associated.is_empty());
        assert_eq!(
            files.point_lists,
            vec![config.point_list_dir().join("record-of-monuments---ha.json")]
        );
    }

    #[tokio::test]
    async fn test_index_filter_routes_to_associated() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path());
        let loaded = loaded();
        let mut client = InMemoryGraphClient::new();
        let resources = resources(&mut client).await;

        let mut driver = BatchExtractor::new(&config, &loaded)
            .unwrap()
            .with_index_filter(Arc::new(|asset: &Asset, _: bool| asset.model_type == "HeritageAsset"));
        let output = driver
            .extract(&resources, &mut RunContext::new(true), &[], None, &RecordingProgress::new())
            .await
            .unwrap();
        assert_eq!(output.metadata.len(), 1);
        assert_eq!(output.associated.len(), 1);
        assert!(output.points.is_empty());

        let files = driver.write_outputs(&output, None).await.unwrap();
        assert_eq!(files.metadata, config.preindex_dir().join("ix.pi"));
        assert_eq!(files.associated, config.preindex_dir().join("ix.pi.assoc"));
    }

    #[tokio::test]
    async fn test_point_lists_written_without_indexed_assets() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path());
        let loaded = loaded();
        let driver = BatchExtractor::new(&config, &loaded).unwrap();

        let mut output = PreindexOutput::default();
        output.points.insert("Record of Monuments".to_string(), vec![[1.0, 2.0]]);
        output.points.insert("Empty Register".to_string(), Vec::new());

        let files = driver
            .write_outputs(&output, Some(Path::new("prebuild/business_data/ha.json")))
            .await
            .unwrap();
        let metadata: Vec<Asset> =
            serde_json::from_str(&std::fs::read_to_string(&files.metadata).unwrap()).unwrap();
        assert!(metadata.is_empty());
        assert!(files.associated.exists());
        assert_eq!(
            files.point_lists,
            vec![config.point_list_dir().join("record-of-monuments---ha.json")]
        );
    }

    #[tokio::test]
    async fn test_slug_escape_is_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path());
        let mut client = InMemoryGraphClient::new();
        let resources = resources(&mut client).await;

        let mut driver = BatchExtractor::new(&config, &loaded()).unwrap();
        let err = driver
            .extract(&resources, &mut RunContext::new(true), &[], Some("../../"), &RecordingProgress::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PathTraversal { .. }));
    }
}
