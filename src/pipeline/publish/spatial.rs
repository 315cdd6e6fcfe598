//! Spatial output: per-registry layers, the asset layer and the point index.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::index::SpatialCodec;
use crate::registry::RegistryTable;
use crate::safe_fs::{create_dir_all, read_json, safe_join, write_json};
use crate::types::{Feature, FeatureCollection, Geometry, IndexEntry, Point};

/// Separator between the registry slug and the source stem in point-list names.
pub const POINT_LIST_SEPARATOR: &str = "---";

/// Asset layer before re-indexing.
pub const ASSET_LAYER_RAW: &str = "assets-wo-index.fgb";

/// Re-indexed asset layer.
pub const ASSET_LAYER: &str = "assets.fgb";

/// Files written by [`write_spatial`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpatialFiles {
    /// One layer per registry.
    pub registry_layers: Vec<PathBuf>,
    /// Registry slug to bitmask.
    pub registry_index: Option<PathBuf>,
    /// Re-indexed asset layer.
    pub asset_layer: Option<PathBuf>,
    /// Packed point index.
    pub point_index: Option<PathBuf>,
    /// `[hash, regcode]` per point index slot.
    pub point_metadata: Option<PathBuf>,
}

fn codec_error<E: std::error::Error>(e: E) -> PipelineError {
    PipelineError::from_collaborator("spatial codec", e)
}

async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| PipelineError::io(path, e))
}

/// Group point-list files by the registry slug in their name.
pub async fn point_lists(config: &PipelineConfig) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let pattern = regex_lite::Regex::new(r"\.json$").map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
    let mut grouped: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for path in crate::safe_fs::files_matching(config.point_list_dir(), &pattern).await? {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let Some((registry, _)) = name.split_once(POINT_LIST_SEPARATOR) else {
            tracing::warn!(file = %path.display(), "Point list name has no registry prefix, skipping");
            continue;
        };
        grouped.entry(registry.to_string()).or_default().push(path);
    }
    Ok(grouped)
}

/// Write one `MultiPoint` layer per registry and the registry index.
pub async fn write_registry_layers<S: SpatialCodec>(
    codec: &S,
    config: &PipelineConfig,
    registries: &RegistryTable,
    files: &mut SpatialFiles,
) -> Result<()> {
    let output = config.spatial_output_dir();
    create_dir_all(&output).await?;

    let mut index: BTreeMap<String, u64> = BTreeMap::new();
    for (registry, paths) in point_lists(config).await? {
        let regcode = registries.encode(&[registry.as_str()]);
        if regcode == 0 {
            tracing::warn!(registry = %registry, "Registry missing from table, its layer has no bitmask");
        }
        index.insert(registry.clone(), regcode);

        let mut points: Vec<Point> = Vec::new();
        for path in &paths {
            points.extend(read_json::<Vec<Point>>(path).await?);
        }
        let mut properties = Map::new();
        properties.insert("registry".into(), Value::from(registry.clone()));
        properties.insert("regcode".into(), Value::from(regcode));
        let layer = FeatureCollection::new(vec![Feature::new(
            Geometry::MultiPoint { coordinates: points },
            properties,
        )]);

        let path = safe_join(&output, format!("{registry}.fgb"))?;
        write_bytes(&path, &codec.serialize(&layer).map_err(codec_error)?).await?;
        files.registry_layers.push(path);
    }

    let path = output.join("index.json");
    write_json(&path, &index, false).await?;
    files.registry_index = Some(path);
    tracing::info!(registries = index.len(), "Wrote registry layers");
    Ok(())
}

/// Write the asset layer, re-index it, then build the point index.
///
/// Slot `i` of `flatbush.json` describes point `i` of the index input.
pub async fn write_asset_index<S: SpatialCodec>(
    codec: &S,
    config: &PipelineConfig,
    entries: Vec<(IndexEntry, Feature)>,
    files: &mut SpatialFiles,
) -> Result<()> {
    let output = config.spatial_output_dir();
    let (entries, features): (Vec<IndexEntry>, Vec<Feature>) = entries.into_iter().unzip();

    let raw = codec
        .serialize(&FeatureCollection::new(features))
        .map_err(codec_error)?;
    write_bytes(&output.join(ASSET_LAYER_RAW), &raw).await?;
    let layer = codec
        .reindex(&raw, "assets", "Published assets with search hashes")
        .map_err(codec_error)?;
    let layer_path = output.join(ASSET_LAYER);
    write_bytes(&layer_path, &layer).await?;
    files.asset_layer = Some(layer_path);

    let points: Vec<Point> = entries.iter().map(|e| e.loc).collect();
    let index = codec.build_point_index(&points).map_err(codec_error)?;
    let index_path = config.output_dir.join("flatbush.bin");
    write_bytes(&index_path, &index).await?;
    files.point_index = Some(index_path);

    let metadata: Vec<(&str, u64)> = entries.iter().map(|e| (e.hash.as_str(), e.regcode)).collect();
    let metadata_path = config.output_dir.join("flatbush.json");
    write_json(&metadata_path, &metadata, false).await?;
    files.point_metadata = Some(metadata_path);

    tracing::info!(points = points.len(), "Indexed assets in point index");
    Ok(())
}

/// Write every spatial artifact.
pub async fn write_spatial<S: SpatialCodec>(
    codec: &S,
    config: &PipelineConfig,
    registries: &RegistryTable,
    entries: Vec<(IndexEntry, Feature)>,
) -> Result<SpatialFiles> {
    let mut files = SpatialFiles::default();
    write_registry_layers(codec, config, registries, &mut files).await?;
    write_asset_index(codec, config, entries, &mut files).await?;
    Ok(files)
}
