//! Per-graph resource indexes and chunked business-data files.

use futures::future::try_join_all;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::safe_fs::{create_dir_all, exists, read_json, safe_join, write_json};
use crate::types::{resource_graph_id, Asset, BusinessData, ResourceSummary};

/// Running per-model byte totals.
///
/// A resource's chunk is `floor(total / chunk_size)` where `total` already
/// includes the resource itself.
#[derive(Debug, Clone)]
pub struct ChunkAccumulator {
    chunk_size: usize,
    totals: HashMap<String, usize>,
}

impl ChunkAccumulator {
    /// Create an accumulator; a zero budget is treated as one byte.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            totals: HashMap::new(),
        }
    }

    /// Add `len` bytes to a model and return the chunk they land in.
    pub fn place(&mut self, graph_id: &str, len: usize) -> usize {
        let total = self.totals.entry(graph_id.to_string()).or_insert(0);
        *total += len;
        *total / self.chunk_size
    }

    /// Bytes accumulated for a model.
    pub fn total(&self, graph_id: &str) -> usize {
        self.totals.get(graph_id).copied().unwrap_or(0)
    }
}

fn document_path(config: &PipelineConfig, asset: &Asset) -> Result<PathBuf> {
    safe_join(config.content_dir(), format!("{}.json", asset.slug))
}

/// Write `_{graphId}.json` summaries listing each published model's resources.
///
/// Assets whose resource document is missing are left out.
pub async fn write_resource_indexes(
    config: &PipelineConfig,
    assets: &[Asset],
    model_graph_ids: &BTreeSet<String>,
) -> Result<Vec<PathBuf>> {
    let content_dir = config.content_dir();
    create_dir_all(&content_dir).await?;

    let mut summaries: BTreeMap<String, Vec<ResourceSummary>> = BTreeMap::new();
    for asset in assets {
        let path = document_path(config, asset)?;
        if !exists(&path).await {
            continue;
        }
        let graph_id = if asset.meta.graphid.is_empty() {
            let document: Value = read_json(&path).await?;
            resource_graph_id(&document).unwrap_or_default().to_string()
        } else {
            asset.meta.graphid.clone()
        };
        if !model_graph_ids.contains(&graph_id) {
            continue;
        }
        summaries.entry(graph_id).or_default().push(ResourceSummary {
            name: asset.meta.title.clone(),
            resourceinstanceid: asset.meta.resourceinstanceid.clone(),
        });
    }

    let mut written = Vec::with_capacity(summaries.len());
    for (graph_id, resources) in &summaries {
        let path = safe_join(&content_dir, format!("_{graph_id}.json"))?;
        write_json(&path, &json!({"business_data": {"resources": resources}}), true).await?;
        written.push(path);
    }
    tracing::info!(files = written.len(), "Generated resource index files");
    Ok(written)
}

async fn read_document(path: &Path) -> Result<Option<(usize, Value)>> {
    if !exists(path).await {
        tracing::warn!(path = %path.display(), "Missing resource file referenced in metadata");
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    let document = serde_json::from_str(&content)
        .map_err(|e| PipelineError::json(format!("file: {}", path.display()), e))?;
    Ok(Some((content.len(), document)))
}

/// Group resource documents into `{modelName}_{chunk}.json` files.
///
/// `model_names` maps graph ids to model class names; documents of other
/// graphs are skipped with a warning.
pub async fn write_chunks(
    config: &PipelineConfig,
    assets: &[Asset],
    model_names: &BTreeMap<String, String>,
) -> Result<Vec<PathBuf>> {
    let content_dir = config.content_dir();
    create_dir_all(&content_dir).await?;

    let paths = assets
        .iter()
        .map(|asset| document_path(config, asset))
        .collect::<Result<Vec<_>>>()?;
    let documents = try_join_all(paths.iter().map(|p| read_document(p))).await?;

    let mut accumulator = ChunkAccumulator::new(config.chunk_size_chars);
    let mut chunks: BTreeMap<(String, usize), Vec<Value>> = BTreeMap::new();
    for (len, document) in documents.into_iter().flatten() {
        let Some(graph_id) = resource_graph_id(&document).map(str::to_string) else {
            tracing::warn!("Resource document has no graph id, skipping");
            continue;
        };
        let chunk = accumulator.place(&graph_id, len);
        chunks.entry((graph_id, chunk)).or_default().push(document);
    }

    let mut written = Vec::new();
    let mut unknown = BTreeSet::new();
    for ((graph_id, chunk), resources) in chunks {
        let Some(model_name) = model_names.get(&graph_id) else {
            if unknown.insert(graph_id.clone()) {
                tracing::warn!(graph_id = %graph_id, "Found business data for unknown model");
            }
            continue;
        };
        let path = safe_join(&content_dir, format!("{model_name}_{chunk}.json"))?;
        write_json(&path, &BusinessData::new(resources), false).await?;
        written.push(path);
    }
    tracing::info!(files = written.len(), "Wrote business data chunks");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceId;

    #[test]
    fn test_chunk_boundaries() {
        let mut acc = ChunkAccumulator::new(100);
        assert_eq!(acc.place("g1", 40), 0);
        assert_eq!(acc.place("g1", 40), 0);
        assert_eq!(acc.place("g1", 40), 1);
        assert_eq!(acc.place("g2", 40), 0);
        assert_eq!(acc.total("g1"), 120);
    }

    async fn seed(config: &PipelineConfig, id: &str, graph_id: &str, padding: usize) -> Asset {
        let slug = format!("asset-{id}");
        let asset = Asset::new(&ResourceId::new(id), graph_id, None, None, &slug, &slug, "HeritageAsset");
        let document = json!({
            "resourceinstance": {"resourceinstanceid": id, "graph_id": graph_id},
            "padding": "x".repeat(padding),
        });
        write_json(config.content_dir().join(format!("{slug}.json")), &document, true)
            .await
            .unwrap();
        asset
    }

    #[tokio::test]
    async fn test_resource_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path());
        let mut assets = vec![
            seed(&config, "r1", "g1", 0).await,
            seed(&config, "r2", "g2", 0).await,
        ];
        assets.push(Asset::new(&ResourceId::new("r3"), "g1", None, None, "Gone", "gone-r3", "HeritageAsset"));

        let written = write_resource_indexes(&config, &assets, &BTreeSet::from(["g1".to_string()]))
            .await
            .unwrap();
        assert_eq!(written.len(), 1);
        let index: Value = read_json(&written[0]).await.unwrap();
        assert_eq!(index["business_data"]["resources"], json!([{"name": "asset-r1", "resourceinstanceid": "r1"}]));
    }

    #[tokio::test]
    async fn test_chunks_split_by_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path());
        config.chunk_size_chars = 250;
        let mut assets = Vec::new();
        for id in ["r1", "r2", "r3"] {
            assets.push(seed(&config, id, "g1", 50).await);
        }
        assets.push(seed(&config, "r9", "g-unknown", 0).await);
        assets.push(Asset::new(&ResourceId::new("r4"), "g1", None, None, "Gone", "gone-r4", "HeritageAsset"));

        let names = BTreeMap::from([("g1".to_string(), "HeritageAsset".to_string())]);
        let written = write_chunks(&config, &assets, &names).await.unwrap();
        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["HeritageAsset_0.json", "HeritageAsset_1.json"]);

        let first: BusinessData = read_json(&written[0]).await.unwrap();
        let second: BusinessData = read_json(&written[1]).await.unwrap();
        assert_eq!(first.business_data.resources.len() + second.business_data.resources.len(), 3);
    }
}
