//! Reindex phase: publish pre-index artifacts.
//!
//! ## Order
//!
//! 1. Metadata lists → search indexer; catalogue hashes joined by slug.
//! 2. Graph definitions loaded, filtered, pruned and written, then `_all.json`.
//! 3. Referenced reference-data collections copied.
//! 4. `_{graphId}.json` resource indexes.
//! 5. Chunked business data, or spatial layers and the point index.
//! 6. Referenced-but-missing branches reported.
//!
//! Registry bitmasks are computed against the table persisted by the
//! pre-index phase.

pub mod business_data;
pub mod graphs;
pub mod reference;
pub mod search;
pub mod spatial;

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::{OutputMode, PipelineConfig};
use crate::error::Result;
use crate::index::{SearchIndexer, SpatialCodec};
use crate::policy::PermissionGate;
use crate::progress::Progress;
use crate::registry::RegistryTable;
use crate::safe_fs::exists;

pub use business_data::{write_chunks, write_resource_indexes, ChunkAccumulator};
pub use graphs::{
    load_graph_files, process_graphs, read_graph_file, write_all_meta, GraphFile, GraphKind,
    GraphMeta, ProcessedGraphs, PublishedModel,
};
pub use reference::copy_reference_data;
pub use search::{
    asset_url, build_search_index, hashes_by_slug, index_entries, is_published,
    read_metadata_lists,
};
pub use spatial::{write_spatial, SpatialFiles};

const STAGES: usize = 5;

/// What one reindex run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishSummary {
    /// Assets read from metadata lists.
    pub assets: usize,
    /// Search records added.
    pub records: usize,
    /// Assets placed in the point index.
    pub index_entries: usize,
    /// Graph definition files written.
    pub graphs: Vec<PathBuf>,
    /// Model class names published.
    pub models: Vec<String>,
    /// Reference-data files written.
    pub collections: Vec<PathBuf>,
    /// `_{graphId}.json` files written.
    pub resource_indexes: Vec<PathBuf>,
    /// Business-data chunk files written (chunked mode).
    pub chunks: Vec<PathBuf>,
    /// Spatial artifacts written (spatial mode).
    pub spatial: Option<SpatialFiles>,
    /// Branch publication ids referenced but never written.
    pub missing_branches: Vec<String>,
}

/// Run the reindex phase.
///
/// `files` restricts the metadata lists read; `None` reads every `*.pi`.
pub async fn run_reindex<I: SearchIndexer, S: SpatialCodec>(
    config: &PipelineConfig,
    gate: &mut PermissionGate,
    indexer: &mut I,
    codec: &S,
    files: Option<&[PathBuf]>,
    progress: &dyn Progress,
) -> Result<PublishSummary> {
    let mut summary = PublishSummary::default();

    let table_path = config.registry_table_path();
    if !exists(&table_path).await {
        tracing::warn!(
            path = %table_path.display(),
            "No registry table from pre-index, bitmasks follow this run's discovery order"
        );
    }
    let mut registries = RegistryTable::load_or_default(&table_path).await?;

    progress.progress("reindex", "Building search index", 0, STAGES);
    let assets = read_metadata_lists(config, files).await?;
    summary.assets = assets.len();
    summary.records = build_search_index(indexer, &assets, &mut registries, config).await?;
    let entries = if assets.is_empty() {
        tracing::warn!("No asset metadata was found");
        Vec::new()
    } else {
        let hashes = hashes_by_slug(indexer).await?;
        index_entries(&assets, &hashes, &registries, config)?
    };
    summary.index_entries = entries.len();

    progress.progress("reindex", "Publishing graphs", 1, STAGES);
    let graph_files = load_graph_files(config).await?;
    let processed = process_graphs(graph_files, config, gate).await?;
    write_all_meta(config, &processed.all_meta).await?;
    summary.graphs = processed.written.clone();
    summary.models = processed
        .models
        .iter()
        .map(|m| m.descriptor.model_class_name.clone())
        .collect();

    progress.progress("reindex", "Copying reference data", 2, STAGES);
    summary.collections = copy_reference_data(config, &processed.models).await?;

    progress.progress("reindex", "Writing resource indexes", 3, STAGES);
    let graph_ids: BTreeSet<String> = processed.all_meta.keys().cloned().collect();
    summary.resource_indexes = write_resource_indexes(config, &assets, &graph_ids).await?;

    progress.progress("reindex", "Writing business data", 4, STAGES);
    match config.output_mode {
        OutputMode::Chunked => {
            summary.chunks = write_chunks(config, &assets, &processed.model_names()).await?;
            summary.missing_branches = processed.missing_branches();
            if !summary.missing_branches.is_empty() {
                tracing::warn!(
                    branches = ?summary.missing_branches,
                    "Branches missing (publication IDs)"
                );
            }
        }
        OutputMode::Spatial => {
            summary.spatial = Some(write_spatial(codec, config, &registries, entries).await?);
        }
    }
    progress.progress("reindex", "Published", STAGES, STAGES);

    tracing::info!(
        assets = summary.assets,
        records = summary.records,
        models = summary.models.len(),
        "Reindex complete"
    );
    Ok(summary)
}
