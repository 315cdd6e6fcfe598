//! Pipeline stages.
//!
//! The pre-index and reindex phases run as separate invocations:
//!
//! ```text
//! pre-index:  GraphClient → ResourceLoader → BatchExtractor → *.pi, *.pi.assoc, point lists
//!                                                               ↓          registries.json
//! reindex:    *.pi → SearchIndexer → graphs → reference data → chunks | spatial layers
//! ```
//!
//! The registry table written by pre-index is replayed by reindex so that
//! both phases compute the same registry bitmasks.

pub mod extract;
pub mod loader;
pub mod preindex;
pub mod publish;

// Re-exports
pub use extract::{reduce_location, snapshot, MetadataExtractor, ResourceSnapshot, UNKNOWN_TITLE};
pub use loader::{
    get_all_from, load_models, load_registries, GraphsLoaded, PermissionsApplied, ResourceLoader,
    ResourcesMaterialized, Unloaded,
};
pub use preindex::{
    run_preindex, source_files, BatchExtractor, IndexFilter, PreindexFiles, PreindexOutput,
    PreindexSummary,
};
pub use publish::{run_reindex, ChunkAccumulator, PublishSummary, SpatialFiles};
