//! # heritage-publisher
//!
//! Publishes a graph-structured heritage dataset as a static, searchable,
//! mappable site.
//!
//! ## Core Contract
//!
//! 1. No resource of a model is materialized before that model's field-group
//!    permissions are applied
//! 2. Every published asset has a slug unique within the run and, if it has
//!    a location, a single `[x, y]` point
//! 3. Registry bitmasks computed by the pre-index and reindex phases agree
//!
//! ## Architecture
//!
//! ```text
//! prebuild/*.json → PermissionGate → ResourceLoader → BatchExtractor → *.pi
//!                                         ↓                              ↓
//!                                    GraphClient               SearchIndexer, SpatialCodec
//!                                                                        ↓
//!                                                     graphs, reference data, chunks, layers
//! ```
//!
//! The graph client, search indexer and spatial codec are external
//! collaborators behind the [`GraphClient`], [`SearchIndexer`] and
//! [`SpatialCodec`] traits. In-memory implementations are provided for
//! tests and small builds.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod config;
pub mod context;
pub mod error;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod policy;
pub mod progress;
pub mod registry;
pub mod safe_fs;
pub mod slug;
pub mod store;
pub mod types;

// Re-exports
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes};
pub use config::{LoadedConfig, OutputMode, PipelineConfig, PrebuildConfig};
pub use context::RunContext;
pub use error::{PipelineError, Result};
pub use index::{GeoJsonCodec, InMemorySearchIndex, SearchIndexer, SearchRecord, SpatialCodec};
pub use logging::{init_tracing, LogFormat};
pub use pipeline::{
    run_preindex, run_reindex, BatchExtractor, ChunkAccumulator, MetadataExtractor,
    PreindexSummary, PublishSummary, ResourceLoader,
};
pub use policy::{PermissionGate, PermissionPolicy, PermittedNodegroups, PredicateProvider};
pub use progress::{Progress, RecordingProgress, TracingProgress};
pub use registry::RegistryTable;
pub use slug::{slugify, SlugGenerator};
pub use store::{GraphClient, InMemoryGraphClient, ModelDescriptor, ResourceView};
pub use types::{Asset, AssetMetadata, IndexEntry, ResourceId};

/// Default byte budget of one business-data chunk file.
pub const CHUNK_SIZE_CHARS: usize = 10_000_000;

/// Default language of search records.
pub const DEFAULT_LANGUAGE: &str = "en";
