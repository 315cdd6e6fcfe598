//! Search and spatial collaborators driven by the reindex phase.

pub mod search;
pub mod spatial;

pub use search::{
    normalize_content, record_hash, InMemorySearchIndex, SearchIndexError, SearchIndexer,
    SearchRecord, RECORD_HASH_LENGTH,
};
pub use spatial::{
    GeoJsonCodec, IndexedPoint, LayerHeader, PointIndex, SpatialCodec, SpatialCodecError,
    POINT_INDEX_MAGIC,
};
