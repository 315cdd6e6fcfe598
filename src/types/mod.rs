//! Core types for the publishing pipeline.

pub mod asset;
pub mod business_data;
pub mod geo;

pub use asset::{Asset, AssetMetadata, IndexEntry, ResourceId, EMPTY_LIST, RESERVED_FACET_NAMES};
pub use business_data::{
    resource_graph_id, BusinessData, BusinessDataResources, ModelEntry, ResourceRequest,
    ResourceSummary,
};
pub use geo::{point_from_value, Feature, FeatureCollection, Geometry, Point};
