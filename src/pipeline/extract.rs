//! Per-asset metadata extraction.
//!
//! Extraction is split in two: [`snapshot`] reads everything the pipeline
//! needs from a resource handle and can run concurrently across a batch;
//! [`MetadataExtractor::get_meta`] derives the [`Asset`] from a snapshot and
//! mutates the run's slug state, so it runs sequentially.

use serde_json::Value;

use crate::config::{FilterKind, PrebuildConfig};
use crate::error::{PipelineError, Result};
use crate::slug::SlugGenerator;
use crate::store::{is_present, FieldAccessor, FieldPath, ResourceView};
use crate::types::{point_from_value, Asset, Point, ResourceId, RESERVED_FACET_NAMES};

/// Title used when a resource has no usable display name.
pub const UNKNOWN_TITLE: &str = "(unknown)";

/// Everything read from a resource handle.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    /// Resource identifier.
    pub id: ResourceId,
    /// Owning graph.
    pub graph_id: String,
    /// Model class name of the owning graph.
    pub model_class_name: String,
    /// Display name, if any.
    pub display_name: Option<String>,
    /// Detailed JSON view of the permitted data.
    pub view: Value,
    /// Stored document to publish.
    pub document: Value,
}

/// Read a resource handle into a [`ResourceSnapshot`].
pub async fn snapshot<R: ResourceView>(resource: &R) -> Result<ResourceSnapshot> {
    let collaborator = |e| PipelineError::from_collaborator("graph client", e);
    Ok(ResourceSnapshot {
        id: resource.id().clone(),
        graph_id: resource.graph_id().to_string(),
        model_class_name: resource.model_class_name().to_string(),
        display_name: resource.display_name().await.map_err(collaborator)?,
        view: resource.for_json(true).await.map_err(collaborator)?,
        document: resource.resource_document().await.map_err(collaborator)?,
    })
}

#[derive(Debug, Clone)]
struct Filter {
    name: String,
    path: FieldPath,
    kind: FilterKind,
}

/// Derives [`Asset`] records from resource snapshots.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    geometry_path: FieldPath,
    location_path: FieldPath,
    filters: Vec<Filter>,
}

impl MetadataExtractor {
    /// Build an extractor from the prebuild configuration.
    ///
    /// Fails with `InvalidInput` if a filter is named after a metadata field
    /// it would shadow in the written metadata lists.
    pub fn new(config: &PrebuildConfig) -> Result<Self> {
        let mut filters = Vec::with_capacity(config.filters.len());
        for (name, filter) in &config.filters {
            if RESERVED_FACET_NAMES.contains(&name.as_str()) {
                return Err(PipelineError::InvalidInput(format!(
                    "filter name {name:?} is reserved for asset metadata"
                )));
            }
            filters.push(Filter {
                name: name.clone(),
                path: FieldPath::parse(&filter.path),
                kind: filter.kind,
            });
        }
        Ok(Self {
            geometry_path: config.paths.geometry_path(),
            location_path: config.paths.location_path(),
            filters,
        })
    }

    /// Derive the asset record of one resource.
    ///
    /// A title that cannot be slugified is replaced by the placeholder.
    /// Missing geometry only produces a warning. The registries facet is
    /// left as an empty list for the caller to fill.
    pub fn get_meta(
        &self,
        snapshot: &ResourceSnapshot,
        slugs: &mut SlugGenerator,
        prefix: Option<&str>,
    ) -> Result<Asset> {
        let view = &snapshot.view;

        let geometry = view.try_get(&self.geometry_path).filter(|v| is_present(v));
        if geometry.is_none() {
            tracing::warn!(resource = %snapshot.id, path = %self.geometry_path, "No geometry node");
        }
        let location = view
            .try_get(&self.location_path)
            .filter(|v| is_present(v))
            .or(geometry);
        let point = match location {
            Some(location) => {
                let point = reduce_location(location);
                if point.is_none() {
                    tracing::warn!(resource = %snapshot.id, "Location could not be reduced to a point");
                }
                point
            }
            None => {
                tracing::warn!(resource = %snapshot.id, path = %self.location_path, "No location node");
                None
            }
        };

        let mut title = snapshot
            .display_name
            .clone()
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string());
        let slug = match slugs.to_slug(&title, &snapshot.id, prefix) {
            Ok(slug) => slug,
            Err(PipelineError::InvalidInput(reason)) if !snapshot.id.is_empty() => {
                tracing::warn!(resource = %snapshot.id, %reason, "Unusable title, using placeholder");
                title = UNKNOWN_TITLE.to_string();
                slugs.to_slug(&title, &snapshot.id, prefix)?
            }
            Err(e) => return Err(e),
        };

        let mut asset = Asset::new(
            &snapshot.id,
            &snapshot.graph_id,
            geometry,
            point,
            &title,
            &slug,
            &snapshot.model_class_name,
        );
        asset.content = title;

        for filter in &self.filters {
            let raw = view.try_get(&filter.path).filter(|v| is_present(v));
            let values: Vec<Value> = match (filter.kind, raw) {
                (_, None) => Vec::new(),
                (FilterKind::Array, Some(Value::Array(items))) => items.clone(),
                (_, Some(value)) => vec![value.clone()],
            };
            let serial = serde_json::to_string(&values)
                .map_err(|e| PipelineError::json(format!("filter {}", filter.name), e))?;
            match filter.name.as_str() {
                "registries" => asset.meta.registries = serial,
                "designations" => asset.meta.designations = serial,
                "scopes" => asset.meta.scopes = serial,
                _ => {
                    asset.meta.facets.insert(filter.name.clone(), serial);
                }
            }
        }

        Ok(asset)
    }
}

/// Reduce a location value to a single point.
///
/// The value must be a FeatureCollection. If its first feature's
/// coordinates are a polygon, the result is the unweighted mean of the
/// first polygon's vertices (all rings of a multi-polygon's first member);
/// otherwise the coordinates must already be a point.
pub fn reduce_location(location: &Value) -> Option<Point> {
    let coordinates = location
        .get("features")?
        .as_array()?
        .first()?
        .pointer("/geometry/coordinates")?;

    let first = match coordinates {
        Value::Array(items) => items.first()?,
        _ => return None,
    };
    let Value::Array(shape) = first else {
        return point_from_value(coordinates);
    };

    let vertices: Vec<&Value> = if shape.first().is_some_and(|v| v.get(0).is_some_and(Value::is_array)) {
        shape.iter().filter_map(Value::as_array).flatten().collect()
    } else {
        shape.iter().collect()
    };
    centroid(&vertices)
}

fn centroid(vertices: &[&Value]) -> Option<Point> {
    if vertices.is_empty() {
        return None;
    }
    let n = vertices.len() as f64;
    let mut centre = [0.0, 0.0];
    for vertex in vertices {
        let [x, y] = point_from_value(vertex)?;
        centre[0] += x / n;
        centre[1] += y / n;
    }
    Some(centre)
}
