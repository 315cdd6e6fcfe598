//! Minimal GeoJSON shapes handed to the spatial codec.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A `[x, y]` coordinate pair.
pub type Point = [f64; 2];

/// Read a 2-element numeric array as a point.
pub fn point_from_value(value: &Value) -> Option<Point> {
    let coords = value.as_array()?;
    if coords.len() != 2 {
        return None;
    }
    Some([coords[0].as_f64()?, coords[1].as_f64()?])
}

/// Geometry variants the pipeline emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    /// Single point.
    Point {
        /// Coordinates.
        coordinates: Point,
    },
    /// Set of points.
    MultiPoint {
        /// Coordinates.
        coordinates: Vec<Point>,
    },
}

/// A GeoJSON feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Always `"Feature"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional feature id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Free-form properties.
    pub properties: Map<String, Value>,
    /// Geometry.
    pub geometry: Geometry,
}

impl Feature {
    /// Create a feature with the given geometry and properties.
    pub fn new(geometry: Geometry, properties: Map<String, Value>) -> Self {
        Self {
            kind: "Feature".to_string(),
            id: None,
            properties,
            geometry,
        }
    }
}

/// A GeoJSON feature collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    /// Always `"FeatureCollection"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Features.
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// Wrap features in a collection.
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: "FeatureCollection".to_string(),
            features,
        }
    }
}
