//! Spatial codec boundary and a GeoJSON reference codec.
//!
//! The binary formats are owned by the codec. The pipeline only orders the
//! calls: serialize a collection, re-index the serialized bytes with a name
//! and description, and build a nearest-neighbour point index whose slots
//! line up with a metadata array written alongside it.
//!
//! The reference point index is an R-tree (via `rstar`) bulk-loaded from the
//! points and written out as its leaves in tree order, so reading it back is
//! a single bulk load.

use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{FeatureCollection, Point};

/// Magic prefix of the packed point index.
pub const POINT_INDEX_MAGIC: &[u8; 4] = b"PIDX";

const POINT_RECORD_LEN: usize = 8 + 8 + 4;

/// External spatial serializer and index builder.
pub trait SpatialCodec: Send + Sync {
    /// Error type for codec operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Serialize a feature collection.
    fn serialize(&self, collection: &FeatureCollection) -> Result<Vec<u8>, Self::Error>;

    /// Re-index serialized bytes, attaching a name and description.
    fn reindex(&self, bytes: &[u8], name: &str, description: &str) -> Result<Vec<u8>, Self::Error>;

    /// Build a point index. Slot `i` of the parallel metadata array describes `points[i]`.
    fn build_point_index(&self, points: &[Point]) -> Result<Vec<u8>, Self::Error>;
}

/// Error type for [`GeoJsonCodec`].
#[derive(Debug, thiserror::Error)]
pub enum SpatialCodecError {
    /// Input or output JSON was invalid.
    #[error("GeoJSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A point index could not be decoded.
    #[error("Invalid point index: {0}")]
    InvalidIndex(String),

    /// A coordinate was not finite.
    #[error("Non-finite coordinate at slot {0}")]
    NonFinite(usize),
}

/// Header written by [`GeoJsonCodec::reindex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerHeader {
    /// Layer name.
    pub name: String,
    /// Layer description.
    pub description: String,
    /// `[min_x, min_y, max_x, max_y]`, absent for empty layers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    /// Number of features.
    pub feature_count: usize,
}

/// One indexed point and its metadata slot.
pub type IndexedPoint = GeomWithData<Point, u32>;

/// GeoJSON codec with a packed R-tree point index.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonCodec;

impl GeoJsonCodec {
    /// Create a codec.
    pub fn new() -> Self {
        Self
    }
}

/// Point index read back from the bytes written by [`GeoJsonCodec::build_point_index`].
#[derive(Debug, Clone)]
pub struct PointIndex {
    tree: RTree<IndexedPoint>,
}

impl PointIndex {
    /// Decode a point index.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SpatialCodecError> {
        if bytes.len() < 8 || &bytes[..4] != POINT_INDEX_MAGIC {
            return Err(SpatialCodecError::InvalidIndex("missing header".into()));
        }
        let count = read_u32(&bytes[4..8]) as usize;
        let body = &bytes[8..];
        if body.len() != count * POINT_RECORD_LEN {
            return Err(SpatialCodecError::InvalidIndex(format!(
                "expected {count} records, found {} bytes",
                body.len()
            )));
        }
        let points = body
            .chunks_exact(POINT_RECORD_LEN)
            .map(|record| {
                let x = read_f64(&record[0..8]);
                let y = read_f64(&record[8..16]);
                IndexedPoint::new([x, y], read_u32(&record[16..20]))
            })
            .collect();
        Ok(Self {
            tree: RTree::bulk_load(points),
        })
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index holds no points.
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Slot of the indexed point nearest to `target`.
    pub fn nearest(&self, target: Point) -> Option<u32> {
        self.tree.nearest_neighbor(&target).map(|p| p.data)
    }

    /// Slots of the `n` indexed points nearest to `target`, closest first.
    pub fn nearest_n(&self, target: Point, n: usize) -> Vec<u32> {
        self.tree
            .nearest_neighbor_iter(&target)
            .take(n)
            .map(|p| p.data)
            .collect()
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_f64(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    f64::from_le_bytes(buf)
}

fn collect_coordinates(value: &Value, out: &mut Vec<Point>) {
    match value {
        Value::Array(items) => {
            if let [Value::Number(x), Value::Number(y)] = items.as_slice() {
                if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
                    out.push([x, y]);
                    return;
                }
            }
            for item in items {
                collect_coordinates(item, out);
            }
        }
        Value::Object(map) => map.values().for_each(|v| collect_coordinates(v, out)),
        _ => {}
    }
}

fn bbox(points: &[Point]) -> Option<[f64; 4]> {
    let first = points.first()?;
    Some(points.iter().fold(
        [first[0], first[1], first[0], first[1]],
        |[min_x, min_y, max_x, max_y], p| [min_x.min(p[0]), min_y.min(p[1]), max_x.max(p[0]), max_y.max(p[1])],
    ))
}

impl SpatialCodec for GeoJsonCodec {
    type Error = SpatialCodecError;

    fn serialize(&self, collection: &FeatureCollection) -> Result<Vec<u8>, Self::Error> {
        Ok(serde_json::to_vec(collection)?)
    }

    fn reindex(&self, bytes: &[u8], name: &str, description: &str) -> Result<Vec<u8>, Self::Error> {
        let mut collection: FeatureCollection = serde_json::from_slice(bytes)?;
        let mut coordinates = Vec::new();
        for feature in &collection.features {
            collect_coordinates(&serde_json::to_value(&feature.geometry)?, &mut coordinates);
        }
        let header = LayerHeader {
            name: name.to_string(),
            description: description.to_string(),
            bbox: bbox(&coordinates),
            feature_count: collection.features.len(),
        };
        // Ids follow the input order so the layer can be joined back to its source.
        for (i, feature) in collection.features.iter_mut().enumerate() {
            if feature.id.is_none() {
                feature.id = Some(i.to_string());
            }
        }
        let mut layer = serde_json::to_value(&collection)?;
        if let Value::Object(map) = &mut layer {
            map.insert("header".to_string(), serde_json::to_value(&header)?);
        }
        Ok(serde_json::to_vec(&layer)?)
    }

    fn build_point_index(&self, points: &[Point]) -> Result<Vec<u8>, Self::Error> {
        if let Some(bad) = points.iter().position(|p| !p[0].is_finite() || !p[1].is_finite()) {
            return Err(SpatialCodecError::NonFinite(bad));
        }
        let tree = RTree::bulk_load(
            points
                .iter()
                .enumerate()
                .map(|(slot, p)| IndexedPoint::new(*p, slot as u32))
                .collect(),
        );

        let mut out = Vec::with_capacity(8 + points.len() * POINT_RECORD_LEN);
        out.extend_from_slice(POINT_INDEX_MAGIC);
        out.extend_from_slice(&(points.len() as u32).to_le_bytes());
        for indexed in tree.iter() {
            let p = indexed.geom();
            out.extend_from_slice(&p[0].to_le_bytes());
            out.extend_from_slice(&p[1].to_le_bytes());
            out.extend_from_slice(&indexed.data.to_le_bytes());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Feature, Geometry};
    use serde_json::Map;

    fn collection() -> FeatureCollection {
        FeatureCollection::new(vec![
            Feature::new(Geometry::Point { coordinates: [3.0, 4.0] }, Map::new()),
            Feature::new(
                Geometry::MultiPoint {
                    coordinates: vec![[-1.0, 0.0], [5.0, 2.0]],
                },
                Map::new(),
            ),
        ])
    }

    #[test]
    fn test_reindex_attaches_header() {
        let codec = GeoJsonCodec::new();
        let bytes = codec.serialize(&collection()).unwrap();
        let layer: Value = serde_json::from_slice(&codec.reindex(&bytes, "Assets", "All assets").unwrap()).unwrap();
        assert_eq!(layer["header"]["name"], "Assets");
        assert_eq!(layer["header"]["feature_count"], 2);
        assert_eq!(layer["header"]["bbox"], serde_json::json!([-1.0, 0.0, 5.0, 4.0]));
        assert_eq!(layer["features"][1]["id"], "1");
    }

    #[test]
    fn test_point_index_keeps_slots() {
        let codec = GeoJsonCodec::new();
        let points = [[5.0, 5.0], [0.0, 0.0], [2.0, 1.0]];
        let index = PointIndex::from_bytes(&codec.build_point_index(&points).unwrap()).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.nearest([4.0, 4.5]), Some(0));
        assert_eq!(index.nearest([0.1, 0.0]), Some(1));
        assert_eq!(index.nearest_n([1.9, 1.0], 2), vec![2, 1]);
    }

    #[test]
    fn test_point_index_many_points() {
        let points: Vec<Point> = (0..500).map(|i| [(i % 25) as f64, (i / 25) as f64]).collect();
        let index = PointIndex::from_bytes(&GeoJsonCodec::new().build_point_index(&points).unwrap()).unwrap();
        assert_eq!(index.len(), 500);
        assert_eq!(index.nearest([7.1, 3.2]), Some(3 * 25 + 7));
        assert_eq!(index.nearest([100.0, 100.0]), Some(499));
    }

    #[test]
    fn test_point_index_rejects_nan() {
        let codec = GeoJsonCodec::new();
        assert!(matches!(
            codec.build_point_index(&[[0.0, 0.0], [f64::NAN, 1.0]]),
            Err(SpatialCodecError::NonFinite(1))
        ));
    }

    #[test]
    fn test_empty_index() {
        let bytes = GeoJsonCodec::new().build_point_index(&[]).unwrap();
        let index = PointIndex::from_bytes(&bytes).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.nearest([0.0, 0.0]), None);
        assert!(PointIndex::from_bytes(&bytes[..3]).is_err());
    }
}
