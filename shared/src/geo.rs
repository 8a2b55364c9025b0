use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// `[lng, lat]`, optionally followed by altitude or other ordinates the map ignores.
pub type Position = Vec<f64>;

/// `[min_lng, min_lat, max_lng, max_lat]`
pub type BBox = [f64; 4];

/// Top-level GeoJSON object tag. Only `FeatureCollection` is accepted, so a payload
/// tagged with anything else fails to deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollectionKind {
    #[default]
    FeatureCollection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureKind {
    #[default]
    Feature,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: CollectionKind,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default)]
    pub kind: FeatureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FeatureId>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(
        default,
        deserialize_with = "planar_bbox",
        skip_serializing_if = "Option::is_none"
    )]
    pub bbox: Option<BBox>,
    /// `null` for an unlocated feature.
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

/// Feature identifier as the rendering engine addresses it: GeoJSON allows either a
/// number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    Number(serde_json::Number),
    Text(String),
}

impl FeatureId {
    /// Id reported back by the engine, which only knows doubles. Integral values map
    /// onto the same id a JSON integer would have parsed into.
    pub fn from_f64(value: f64) -> Option<Self> {
        const EXACT: f64 = 9_007_199_254_740_992.0;
        if value.fract() == 0.0 && value.abs() <= EXACT {
            return Some(FeatureId::Number((value as i64).into()));
        }
        serde_json::Number::from_f64(value).map(FeatureId::Number)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureId::Number(n) => n.as_f64(),
            FeatureId::Text(_) => None,
        }
    }
}

// Numbers sort before text; numbers by value, then by their JSON spelling so that
// `1` and `1.0` stay distinct.
impl Ord for FeatureId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FeatureId::Number(a), FeatureId::Number(b)) => {
                let by_value = match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.total_cmp(&y),
                    _ => Ordering::Equal,
                };
                by_value.then_with(|| a.to_string().cmp(&b.to_string()))
            }
            (FeatureId::Number(_), FeatureId::Text(_)) => Ordering::Less,
            (FeatureId::Text(_), FeatureId::Number(_)) => Ordering::Greater,
            (FeatureId::Text(a), FeatureId::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for FeatureId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureId::Number(n) => write!(f, "{n}"),
            FeatureId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for FeatureId {
    fn from(value: u64) -> Self {
        FeatureId::Number(value.into())
    }
}

impl From<i64> for FeatureId {
    fn from(value: i64) -> Self {
        FeatureId::Number(value.into())
    }
}

impl From<&str> for FeatureId {
    fn from(value: &str) -> Self {
        FeatureId::Text(value.to_owned())
    }
}

impl From<String> for FeatureId {
    fn from(value: String) -> Self {
        FeatureId::Text(value)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<serde_json::Map<String, serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts 2-D and 3-D bboxes, keeping the planar part. Any other length is dropped
/// and the extent is computed from the geometry instead.
fn planar_bbox<'de, D>(deserializer: D) -> Result<Option<BBox>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<f64>> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|v| match v.as_slice() {
        &[w, s, e, n] => Some([w, s, e, n]),
        &[w, s, _, e, n, _] => Some([w, s, e, n]),
        _ => None,
    }))
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: CollectionKind::FeatureCollection,
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Ids of every feature that carries one, in document order.
    pub fn feature_ids(&self) -> impl Iterator<Item = &FeatureId> {
        self.features.iter().filter_map(|feature| feature.id.as_ref())
    }

    pub fn find(&self, id: &FeatureId) -> Option<&Feature> {
        self.features
            .iter()
            .find(|feature| feature.id.as_ref() == Some(id))
    }

    /// Union of all feature extents, or `None` when no feature is located.
    pub fn bbox(&self) -> Option<BBox> {
        self.features
            .iter()
            .filter_map(Feature::extent)
            .reduce(union_bbox)
    }
}

impl Feature {
    pub fn new(id: Option<FeatureId>, geometry: Geometry) -> Self {
        Self {
            kind: FeatureKind::Feature,
            id,
            properties: serde_json::Map::new(),
            bbox: None,
            geometry: Some(geometry),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.to_owned(), value.into());
        self
    }

    pub fn with_bbox(mut self, bbox: BBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.properties.get("name").and_then(|v| v.as_str())
    }

    /// Declared bbox when present, otherwise computed from the geometry.
    pub fn extent(&self) -> Option<BBox> {
        self.bbox
            .or_else(|| self.geometry.as_ref().and_then(Geometry::bbox))
    }
}

impl Geometry {
    /// Planar extent of every position, `None` when the geometry is empty.
    pub fn bbox(&self) -> Option<BBox> {
        let mut positions = Vec::new();
        self.collect_positions(&mut positions);
        positions
            .into_iter()
            .filter_map(|p| match p.as_slice() {
                &[lng, lat, ..] => Some([lng, lat, lng, lat]),
                _ => None,
            })
            .reduce(union_bbox)
    }

    fn collect_positions<'a>(&'a self, out: &mut Vec<&'a Position>) {
        match self {
            Geometry::Point { coordinates } => out.push(coordinates),
            Geometry::MultiPoint { coordinates } | Geometry::LineString { coordinates } => {
                out.extend(coordinates)
            }
            Geometry::MultiLineString { coordinates } | Geometry::Polygon { coordinates } => {
                out.extend(coordinates.iter().flatten())
            }
            Geometry::MultiPolygon { coordinates } => {
                out.extend(coordinates.iter().flatten().flatten())
            }
            Geometry::GeometryCollection { geometries } => {
                for geometry in geometries {
                    geometry.collect_positions(out);
                }
            }
        }
    }
}

pub fn union_bbox(a: BBox, b: BBox) -> BBox {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])]
}
