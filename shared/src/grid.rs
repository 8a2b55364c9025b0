use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{Feature, FeatureCollection, FeatureId, Geometry, Position};

pub const GRID_WIDTH: u32 = 40;
pub const GRID_HEIGHT: u32 = 30;

/// A playable square on the board, addressed by column `q` and row `r`.
/// Its feature id on the map is the text `"q,r"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SquareId {
    pub q: u32,
    pub r: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SquareIdError {
    #[error("square id `{0}` is not of the form `q,r`")]
    Malformed(String),
    #[error("square ({q},{r}) is outside the {}x{} grid", GRID_WIDTH, GRID_HEIGHT)]
    OutOfRange { q: u32, r: u32 },
}

impl SquareId {
    pub fn new(q: u32, r: u32) -> Result<Self, SquareIdError> {
        if q >= GRID_WIDTH || r >= GRID_HEIGHT {
            return Err(SquareIdError::OutOfRange { q, r });
        }
        Ok(Self { q, r })
    }

    pub fn feature_id(&self) -> FeatureId {
        FeatureId::Text(self.to_string())
    }

    pub fn from_feature_id(id: &FeatureId) -> Option<Self> {
        match id {
            FeatureId::Text(text) => text.parse().ok(),
            FeatureId::Number(_) => None,
        }
    }

    /// Every square of the board, row by row.
    pub fn all() -> impl Iterator<Item = SquareId> {
        (0..GRID_HEIGHT).flat_map(|r| (0..GRID_WIDTH).map(move |q| SquareId { q, r }))
    }
}

impl fmt::Display for SquareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.q, self.r)
    }
}

impl FromStr for SquareId {
    type Err = SquareIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SquareIdError::Malformed(s.to_owned());
        let (q, r) = s.split_once(',').ok_or_else(malformed)?;
        let q = q.trim().parse::<u32>().map_err(|_| malformed())?;
        let r = r.trim().parse::<u32>().map_err(|_| malformed())?;
        SquareId::new(q, r)
    }
}

/// Placement of the board on the map. Row 0 is the northern edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    /// North-west corner `[lng, lat]`.
    pub origin: [f64; 2],
    /// Square edge in degrees.
    pub cell_size: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            origin: [-20.0, 35.0],
            cell_size: 1.0,
        }
    }
}

impl GridSpec {
    /// Closed ring of the square, counter-clockwise from its north-west corner.
    pub fn ring(&self, square: SquareId) -> Vec<Position> {
        let west = self.origin[0] + square.q as f64 * self.cell_size;
        let north = self.origin[1] - square.r as f64 * self.cell_size;
        let east = west + self.cell_size;
        let south = north - self.cell_size;
        vec![
            vec![west, north],
            vec![west, south],
            vec![east, south],
            vec![east, north],
            vec![west, north],
        ]
    }

    pub fn square_feature(&self, square: SquareId) -> Feature {
        Feature::new(
            Some(square.feature_id()),
            Geometry::Polygon {
                coordinates: vec![self.ring(square)],
            },
        )
        .with_property("square", square.to_string())
        .with_property("q", square.q)
        .with_property("r", square.r)
    }

    pub fn feature_collection(&self) -> FeatureCollection {
        FeatureCollection::new(SquareId::all().map(|sq| self.square_feature(sq)).collect())
    }

    /// Square containing the geographic point, if it lies on the board.
    pub fn square_at(&self, lng: f64, lat: f64) -> Option<SquareId> {
        if self.cell_size <= 0.0 {
            return None;
        }
        let dx = (lng - self.origin[0]) / self.cell_size;
        let dy = (self.origin[1] - lat) / self.cell_size;
        if dx < 0.0 || dy < 0.0 {
            return None;
        }
        SquareId::new(dx.floor() as u32, dy.floor() as u32).ok()
    }
}
