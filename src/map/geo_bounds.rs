use std::fmt;
use std::str::FromStr;

use geo_types::{coord, Coord, LineString, Polygon, Rect};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct GeoBounds {
    south: f64, // minimum latitude
    west: f64,  // minimum longitude
    north: f64, // maximum latitude
    east: f64,  // maximum longitude
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoundsParseError {
    #[error("expected 4 comma separated numbers, got {0}")]
    WrongArity(usize),
    #[error("invalid number {0:?} in bounding box")]
    InvalidNumber(String),
    #[error("bounding box is inverted or empty")]
    Inverted,
}

impl GeoBounds {
    /// Builds bounds from the corners, rejecting inverted boxes.
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Result<Self, BoundsParseError> {
        if !(south < north && west < east) {
            return Err(BoundsParseError::Inverted);
        }
        Ok(Self {
            south,
            west,
            north,
            east,
        })
    }

    /// For literal extents already known to be ordered.
    pub(crate) const fn from_extent(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    pub fn east(&self) -> f64 {
        self.east
    }

    pub fn size(&self) -> (f64, f64) {
        (self.north - self.south, self.east - self.west)
    }

    pub fn center(&self) -> Coord<f64> {
        coord! {
            x: (self.west + self.east) / 2.0,
            y: (self.south + self.north) / 2.0,
        }
    }

    /// Splits the bounds into a `cols` x `rows` grid, row-major from the south-west corner.
    pub fn grid(&self, cols: u32, rows: u32) -> Vec<GeoBounds> {
        let cols = cols.max(1);
        let rows = rows.max(1);
        let (height, width) = self.size();
        let cell_w = width / cols as f64;
        let cell_h = height / rows as f64;

        let mut cells = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            for col in 0..cols {
                let west = self.west + cell_w * col as f64;
                let south = self.south + cell_h * row as f64;
                cells.push(GeoBounds {
                    south,
                    west,
                    north: south + cell_h,
                    east: west + cell_w,
                });
            }
        }
        cells
    }

    /// Shrinks every side by `fraction` of the span, keeping the center fixed.
    pub fn inset(&self, fraction: f64) -> GeoBounds {
        let (height, width) = self.size();
        let dy = height * fraction.clamp(0.0, 0.49);
        let dx = width * fraction.clamp(0.0, 0.49);
        GeoBounds {
            south: self.south + dy,
            west: self.west + dx,
            north: self.north - dy,
            east: self.east - dx,
        }
    }

    /// Point at fractional position (`fx`, `fy`) inside the bounds.
    pub fn lerp(&self, fx: f64, fy: f64) -> Coord<f64> {
        coord! {
            x: self.west + (self.east - self.west) * fx,
            y: self.south + (self.north - self.south) * fy,
        }
    }

    /// Overpass expects `(south,west,north,east)`.
    pub fn to_overpass(&self) -> String {
        format!("{:.5},{:.5},{:.5},{:.5}", self.south, self.west, self.north, self.east)
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            coord! { x: self.west, y: self.south },
            coord! { x: self.east, y: self.north },
        )
        .to_polygon()
    }
}

/// Glossary format: `minLon,minLat,maxLon,maxLat`.
impl fmt::Display for GeoBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4},{:.4},{:.4}", self.west, self.south, self.east, self.north)
    }
}

impl FromStr for GeoBounds {
    type Err = BoundsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BoundsParseError::WrongArity(parts.len()));
        }
        let mut values = [0.0_f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse::<f64>()
                .map_err(|_| BoundsParseError::InvalidNumber(part.to_string()))?;
        }
        let [west, south, east, north] = values;
        GeoBounds::new(south, west, north, east)
    }
}

/// Closed ring through the given fractional offsets of `bounds`, jittered per vertex.
pub fn jittered_ring(bounds: &GeoBounds, jitter: impl Fn(usize) -> f64) -> LineString<f64> {
    let corners = [
        (0.0, 0.0),
        (0.5, 0.0),
        (1.0, 0.0),
        (1.0, 0.5),
        (1.0, 1.0),
        (0.5, 1.0),
        (0.0, 1.0),
        (0.0, 0.5),
    ];
    let center = bounds.center();
    let mut coords: Vec<Coord<f64>> = corners
        .iter()
        .enumerate()
        .map(|(i, (fx, fy))| {
            let edge = bounds.lerp(*fx, *fy);
            // Pull each vertex towards the center by up to 8% so rings stay inside the box.
            let pull = jitter(i).clamp(0.0, 1.0) * 0.08;
            coord! {
                x: edge.x + (center.x - edge.x) * pull,
                y: edge.y + (center.y - edge.y) * pull,
            }
        })
        .collect();
    coords.push(coords[0]);
    LineString::new(coords)
}
