//! Grid type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative tolerance used when checking that a tile holds a whole number of pixels.
pub const PIXEL_RATIO_TOLERANCE: f64 = 1e-9;

/// Most tiles a single `tiles_covering` query may return.
pub const MAX_COVERING_TILES: u64 = 1_000_000;

/// Index of a tile in the spatial grid.
///
/// Tile `(0, 0)` has its minimum corner at the grid origin. Indices grow
/// with the CRS axes and may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileIndex {
    /// Column index along the CRS x axis
    pub x: i32,
    /// Row index along the CRS y axis
    pub y: i32,
}

impl TileIndex {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned extent in grid CRS units.
///
/// Treated as half-open: a point on `max_x` or `max_y` belongs to the
/// neighbouring tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Returns true if the two half-open boxes share any area.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Returns true if the point lies inside the half-open box.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        (self.min_x..self.max_x).contains(&x) && (self.min_y..self.max_y).contains(&y)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }
}

/// Coordinate reference system identifier, e.g. `EPSG:3577`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crs(String);

/// EPSG codes of the geographic (lon/lat) systems in common use for EO archives.
const GEOGRAPHIC_EPSG: &[u32] = &[4326, 4283, 4269, 4258, 4674, 7844];

impl Crs {
    pub fn new(definition: impl Into<String>) -> Self {
        Self(definition.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// EPSG code if the definition is of the form `EPSG:<code>`.
    pub fn epsg(&self) -> Option<u32> {
        let (authority, code) = self.0.split_once(':')?;
        if authority.eq_ignore_ascii_case("epsg") {
            code.trim().parse().ok()
        } else {
            None
        }
    }

    /// Whether coordinates are longitude/latitude rather than projected.
    pub fn is_geographic(&self) -> bool {
        if let Some(code) = self.epsg() {
            return GEOGRAPHIC_EPSG.contains(&code);
        }
        let lower = self.0.to_lowercase();
        lower.contains("+proj=longlat") || lower.starts_with("geogcs")
    }

    /// Names of the (x, y) dimensions in this CRS.
    pub fn spatial_dimensions(&self) -> (&'static str, &'static str) {
        if self.is_geographic() {
            ("longitude", "latitude")
        } else {
            ("x", "y")
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of a tiling.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub crs: Crs,
    /// Grid origin (x, y) in CRS units
    pub origin: (f64, f64),
    /// Tile size (x, y) in CRS units, both positive
    pub tile_size: (f64, f64),
    /// Pixel resolution (x, y); y is usually negative for north-up rasters
    pub resolution: (f64, f64),
}

/// Errors that can occur while building or using a grid.
#[derive(Debug, Clone, PartialEq)]
pub enum GridError {
    /// Tile size is zero, negative or not finite
    InvalidTileSize { axis: char, size: f64 },
    /// Resolution is zero or not finite
    InvalidResolution { axis: char, resolution: f64 },
    /// Tile size is not a whole multiple of the resolution
    NonIntegerPixelRatio {
        axis: char,
        tile_size: f64,
        resolution: f64,
    },
    /// Tile index does not fit into the index range
    IndexOutOfRange { x: f64, y: f64 },
    /// Extent covers more tiles than [`MAX_COVERING_TILES`]
    TooManyTiles { columns: u64, rows: u64, limit: u64 },
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::InvalidTileSize { axis, size } => {
                write!(f, "Invalid tile size along {}: {} (must be > 0)", axis, size)
            }
            GridError::InvalidResolution { axis, resolution } => {
                write!(
                    f,
                    "Invalid resolution along {}: {} (must be non-zero)",
                    axis, resolution
                )
            }
            GridError::NonIntegerPixelRatio {
                axis,
                tile_size,
                resolution,
            } => {
                write!(
                    f,
                    "Tile size {} along {} is not a whole multiple of resolution {}",
                    tile_size,
                    axis,
                    resolution.abs()
                )
            }
            GridError::IndexOutOfRange { x, y } => {
                write!(f, "Point ({}, {}) maps outside the tile index range", x, y)
            }
            GridError::TooManyTiles {
                columns,
                rows,
                limit,
            } => {
                write!(
                    f,
                    "Extent spans {} x {} tiles, more than the limit of {}",
                    columns, rows, limit
                )
            }
        }
    }
}

impl std::error::Error for GridError {}
