//! Spatial grid module
//!
//! Divides a coordinate reference system into a gap-free, non-overlapping
//! set of square (or rectangular) tiles and converts between tile indices,
//! CRS coordinates and per-tile pixel geometry.

mod types;

#[cfg(test)]
mod tests;

pub use types::{
    BoundingBox, Crs, GridError, GridSpec, TileIndex, MAX_COVERING_TILES,
    PIXEL_RATIO_TOLERANCE,
};

/// A validated tiling of a CRS.
///
/// Pure function of its [`GridSpec`]: every method is deterministic and the
/// grid holds no mutable state, so it can be shared freely between tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGrid {
    spec: GridSpec,
    rows: usize,
    cols: usize,
}

impl SpatialGrid {
    /// Builds a grid after checking that every tile holds a whole number of pixels.
    ///
    /// # Errors
    ///
    /// Returns a [`GridError`] if the tile size or resolution is degenerate or
    /// if `tile_size / resolution` is not an integer on either axis.
    pub fn new(spec: GridSpec) -> Result<Self, GridError> {
        let cols = pixel_count('x', spec.tile_size.0, spec.resolution.0)?;
        let rows = pixel_count('y', spec.tile_size.1, spec.resolution.1)?;
        Ok(Self { spec, rows, cols })
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn crs(&self) -> &Crs {
        &self.spec.crs
    }

    /// Pixel shape of every tile as `(rows, cols)`.
    #[inline]
    pub fn pixel_shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Names of the spatial (x, y) dimensions.
    pub fn spatial_dimensions(&self) -> (&'static str, &'static str) {
        self.spec.crs.spatial_dimensions()
    }

    /// Extent of a tile: `origin + index * tile_size` on each axis.
    #[inline]
    pub fn extent_of(&self, tile: TileIndex) -> BoundingBox {
        let (ox, oy) = self.spec.origin;
        let (sx, sy) = self.spec.tile_size;
        let min_x = ox + tile.x as f64 * sx;
        let min_y = oy + tile.y as f64 * sy;
        BoundingBox::new(min_x, min_y, min_x + sx, min_y + sy)
    }

    /// Tile containing the given point.
    pub fn tile_of(&self, x: f64, y: f64) -> Result<TileIndex, GridError> {
        let ix = self.axis_index(x, 'x');
        let iy = self.axis_index(y, 'y');
        match (to_i32(ix), to_i32(iy)) {
            (Some(ix), Some(iy)) => Ok(TileIndex::new(ix, iy)),
            _ => Err(GridError::IndexOutOfRange { x, y }),
        }
    }

    /// All tiles whose extent intersects `extent`, ordered by y then x.
    pub fn tiles_covering(&self, extent: &BoundingBox) -> Result<Vec<TileIndex>, GridError> {
        if extent.is_empty() {
            return Ok(Vec::new());
        }

        let out_of_range = || GridError::IndexOutOfRange {
            x: extent.max_x,
            y: extent.max_y,
        };

        let x0 = to_i32(self.axis_index(extent.min_x, 'x')).ok_or_else(out_of_range)?;
        let y0 = to_i32(self.axis_index(extent.min_y, 'y')).ok_or_else(out_of_range)?;
        let x1 = to_i32(self.axis_upper(extent.max_x, 'x')).ok_or_else(out_of_range)?;
        let y1 = to_i32(self.axis_upper(extent.max_y, 'y')).ok_or_else(out_of_range)?;

        let nx = (i64::from(x1) - i64::from(x0)).max(0) as u64;
        let ny = (i64::from(y1) - i64::from(y0)).max(0) as u64;
        let count = match nx.checked_mul(ny) {
            Some(count) if count <= MAX_COVERING_TILES => count,
            _ => {
                return Err(GridError::TooManyTiles {
                    columns: nx,
                    rows: ny,
                    limit: MAX_COVERING_TILES,
                })
            }
        };

        let mut tiles = Vec::with_capacity(count as usize);
        for y in y0..y1 {
            for x in x0..x1 {
                tiles.push(TileIndex::new(x, y));
            }
        }
        Ok(tiles)
    }

    /// Pixel geometry of a tile, including pixel-centre coordinates.
    pub fn geometry(&self, tile: TileIndex) -> TileGeometry {
        let extent = self.extent_of(tile);
        let (rx, ry) = self.spec.resolution;
        TileGeometry {
            tile,
            extent,
            shape: (self.rows, self.cols),
            resolution: (rx, ry),
            xs: pixel_centres(extent.min_x, extent.max_x, rx, self.cols),
            ys: pixel_centres(extent.min_y, extent.max_y, ry, self.rows),
        }
    }

    /// Floor of the fractional tile index along an axis.
    fn axis_index(&self, value: f64, axis: char) -> f64 {
        let (origin, size) = self.axis(axis);
        ((value - origin) / size).floor()
    }

    /// Exclusive upper tile index covering `value` as a half-open bound.
    fn axis_upper(&self, value: f64, axis: char) -> f64 {
        let (origin, size) = self.axis(axis);
        ((value - origin) / size).ceil()
    }

    fn axis(&self, axis: char) -> (f64, f64) {
        match axis {
            'x' => (self.spec.origin.0, self.spec.tile_size.0),
            _ => (self.spec.origin.1, self.spec.tile_size.1),
        }
    }
}

/// Pixel geometry of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGeometry {
    pub tile: TileIndex,
    pub extent: BoundingBox,
    /// `(rows, cols)`
    pub shape: (usize, usize),
    pub resolution: (f64, f64),
    /// Pixel-centre x coordinates, one per column
    pub xs: Vec<f64>,
    /// Pixel-centre y coordinates, one per row
    pub ys: Vec<f64>,
}

fn pixel_count(axis: char, tile_size: f64, resolution: f64) -> Result<usize, GridError> {
    if !tile_size.is_finite() || tile_size <= 0.0 {
        return Err(GridError::InvalidTileSize {
            axis,
            size: tile_size,
        });
    }
    if !resolution.is_finite() || resolution == 0.0 {
        return Err(GridError::InvalidResolution { axis, resolution });
    }

    let ratio = tile_size / resolution.abs();
    let rounded = ratio.round();
    if rounded < 1.0 || (ratio - rounded).abs() > PIXEL_RATIO_TOLERANCE * ratio.max(1.0) {
        return Err(GridError::NonIntegerPixelRatio {
            axis,
            tile_size,
            resolution,
        });
    }
    Ok(rounded as usize)
}

/// Pixel centres start from the minimum edge for a positive resolution and
/// from the maximum edge for a negative one.
fn pixel_centres(min: f64, max: f64, resolution: f64, count: usize) -> Vec<f64> {
    let edge = if resolution > 0.0 { min } else { max };
    (0..count)
        .map(|i| edge + (i as f64 + 0.5) * resolution)
        .collect()
}

fn to_i32(value: f64) -> Option<i32> {
    if value.is_finite() && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
        Some(value as i32)
    } else {
        None
    }
}
