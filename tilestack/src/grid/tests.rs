//! Tests for the spatial grid

use super::*;
use proptest::prelude::*;

/// Australian Albers style grid: 100 km tiles of 25 m pixels.
fn albers_grid() -> SpatialGrid {
    SpatialGrid::new(GridSpec {
        crs: Crs::new("EPSG:3577"),
        origin: (0.0, 0.0),
        tile_size: (100_000.0, 100_000.0),
        resolution: (25.0, -25.0),
    })
    .expect("valid grid")
}

#[test]
fn test_pixel_shape_from_tile_size_and_resolution() {
    let grid = albers_grid();
    assert_eq!(grid.pixel_shape(), (4000, 4000));
}

#[test]
fn test_non_integer_ratio_is_rejected() {
    let result = SpatialGrid::new(GridSpec {
        crs: Crs::new("EPSG:3577"),
        origin: (0.0, 0.0),
        tile_size: (100_000.0, 100_000.0),
        resolution: (30.0, -30.0),
    });

    assert!(matches!(
        result.unwrap_err(),
        GridError::NonIntegerPixelRatio { axis: 'x', .. }
    ));
}

#[test]
fn test_zero_resolution_is_rejected() {
    let result = SpatialGrid::new(GridSpec {
        crs: Crs::new("EPSG:3577"),
        origin: (0.0, 0.0),
        tile_size: (100.0, 100.0),
        resolution: (25.0, 0.0),
    });

    assert!(matches!(
        result.unwrap_err(),
        GridError::InvalidResolution { axis: 'y', .. }
    ));
}

#[test]
fn test_extent_of_negative_index() {
    let grid = albers_grid();
    let extent = grid.extent_of(TileIndex::new(3, -5));

    assert_eq!(extent.min_x, 300_000.0);
    assert_eq!(extent.max_x, 400_000.0);
    assert_eq!(extent.min_y, -500_000.0);
    assert_eq!(extent.max_y, -400_000.0);
}

#[test]
fn test_tile_boundaries_are_half_open() {
    let grid = albers_grid();

    // A point exactly on a boundary belongs to the tile starting there
    assert_eq!(grid.tile_of(100_000.0, 0.0).unwrap(), TileIndex::new(1, 0));
    assert_eq!(
        grid.tile_of(99_999.999, -0.001).unwrap(),
        TileIndex::new(0, -1)
    );
}

#[test]
fn test_tiles_covering_spans_partial_tiles() {
    let grid = albers_grid();
    let extent = BoundingBox::new(150_000.0, -250_000.0, 310_000.0, -100_000.0);

    let tiles = grid.tiles_covering(&extent).unwrap();

    // x: 1..=3, y: -3..=-2 (max_y = -100_000 is exclusive)
    assert_eq!(tiles.len(), 6);
    assert_eq!(tiles.first(), Some(&TileIndex::new(1, -3)));
    assert_eq!(tiles.last(), Some(&TileIndex::new(3, -2)));
}

#[test]
fn test_tiles_covering_aligned_extent_is_exact() {
    let grid = albers_grid();
    let extent = BoundingBox::new(0.0, 0.0, 200_000.0, 100_000.0);

    let tiles = grid.tiles_covering(&extent).unwrap();

    assert_eq!(tiles, vec![TileIndex::new(0, 0), TileIndex::new(1, 0)]);
}

#[test]
fn test_tiles_covering_empty_extent() {
    let grid = albers_grid();
    let extent = BoundingBox::new(10.0, 10.0, 10.0, 20.0);
    assert!(grid.tiles_covering(&extent).unwrap().is_empty());
}

#[test]
fn test_tiles_covering_span_wider_than_i32() {
    let grid = SpatialGrid::new(GridSpec {
        crs: Crs::new("EPSG:3577"),
        origin: (0.0, 0.0),
        tile_size: (1.0, 1.0),
        resolution: (1.0, -1.0),
    })
    .unwrap();
    let extent = BoundingBox::new(-2.0e9, 0.0, 2.0e9, 1.0);

    assert!(matches!(
        grid.tiles_covering(&extent),
        Err(GridError::TooManyTiles { rows: 1, .. })
    ));
}

#[test]
fn test_tiles_covering_too_many_tiles() {
    let grid = albers_grid();
    let extent = BoundingBox::new(0.0, 0.0, 2.0e8, 2.0e8);

    let err = grid.tiles_covering(&extent).unwrap_err();
    assert_eq!(
        err,
        GridError::TooManyTiles {
            columns: 2000,
            rows: 2000,
            limit: MAX_COVERING_TILES,
        }
    );
}

#[test]
fn test_geometry_pixel_centres_north_up() {
    let grid = SpatialGrid::new(GridSpec {
        crs: Crs::new("EPSG:4326"),
        origin: (151.0, -30.0),
        tile_size: (1.0, 1.0),
        resolution: (0.25, -0.25),
    })
    .unwrap();

    let geometry = grid.geometry(TileIndex::new(0, 0));

    assert_eq!(geometry.shape, (4, 4));
    assert_eq!(geometry.xs, vec![151.125, 151.375, 151.625, 151.875]);
    // Negative y resolution: first row is the northern edge
    assert_eq!(geometry.ys, vec![-29.125, -29.375, -29.625, -29.875]);
}

#[test]
fn test_spatial_dimension_names() {
    assert_eq!(Crs::new("EPSG:4326").spatial_dimensions(), ("longitude", "latitude"));
    assert_eq!(Crs::new("epsg:3577").spatial_dimensions(), ("x", "y"));
    assert_eq!(
        Crs::new("+proj=longlat +datum=WGS84").spatial_dimensions(),
        ("longitude", "latitude")
    );
}

#[test]
fn test_bounding_box_intersection_excludes_touching_edges() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
    let c = BoundingBox::new(9.0, 9.0, 20.0, 20.0);

    assert!(!a.intersects(&b));
    assert!(a.intersects(&c));
}

#[test]
fn test_grid_error_display() {
    let err = GridError::NonIntegerPixelRatio {
        axis: 'x',
        tile_size: 100.0,
        resolution: -30.0,
    };
    assert_eq!(
        err.to_string(),
        "Tile size 100 along x is not a whole multiple of resolution 30"
    );
}

proptest! {
    /// Property: the centre of any tile maps back to the same tile.
    #[test]
    fn prop_extent_roundtrip(x in -2000i32..2000, y in -2000i32..2000) {
        let grid = albers_grid();
        let tile = TileIndex::new(x, y);
        let extent = grid.extent_of(tile);

        let centre_x = (extent.min_x + extent.max_x) / 2.0;
        let centre_y = (extent.min_y + extent.max_y) / 2.0;
        prop_assert_eq!(grid.tile_of(centre_x, centre_y).unwrap(), tile);
        prop_assert_eq!(grid.tile_of(extent.min_x, extent.min_y).unwrap(), tile);
    }

    /// Property: every point maps to exactly one tile and lies in its extent.
    #[test]
    fn prop_point_lies_in_its_tile(ix in -10_000_000i64..10_000_000, iy in -10_000_000i64..10_000_000) {
        let grid = albers_grid();
        let (px, py) = (ix as f64 + 0.5, iy as f64 + 0.5);
        let tile = grid.tile_of(px, py).unwrap();
        prop_assert!(grid.extent_of(tile).contains_point(px, py));
    }
}
