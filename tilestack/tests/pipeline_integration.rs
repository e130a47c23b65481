//! Integration tests for the compositing pipeline.
//!
//! These tests drive a complete run from INI text:
//! - Config parsing and validation into a task plan
//! - Masked stack construction from an in-memory catalog
//! - Mean, count and medoid statistics with provenance
//! - Artifact paths, nodata fill for empty windows
//! - Idempotent reruns and resumption

use ndarray::Array2;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tilestack::config::{ConfigFile, ValidatedConfig};
use tilestack::grid::BoundingBox;
use tilestack::output::{read_artifact, PROVENANCE_VARIABLE};
use tilestack::stack::{MemoryCatalog, MemoryObservation};
use tilestack::window::parse_date;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

const CONTIGUOUS: u64 = 1 << 8;
const CLOUD: u64 = 1 << 10;

fn config_text(location: &Path) -> String {
    format!(
        r#"
[grid]
crs = EPSG:3577
tile_size_x = 4
tile_size_y = 4
resolution_x = 1
resolution_y = -1
chunk_y = 3
chunk_x = 3

[region]
tiles = 3:-5

[time]
start_date = 2015-01-01
end_date = 2016-01-01
duration = 3m
step = 3m

[flags.pq]
contiguous = 8
cloud = 10

[source.ls8]
product = ls8_nbar
measurements = red, nir
nodata = -999

[mask.ls8.pq]
product = ls8_pq
measurement = pixelquality
vocabulary = pq
flags = contiguous:true, cloud:false

[statistic.mean]
reducer = mean
path_template = {{x}}_{{y}}/{{start:%Y-%m-%d}}/{{statistic}}.tsc

[statistic.count]
reducer = count
path_template = {{x}}_{{y}}/{{start:%Y-%m-%d}}/{{statistic}}.tsc

[statistic.medoid]
reducer = medoid
compression = deflate:9
path_template = {{x}}_{{y}}/{{start:%Y-%m-%d}}/{{statistic}}.tsc

[output]
location = {}
skip_existing = true
attributes = product=test_composite
"#,
        location.display()
    )
}

fn validated(dir: &TempDir) -> ValidatedConfig {
    ConfigFile::from_ini_str(&config_text(dir.path()))
        .expect("config parses")
        .validate()
        .expect("config validates")
}

fn observation(id: &str, date: &str, red: f64, nir: f64, quality: u64) -> MemoryObservation {
    MemoryObservation::new(
        id,
        parse_date(date).unwrap(),
        BoundingBox::new(-1000.0, -1000.0, 1000.0, 1000.0),
    )
    .with_band("red", Array2::from_elem((4, 4), red))
    .with_band("nir", Array2::from_elem((4, 4), nir))
    .with_mask("ls8_pq", "pixelquality", Array2::from_elem((4, 4), quality))
}

/// Q1 has a cloudy observation, Q2 a medoid triple, Q3 and Q4 nothing.
fn catalog() -> Arc<MemoryCatalog> {
    let catalog = MemoryCatalog::new();
    for obs in [
        observation("q1-a", "2015-01-15", 10.0, 100.0, CONTIGUOUS),
        observation("q1-cloudy", "2015-02-15", 5000.0, 5000.0, CONTIGUOUS | CLOUD),
        observation("q1-b", "2015-03-15", 30.0, 300.0, CONTIGUOUS),
        observation("q2-a", "2015-04-10", 1.0, 1.0, CONTIGUOUS),
        observation("q2-b", "2015-05-10", 2.0, 2.0, CONTIGUOUS),
        observation("q2-c", "2015-06-10", 100.0, 100.0, CONTIGUOUS),
    ] {
        catalog.insert("ls8_nbar", obs);
    }
    Arc::new(catalog)
}

// =============================================================================
// Pipeline
// =============================================================================

#[test]
fn test_config_plans_every_tile_window() {
    let dir = TempDir::new().unwrap();
    let config = validated(&dir);

    // One tile, four quarters, three statistics
    assert_eq!(config.plan.len(), 4);
    assert_eq!(config.plan.artifact_count(), 12);
    assert_eq!(
        config.plan.tasks()[1].paths[2],
        dir.path().join("3_-5/2015-04-01/medoid.tsc")
    );
}

#[tokio::test]
async fn test_full_run() {
    let dir = TempDir::new().unwrap();
    let config = validated(&dir);
    let orchestrator = config.orchestrator(catalog());

    let summary = orchestrator.run(&config.plan, CancellationToken::new()).await;
    assert_eq!(summary.written(), 4);
    assert!(summary.is_success());

    // Cloudy observation is masked out everywhere
    let mean = read_artifact(&dir.path().join("3_-5/2015-01-01/mean.tsc")).unwrap();
    assert_eq!(mean.variable("red").unwrap()[[0, 0]], 20.0);
    assert_eq!(mean.variable("nir").unwrap()[[3, 3]], 200.0);
    assert_eq!(mean.header.crs, "EPSG:3577");
    assert_eq!(mean.header.shape, [4, 4]);
    assert_eq!(mean.header.chunk_shape, [3, 3]);
    assert_eq!(mean.header.attributes["product"], "test_composite");
    assert_eq!(mean.header.x[0], 12.5);
    assert_eq!(mean.header.y[0], -16.5);

    let count = read_artifact(&dir.path().join("3_-5/2015-01-01/count.tsc")).unwrap();
    assert_eq!(count.variable("red").unwrap()[[2, 1]], 2.0);

    // Medoid picks the middle observation of the triple and records it
    let medoid = read_artifact(&dir.path().join("3_-5/2015-04-01/medoid.tsc")).unwrap();
    assert_eq!(medoid.variable("red").unwrap()[[1, 1]], 2.0);
    assert_eq!(medoid.variable("nir").unwrap()[[1, 1]], 2.0);
    let provenance = medoid.variable(PROVENANCE_VARIABLE).unwrap()[[1, 1]];
    assert_eq!(medoid.header.observations[provenance as usize], "q2-b");
}

#[tokio::test]
async fn test_empty_windows_hold_nodata() {
    let dir = TempDir::new().unwrap();
    let config = validated(&dir);
    config
        .orchestrator(catalog())
        .run(&config.plan, CancellationToken::new())
        .await;

    let mean = read_artifact(&dir.path().join("3_-5/2015-07-01/mean.tsc")).unwrap();
    assert!(mean.variable("red").unwrap().iter().all(|&v| v == -999.0));
    assert!(mean.header.observations.is_empty());

    // Zero observations is a count, not missing data
    let count = read_artifact(&dir.path().join("3_-5/2015-10-01/count.tsc")).unwrap();
    assert!(count.variable("nir").unwrap().iter().all(|&v| v == 0.0));

    let medoid = read_artifact(&dir.path().join("3_-5/2015-10-01/medoid.tsc")).unwrap();
    assert!(medoid
        .variable(PROVENANCE_VARIABLE)
        .unwrap()
        .iter()
        .all(|&v| v == -1.0));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = validated(&dir);
    let catalog = catalog();
    let orchestrator = config.orchestrator(catalog.clone());

    orchestrator.run(&config.plan, CancellationToken::new()).await;
    let path = dir.path().join("3_-5/2015-04-01/medoid.tsc");
    let first = fs::read(&path).unwrap();
    let queries = catalog.query_count();

    let summary = orchestrator.run(&config.plan, CancellationToken::new()).await;
    assert_eq!(summary.skipped(), 4);
    assert_eq!(catalog.query_count(), queries);
    assert_eq!(fs::read(&path).unwrap(), first);

    // Recomputing from scratch reproduces the same bytes
    fs::remove_file(&path).unwrap();
    let summary = orchestrator.run(&config.plan, CancellationToken::new()).await;
    assert_eq!(summary.written(), 1);
    assert_eq!(fs::read(&path).unwrap(), first);
}
