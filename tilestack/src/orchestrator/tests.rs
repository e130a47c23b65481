use super::*;
use crate::grid::{BoundingBox, Crs, GridSpec, TileIndex};
use crate::output::{ArtifactSpec, PathTemplate};
use crate::stack::{CatalogError, MemoryCatalog, MemoryObservation, SourceObservation};
use crate::statistic::{OutputDtype, Reducer, Statistic};
use crate::window::{parse_date, Period, WindowSpec};
use ndarray::Array2;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn grid() -> SpatialGrid {
    SpatialGrid::new(GridSpec {
        crs: Crs::new("EPSG:3577"),
        origin: (0.0, 0.0),
        tile_size: (2.0, 2.0),
        resolution: (1.0, -1.0),
    })
    .unwrap()
}

fn window_spec() -> WindowSpec {
    WindowSpec::new(
        parse_date("2015-01-01").unwrap(),
        parse_date("2015-07-01").unwrap(),
        Period::Months(3),
        Period::Months(3),
    )
    .unwrap()
}

fn catalog() -> Arc<MemoryCatalog> {
    let catalog = MemoryCatalog::new();
    let everywhere = BoundingBox::new(-100.0, -100.0, 100.0, 100.0);
    for (id, date, value) in [
        ("a", "2015-01-10", 10.0),
        ("b", "2015-02-10", 20.0),
        ("c", "2015-03-10", 30.0),
        ("d", "2015-05-10", 40.0),
    ] {
        catalog.insert(
            "ls8",
            MemoryObservation::new(id, parse_date(date).unwrap(), everywhere)
                .with_band("red", Array2::from_elem((2, 2), value)),
        );
    }
    Arc::new(catalog)
}

fn statistics() -> Vec<StatisticOutput> {
    [Reducer::Mean, Reducer::Median]
        .into_iter()
        .map(|reducer| StatisticOutput {
            statistic: Statistic::new(reducer.as_str(), reducer, OutputDtype::Int16, -999.0)
                .unwrap(),
            artifact: ArtifactSpec::new(
                PathTemplate::parse("{x}_{y}/{start:%Y%m}_{statistic}.tsc").unwrap(),
            ),
        })
        .collect()
}

fn sources() -> Vec<SourceSpec> {
    vec![SourceSpec {
        name: "ls8".to_string(),
        product: "ls8".to_string(),
        nodata: Some(-999.0),
        masks: Vec::new(),
    }]
}

fn setup(
    catalog: Arc<dyn SourceCatalog>,
    dir: &TempDir,
    limits: ExecutionLimits,
) -> (Orchestrator, TaskPlan) {
    let grid = grid();
    let writer = OutputWriter::new(dir.path(), &grid);
    let tiles = [TileIndex::new(0, 0), TileIndex::new(1, -1)];
    let plan = TaskPlan::new(&tiles, window_spec().windows(), &statistics(), &writer).unwrap();
    let orchestrator = Orchestrator::new(
        catalog,
        grid,
        sources(),
        vec!["red".to_string()],
        window_spec().range(),
        statistics(),
        writer,
        limits,
    );
    (orchestrator, plan)
}

fn limits(skip_existing: bool) -> ExecutionLimits {
    ExecutionLimits {
        max_in_flight: 2,
        task_timeout: None,
        skip_existing,
    }
}

#[tokio::test]
async fn test_run_writes_every_artifact() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, plan) = setup(catalog(), &dir, limits(false));

    let summary = orchestrator.run(&plan, CancellationToken::new()).await;

    assert_eq!(summary.reports.len(), 4);
    assert_eq!(summary.written(), 4);
    assert!(summary.is_success());
    for planned in plan.tasks() {
        for path in &planned.paths {
            assert!(is_complete(path), "missing {}", path.display());
        }
    }

    let q1 = crate::output::read_artifact(&dir.path().join("0_0/201501_mean.tsc")).unwrap();
    assert_eq!(q1.variable("red").unwrap()[[0, 0]], 20.0);
    assert_eq!(q1.header.observations, vec!["a", "b", "c"]);

    let q2 = crate::output::read_artifact(&dir.path().join("1_-1/201504_median.tsc")).unwrap();
    assert_eq!(q2.variable("red").unwrap()[[1, 1]], 40.0);
}

#[tokio::test]
async fn test_rerun_skips_without_catalog_queries() {
    let dir = TempDir::new().unwrap();
    let catalog = catalog();

    let (first, plan) = setup(catalog.clone(), &dir, limits(true));
    first.run(&plan, CancellationToken::new()).await;
    let queries = catalog.query_count();
    let path = dir.path().join("0_0/201501_mean.tsc");
    let before = fs::read(&path).unwrap();

    let (second, plan) = setup(catalog.clone(), &dir, limits(true));
    let summary = second.run(&plan, CancellationToken::new()).await;

    assert_eq!(summary.skipped(), 4);
    assert_eq!(catalog.query_count(), queries);
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[tokio::test]
async fn test_rerun_fills_in_missing_artifacts_only() {
    let dir = TempDir::new().unwrap();
    let catalog = catalog();
    let (orchestrator, plan) = setup(catalog.clone(), &dir, limits(true));
    orchestrator.run(&plan, CancellationToken::new()).await;

    let removed = dir.path().join("1_-1/201504_median.tsc");
    fs::remove_file(&removed).unwrap();

    let summary = orchestrator.run(&plan, CancellationToken::new()).await;
    assert_eq!(summary.skipped(), 3);
    assert_eq!(summary.written(), 1);

    let rewritten = summary
        .reports
        .iter()
        .find_map(|r| match &r.outcome {
            TaskOutcome::Written { paths, .. } => Some(paths.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(rewritten, vec![removed]);
}

#[tokio::test]
async fn test_cancelled_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, plan) = setup(catalog(), &dir, limits(false));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = orchestrator.run(&plan, cancel).await;

    assert_eq!(summary.cancelled(), 4);
    assert!(!summary.is_success());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

/// Catalog that stalls every query.
struct SlowCatalog {
    inner: Arc<MemoryCatalog>,
    delay: Duration,
}

impl SourceCatalog for SlowCatalog {
    fn query(
        &self,
        product: &str,
        extent: &BoundingBox,
        range: &TimeWindow,
    ) -> Result<Vec<Arc<dyn SourceObservation>>, CatalogError> {
        std::thread::sleep(self.delay);
        self.inner.query(product, extent, range)
    }
}

#[tokio::test]
async fn test_timed_out_task_has_no_side_effects() {
    let dir = TempDir::new().unwrap();
    let slow = Arc::new(SlowCatalog {
        inner: catalog(),
        delay: Duration::from_millis(300),
    });
    let limits = ExecutionLimits {
        max_in_flight: 4,
        task_timeout: Some(Duration::from_millis(20)),
        skip_existing: false,
    };
    let (orchestrator, plan) = setup(slow, &dir, limits);

    let summary = orchestrator.run(&plan, CancellationToken::new()).await;

    assert_eq!(summary.timed_out(), 4);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

/// Catalog that records how many queries overlap.
struct CountingCatalog {
    inner: Arc<MemoryCatalog>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl CountingCatalog {
    fn new() -> Self {
        Self {
            inner: catalog(),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl SourceCatalog for CountingCatalog {
    fn query(
        &self,
        product: &str,
        extent: &BoundingBox,
        range: &TimeWindow,
    ) -> Result<Vec<Arc<dyn SourceObservation>>, CatalogError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.inner.query(product, extent, range)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_task_in_flight() {
    let dir = TempDir::new().unwrap();
    let counting = Arc::new(CountingCatalog::new());
    let limits = ExecutionLimits {
        max_in_flight: 1,
        task_timeout: None,
        skip_existing: false,
    };
    let (orchestrator, plan) = setup(counting.clone(), &dir, limits);

    let summary = orchestrator.run(&plan, CancellationToken::new()).await;

    assert!(summary.is_success());
    assert_eq!(summary.written(), 4);
    assert_eq!(counting.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_never_exceeds_limit() {
    let dir = TempDir::new().unwrap();
    let counting = Arc::new(CountingCatalog::new());
    let (orchestrator, plan) = setup(counting.clone(), &dir, limits(false));

    let summary = orchestrator.run(&plan, CancellationToken::new()).await;

    assert_eq!(summary.written(), 4);
    let peak = counting.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak {}", peak);
}

/// Catalog whose queries always fail.
struct BrokenCatalog;

impl SourceCatalog for BrokenCatalog {
    fn query(
        &self,
        product: &str,
        _extent: &BoundingBox,
        _range: &TimeWindow,
    ) -> Result<Vec<Arc<dyn SourceObservation>>, CatalogError> {
        Err(CatalogError::QueryFailed {
            product: product.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

#[tokio::test]
async fn test_failures_are_reported_per_task() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, plan) = setup(Arc::new(BrokenCatalog), &dir, limits(false));

    let summary = orchestrator.run(&plan, CancellationToken::new()).await;

    assert_eq!(summary.failures().count(), 4);
    let TaskOutcome::Failed { error } = &summary.reports[0].outcome else {
        panic!("expected failure");
    };
    assert!(error.contains("connection refused"));
}

#[test]
fn test_summary_success() {
    let task = Task {
        tile: TileIndex::new(0, 0),
        window: window_spec().range(),
    };
    let report = |outcome| TaskReport {
        task,
        outcome,
        elapsed: Duration::ZERO,
    };
    let summary = RunSummary {
        reports: vec![report(TaskOutcome::Skipped), report(TaskOutcome::TimedOut)],
    };
    assert!(!summary.is_success());
    assert_eq!(summary.skipped(), 1);
    assert_eq!(summary.timed_out(), 1);
}
