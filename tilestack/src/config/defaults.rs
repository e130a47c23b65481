//! Default values and constants for all configuration settings.
//!
//! Contains all `DEFAULT_*` constants, CPU-aware helper functions,
//! and the `ConfigFile::default()` implementation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::settings::*;
use crate::window::Period;

// =============================================================================
// CPU helpers
// =============================================================================

/// Get the number of available CPU cores.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Default task concurrency: one task per core.
pub fn default_max_in_flight() -> usize {
    num_cpus()
}

// =============================================================================
// Grid
// =============================================================================

/// Australian Albers, the usual projection for continental tiling.
pub const DEFAULT_CRS: &str = "EPSG:3577";

/// Tile edge length in CRS units (100 km).
pub const DEFAULT_TILE_SIZE: f64 = 100_000.0;

/// Pixel size in CRS units.
pub const DEFAULT_RESOLUTION: f64 = 25.0;

/// Output chunk edge length in pixels.
pub const DEFAULT_CHUNK: usize = 200;

// =============================================================================
// Time
// =============================================================================

/// Default window duration and step: calendar quarters.
pub const DEFAULT_PERIOD: Period = Period::Months(3);

// =============================================================================
// Statistics and output
// =============================================================================

/// Nodata sentinel for integer outputs.
pub const DEFAULT_NODATA: f64 = -999.0;

pub const DEFAULT_PATH_TEMPLATE: &str = "{x}_{y}/{start:%Y%m%d}_{statistic}.tsc";

pub const DEFAULT_OUTPUT_DIR: &str = "output";

// =============================================================================
// Execution
// =============================================================================

/// Default per-task timeout (0 = none).
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 0;

pub const DEFAULT_WRITE_RETRIES: u32 = 3;

pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

// =============================================================================
// Logging
// =============================================================================

pub const DEFAULT_LOG_FILE: &str = "tilestack.log";

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            crs: DEFAULT_CRS.to_string(),
            origin_x: 0.0,
            origin_y: 0.0,
            tile_size_x: DEFAULT_TILE_SIZE,
            tile_size_y: DEFAULT_TILE_SIZE,
            resolution_x: DEFAULT_RESOLUTION,
            resolution_y: -DEFAULT_RESOLUTION,
            chunk_y: DEFAULT_CHUNK,
            chunk_x: DEFAULT_CHUNK,
        }
    }
}

impl Default for TimeSettings {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            duration: DEFAULT_PERIOD,
            step: DEFAULT_PERIOD,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            location: PathBuf::from(DEFAULT_OUTPUT_DIR),
            skip_existing: false,
            attributes: BTreeMap::new(),
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            write_retries: DEFAULT_WRITE_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: super::file::config_directory().join("logs"),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            grid: GridSettings::default(),
            region: RegionSettings::default(),
            time: TimeSettings::default(),
            flags: BTreeMap::new(),
            sources: Vec::new(),
            masks: Vec::new(),
            statistics: Vec::new(),
            output: OutputSettings::default(),
            execution: ExecutionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}
