//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` (or family of sections) of the
//! INI file. Values are already typed, but cross-section checks such as
//! resolving flag names or building the grid happen in
//! [`ConfigFile::validate`](super::ConfigFile::validate).

use crate::grid::{BoundingBox, TileIndex};
use crate::mask::{FlagDefinition, FlagRequirement};
use crate::output::Compression;
use crate::statistic::{DistanceMetric, MedianConvention, OutputDtype, Reducer};
use crate::window::Period;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Complete run configuration loaded from an INI file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Tiling of the output product
    pub grid: GridSettings,
    /// Tiles to process
    pub region: RegionSettings,
    /// Time range and windowing
    pub time: TimeSettings,
    /// Flag vocabularies by name, from `[flags.<name>]`
    pub flags: BTreeMap<String, BTreeMap<String, FlagDefinition>>,
    /// Input products in declaration order, from `[source.<name>]`
    pub sources: Vec<SourceSettings>,
    /// Mask entries, from `[mask.<source>.<entry>]`
    pub masks: Vec<MaskSettings>,
    /// Statistics in declaration order, from `[statistic.<name>]`
    pub statistics: Vec<StatisticSettings>,
    /// Output location and behaviour
    pub output: OutputSettings,
    /// Concurrency, timeouts and retries
    pub execution: ExecutionSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Grid configuration.
#[derive(Debug, Clone)]
pub struct GridSettings {
    /// CRS identifier, e.g. "EPSG:3577"
    pub crs: String,
    pub origin_x: f64,
    pub origin_y: f64,
    pub tile_size_x: f64,
    pub tile_size_y: f64,
    /// Pixel size along x
    pub resolution_x: f64,
    /// Pixel size along y; negative for north-up rasters
    pub resolution_y: f64,
    /// Output chunk rows
    pub chunk_y: usize,
    /// Output chunk columns
    pub chunk_x: usize,
}

/// Region configuration: explicit tiles or a bounding box.
#[derive(Debug, Clone, Default)]
pub struct RegionSettings {
    pub tiles: Vec<TileIndex>,
    pub bbox: Option<BoundingBox>,
}

/// Time configuration.
#[derive(Debug, Clone)]
pub struct TimeSettings {
    pub start_date: Option<DateTime<Utc>>,
    /// Exclusive end of the time range
    pub end_date: Option<DateTime<Utc>>,
    pub duration: Period,
    pub step: Period,
}

/// One input product.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Section suffix, used to attach mask entries
    pub name: String,
    pub product: String,
    pub measurements: Vec<String>,
    pub nodata: Option<f64>,
}

/// One companion mask entry of a source.
#[derive(Debug, Clone)]
pub struct MaskSettings {
    pub source: String,
    pub name: String,
    pub product: String,
    pub measurement: String,
    /// Name of a `[flags.<name>]` vocabulary
    pub vocabulary: String,
    /// Quality value treated as missing
    pub nodata: Option<u64>,
    pub flags: BTreeMap<String, FlagRequirement>,
}

/// One output statistic.
#[derive(Debug, Clone)]
pub struct StatisticSettings {
    pub name: String,
    pub reducer: Reducer,
    pub dtype: OutputDtype,
    pub nodata: f64,
    pub compression: Compression,
    pub checksum: bool,
    /// Path template relative to the output location
    pub path_template: String,
    pub median: MedianConvention,
    pub distance: DistanceMetric,
}

/// Output configuration.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// Root directory of all artifacts
    pub location: PathBuf,
    /// Skip tasks whose artifacts already exist and are complete
    pub skip_existing: bool,
    /// Global attributes written into every artifact
    pub attributes: BTreeMap<String, String>,
}

/// Execution configuration.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Maximum concurrently running tasks.
    /// Default: number of CPU cores
    pub max_in_flight: usize,
    /// Per-task timeout in seconds; 0 disables it.
    pub task_timeout_secs: u64,
    /// Retries of a transient write failure.
    /// Default: 3
    pub write_retries: u32,
    /// Base delay for exponential backoff between write retries.
    /// Actual delay = base_delay * 2^attempt
    /// Default: 100
    pub retry_base_delay_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Log directory
    pub directory: PathBuf,
    /// Log file name within the directory
    pub file: String,
}
