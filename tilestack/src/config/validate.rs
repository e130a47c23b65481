//! Cross-section validation.
//!
//! Turns a parsed [`ConfigFile`] into a [`ValidatedConfig`]: the grid is
//! built, masks are compiled against their vocabularies, templates parsed,
//! nodata checked against dtypes and the full task plan enumerated so
//! output path collisions surface before any task runs.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::file::ConfigFileError;
use super::settings::*;
use crate::grid::{Crs, GridSpec, SpatialGrid, TileIndex};
use crate::mask::{FlagVocabulary, MaskSpec};
use crate::orchestrator::{ExecutionLimits, Orchestrator, PlanError, StatisticOutput, TaskPlan};
use crate::output::{ArtifactSpec, OutputWriter, PathTemplate, RetryPolicy};
use crate::stack::{MaskEntry, SourceCatalog, SourceSpec};
use crate::statistic::Statistic;
use crate::window::WindowSpec;

/// A configuration that is ready to run.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub grid: SpatialGrid,
    pub tiles: Vec<TileIndex>,
    pub windows: WindowSpec,
    /// Band names, identical for every source
    pub measurements: Vec<String>,
    pub sources: Vec<SourceSpec>,
    pub statistics: Vec<StatisticOutput>,
    pub writer: OutputWriter,
    pub limits: ExecutionLimits,
    pub plan: TaskPlan,
}

impl ValidatedConfig {
    /// An orchestrator for this configuration reading from `catalog`.
    pub fn orchestrator(&self, catalog: Arc<dyn SourceCatalog>) -> Orchestrator {
        Orchestrator::new(
            catalog,
            self.grid.clone(),
            self.sources.clone(),
            self.measurements.clone(),
            self.windows.range(),
            self.statistics.clone(),
            self.writer.clone(),
            self.limits,
        )
    }
}

impl ConfigFile {
    /// Checks every cross-section constraint and enumerates the task plan.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigFileError> {
        let grid = self.build_grid()?;
        let tiles = self.resolve_tiles(&grid)?;
        let windows = self.build_windows()?;
        let (measurements, sources) = self.build_sources()?;
        let statistics = self.build_statistics()?;

        let writer = OutputWriter::new(&self.output.location, &grid)
            .with_chunk_shape((self.grid.chunk_y, self.grid.chunk_x))
            .with_attributes(self.output.attributes.clone())
            .with_retry(RetryPolicy {
                max_retries: self.execution.write_retries,
                base_delay: Duration::from_millis(self.execution.retry_base_delay_ms),
            });

        let plan = TaskPlan::new(&tiles, windows.windows(), &statistics, &writer).map_err(
            |e| match e {
                PlanError::PathCollision {
                    path,
                    first,
                    second,
                } => ConfigFileError::PathCollision {
                    path,
                    first,
                    second,
                },
            },
        )?;

        let limits = ExecutionLimits {
            max_in_flight: self.execution.max_in_flight,
            task_timeout: (self.execution.task_timeout_secs > 0)
                .then(|| Duration::from_secs(self.execution.task_timeout_secs)),
            skip_existing: self.output.skip_existing,
        };

        Ok(ValidatedConfig {
            grid,
            tiles,
            windows,
            measurements,
            sources,
            statistics,
            writer,
            limits,
            plan,
        })
    }

    fn build_grid(&self) -> Result<SpatialGrid, ConfigFileError> {
        let g = &self.grid;
        SpatialGrid::new(GridSpec {
            crs: Crs::new(g.crs.clone()),
            origin: (g.origin_x, g.origin_y),
            tile_size: (g.tile_size_x, g.tile_size_y),
            resolution: (g.resolution_x, g.resolution_y),
        })
        .map_err(|e| {
            ConfigFileError::invalid(
                "grid",
                "tile_size",
                format!("{},{}", g.tile_size_x, g.tile_size_y),
                e.to_string(),
            )
        })
    }

    fn resolve_tiles(&self, grid: &SpatialGrid) -> Result<Vec<TileIndex>, ConfigFileError> {
        if !self.region.tiles.is_empty() {
            let unique: BTreeSet<TileIndex> = self.region.tiles.iter().copied().collect();
            return Ok(unique.into_iter().collect());
        }
        match &self.region.bbox {
            Some(bbox) => grid.tiles_covering(bbox).map_err(|e| {
                ConfigFileError::invalid("region", "min_x", format!("{:?}", bbox), e.to_string())
            }),
            None => Err(ConfigFileError::missing("region", "tiles")),
        }
    }

    fn build_windows(&self) -> Result<WindowSpec, ConfigFileError> {
        let start = self
            .time
            .start_date
            .ok_or_else(|| ConfigFileError::missing("time", "start_date"))?;
        let end = self
            .time
            .end_date
            .ok_or_else(|| ConfigFileError::missing("time", "end_date"))?;
        WindowSpec::new(start, end, self.time.duration, self.time.step).map_err(|e| {
            ConfigFileError::invalid("time", "end_date", end.to_rfc3339(), e.to_string())
        })
    }

    fn build_sources(&self) -> Result<(Vec<String>, Vec<SourceSpec>), ConfigFileError> {
        let Some(first) = self.sources.first() else {
            return Err(ConfigFileError::missing("source.<name>", "product"));
        };
        let measurements = first.measurements.clone();

        let mut sources = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let section = format!("source.{}", source.name);
            if source.measurements != measurements {
                return Err(ConfigFileError::invalid(
                    &section,
                    "measurements",
                    source.measurements.join(", "),
                    format!(
                        "every source must provide the same measurements ({})",
                        measurements.join(", ")
                    ),
                ));
            }
            sources.push(SourceSpec {
                name: source.name.clone(),
                product: source.product.clone(),
                nodata: source.nodata,
                masks: Vec::new(),
            });
        }

        for mask in &self.masks {
            let section = format!("mask.{}.{}", mask.source, mask.name);
            let source = sources
                .iter_mut()
                .find(|s| s.name == mask.source)
                .ok_or_else(|| {
                    ConfigFileError::invalid(
                        &section,
                        "source",
                        &mask.source,
                        "no [source.<name>] section with this name",
                    )
                })?;

            let definitions = self.flags.get(&mask.vocabulary).ok_or_else(|| {
                ConfigFileError::invalid(
                    &section,
                    "vocabulary",
                    &mask.vocabulary,
                    "no [flags.<name>] section with this name",
                )
            })?;
            let mut vocabulary = FlagVocabulary::new(mask.vocabulary.clone());
            for (flag, definition) in definitions {
                vocabulary.define(flag.clone(), *definition).map_err(|e| {
                    ConfigFileError::invalid(
                        &format!("flags.{}", mask.vocabulary),
                        flag,
                        format!("{:#x}/{:#x}", definition.bits, definition.value),
                        e.to_string(),
                    )
                })?;
            }

            let spec = mask
                .flags
                .iter()
                .fold(MaskSpec::new(), |spec, (flag, requirement)| {
                    spec.require(flag.clone(), *requirement)
                });
            let compiled = spec.compile(&vocabulary).map_err(|e| {
                ConfigFileError::invalid(&section, "flags", describe_flags(mask), e.to_string())
            })?;

            source.masks.push(MaskEntry {
                name: mask.name.clone(),
                product: mask.product.clone(),
                measurement: mask.measurement.clone(),
                mask: compiled.with_nodata(mask.nodata),
            });
        }

        Ok((measurements, sources))
    }

    fn build_statistics(&self) -> Result<Vec<StatisticOutput>, ConfigFileError> {
        if self.statistics.is_empty() {
            return Err(ConfigFileError::missing("statistic.<name>", "reducer"));
        }
        self.statistics
            .iter()
            .map(|s| {
                let section = format!("statistic.{}", s.name);
                let statistic = Statistic::new(s.name.clone(), s.reducer, s.dtype, s.nodata)
                    .map_err(|e| {
                        ConfigFileError::invalid(&section, "nodata", s.nodata.to_string(), e.to_string())
                    })?
                    .with_median(s.median)
                    .with_distance(s.distance);
                let template = PathTemplate::parse(&s.path_template).map_err(|e| {
                    ConfigFileError::invalid(&section, "path_template", &s.path_template, e.to_string())
                })?;
                Ok(StatisticOutput {
                    statistic,
                    artifact: ArtifactSpec::new(template)
                        .with_compression(s.compression)
                        .with_checksum(s.checksum),
                })
            })
            .collect()
    }
}

fn describe_flags(mask: &MaskSettings) -> String {
    mask.flags
        .iter()
        .map(|(flag, requirement)| format!("{}:{}", flag, requirement))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;

    const BASE: &str = r#"
[grid]
tile_size_x = 100
tile_size_y = 100
resolution_x = 25
resolution_y = -25
chunk_y = 2
chunk_x = 2

[region]
tiles = 3:-5, 4:-5, 3:-5

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

[source.ls7]
product = ls7_nbar
measurements = red, nir

[mask.ls8.pq]
product = ls8_pq
measurement = pixelquality
vocabulary = pq
flags = contiguous:true, cloud:false

[statistic.medoid]
reducer = medoid

[output]
location = /tmp/composites
"#;

    fn with(extra: &str) -> Result<ValidatedConfig, ConfigFileError> {
        ConfigFile::from_ini_str(&format!("{BASE}\n{extra}"))?.validate()
    }

    fn replacing(from: &str, to: &str) -> Result<ValidatedConfig, ConfigFileError> {
        assert!(BASE.contains(from));
        ConfigFile::from_ini_str(&BASE.replace(from, to))?.validate()
    }

    #[test]
    fn test_valid_config() {
        let config = with("").unwrap();

        assert_eq!(config.grid.pixel_shape(), (4, 4));
        assert_eq!(
            config.tiles,
            vec![TileIndex::new(3, -5), TileIndex::new(4, -5)]
        );
        assert_eq!(config.measurements, vec!["red", "nir"]);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].masks.len(), 1);
        assert!(config.sources[1].masks.is_empty());
        // 2 tiles x 4 quarters
        assert_eq!(config.plan.len(), 8);
        assert!(config.limits.task_timeout.is_none());
    }

    #[test]
    fn test_non_integer_pixel_ratio() {
        let err = replacing("resolution_x = 25", "resolution_x = 30").unwrap_err();
        assert!(err.to_string().contains("grid.tile_size"));
    }

    #[test]
    fn test_unknown_flag() {
        let err = with("[mask.ls7.pq]\nproduct = ls7_pq\nmeasurement = pixelquality\nvocabulary = pq\nflags = cirrus:false\n")
            .unwrap_err();
        assert!(err.to_string().contains("cirrus"));
    }

    #[test]
    fn test_unknown_vocabulary() {
        let err = with("[mask.ls7.pq]\nproduct = ls7_pq\nmeasurement = pixelquality\nvocabulary = fmask\n")
            .unwrap_err();
        assert!(err.to_string().contains("vocabulary"));
    }

    #[test]
    fn test_mask_for_unknown_source() {
        let err = with("[mask.s2.pq]\nproduct = s2_pq\nmeasurement = q\nvocabulary = pq\n")
            .unwrap_err();
        assert!(err.to_string().contains("mask.s2.pq"));
    }

    #[test]
    fn test_mismatched_measurements() {
        let err = with("[source.s2]\nproduct = s2\nmeasurements = red\n").unwrap_err();
        assert!(err.to_string().contains("source.s2.measurements"));
    }

    #[test]
    fn test_path_collision() {
        let err = with("[statistic.mean]\nreducer = mean\npath_template = {x}_{y}/{start}.tsc\n[statistic.median]\nreducer = median\npath_template = {x}_{y}/{start}.tsc\n")
            .unwrap_err();
        assert!(matches!(err, ConfigFileError::PathCollision { .. }));
    }

    #[test]
    fn test_bad_template() {
        let err = with("[statistic.mean]\nreducer = mean\npath_template = {tile}.tsc\n")
            .unwrap_err();
        assert!(err.to_string().contains("path_template"));
    }

    #[test]
    fn test_unrepresentable_nodata() {
        let err = with("[statistic.count]\nreducer = count\ndtype = uint8\nnodata = -1\n")
            .unwrap_err();
        assert!(err.to_string().contains("statistic.count.nodata"));
    }

    #[test]
    fn test_empty_time_range() {
        let err = replacing("end_date = 2016-01-01", "end_date = 2014-01-01").unwrap_err();
        assert!(err.to_string().contains("time.end_date"));
    }

    #[test]
    fn test_missing_statistics() {
        let err = replacing("[statistic.medoid]\nreducer = medoid\n", "").unwrap_err();
        assert!(matches!(err, ConfigFileError::Missing { .. }));
    }

    #[test]
    fn test_timeout_and_retries() {
        let config =
            with("[execution]\ntask_timeout_secs = 30\nwrite_retries = 1\nmax_in_flight = 3\n")
                .unwrap();
        assert_eq!(config.limits.task_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.limits.max_in_flight, 3);
    }
}
