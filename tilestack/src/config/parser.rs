//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use ini::{Ini, Properties};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::*;
use crate::grid::{BoundingBox, TileIndex};
use crate::mask::{FlagDefinition, FlagRequirement};
use crate::window::parse_date;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [grid] section
    if let Some(section) = ini.section(Some("grid")) {
        let grid = &mut config.grid;
        if let Some(v) = section.get("crs") {
            let v = v.trim();
            if v.is_empty() {
                return Err(ConfigFileError::invalid("grid", "crs", v, "must not be empty"));
            }
            grid.crs = v.to_string();
        }
        for (key, field) in [
            ("origin_x", &mut grid.origin_x),
            ("origin_y", &mut grid.origin_y),
            ("tile_size_x", &mut grid.tile_size_x),
            ("tile_size_y", &mut grid.tile_size_y),
            ("resolution_x", &mut grid.resolution_x),
            ("resolution_y", &mut grid.resolution_y),
        ] {
            if let Some(v) = section.get(key) {
                *field = parse_value("grid", key, v, "must be a number")?;
            }
        }
        for (key, field) in [("chunk_y", &mut grid.chunk_y), ("chunk_x", &mut grid.chunk_x)] {
            if let Some(v) = section.get(key) {
                *field = parse_positive("grid", key, v)?;
            }
        }
    }

    // [region] section
    if let Some(section) = ini.section(Some("region")) {
        if let Some(v) = section.get("tiles") {
            config.region.tiles = parse_tiles(v)?;
        }
        config.region.bbox = parse_bbox(section)?;
    }

    // [time] section
    if let Some(section) = ini.section(Some("time")) {
        for (key, field) in [
            ("start_date", &mut config.time.start_date),
            ("end_date", &mut config.time.end_date),
        ] {
            if let Some(v) = section.get(key) {
                *field = Some(parse_date(v).map_err(|e| {
                    ConfigFileError::invalid("time", key, v, e.to_string())
                })?);
            }
        }
        for (key, field) in [
            ("duration", &mut config.time.duration),
            ("step", &mut config.time.step),
        ] {
            if let Some(v) = section.get(key) {
                *field = v
                    .parse()
                    .map_err(|e: crate::window::WindowError| {
                        ConfigFileError::invalid("time", key, v, e.to_string())
                    })?;
            }
        }
    }

    // Families of named sections, in declaration order
    for (name, section) in ini.iter() {
        let Some(name) = name else { continue };
        let mut parts = name.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("flags"), Some(vocabulary), None) => {
                config
                    .flags
                    .insert(vocabulary.to_string(), parse_vocabulary(name, section)?);
            }
            (Some("source"), Some(source), None) => {
                config.sources.push(parse_source(name, source, section)?);
            }
            (Some("mask"), Some(source), Some(entry)) => {
                config.masks.push(parse_mask(name, source, entry, section)?);
            }
            (Some("statistic"), Some(statistic), None) => {
                config
                    .statistics
                    .push(parse_statistic(name, statistic, section)?);
            }
            _ => {}
        }
    }

    // [output] section
    if let Some(section) = ini.section(Some("output")) {
        if let Some(v) = section.get("location") {
            let v = v.trim();
            if !v.is_empty() {
                config.output.location = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("skip_existing") {
            config.output.skip_existing = parse_bool(v);
        }
        if let Some(v) = section.get("attributes") {
            config.output.attributes = parse_attributes(v)?;
        }
    }

    // [execution] section
    if let Some(section) = ini.section(Some("execution")) {
        let execution = &mut config.execution;
        if let Some(v) = section.get("max_in_flight") {
            execution.max_in_flight = parse_positive("execution", "max_in_flight", v)?;
        }
        if let Some(v) = section.get("task_timeout_secs") {
            execution.task_timeout_secs = parse_value(
                "execution",
                "task_timeout_secs",
                v,
                "must be a non-negative integer (seconds, 0 = none)",
            )?;
        }
        if let Some(v) = section.get("write_retries") {
            execution.write_retries = parse_value(
                "execution",
                "write_retries",
                v,
                "must be a non-negative integer",
            )?;
        }
        if let Some(v) = section.get("retry_base_delay_ms") {
            execution.retry_base_delay_ms = parse_value(
                "execution",
                "retry_base_delay_ms",
                v,
                "must be a non-negative integer (milliseconds)",
            )?;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

fn parse_vocabulary(
    section_name: &str,
    section: &Properties,
) -> Result<BTreeMap<String, FlagDefinition>, ConfigFileError> {
    section
        .iter()
        .map(|(flag, v)| Ok((flag.to_string(), parse_flag_definition(section_name, flag, v)?)))
        .collect()
}

/// `<bit>` for a single-bit flag or `<bits>/<value>` for a categorical one.
fn parse_flag_definition(
    section: &str,
    flag: &str,
    value: &str,
) -> Result<FlagDefinition, ConfigFileError> {
    let invalid = || {
        ConfigFileError::invalid(
            section,
            flag,
            value,
            "expected a bit index (0-63) or <bits>/<value>, e.g. 0x0c/0x08",
        )
    };
    match value.split_once('/') {
        None => {
            let bit = parse_integer(value).ok_or_else(invalid)?;
            if bit > 63 {
                return Err(invalid());
            }
            Ok(FlagDefinition::bit(bit as u32))
        }
        Some((bits, val)) => {
            let bits = parse_integer(bits).ok_or_else(invalid)?;
            let val = parse_integer(val).ok_or_else(invalid)?;
            if bits == 0 || val & !bits != 0 {
                return Err(invalid());
            }
            Ok(FlagDefinition::category(bits, val))
        }
    }
}

fn parse_source(
    section_name: &str,
    name: &str,
    section: &Properties,
) -> Result<SourceSettings, ConfigFileError> {
    let product = section
        .get("product")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigFileError::missing(section_name, "product"))?;

    let measurements = section
        .get("measurements")
        .map(parse_list)
        .unwrap_or_default();
    if measurements.is_empty() {
        return Err(ConfigFileError::missing(section_name, "measurements"));
    }

    let nodata = section
        .get("nodata")
        .map(|v| parse_value(section_name, "nodata", v, "must be a number"))
        .transpose()?;

    Ok(SourceSettings {
        name: name.to_string(),
        product,
        measurements,
        nodata,
    })
}

fn parse_mask(
    section_name: &str,
    source: &str,
    entry: &str,
    section: &Properties,
) -> Result<MaskSettings, ConfigFileError> {
    let required = |key: &str| {
        section
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigFileError::missing(section_name, key))
    };

    let nodata = section
        .get("nodata")
        .map(|v| {
            parse_integer(v).ok_or_else(|| {
                ConfigFileError::invalid(section_name, "nodata", v, "must be an unsigned integer")
            })
        })
        .transpose()?;

    let mut flags = BTreeMap::new();
    for item in section.get("flags").map(parse_list).unwrap_or_default() {
        let (flag, requirement) = item.split_once(':').unwrap_or((item.as_str(), "true"));
        let requirement: FlagRequirement = requirement
            .parse()
            .map_err(|e: crate::mask::MaskError| {
                ConfigFileError::invalid(section_name, "flags", &item, e.to_string())
            })?;
        flags.insert(flag.trim().to_string(), requirement);
    }

    Ok(MaskSettings {
        source: source.to_string(),
        name: entry.to_string(),
        product: required("product")?,
        measurement: required("measurement")?,
        vocabulary: required("vocabulary")?,
        nodata,
        flags,
    })
}

fn parse_statistic(
    section_name: &str,
    name: &str,
    section: &Properties,
) -> Result<StatisticSettings, ConfigFileError> {
    let reducer = section
        .get("reducer")
        .ok_or_else(|| ConfigFileError::missing(section_name, "reducer"))?;

    let mut statistic = StatisticSettings {
        name: name.to_string(),
        reducer: parse_with(section_name, "reducer", reducer)?,
        dtype: crate::statistic::OutputDtype::Int16,
        nodata: super::defaults::DEFAULT_NODATA,
        compression: crate::output::Compression::default(),
        checksum: true,
        path_template: super::defaults::DEFAULT_PATH_TEMPLATE.to_string(),
        median: Default::default(),
        distance: Default::default(),
    };

    if let Some(v) = section.get("dtype") {
        statistic.dtype = parse_with(section_name, "dtype", v)?;
    }
    if let Some(v) = section.get("nodata") {
        statistic.nodata = match v.trim().to_lowercase().as_str() {
            "nan" => f64::NAN,
            _ => parse_value(section_name, "nodata", v, "must be a number or nan")?,
        };
    }
    if let Some(v) = section.get("compression") {
        statistic.compression = parse_with(section_name, "compression", v)?;
    }
    if let Some(v) = section.get("checksum") {
        statistic.checksum = parse_bool(v);
    }
    if let Some(v) = section.get("path_template") {
        statistic.path_template = v.trim().to_string();
    }
    if let Some(v) = section.get("median") {
        statistic.median = parse_with(section_name, "median", v)?;
    }
    if let Some(v) = section.get("distance") {
        statistic.distance = parse_with(section_name, "distance", v)?;
    }
    Ok(statistic)
}

/// `x:y, x:y, ...`
fn parse_tiles(value: &str) -> Result<Vec<TileIndex>, ConfigFileError> {
    parse_list(value)
        .iter()
        .map(|item| {
            item.split_once(':')
                .and_then(|(x, y)| Some(TileIndex::new(x.trim().parse().ok()?, y.trim().parse().ok()?)))
                .ok_or_else(|| {
                    ConfigFileError::invalid("region", "tiles", value, "expected x:y pairs, e.g. 3:-5, 4:-5")
                })
        })
        .collect()
}

fn parse_bbox(section: &Properties) -> Result<Option<BoundingBox>, ConfigFileError> {
    let keys = ["min_x", "min_y", "max_x", "max_y"];
    let present = keys.iter().filter(|k| section.contains_key(**k)).count();
    if present == 0 {
        return Ok(None);
    }
    if present != keys.len() {
        let missing = keys.iter().find(|k| !section.contains_key(**k)).copied().unwrap_or("min_x");
        return Err(ConfigFileError::missing("region", missing));
    }

    let mut values = [0.0; 4];
    for (slot, key) in values.iter_mut().zip(keys) {
        let v = section.get(key).unwrap_or_default();
        *slot = parse_value("region", key, v, "must be a number")?;
    }
    let [min_x, min_y, max_x, max_y] = values;
    if min_x >= max_x || min_y >= max_y {
        return Err(ConfigFileError::invalid(
            "region",
            "max_x",
            format!("{min_x},{min_y},{max_x},{max_y}"),
            "bounding box must have min < max on both axes",
        ));
    }
    Ok(Some(BoundingBox::new(min_x, min_y, max_x, max_y)))
}

/// `key=value; key=value`
fn parse_attributes(value: &str) -> Result<BTreeMap<String, String>, ConfigFileError> {
    value
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| {
                    ConfigFileError::invalid("output", "attributes", item, "expected key=value")
                })
        })
        .collect()
}

fn parse_value<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigFileError::invalid(section, key, value, reason))
}

/// Parses via `FromStr`, reporting the parser's own message.
fn parse_with<T>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigFileError::invalid(section, key, value, e.to_string()))
}

fn parse_positive(section: &str, key: &str, value: &str) -> Result<usize, ConfigFileError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigFileError::invalid(
            section,
            key,
            value,
            "must be a positive integer",
        )),
    }
}

/// Decimal or `0x` hexadecimal.
fn parse_integer(value: &str) -> Option<u64> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Comma-separated list with empty items dropped.
pub(super) fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse a boolean value from a config string.
/// Accepts: true/false, yes/no, 1/0, on/off (case-insensitive)
pub(super) fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "true" || v == "1" || v == "yes" || v == "on"
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Compression;
    use crate::statistic::{DistanceMetric, OutputDtype, Reducer};
    use crate::window::Period;

    const FULL: &str = r#"
[grid]
crs = EPSG:3577
origin_x = 0
origin_y = 0
tile_size_x = 100000
tile_size_y = 100000
resolution_x = 25
resolution_y = -25
chunk_y = 500
chunk_x = 400

[region]
tiles = 15:-40, 16:-40

[time]
start_date = 2015-01-01
end_date = 2016-01-01
duration = 3m
step = 3m

[flags.pq]
contiguous = 8
cloud_acca = 10
cloud_fmask = 11
water = 0x3000/0x1000

[source.ls8]
product = ls8_nbar_albers
measurements = red, green, blue
nodata = -999

[mask.ls8.pq]
product = ls8_pq_albers
measurement = pixelquality
vocabulary = pq
flags = contiguous:true, cloud_acca:false, cloud_fmask:false

[statistic.medoid]
reducer = medoid
dtype = int16
nodata = -999
compression = deflate:9
distance = manhattan

[statistic.count]
reducer = count
dtype = uint16
nodata = 0
checksum = false
path_template = {x}_{y}/{statistic}_{start:%Y}.tsc

[output]
location = /data/composites
skip_existing = true
attributes = title=Quarterly composites; institution=Example Agency

[execution]
max_in_flight = 4
task_timeout_secs = 600
write_retries = 5
retry_base_delay_ms = 50
"#;

    #[test]
    fn test_full_config() {
        let config = ConfigFile::from_ini_str(FULL).unwrap();

        assert_eq!(config.grid.chunk_y, 500);
        assert_eq!(config.grid.resolution_y, -25.0);
        assert_eq!(
            config.region.tiles,
            vec![TileIndex::new(15, -40), TileIndex::new(16, -40)]
        );
        assert_eq!(config.time.duration, Period::Months(3));
        assert_eq!(
            config.time.end_date,
            Some(parse_date("2016-01-01").unwrap())
        );

        let pq = &config.flags["pq"];
        assert_eq!(pq["contiguous"], FlagDefinition::bit(8));
        assert_eq!(pq["cloud_fmask"], FlagDefinition::bit(11));
        assert_eq!(pq["water"], FlagDefinition::category(0x3000, 0x1000));

        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].measurements, vec!["red", "green", "blue"]);
        assert_eq!(config.sources[0].nodata, Some(-999.0));

        let mask = &config.masks[0];
        assert_eq!(mask.source, "ls8");
        assert_eq!(mask.name, "pq");
        assert_eq!(mask.flags["cloud_acca"], FlagRequirement::RequireFalse);

        let names: Vec<_> = config.statistics.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["medoid", "count"]);
        assert_eq!(config.statistics[0].reducer, Reducer::Medoid);
        assert_eq!(config.statistics[0].distance, DistanceMetric::Manhattan);
        assert_eq!(
            config.statistics[0].compression,
            Compression::Deflate { level: 9 }
        );
        assert_eq!(config.statistics[1].dtype, OutputDtype::UInt16);
        assert!(!config.statistics[1].checksum);

        assert!(config.output.skip_existing);
        assert_eq!(config.output.attributes["institution"], "Example Agency");
        assert_eq!(config.execution.max_in_flight, 4);
        assert_eq!(config.execution.write_retries, 5);
    }

    #[test]
    fn test_flag_bit_out_of_range() {
        let err = ConfigFile::from_ini_str("[flags.pq]\ncloud = 64\n").unwrap_err();
        assert!(err.to_string().contains("flags.pq.cloud"));
    }

    #[test]
    fn test_category_value_outside_bits() {
        assert!(ConfigFile::from_ini_str("[flags.pq]\nwater = 0x3/0x4\n").is_err());
    }

    #[test]
    fn test_invalid_period() {
        let err = ConfigFile::from_ini_str("[time]\nstep = 3 fortnights\n").unwrap_err();
        assert!(err.to_string().contains("time.step"));
    }

    #[test]
    fn test_invalid_reducer() {
        let err =
            ConfigFile::from_ini_str("[statistic.mode]\nreducer = mode\n").unwrap_err();
        assert!(err.to_string().contains("statistic.mode.reducer"));
    }

    #[test]
    fn test_source_requires_measurements() {
        let err = ConfigFile::from_ini_str("[source.ls8]\nproduct = ls8\n").unwrap_err();
        assert!(matches!(err, ConfigFileError::Missing { .. }));
    }

    #[test]
    fn test_bad_tile_list() {
        assert!(ConfigFile::from_ini_str("[region]\ntiles = 3,-5\n").is_err());
    }

    #[test]
    fn test_partial_bbox() {
        let err = ConfigFile::from_ini_str("[region]\nmin_x = 0\nmin_y = 0\n").unwrap_err();
        assert!(matches!(err, ConfigFileError::Missing { .. }));
    }

    #[test]
    fn test_bbox_region() {
        let config =
            ConfigFile::from_ini_str("[region]\nmin_x = 0\nmin_y = -10\nmax_x = 10\nmax_y = 0\n")
                .unwrap();
        assert_eq!(config.region.bbox, Some(BoundingBox::new(0.0, -10.0, 10.0, 0.0)));
        assert!(config.region.tiles.is_empty());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(ConfigFile::from_ini_str("[execution]\nmax_in_flight = 0\n").is_err());
    }

    #[test]
    fn test_nan_nodata() {
        let config = ConfigFile::from_ini_str(
            "[statistic.mean]\nreducer = mean\ndtype = float32\nnodata = nan\n",
        )
        .unwrap();
        assert!(config.statistics[0].nodata.is_nan());
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/path");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(path, home.join("test/path"));
        }

        // Non-tilde paths should be unchanged
        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("yes"));
        assert!(parse_bool("On"));
        assert!(!parse_bool("nope"));
    }
}
