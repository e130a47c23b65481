//! `tilestack inspect`: read, verify and describe an artifact.

use std::path::Path;
use tilestack::output::read_artifact;

use crate::error::CliError;

/// Run the inspect command.
///
/// Reading decodes every chunk and verifies stored checksums, so a clean
/// exit means the artifact is intact.
pub fn run(path: &Path) -> Result<(), CliError> {
    let artifact = read_artifact(path)?;
    let header = &artifact.header;

    println!("Artifact:     {}", path.display());
    println!("Format:       v{}", header.format_version);
    println!("Statistic:    {} ({})", header.statistic, header.reducer);
    println!("Tile:         {}", header.tile);
    println!(
        "Window:       [{}, {})",
        header.window_start.format("%Y-%m-%d"),
        header.window_end.format("%Y-%m-%d")
    );
    println!(
        "CRS:          {} ({}, {})",
        header.crs, header.spatial_dimensions[0], header.spatial_dimensions[1]
    );
    println!(
        "Shape:        {} x {} ({}, {}), chunks {} x {}",
        header.shape[0],
        header.shape[1],
        header.axis_order[0],
        header.axis_order[1],
        header.chunk_shape[0],
        header.chunk_shape[1]
    );
    println!("Observations: {}", header.observations.len());
    for (key, value) in &header.attributes {
        println!("  {} = {}", key, value);
    }

    println!();
    println!("Variables");
    for variable in &header.variables {
        let Some(values) = artifact.variable(&variable.name) else {
            continue;
        };
        let nodata = variable.nodata_value();
        let present: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| !(v.is_nan() || *v == nodata))
            .collect();
        let (min, max) = present
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        print!(
            "  {:<12}  {:<8}  nodata {:<8}  {}  {} chunk(s), {}/{} valid",
            variable.name,
            variable.dtype,
            nodata,
            variable.compression,
            variable.chunks.len(),
            present.len(),
            values.len()
        );
        if present.is_empty() {
            println!();
        } else {
            println!("  range [{}, {}]", min, max);
        }
    }

    let verified = header
        .variables
        .iter()
        .flat_map(|v| v.chunks.iter())
        .filter(|c| c.sha256.is_some())
        .count();
    println!();
    println!("Checksums:    {} chunk(s) verified", verified);

    Ok(())
}
