//! `tilestack plan`: validate a configuration and summarize its task plan.

use std::path::PathBuf;
use tilestack::config::{config_file_path, ConfigFile};
use tilestack::logging::init_logging;
use tilestack::output::is_complete;
use tracing::info;

use crate::error::CliError;

/// Run the plan command.
pub fn run(config: Option<PathBuf>, list_paths: bool) -> Result<(), CliError> {
    let path = config.unwrap_or_else(config_file_path);
    let file = ConfigFile::load_from(&path)?;

    let _guard = init_logging(&file.logging.directory, &file.logging.file)
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    let config = file.validate()?;
    let plan = &config.plan;
    let existing = plan
        .tasks()
        .iter()
        .flat_map(|t| t.paths.iter())
        .filter(|p| is_complete(p))
        .count();

    info!(
        config = %path.display(),
        tasks = plan.len(),
        artifacts = plan.artifact_count(),
        existing,
        "Configuration valid"
    );

    let (rows, cols) = config.grid.pixel_shape();
    println!("Configuration: {}", path.display());
    println!();
    println!("Grid");
    println!("  CRS:          {}", config.grid.crs());
    println!("  Tile pixels:  {} x {}", rows, cols);
    println!("  Tiles:        {}", config.tiles.len());
    println!();
    println!("Time");
    println!("  Range:        {}", config.windows.range());
    println!(
        "  Windows:      {} (duration {}, step {})",
        config.windows.windows().count(),
        config.windows.duration,
        config.windows.step
    );
    println!();
    println!("Sources");
    for source in &config.sources {
        println!(
            "  {:<12}  {} [{}] masks: {}",
            source.name,
            source.product,
            config.measurements.join(", "),
            source.masks.len()
        );
    }
    println!();
    println!("Statistics");
    for output in &config.statistics {
        let statistic = &output.statistic;
        println!(
            "  {:<12}  {} as {} (nodata {}), {}, {}",
            statistic.name,
            statistic.reducer,
            statistic.dtype,
            statistic.nodata,
            output.artifact.compression,
            output.artifact.template
        );
    }
    println!();
    println!("Plan");
    println!("  Output:       {}", config.writer.location().display());
    println!("  Tasks:        {}", plan.len());
    println!(
        "  Artifacts:    {} ({} already complete)",
        plan.artifact_count(),
        existing
    );
    println!("  In flight:    {}", config.limits.max_in_flight);
    match config.limits.task_timeout {
        Some(timeout) => println!("  Timeout:      {}s", timeout.as_secs()),
        None => println!("  Timeout:      none"),
    }

    if list_paths {
        println!();
        for planned in plan.tasks() {
            println!("{}", planned.task);
            for path in &planned.paths {
                let marker = if is_complete(path) { "done" } else { "todo" };
                println!("  [{}] {}", marker, path.display());
            }
        }
    }

    Ok(())
}
