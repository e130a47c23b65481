//! tilestack - tiled, time-windowed statistical compositing
//!
//! This library reduces stacks of co-registered raster observations into
//! per-tile, per-window summary products (mean, median, medoid and friends)
//! and writes them as chunked, self-describing artifacts.
//!
//! # Pipeline
//!
//! - [`grid`] partitions space into tiles with a fixed pixel grid
//! - [`window`] partitions time into half-open windows
//! - [`mask`] turns quality bitfields into validity masks
//! - [`stack`] gathers masked observations of one tile and window
//! - [`statistic`] reduces a stack into per-pixel results
//! - [`output`] writes results atomically and reads them back
//! - [`orchestrator`] runs every tile/window task with bounded parallelism
//!
//! ```ignore
//! use tilestack::config::ConfigFile;
//!
//! let config = ConfigFile::load_from(path)?.validate()?;
//! let orchestrator = config.orchestrator(catalog);
//! let summary = orchestrator.run(&config.plan, CancellationToken::new()).await;
//! ```

pub mod config;
pub mod grid;
pub mod logging;
pub mod mask;
pub mod orchestrator;
pub mod output;
pub mod stack;
pub mod statistic;
pub mod window;

/// Version of the tilestack library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
