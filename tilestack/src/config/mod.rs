//! Run configuration.
//!
//! A run is described by one INI file. Loading happens in two stages:
//!
//! - [`ConfigFile::load_from`] parses every section into typed settings
//! - [`ConfigFile::validate`] checks cross-section constraints and
//!   produces a [`ValidatedConfig`] holding the grid, masks, statistics,
//!   writer and the complete task plan
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use tilestack::config::ConfigFile;
//!
//! let config = ConfigFile::load_from(Path::new("composite.ini"))?.validate()?;
//! println!("{} tasks", config.plan.len());
//! # Ok::<(), tilestack::config::ConfigFileError>(())
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod validate;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use defaults::*;
pub use settings::*;
pub use validate::ValidatedConfig;
