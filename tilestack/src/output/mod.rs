//! Output artifacts.
//!
//! [`OutputWriter`] persists one [`StatisticResult`] per tile, window and
//! statistic as a self-describing `.tsc` file at a path rendered from a
//! [`PathTemplate`]. Files are written to a temporary sibling, synced and
//! renamed into place, so a reader never observes a partial artifact and a
//! rerun either overwrites atomically or skips a complete one.

mod container;
mod template;

pub use container::{
    ArtifactHeader, ChunkRecord, Compression, ContainerError, VariableHeader, AXIS_ORDER,
    FORMAT_VERSION, MAGIC,
};
pub use template::{PathTemplate, TemplateContext, TemplateError};

use crate::grid::{SpatialGrid, TileGeometry, TileIndex};
use crate::statistic::{OutputDtype, StatisticResult};
use crate::window::TimeWindow;
use container::VariableData;
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the medoid provenance variable.
pub const PROVENANCE_VARIABLE: &str = "provenance";

/// Nodata sentinel of the provenance variable.
pub const PROVENANCE_NODATA: f64 = -1.0;

/// Errors writing an artifact.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Band '{band}' has shape {actual:?}, tile expects {expected:?}")]
    ShapeMismatch {
        band: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Failed to encode artifact {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: ContainerError,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path} after {attempts} attempt(s): {source}")]
    Io {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// Error reading an artifact back.
#[derive(Debug, Error)]
#[error("Failed to read artifact {path}: {source}")]
pub struct ReadError {
    pub path: PathBuf,
    #[source]
    pub source: ContainerError,
}

/// Per-statistic output settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSpec {
    pub template: PathTemplate,
    pub compression: Compression,
    pub checksum: bool,
}

impl ArtifactSpec {
    pub fn new(template: PathTemplate) -> Self {
        Self {
            template,
            compression: Compression::default(),
            checksum: true,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_checksum(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }
}

/// Retry behaviour for transient write failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }
}

/// I/O failures worth another attempt.
pub fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Writes statistic results below an output location.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    location: PathBuf,
    crs: String,
    spatial_dimensions: [String; 2],
    chunk_shape: (usize, usize),
    attributes: BTreeMap<String, String>,
    retry: RetryPolicy,
}

impl OutputWriter {
    /// A writer for tiles of `grid`; one chunk per tile until
    /// [`with_chunk_shape`](Self::with_chunk_shape) says otherwise.
    pub fn new(location: impl Into<PathBuf>, grid: &SpatialGrid) -> Self {
        let (x_dim, y_dim) = grid.spatial_dimensions();
        Self {
            location: location.into(),
            crs: grid.crs().to_string(),
            spatial_dimensions: [x_dim.to_string(), y_dim.to_string()],
            chunk_shape: grid.pixel_shape(),
            attributes: BTreeMap::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Chunk shape as `(y, x)`.
    pub fn with_chunk_shape(mut self, chunk_shape: (usize, usize)) -> Self {
        self.chunk_shape = (chunk_shape.0.max(1), chunk_shape.1.max(1));
        self
    }

    /// Global attributes copied into every artifact header.
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Absolute destination of one artifact.
    pub fn path_for(
        &self,
        spec: &ArtifactSpec,
        tile: TileIndex,
        window: &TimeWindow,
        statistic: &str,
    ) -> PathBuf {
        self.location.join(spec.template.render(&TemplateContext {
            tile,
            window,
            statistic,
        }))
    }

    /// Encodes `result` and atomically writes it to its rendered path.
    pub fn write(
        &self,
        result: &StatisticResult,
        geometry: &TileGeometry,
        window: &TimeWindow,
        spec: &ArtifactSpec,
    ) -> Result<PathBuf, WriteError> {
        let path = self.path_for(spec, geometry.tile, window, &result.name);

        for band in &result.bands {
            if band.data.dim() != geometry.shape {
                return Err(WriteError::ShapeMismatch {
                    band: band.name.clone(),
                    expected: geometry.shape,
                    actual: band.data.dim(),
                });
            }
        }

        let provenance = result.provenance.as_ref().map(|p| p.mapv(|t| t as f64));
        let mut variables: Vec<VariableData<'_>> = result
            .bands
            .iter()
            .map(|band| VariableData {
                name: &band.name,
                dtype: result.dtype,
                nodata: result.nodata,
                values: &band.data,
            })
            .collect();
        if let Some(values) = &provenance {
            variables.push(VariableData {
                name: PROVENANCE_VARIABLE,
                dtype: OutputDtype::Int32,
                nodata: PROVENANCE_NODATA,
                values,
            });
        }

        let encode_err = |source| WriteError::Encode {
            path: path.clone(),
            source,
        };
        let mut payload = Vec::new();
        let variables = container::encode_variables(
            &variables,
            self.chunk_shape,
            spec.compression,
            spec.checksum,
            &mut payload,
        )
        .map_err(encode_err)?;

        let header = ArtifactHeader {
            format_version: FORMAT_VERSION,
            statistic: result.name.clone(),
            reducer: result.reducer,
            tile: geometry.tile,
            window_start: window.start,
            window_end: window.end,
            crs: self.crs.clone(),
            spatial_dimensions: self.spatial_dimensions.clone(),
            axis_order: AXIS_ORDER.map(String::from),
            shape: [geometry.shape.0, geometry.shape.1],
            chunk_shape: [self.chunk_shape.0, self.chunk_shape.1],
            x: geometry.xs.clone(),
            y: geometry.ys.clone(),
            attributes: self.attributes.clone(),
            observations: result.observations.clone(),
            variables,
        };
        let bytes = container::encode(&header, &payload).map_err(encode_err)?;

        self.write_with_retry(&path, &bytes)?;
        debug!(
            path = %path.display(),
            bytes = bytes.len(),
            statistic = %result.name,
            "Artifact written"
        );
        Ok(path)
    }

    fn write_with_retry(&self, path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
        self.retry_write(path, || write_atomic(path, bytes))
    }

    /// Runs `write` until it succeeds, fails permanently or runs out of
    /// retries.
    fn retry_write(
        &self,
        path: &Path,
        mut write: impl FnMut() -> Result<(), AtomicWriteError>,
    ) -> Result<(), WriteError> {
        let max_retries = self.retry.max_retries;
        for attempt in 0..=max_retries {
            match write() {
                Ok(()) => return Ok(()),
                Err(AtomicWriteError::CreateDir(source)) => {
                    return Err(WriteError::CreateDir {
                        path: path.parent().unwrap_or(path).to_path_buf(),
                        source,
                    });
                }
                Err(AtomicWriteError::Io(e)) if attempt < max_retries && is_transient(&e) => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        path = %path.display(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient write failure, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(AtomicWriteError::Io(source)) => {
                    return Err(WriteError::Io {
                        path: path.to_path_buf(),
                        attempts: attempt + 1,
                        source,
                    });
                }
            }
        }
        // The final iteration always returns.
        Ok(())
    }
}

enum AtomicWriteError {
    CreateDir(io::Error),
    Io(io::Error),
}

/// Writes `bytes` to a temporary file next to `path`, syncs it, then
/// renames it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AtomicWriteError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(AtomicWriteError::CreateDir)?;

    let mut temp = NamedTempFile::new_in(dir).map_err(AtomicWriteError::Io)?;
    temp.write_all(bytes).map_err(AtomicWriteError::Io)?;
    temp.as_file().sync_all().map_err(AtomicWriteError::Io)?;
    temp.persist(path)
        .map_err(|e| AtomicWriteError::Io(e.error))?;
    Ok(())
}

/// A decoded, verified artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub header: ArtifactHeader,
    pub variables: Vec<(String, Array2<f64>)>,
}

impl Artifact {
    pub fn variable(&self, name: &str) -> Option<&Array2<f64>> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data)
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ReadError> {
    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|mut file| file.read_to_end(&mut bytes))
        .map_err(|e| ReadError {
            path: path.to_path_buf(),
            source: ContainerError::Io(e),
        })?;
    Ok(bytes)
}

/// Reads an artifact, verifying checksums and decoding every variable.
pub fn read_artifact(path: &Path) -> Result<Artifact, ReadError> {
    let bytes = read_bytes(path)?;
    let wrap = |source| ReadError {
        path: path.to_path_buf(),
        source,
    };

    let (header, payload_start) = container::decode_header(&bytes).map_err(wrap)?;
    let payload = &bytes[payload_start..];
    let variables = header
        .variables
        .iter()
        .map(|v| {
            container::decode_variable(&header, v, payload).map(|data| (v.name.clone(), data))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(wrap)?;

    Ok(Artifact { header, variables })
}

/// Reads only the header of an artifact.
pub fn read_header(path: &Path) -> Result<ArtifactHeader, ReadError> {
    let bytes = read_bytes(path)?;
    container::decode_header(&bytes)
        .map(|(header, _)| header)
        .map_err(|source| ReadError {
            path: path.to_path_buf(),
            source,
        })
}

/// Whether `path` holds an artifact with a readable header and every chunk
/// it lists present.
pub fn is_complete(path: &Path) -> bool {
    let Ok(bytes) = fs::read(path) else {
        return false;
    };
    match container::decode_header(&bytes) {
        Ok((header, payload_start)) => {
            (bytes.len() - payload_start) as u64 >= header.payload_len()
        }
        Err(_) => false,
    }
}
