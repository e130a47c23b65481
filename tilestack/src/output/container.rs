//! The `.tsc` composite container.
//!
//! Layout:
//!
//! ```text
//! +-------+-------------------+-------------+----------------------+
//! | magic | header length u64 | JSON header | chunk payloads ...   |
//! | 4 B   | little endian     |             | offsets relative to  |
//! |       |                   |             | the end of the header|
//! +-------+-------------------+-------------+----------------------+
//! ```
//!
//! Every variable is a 2D array stored in `(y, x)` order, split into
//! row-major chunks of the configured chunk shape (edge chunks are
//! truncated, not padded). Each chunk holds little-endian elements of the
//! variable's dtype, optionally deflate-compressed, optionally checksummed
//! with SHA-256.

use crate::grid::TileIndex;
use crate::statistic::{OutputDtype, Reducer};
use chrono::{DateTime, Utc};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"TSC\x01";
pub const FORMAT_VERSION: u32 = 1;

/// Fixed axis order of every stored variable.
pub const AXIS_ORDER: [&str; 2] = ["y", "x"];

/// Errors decoding a container.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Not a tilestack composite (bad magic)")]
    BadMagic,

    #[error("Truncated container: {0}")]
    Truncated(String),

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("Checksum mismatch in variable '{variable}' chunk {chunk}")]
    ChecksumMismatch { variable: String, chunk: usize },

    #[error("Corrupt chunk {chunk} of variable '{variable}': {reason}")]
    CorruptChunk {
        variable: String,
        chunk: usize,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunk compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "lowercase")]
pub enum Compression {
    None,
    Deflate { level: u32 },
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Deflate { level: 6 }
    }
}

impl FromStr for Compression {
    type Err = String;

    /// Accepts `none`, `deflate` (level 6) or `deflate:<0-9>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.split_once(':') {
            None if s == "none" => Ok(Compression::None),
            None if s == "deflate" => Ok(Compression::default()),
            Some(("deflate", level)) => match level.trim().parse::<u32>() {
                Ok(level) if level <= 9 => Ok(Compression::Deflate { level }),
                _ => Err(format!("deflate level must be 0-9, got '{}'", level)),
            },
            _ => Err(format!("unknown compression '{}' (expected none or deflate)", s)),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => f.write_str("none"),
            Compression::Deflate { level } => write!(f, "deflate:{}", level),
        }
    }
}

/// Location of one stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub offset: u64,
    pub length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// One stored 2D array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableHeader {
    pub name: String,
    pub dtype: OutputDtype,
    /// `None` stands for a NaN sentinel, which JSON cannot carry.
    pub nodata: Option<f64>,
    pub compression: Compression,
    pub chunks: Vec<ChunkRecord>,
}

impl VariableHeader {
    pub fn nodata_value(&self) -> f64 {
        self.nodata.unwrap_or(f64::NAN)
    }
}

/// Self-describing artifact header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub format_version: u32,
    pub statistic: String,
    pub reducer: Reducer,
    pub tile: TileIndex,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub crs: String,
    /// Names of the (x, y) spatial dimensions in the CRS.
    pub spatial_dimensions: [String; 2],
    pub axis_order: [String; 2],
    /// `(rows, cols)`
    pub shape: [usize; 2],
    pub chunk_shape: [usize; 2],
    /// Pixel-centre coordinates along x, one per column
    pub x: Vec<f64>,
    /// Pixel-centre coordinates along y, one per row
    pub y: Vec<f64>,
    pub attributes: BTreeMap<String, String>,
    /// Ids of contributing observations, indexed by provenance value.
    pub observations: Vec<String>,
    pub variables: Vec<VariableHeader>,
}

impl ArtifactHeader {
    pub fn variable(&self, name: &str) -> Option<&VariableHeader> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// End of the payload section, relative to the end of the header.
    pub fn payload_len(&self) -> u64 {
        self.variables
            .iter()
            .flat_map(|v| v.chunks.iter())
            .map(|c| c.offset + c.length)
            .max()
            .unwrap_or(0)
    }
}

/// A variable ready to be encoded.
pub struct VariableData<'a> {
    pub name: &'a str,
    pub dtype: OutputDtype,
    pub nodata: f64,
    pub values: &'a Array2<f64>,
}

/// Row-major chunk windows `(row range, col range)` of a `shape` array.
pub fn chunk_windows(
    shape: (usize, usize),
    chunk: (usize, usize),
) -> Vec<(std::ops::Range<usize>, std::ops::Range<usize>)> {
    let (rows, cols) = shape;
    let (cy, cx) = (chunk.0.max(1), chunk.1.max(1));
    let mut windows = Vec::new();
    for r in (0..rows).step_by(cy) {
        for c in (0..cols).step_by(cx) {
            windows.push((r..(r + cy).min(rows), c..(c + cx).min(cols)));
        }
    }
    windows
}

/// Encodes every variable into `payload` and fills in its header record.
pub fn encode_variables(
    variables: &[VariableData<'_>],
    chunk: (usize, usize),
    compression: Compression,
    checksum: bool,
    payload: &mut Vec<u8>,
) -> Result<Vec<VariableHeader>, ContainerError> {
    let mut headers = Vec::with_capacity(variables.len());
    let mut raw = Vec::new();

    for variable in variables {
        let mut chunks = Vec::new();
        for (rows, cols) in chunk_windows(variable.values.dim(), chunk) {
            raw.clear();
            for &value in variable.values.slice(s![rows, cols]).iter() {
                variable.dtype.write_le(value, &mut raw);
            }

            let stored = match compression {
                Compression::None => raw.clone(),
                Compression::Deflate { level } => {
                    let mut encoder =
                        DeflateEncoder::new(Vec::new(), flate2::Compression::new(level));
                    encoder.write_all(&raw)?;
                    encoder.finish()?
                }
            };

            chunks.push(ChunkRecord {
                offset: payload.len() as u64,
                length: stored.len() as u64,
                sha256: checksum.then(|| sha256_hex(&stored)),
            });
            payload.extend_from_slice(&stored);
        }

        headers.push(VariableHeader {
            name: variable.name.to_string(),
            dtype: variable.dtype,
            nodata: (!variable.nodata.is_nan()).then_some(variable.nodata),
            compression,
            chunks,
        });
    }
    Ok(headers)
}

/// Serialises a complete container.
pub fn encode(header: &ArtifactHeader, payload: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let json = serde_json::to_vec(header)?;
    let mut out = Vec::with_capacity(MAGIC.len() + 8 + json.len() + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(json.len() as u64).to_le_bytes());
    out.extend_from_slice(&json);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Parses the header; returns it with the offset where payloads begin.
pub fn decode_header(bytes: &[u8]) -> Result<(ArtifactHeader, usize), ContainerError> {
    let prefix = MAGIC.len() + 8;
    if bytes.len() < prefix {
        return Err(ContainerError::Truncated("missing preamble".to_string()));
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(ContainerError::BadMagic);
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[MAGIC.len()..prefix]);
    let header_len = usize::try_from(u64::from_le_bytes(len))
        .map_err(|_| ContainerError::Truncated("header length overflows".to_string()))?;

    let end = prefix
        .checked_add(header_len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| ContainerError::Truncated("header".to_string()))?;

    let header: ArtifactHeader = serde_json::from_slice(&bytes[prefix..end])?;
    if header.format_version != FORMAT_VERSION {
        return Err(ContainerError::UnsupportedVersion(header.format_version));
    }
    Ok((header, end))
}

/// Decodes and verifies one variable.
pub fn decode_variable(
    header: &ArtifactHeader,
    variable: &VariableHeader,
    payload: &[u8],
) -> Result<Array2<f64>, ContainerError> {
    let shape = (header.shape[0], header.shape[1]);
    let chunk = (header.chunk_shape[0], header.chunk_shape[1]);
    let windows = chunk_windows(shape, chunk);
    let corrupt = |index: usize, reason: String| ContainerError::CorruptChunk {
        variable: variable.name.clone(),
        chunk: index,
        reason,
    };

    if windows.len() != variable.chunks.len() {
        return Err(corrupt(
            0,
            format!(
                "expected {} chunks, header lists {}",
                windows.len(),
                variable.chunks.len()
            ),
        ));
    }

    let size = variable.dtype.size();
    let mut out = Array2::<f64>::zeros(shape);
    let mut raw = Vec::new();

    for (index, ((rows, cols), record)) in windows.into_iter().zip(&variable.chunks).enumerate() {
        let start = usize::try_from(record.offset).map_err(|e| corrupt(index, e.to_string()))?;
        let len = usize::try_from(record.length).map_err(|e| corrupt(index, e.to_string()))?;
        let stored = start
            .checked_add(len)
            .and_then(|end| payload.get(start..end))
            .ok_or_else(|| ContainerError::Truncated(format!("chunk {} of '{}'", index, variable.name)))?;

        if let Some(expected) = &record.sha256 {
            if sha256_hex(stored) != *expected {
                return Err(ContainerError::ChecksumMismatch {
                    variable: variable.name.clone(),
                    chunk: index,
                });
            }
        }

        raw.clear();
        match variable.compression {
            Compression::None => raw.extend_from_slice(stored),
            Compression::Deflate { .. } => {
                DeflateDecoder::new(stored)
                    .read_to_end(&mut raw)
                    .map_err(|e| corrupt(index, e.to_string()))?;
            }
        }

        let expected = rows.len() * cols.len() * size;
        if raw.len() != expected {
            return Err(corrupt(
                index,
                format!("decoded {} bytes, expected {}", raw.len(), expected),
            ));
        }

        let mut target = out.slice_mut(s![rows, cols]);
        for (slot, bytes) in target.iter_mut().zip(raw.chunks_exact(size)) {
            *slot = variable
                .dtype
                .read_le(bytes)
                .ok_or_else(|| corrupt(index, "short element".to_string()))?;
        }
    }
    Ok(out)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
