//! Output data types.
//!
//! Reducers work in `f64`; [`OutputDtype::cast`] maps a result onto the
//! configured storage type by rounding (integers) and clipping to the
//! type's range, and [`OutputDtype::write_le`] encodes it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage type of an output band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDtype {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl OutputDtype {
    /// Inclusive range of representable values.
    pub fn range(&self) -> (f64, f64) {
        match self {
            OutputDtype::Int8 => (i8::MIN as f64, i8::MAX as f64),
            OutputDtype::UInt8 => (0.0, u8::MAX as f64),
            OutputDtype::Int16 => (i16::MIN as f64, i16::MAX as f64),
            OutputDtype::UInt16 => (0.0, u16::MAX as f64),
            OutputDtype::Int32 => (i32::MIN as f64, i32::MAX as f64),
            OutputDtype::UInt32 => (0.0, u32::MAX as f64),
            OutputDtype::Float32 => (f32::MIN as f64, f32::MAX as f64),
            OutputDtype::Float64 => (f64::MIN, f64::MAX),
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, OutputDtype::Float32 | OutputDtype::Float64)
    }

    /// Bytes per element.
    pub fn size(&self) -> usize {
        match self {
            OutputDtype::Int8 | OutputDtype::UInt8 => 1,
            OutputDtype::Int16 | OutputDtype::UInt16 => 2,
            OutputDtype::Int32 | OutputDtype::UInt32 | OutputDtype::Float32 => 4,
            OutputDtype::Float64 => 8,
        }
    }

    /// Rounds (for integer types) and clips `value` into this type.
    #[inline]
    pub fn cast(&self, value: f64) -> f64 {
        let (min, max) = self.range();
        match self {
            OutputDtype::Float64 => value,
            OutputDtype::Float32 => value.clamp(min, max) as f32 as f64,
            _ => value.round().clamp(min, max),
        }
    }

    /// Whether `value` survives [`cast`](Self::cast) unchanged.
    pub fn can_represent(&self, value: f64) -> bool {
        if value.is_nan() {
            return !self.is_integer();
        }
        self.cast(value) == value
    }

    /// Appends `value`, already cast, in little-endian byte order.
    pub fn write_le(&self, value: f64, out: &mut Vec<u8>) {
        match self {
            OutputDtype::Int8 => out.extend_from_slice(&(value as i8).to_le_bytes()),
            OutputDtype::UInt8 => out.extend_from_slice(&(value as u8).to_le_bytes()),
            OutputDtype::Int16 => out.extend_from_slice(&(value as i16).to_le_bytes()),
            OutputDtype::UInt16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
            OutputDtype::Int32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
            OutputDtype::UInt32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
            OutputDtype::Float32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
            OutputDtype::Float64 => out.extend_from_slice(&value.to_le_bytes()),
        }
    }

    /// Decodes one element; `bytes` must hold exactly [`size`](Self::size) bytes.
    pub fn read_le(&self, bytes: &[u8]) -> Option<f64> {
        Some(match self {
            OutputDtype::Int8 => i8::from_le_bytes(bytes.try_into().ok()?) as f64,
            OutputDtype::UInt8 => u8::from_le_bytes(bytes.try_into().ok()?) as f64,
            OutputDtype::Int16 => i16::from_le_bytes(bytes.try_into().ok()?) as f64,
            OutputDtype::UInt16 => u16::from_le_bytes(bytes.try_into().ok()?) as f64,
            OutputDtype::Int32 => i32::from_le_bytes(bytes.try_into().ok()?) as f64,
            OutputDtype::UInt32 => u32::from_le_bytes(bytes.try_into().ok()?) as f64,
            OutputDtype::Float32 => f32::from_le_bytes(bytes.try_into().ok()?) as f64,
            OutputDtype::Float64 => f64::from_le_bytes(bytes.try_into().ok()?),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputDtype::Int8 => "int8",
            OutputDtype::UInt8 => "uint8",
            OutputDtype::Int16 => "int16",
            OutputDtype::UInt16 => "uint16",
            OutputDtype::Int32 => "int32",
            OutputDtype::UInt32 => "uint32",
            OutputDtype::Float32 => "float32",
            OutputDtype::Float64 => "float64",
        }
    }
}

impl FromStr for OutputDtype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "int8" => Ok(OutputDtype::Int8),
            "uint8" => Ok(OutputDtype::UInt8),
            "int16" => Ok(OutputDtype::Int16),
            "uint16" => Ok(OutputDtype::UInt16),
            "int32" => Ok(OutputDtype::Int32),
            "uint32" => Ok(OutputDtype::UInt32),
            "float32" => Ok(OutputDtype::Float32),
            "float64" => Ok(OutputDtype::Float64),
            other => Err(format!("unknown dtype '{}'", other)),
        }
    }
}

impl fmt::Display for OutputDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
