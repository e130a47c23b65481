//! Pixel quality masking.
//!
//! A quality product stores several boolean (or categorical) flags packed
//! into one integer per pixel. A [`FlagVocabulary`] names those flags, a
//! [`MaskSpec`] states which flags must be set or clear, and compiling the
//! spec against its vocabulary yields a [`CompiledMask`] that can be
//! evaluated cheaply for every observation.
//!
//! Flag names are resolved once, at configuration load time; evaluation
//! never fails.

use ndarray::{Array2, ArrayView2, Zip};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from building or compiling mask specifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaskError {
    /// Spec refers to a flag missing from the vocabulary
    #[error("Unknown flag '{flag}' (vocabulary '{vocabulary}' defines: {known})")]
    UnknownFlag {
        flag: String,
        vocabulary: String,
        known: String,
    },

    /// Flag definition has no bits or a value outside its bits
    #[error("Invalid definition for flag '{flag}': {reason}")]
    InvalidDefinition { flag: String, reason: String },

    /// Requirement string is not true/false/any
    #[error("Invalid flag requirement '{0}' (expected true, false or any)")]
    InvalidRequirement(String),
}

/// What a mask spec demands of one flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagRequirement {
    RequireTrue,
    RequireFalse,
    Unconstrained,
}

impl FromStr for FlagRequirement {
    type Err = MaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(FlagRequirement::RequireTrue),
            "false" | "no" | "0" => Ok(FlagRequirement::RequireFalse),
            "any" | "" => Ok(FlagRequirement::Unconstrained),
            other => Err(MaskError::InvalidRequirement(other.to_string())),
        }
    }
}

impl fmt::Display for FlagRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagRequirement::RequireTrue => f.write_str("true"),
            FlagRequirement::RequireFalse => f.write_str("false"),
            FlagRequirement::Unconstrained => f.write_str("any"),
        }
    }
}

/// Location of one flag inside the packed quality value.
///
/// The flag is true when `raw & bits == value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlagDefinition {
    pub bits: u64,
    pub value: u64,
}

impl FlagDefinition {
    /// A single-bit flag that is true when bit `index` is set.
    pub fn bit(index: u32) -> Self {
        let bits = 1u64 << index;
        Self { bits, value: bits }
    }

    /// A categorical flag occupying `bits` that is true when equal to `value`.
    pub fn category(bits: u64, value: u64) -> Self {
        Self { bits, value }
    }

    #[inline]
    pub fn is_set(&self, raw: u64) -> bool {
        raw & self.bits == self.value
    }
}

/// Named set of flags understood for one quality product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagVocabulary {
    name: String,
    flags: BTreeMap<String, FlagDefinition>,
}

impl FlagVocabulary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a flag definition, rejecting empty masks and values outside the mask.
    pub fn define(
        &mut self,
        flag: impl Into<String>,
        definition: FlagDefinition,
    ) -> Result<(), MaskError> {
        let flag = flag.into();
        if definition.bits == 0 {
            return Err(MaskError::InvalidDefinition {
                flag,
                reason: "bit mask is empty".to_string(),
            });
        }
        if definition.value & !definition.bits != 0 {
            return Err(MaskError::InvalidDefinition {
                flag,
                reason: format!(
                    "value {:#x} has bits outside mask {:#x}",
                    definition.value, definition.bits
                ),
            });
        }
        self.flags.insert(flag, definition);
        Ok(())
    }

    /// Builder form of [`define`](Self::define). Invalid definitions are ignored.
    pub fn with_flag(mut self, flag: impl Into<String>, definition: FlagDefinition) -> Self {
        let _ = self.define(flag, definition);
        self
    }

    pub fn get(&self, flag: &str) -> Option<&FlagDefinition> {
        self.flags.get(flag)
    }

    pub fn flag_names(&self) -> impl Iterator<Item = &str> {
        self.flags.keys().map(String::as_str)
    }
}

/// Requested flag values for one quality product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskSpec {
    requirements: BTreeMap<String, FlagRequirement>,
}

impl MaskSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, flag: impl Into<String>, requirement: FlagRequirement) -> Self {
        self.requirements.insert(flag.into(), requirement);
        self
    }

    pub fn requirements(&self) -> impl Iterator<Item = (&str, FlagRequirement)> {
        self.requirements.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Resolves every flag name against `vocabulary`.
    ///
    /// Unconstrained flags must still be known names but are dropped from
    /// the compiled form.
    pub fn compile(&self, vocabulary: &FlagVocabulary) -> Result<CompiledMask, MaskError> {
        let mut checks = Vec::with_capacity(self.requirements.len());
        for (flag, requirement) in &self.requirements {
            let definition = vocabulary
                .get(flag)
                .ok_or_else(|| MaskError::UnknownFlag {
                    flag: flag.clone(),
                    vocabulary: vocabulary.name().to_string(),
                    known: vocabulary.flag_names().collect::<Vec<_>>().join(", "),
                })?;
            match requirement {
                FlagRequirement::RequireTrue => checks.push((*definition, true)),
                FlagRequirement::RequireFalse => checks.push((*definition, false)),
                FlagRequirement::Unconstrained => {}
            }
        }
        Ok(CompiledMask {
            checks,
            nodata: None,
        })
    }
}

/// A mask spec resolved to bit tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledMask {
    checks: Vec<(FlagDefinition, bool)>,
    nodata: Option<u64>,
}

impl CompiledMask {
    /// Marks `nodata` quality values as invalid regardless of flags.
    pub fn with_nodata(mut self, nodata: Option<u64>) -> Self {
        self.nodata = nodata;
        self
    }

    /// Validity of a single packed quality value.
    #[inline]
    pub fn is_valid(&self, raw: u64) -> bool {
        if self.nodata == Some(raw) {
            return false;
        }
        self.checks
            .iter()
            .all(|(definition, expected)| definition.is_set(raw) == *expected)
    }

    /// Number of constrained flags.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

/// Per-pixel validity of a quality raster.
pub fn evaluate(mask_raster: ArrayView2<'_, u64>, mask: &CompiledMask) -> Array2<bool> {
    mask_raster.map(|&raw| mask.is_valid(raw))
}

/// Logical AND of `other` into `acc`; both must have the same shape.
pub fn combine(acc: &mut Array2<bool>, other: &Array2<bool>) {
    Zip::from(acc).and(other).for_each(|a, &b| *a = *a && b);
}
