//! Statistical reduction of observation stacks.
//!
//! A [`Statistic`] turns an [`ObservationStack`] into one 2D array per band.
//! Per-band reducers (mean, median, min, max, count, std) look at each band
//! independently; the medoid is a joint reducer that picks a whole
//! observation per pixel and reports which one it picked.
//!
//! Reducers compute in `f64` and cast to the output dtype only at the end,
//! so integer outputs cannot overflow mid-reduction.

mod dtype;
mod medoid;
mod reduce;

pub use dtype::OutputDtype;

use crate::stack::ObservationStack;
use ndarray::{Array2, ArrayView3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from statistic definitions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatisticError {
    #[error("Unknown reducer '{0}' (expected mean, median, medoid, min, max, count or std)")]
    UnknownReducer(String),

    #[error("Unknown median convention '{0}' (expected lower or upper)")]
    UnknownMedianConvention(String),

    #[error("Unknown distance metric '{0}' (expected euclidean or manhattan)")]
    UnknownDistanceMetric(String),

    #[error("Nodata value {nodata} is not representable as {dtype}")]
    UnrepresentableNodata { nodata: f64, dtype: OutputDtype },
}

/// Which middle value an even-length median takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MedianConvention {
    #[default]
    Lower,
    Upper,
}

impl FromStr for MedianConvention {
    type Err = StatisticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lower" => Ok(MedianConvention::Lower),
            "upper" => Ok(MedianConvention::Upper),
            other => Err(StatisticError::UnknownMedianConvention(other.to_string())),
        }
    }
}

/// Distance used by the medoid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Manhattan,
}

impl FromStr for DistanceMetric {
    type Err = StatisticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "manhattan" => Ok(DistanceMetric::Manhattan),
            other => Err(StatisticError::UnknownDistanceMetric(other.to_string())),
        }
    }
}

/// How a reducer treats the band axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticKind {
    /// Each band reduced on its own.
    PerBand,
    /// One time step selected per pixel for all bands, with provenance.
    JointProvenance,
}

/// Reduction applied along the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Mean,
    Median,
    Medoid,
    Min,
    Max,
    Count,
    Std,
}

impl Reducer {
    pub fn kind(&self) -> StatisticKind {
        match self {
            Reducer::Medoid => StatisticKind::JointProvenance,
            _ => StatisticKind::PerBand,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reducer::Mean => "mean",
            Reducer::Median => "median",
            Reducer::Medoid => "medoid",
            Reducer::Min => "min",
            Reducer::Max => "max",
            Reducer::Count => "count",
            Reducer::Std => "std",
        }
    }
}

impl FromStr for Reducer {
    type Err = StatisticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(Reducer::Mean),
            "median" => Ok(Reducer::Median),
            "medoid" | "geomedian_medoid" => Ok(Reducer::Medoid),
            "min" => Ok(Reducer::Min),
            "max" => Ok(Reducer::Max),
            "count" => Ok(Reducer::Count),
            "std" => Ok(Reducer::Std),
            other => Err(StatisticError::UnknownReducer(other.to_string())),
        }
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, fully parameterised statistic.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistic {
    pub name: String,
    pub reducer: Reducer,
    pub dtype: OutputDtype,
    pub nodata: f64,
    pub median: MedianConvention,
    pub distance: DistanceMetric,
}

impl Statistic {
    /// A statistic with default median convention and distance metric.
    ///
    /// Fails if `nodata` cannot be stored in `dtype`.
    pub fn new(
        name: impl Into<String>,
        reducer: Reducer,
        dtype: OutputDtype,
        nodata: f64,
    ) -> Result<Self, StatisticError> {
        if !dtype.can_represent(nodata) {
            return Err(StatisticError::UnrepresentableNodata { nodata, dtype });
        }
        Ok(Self {
            name: name.into(),
            reducer,
            dtype,
            nodata,
            median: MedianConvention::default(),
            distance: DistanceMetric::default(),
        })
    }

    pub fn with_median(mut self, median: MedianConvention) -> Self {
        self.median = median;
        self
    }

    pub fn with_distance(mut self, distance: DistanceMetric) -> Self {
        self.distance = distance;
        self
    }

    /// Reduces `stack` to one array per band.
    pub fn reduce(&self, stack: &ObservationStack) -> StatisticResult {
        let (bands, provenance): (Vec<Array2<f64>>, Option<Array2<i64>>) = match self.reducer {
            Reducer::Medoid => {
                let selection = medoid::medoid(stack, self.median, self.distance);
                let bands = selection.values.outer_iter().map(|b| b.to_owned()).collect();
                (bands, Some(selection.provenance))
            }
            _ => {
                let bands = (0..stack.bands().len())
                    .map(|b| self.reduce_band(stack.band_data(b), stack.band_valid(b)))
                    .collect();
                (bands, None)
            }
        };

        let bands = stack
            .bands()
            .iter()
            .cloned()
            .zip(bands)
            .map(|(name, raw)| BandResult {
                name,
                data: raw.mapv(|v| if v.is_nan() { self.nodata } else { self.dtype.cast(v) }),
            })
            .collect();

        StatisticResult {
            name: self.name.clone(),
            reducer: self.reducer,
            dtype: self.dtype,
            nodata: self.nodata,
            bands,
            provenance,
            observations: stack.observations().iter().map(|o| o.id.clone()).collect(),
        }
    }

    fn reduce_band(&self, data: ArrayView3<'_, f64>, valid: ArrayView3<'_, bool>) -> Array2<f64> {
        match self.reducer {
            Reducer::Mean => reduce::mean(data, valid),
            Reducer::Median => reduce::median(data, valid, self.median),
            Reducer::Min => reduce::min(data, valid),
            Reducer::Max => reduce::max(data, valid),
            Reducer::Count => reduce::count(valid),
            Reducer::Std => reduce::std(data, valid),
            // Joint reducer; `reduce` never routes it here.
            Reducer::Medoid => reduce::median(data, valid, self.median),
        }
    }
}

/// One reduced band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandResult {
    pub name: String,
    pub data: Array2<f64>,
}

/// Output of one statistic for one task.
///
/// Band values are already cast to `dtype`; pixels with no valid
/// observation hold `nodata`. Medoid results carry the selected time index
/// per pixel in `provenance`, `-1` where nothing was selected.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticResult {
    pub name: String,
    pub reducer: Reducer,
    pub dtype: OutputDtype,
    pub nodata: f64,
    pub bands: Vec<BandResult>,
    pub provenance: Option<Array2<i64>>,
    /// Ids of the stacked observations, in time-index order.
    pub observations: Vec<String>,
}

impl StatisticResult {
    pub fn band(&self, name: &str) -> Option<&Array2<f64>> {
        self.bands.iter().find(|b| b.name == name).map(|b| &b.data)
    }
}
