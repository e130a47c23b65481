//! Observation stacks.
//!
//! An [`ObservationStack`] holds every source observation of one
//! tile/window task as parallel arrays indexed `(time, band, y, x)`: the
//! pixel values and an equally shaped validity array. Invalid pixels keep
//! whatever value the source delivered; reducers skip them by consulting
//! the validity array, so the number of usable observations varies freely
//! from pixel to pixel.

mod builder;
mod catalog;

pub use builder::{MaskEntry, SourceSpec, StackBuilder, StackError};
pub use catalog::{
    CatalogError, MemoryCatalog, MemoryObservation, SourceCatalog, SourceObservation,
};

use chrono::{DateTime, Utc};
use ndarray::{Array2, Array4, ArrayView2, ArrayView3, Axis};

/// Provenance of one time step in a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationInfo {
    pub id: String,
    pub source: String,
    pub acquired: DateTime<Utc>,
}

/// Masked time series of a single tile and window.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationStack {
    bands: Vec<String>,
    observations: Vec<ObservationInfo>,
    data: Array4<f64>,
    valid: Array4<bool>,
}

impl ObservationStack {
    /// Builds a stack from prepared arrays.
    ///
    /// `data` and `valid` are indexed `(time, band, y, x)`; their first
    /// axis must match `observations` and their second axis `bands`.
    pub fn from_arrays(
        bands: Vec<String>,
        observations: Vec<ObservationInfo>,
        data: Array4<f64>,
        valid: Array4<bool>,
    ) -> Result<Self, StackError> {
        let expected = (observations.len(), bands.len());
        let shape = data.dim();
        if valid.dim() != shape || (shape.0, shape.1) != expected {
            return Err(StackError::ShapeMismatch {
                expected: vec![expected.0, expected.1, shape.2, shape.3],
                actual: valid.shape().to_vec(),
            });
        }
        Ok(Self {
            bands,
            observations,
            data,
            valid,
        })
    }

    /// A stack with no observations.
    pub fn empty(bands: Vec<String>, shape: (usize, usize)) -> Self {
        let dim = (0, bands.len(), shape.0, shape.1);
        Self {
            bands,
            observations: Vec::new(),
            data: Array4::zeros(dim),
            valid: Array4::from_elem(dim, false),
        }
    }

    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    pub fn observations(&self) -> &[ObservationInfo] {
        &self.observations
    }

    /// Number of time steps.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Spatial shape `(rows, cols)` shared by every array.
    pub fn shape(&self) -> (usize, usize) {
        let (_, _, rows, cols) = self.data.dim();
        (rows, cols)
    }

    pub fn data(&self) -> &Array4<f64> {
        &self.data
    }

    pub fn valid(&self) -> &Array4<bool> {
        &self.valid
    }

    /// Values of one band across time, indexed `(time, y, x)`.
    pub fn band_data(&self, band: usize) -> ArrayView3<'_, f64> {
        self.data.index_axis(Axis(1), band)
    }

    /// Validity of one band across time, indexed `(time, y, x)`.
    pub fn band_valid(&self, band: usize) -> ArrayView3<'_, bool> {
        self.valid.index_axis(Axis(1), band)
    }

    /// One band of one time step.
    pub fn layer(&self, time: usize, band: usize) -> ArrayView2<'_, f64> {
        self.data
            .index_axis(Axis(0), time)
            .index_axis_move(Axis(0), band)
    }

    /// Per-pixel number of valid observations of one band.
    pub fn valid_count(&self, band: usize) -> Array2<u32> {
        self.band_valid(band)
            .map_axis(Axis(0), |lane| lane.iter().filter(|&&v| v).count() as u32)
    }
}
