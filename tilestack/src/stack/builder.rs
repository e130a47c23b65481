//! Stack construction from the source catalog.

use super::catalog::{CatalogError, SourceCatalog, SourceObservation};
use super::{ObservationInfo, ObservationStack};
use crate::grid::TileGeometry;
use crate::mask::{self, CompiledMask};
use crate::window::TimeWindow;
use ndarray::{Array2, Array4, Axis, Zip};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors that abort building a stack.
///
/// Per-observation read failures are not errors: the affected time step is
/// dropped and a warning logged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StackError {
    /// Catalog could not list observations for a source
    #[error("Source '{source_name}' could not be queried: {error}")]
    Catalog {
        source_name: String,
        #[source]
        error: CatalogError,
    },

    /// Arrays handed to the stack disagree in shape
    #[error("Array shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Task was cancelled while fetching
    #[error("Stack construction cancelled")]
    Cancelled,
}

/// One quality product applied to a source.
#[derive(Debug, Clone)]
pub struct MaskEntry {
    pub name: String,
    pub product: String,
    pub measurement: String,
    pub mask: CompiledMask,
}

/// One source product contributing observations to every stack.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub name: String,
    pub product: String,
    /// Raw value marking missing data in this product's bands
    pub nodata: Option<f64>,
    pub masks: Vec<MaskEntry>,
}

/// A fully read time step awaiting placement into the stack.
struct Layer {
    info: ObservationInfo,
    source_order: usize,
    bands: Vec<Array2<f64>>,
    valid: Vec<Array2<bool>>,
}

/// Builds [`ObservationStack`]s for tile/window tasks.
pub struct StackBuilder<'a> {
    catalog: &'a dyn SourceCatalog,
    sources: &'a [SourceSpec],
    measurements: &'a [String],
    range: TimeWindow,
}

impl<'a> StackBuilder<'a> {
    /// `range` is the global `[start_date, end_date)`; observations outside
    /// it are ignored even when a window extends beyond it.
    pub fn new(
        catalog: &'a dyn SourceCatalog,
        sources: &'a [SourceSpec],
        measurements: &'a [String],
        range: TimeWindow,
    ) -> Self {
        Self {
            catalog,
            sources,
            measurements,
            range,
        }
    }

    /// Fetches, masks and orders every observation of `window` on the tile.
    pub fn build(
        &self,
        geometry: &TileGeometry,
        window: &TimeWindow,
        cancel: &CancellationToken,
    ) -> Result<ObservationStack, StackError> {
        let bands = self.measurements.to_vec();
        let Some(query_range) = window.intersect(&self.range) else {
            return Ok(ObservationStack::empty(bands, geometry.shape));
        };

        let mut layers = Vec::new();
        for (source_order, source) in self.sources.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(StackError::Cancelled);
            }

            let observations = self
                .catalog
                .query(&source.product, &geometry.extent, &query_range)
                .map_err(|error| StackError::Catalog {
                    source_name: source.name.clone(),
                    error,
                })?;

            debug!(
                tile = %geometry.tile,
                window = %window,
                source = %source.name,
                count = observations.len(),
                "Catalog returned observations"
            );

            for observation in observations {
                if cancel.is_cancelled() {
                    return Err(StackError::Cancelled);
                }
                if !query_range.contains(observation.acquired())
                    || !observation.extent().intersects(&geometry.extent)
                {
                    continue;
                }
                match self.read_layer(source, source_order, observation.as_ref(), geometry) {
                    Ok(layer) => layers.push(layer),
                    Err(reason) => {
                        warn!(
                            tile = %geometry.tile,
                            source = %source.name,
                            observation = observation.id(),
                            reason = %reason,
                            "Dropping time step"
                        );
                    }
                }
            }
        }

        layers.sort_by(|a, b| {
            a.info
                .acquired
                .cmp(&b.info.acquired)
                .then(a.source_order.cmp(&b.source_order))
                .then_with(|| a.info.id.cmp(&b.info.id))
        });

        Ok(assemble(bands, geometry.shape, layers))
    }

    /// Reads masks and bands of one observation.
    ///
    /// Any failure or shape mismatch drops the whole time step.
    fn read_layer(
        &self,
        source: &SourceSpec,
        source_order: usize,
        observation: &dyn SourceObservation,
        geometry: &TileGeometry,
    ) -> Result<Layer, String> {
        let shape = geometry.shape;

        let mut pixel_valid = Array2::from_elem(shape, true);
        for entry in &source.masks {
            let raster = observation
                .read_mask(&entry.product, &entry.measurement, geometry)
                .map_err(|e| format!("mask '{}' unavailable: {}", entry.name, e))?;
            if raster.dim() != shape {
                return Err(format!(
                    "mask '{}' has shape {:?}, expected {:?}",
                    entry.name,
                    raster.dim(),
                    shape
                ));
            }
            mask::combine(&mut pixel_valid, &mask::evaluate(raster.view(), &entry.mask));
        }

        let mut bands = Vec::with_capacity(self.measurements.len());
        let mut valid = Vec::with_capacity(self.measurements.len());
        for measurement in self.measurements {
            let data = observation
                .read_band(measurement, geometry)
                .map_err(|e| e.to_string())?;
            if data.dim() != shape {
                return Err(format!(
                    "band '{}' has shape {:?}, expected {:?}",
                    measurement,
                    data.dim(),
                    shape
                ));
            }

            let mut band_valid = pixel_valid.clone();
            Zip::from(&mut band_valid)
                .and(&data)
                .for_each(|v, &value| {
                    *v = *v && value.is_finite() && Some(value) != source.nodata;
                });

            bands.push(data);
            valid.push(band_valid);
        }

        Ok(Layer {
            info: ObservationInfo {
                id: observation.id().to_string(),
                source: source.name.clone(),
                acquired: observation.acquired(),
            },
            source_order,
            bands,
            valid,
        })
    }
}

/// Copies ordered layers into the `(time, band, y, x)` arrays.
fn assemble(bands: Vec<String>, shape: (usize, usize), layers: Vec<Layer>) -> ObservationStack {
    let dim = (layers.len(), bands.len(), shape.0, shape.1);
    let mut data = Array4::zeros(dim);
    let mut valid = Array4::from_elem(dim, false);
    let mut observations = Vec::with_capacity(layers.len());

    for (t, layer) in layers.into_iter().enumerate() {
        let mut data_t = data.index_axis_mut(Axis(0), t);
        for (b, band) in layer.bands.iter().enumerate() {
            data_t.index_axis_mut(Axis(0), b).assign(band);
        }
        let mut valid_t = valid.index_axis_mut(Axis(0), t);
        for (b, band_valid) in layer.valid.iter().enumerate() {
            valid_t.index_axis_mut(Axis(0), b).assign(band_valid);
        }
        observations.push(layer.info);
    }

    ObservationStack {
        bands,
        observations,
        data,
        valid,
    }
}
