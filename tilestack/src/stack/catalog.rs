//! Source catalog interface.
//!
//! The catalog resolves which source observations cover a tile and time
//! range and gives per-band array access to them. How it does so (a
//! database, a directory scan, a remote service) is outside this crate; the
//! compositing engine only depends on [`SourceCatalog`] and
//! [`SourceObservation`].
//!
//! [`MemoryCatalog`] is a complete in-memory implementation used by tests
//! and by embedders that already hold their rasters in memory.

use crate::grid::{BoundingBox, TileGeometry};
use crate::window::TimeWindow;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors raised by catalog implementations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    /// The query itself failed
    #[error("Catalog query for '{product}' failed: {reason}")]
    QueryFailed { product: String, reason: String },

    /// Observation does not carry the requested measurement
    #[error("Observation '{observation}' has no measurement '{measurement}'")]
    MissingMeasurement {
        observation: String,
        measurement: String,
    },

    /// Measurement exists but could not be read
    #[error("Failed to read '{measurement}' from '{observation}': {reason}")]
    ReadFailed {
        observation: String,
        measurement: String,
        reason: String,
    },
}

/// One acquisition of a source product.
pub trait SourceObservation: Send + Sync {
    /// Stable identifier, recorded as provenance in output artifacts.
    fn id(&self) -> &str;

    fn acquired(&self) -> DateTime<Utc>;

    fn extent(&self) -> BoundingBox;

    /// Reads one band resampled onto the tile's pixel grid.
    fn read_band(
        &self,
        measurement: &str,
        geometry: &TileGeometry,
    ) -> Result<Array2<f64>, CatalogError>;

    /// Reads the packed quality raster of the companion mask product.
    fn read_mask(
        &self,
        product: &str,
        measurement: &str,
        geometry: &TileGeometry,
    ) -> Result<Array2<u64>, CatalogError>;
}

/// Query contract of the source catalog.
pub trait SourceCatalog: Send + Sync {
    /// Observations of `product` whose extent intersects `extent` and whose
    /// acquisition time lies in `range`.
    fn query(
        &self,
        product: &str,
        extent: &BoundingBox,
        range: &TimeWindow,
    ) -> Result<Vec<Arc<dyn SourceObservation>>, CatalogError>;
}

/// Observation held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryObservation {
    id: String,
    acquired: DateTime<Utc>,
    extent: BoundingBox,
    bands: HashMap<String, Array2<f64>>,
    masks: HashMap<(String, String), Array2<u64>>,
}

impl MemoryObservation {
    pub fn new(id: impl Into<String>, acquired: DateTime<Utc>, extent: BoundingBox) -> Self {
        Self {
            id: id.into(),
            acquired,
            extent,
            bands: HashMap::new(),
            masks: HashMap::new(),
        }
    }

    pub fn with_band(mut self, measurement: impl Into<String>, data: Array2<f64>) -> Self {
        self.bands.insert(measurement.into(), data);
        self
    }

    pub fn with_mask(
        mut self,
        product: impl Into<String>,
        measurement: impl Into<String>,
        data: Array2<u64>,
    ) -> Self {
        self.masks.insert((product.into(), measurement.into()), data);
        self
    }
}

impl SourceObservation for MemoryObservation {
    fn id(&self) -> &str {
        &self.id
    }

    fn acquired(&self) -> DateTime<Utc> {
        self.acquired
    }

    fn extent(&self) -> BoundingBox {
        self.extent
    }

    fn read_band(
        &self,
        measurement: &str,
        _geometry: &TileGeometry,
    ) -> Result<Array2<f64>, CatalogError> {
        self.bands
            .get(measurement)
            .cloned()
            .ok_or_else(|| CatalogError::MissingMeasurement {
                observation: self.id.clone(),
                measurement: measurement.to_string(),
            })
    }

    fn read_mask(
        &self,
        product: &str,
        measurement: &str,
        _geometry: &TileGeometry,
    ) -> Result<Array2<u64>, CatalogError> {
        self.masks
            .get(&(product.to_string(), measurement.to_string()))
            .cloned()
            .ok_or_else(|| CatalogError::MissingMeasurement {
                observation: self.id.clone(),
                measurement: format!("{}/{}", product, measurement),
            })
    }
}

/// In-memory catalog keyed by product name.
///
/// Counts queries so callers can verify that skipped tasks never touch
/// the catalog.
#[derive(Default)]
pub struct MemoryCatalog {
    products: RwLock<HashMap<String, Vec<Arc<dyn SourceObservation>>>>,
    queries: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observation under `product`.
    pub fn insert(&self, product: impl Into<String>, observation: impl SourceObservation + 'static) {
        let mut products = match self.products.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        products
            .entry(product.into())
            .or_default()
            .push(Arc::new(observation));
    }

    /// Number of `query` calls served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl SourceCatalog for MemoryCatalog {
    fn query(
        &self,
        product: &str,
        extent: &BoundingBox,
        range: &TimeWindow,
    ) -> Result<Vec<Arc<dyn SourceObservation>>, CatalogError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let products = self.products.read().map_err(|_| CatalogError::QueryFailed {
            product: product.to_string(),
            reason: "catalog lock poisoned".to_string(),
        })?;

        Ok(products
            .get(product)
            .map(|observations| {
                observations
                    .iter()
                    .filter(|o| o.extent().intersects(extent) && range.contains(o.acquired()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
