//! Shared, versioned holder of the current calibration.
//!
//! Readers take a cheap [`GeometryHandle`] snapshot; installing a new
//! geometry bumps the version so caches built against the old one can tell
//! they are stale. A failed load leaves the previous geometry in place.
use super::Geometry;
use crate::error::{ReductionError, Result};
use log::info;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Snapshot of a geometry together with the store version it was installed as.
#[derive(Clone, Debug)]
pub struct GeometryHandle {
    pub version: u64,
    pub geometry: Arc<Geometry>,
}

impl GeometryHandle {
    /// Derived handle with a shifted beam centre; keeps the store version.
    pub fn with_center_offset(&self, offset: [f64; 2]) -> Result<GeometryHandle> {
        if offset == [0.0, 0.0] {
            return Ok(self.clone());
        }
        Ok(GeometryHandle {
            version: self.version,
            geometry: Arc::new(self.geometry.with_center_offset(offset)?),
        })
    }
}

#[derive(Debug, Default)]
pub struct GeometryStore {
    current: RwLock<Option<GeometryHandle>>,
    version: AtomicU64,
}

impl GeometryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON calibration file and make it the current geometry.
    pub fn load(&self, path: &Path) -> Result<GeometryHandle> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ReductionError::config(format!(
                "failed to read calibration {}: {e}",
                path.display()
            ))
        })?;
        let geometry: Geometry = serde_json::from_str(&contents).map_err(|e| {
            ReductionError::config(format!(
                "failed to parse calibration {}: {e}",
                path.display()
            ))
        })?;
        self.install(geometry)
    }

    /// Validate `geometry` and replace the current one with it.
    pub fn install(&self, geometry: Geometry) -> Result<GeometryHandle> {
        geometry.validate()?;
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        let handle = GeometryHandle {
            version,
            geometry: Arc::new(geometry),
        };
        *slot = Some(handle.clone());
        info!(
            "Installed geometry v{} shape={:?} distance={:.4} m wavelength={:.4} Å",
            version,
            handle.geometry.detector_shape,
            handle.geometry.sample_distance,
            handle.geometry.wavelength
        );
        Ok(handle)
    }

    /// The last successfully installed geometry.
    pub fn current(&self) -> Result<GeometryHandle> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ReductionError::NotInitialized("geometry"))
    }

    /// Version of the current geometry; `0` before the first install.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
