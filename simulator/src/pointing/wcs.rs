//! World-coordinate mapping between detector pixels and the sky.
//!
//! The precise world-coordinate solution is an external collaborator; the
//! pointing only needs it once per detector bind, to find the detector's sky
//! center. [`FocalPlaneWcs`] is the built-in provider: it composes the
//! boresight projection with the focal-plane layout, so it agrees exactly
//! with the approximate footprint geometry.

use std::sync::Arc;

use crate::error::{Result, SimError};
use crate::hardware::{DetectorId, GeometryTable};
use crate::star_math::{Boresight, Pose};

/// Mapping between one detector's pixel grid and the sky (radians).
pub trait SkyMapping: Send + Sync {
    fn to_world(&self, x: f64, y: f64) -> Result<(f64, f64)>;
    fn to_pixel(&self, ra: f64, dec: f64) -> (f64, f64);
}

/// Source of per-detector world-coordinate mappings.
pub trait WcsProvider: Send + Sync {
    fn mapping(
        &self,
        pose: Pose,
        date_mjd: f64,
        detector: DetectorId,
    ) -> Result<Box<dyn SkyMapping>>;
}

/// World coordinates derived from the focal-plane layout.
#[derive(Debug, Clone)]
pub struct FocalPlaneWcs {
    geometry: Arc<GeometryTable>,
}

impl FocalPlaneWcs {
    pub fn new(geometry: Arc<GeometryTable>) -> Self {
        Self { geometry }
    }
}

impl WcsProvider for FocalPlaneWcs {
    fn mapping(
        &self,
        pose: Pose,
        _date_mjd: f64,
        detector: DetectorId,
    ) -> Result<Box<dyn SkyMapping>> {
        Ok(Box::new(FocalPlaneMapping {
            boresight: Boresight::new(pose),
            geometry: self.geometry.clone(),
            detector,
        }))
    }
}

struct FocalPlaneMapping {
    boresight: Boresight,
    geometry: Arc<GeometryTable>,
    detector: DetectorId,
}

impl SkyMapping for FocalPlaneMapping {
    fn to_world(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let (cx, cy) = self.geometry.pixel_to_chip(self.detector, x, y);
        self.boresight.from_focal_plane(cx, cy).ok_or_else(|| {
            SimError::config(format!(
                "pixel ({x}, {y}) on detector {} has no sky position",
                self.detector
            ))
        })
    }

    fn to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        let (cx, cy) = self.boresight.to_focal_plane(ra, dec);
        self.geometry.chip_to_pixel(self.detector, cx, cy)
    }
}
