//! Telescope optical configuration used to size the diffraction PSF core.
//!
//! # Physics Models
//!
//! - **Diffraction FWHM**: θ ≈ 1.028 λ/D for a circular aperture
//! - **Gaussian equivalent**: σ = FWHM / (2√(2 ln 2))
//! - **Collecting area**: A = π(D/2)² (1 - ε²) with central obscuration ε

use once_cell::sync::Lazy;
use std::f64::consts::PI;

/// Arcseconds per radian
pub const ARCSEC_PER_RAD: f64 = 206_264.806_247;

/// FWHM of a Gaussian in units of its sigma
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045;

/// Telescope optical system configuration.
#[derive(Debug, Clone)]
pub struct TelescopeConfig {
    /// Primary mirror diameter in meters (clear aperture)
    pub aperture_m: f64,
    /// Linear central obscuration as a fraction of the aperture diameter
    pub obscuration: f64,
    /// Telescope model name or identifier
    pub name: String,
}

impl TelescopeConfig {
    pub fn new(name: impl Into<String>, aperture_m: f64, obscuration: f64) -> Self {
        Self {
            name: name.into(),
            aperture_m,
            obscuration,
        }
    }

    /// Diffraction-limited FWHM in arcseconds at the given wavelength
    pub fn diffraction_fwhm_arcsec(&self, wavelength_nm: f64) -> f64 {
        let wavelength_m = wavelength_nm * 1.0e-9;
        1.028 * wavelength_m / self.aperture_m * ARCSEC_PER_RAD
    }

    /// Sigma of the Gaussian matched to the diffraction FWHM, in arcseconds
    pub fn diffraction_sigma_arcsec(&self, wavelength_nm: f64) -> f64 {
        self.diffraction_fwhm_arcsec(wavelength_nm) / FWHM_PER_SIGMA
    }

    /// Unobscured collecting area in square meters
    pub fn collecting_area_m2(&self) -> f64 {
        PI * (self.aperture_m / 2.0).powi(2) * (1.0 - self.obscuration.powi(2))
    }
}

/// Standard telescope models
pub mod models {
    use super::*;

    /// 2.4m-class wide-field survey telescope
    pub static SURVEY_2P4M: Lazy<TelescopeConfig> =
        Lazy::new(|| TelescopeConfig::new("Survey 2.4m", 2.36, 0.31));
}
