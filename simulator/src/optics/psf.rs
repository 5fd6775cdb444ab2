//! Point-spread function as an elliptical Gaussian.
//!
//! The PSF is carried as its second-moment (covariance) matrix in square
//! arcseconds. Wavefront aberrations broaden the core following the
//! Maréchal approximation, and line-of-sight smearing convolves in a second
//! Gaussian, which for Gaussians is a sum of covariances.

use std::f64::consts::PI;

use nalgebra::{Matrix2, Vector2};
use ndarray::Array2;

use crate::error::{Result, SimError};

/// Half-light radius of a Gaussian in units of its sigma, √(2 ln 2)
pub const HLR_PER_SIGMA: f64 = 1.177_410_022_5;

/// Core profile before aberrations and smearing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PsfCore {
    /// Diffraction-limited core with the given sigma (arcsec)
    Diffraction { sigma_arcsec: f64 },
    /// Fixed Gaussian of the given half-light radius (arcsec)
    Gaussian { half_light_radius_arcsec: f64 },
}

impl PsfCore {
    pub fn sigma_arcsec(&self) -> f64 {
        match *self {
            PsfCore::Diffraction { sigma_arcsec } => sigma_arcsec,
            PsfCore::Gaussian {
                half_light_radius_arcsec,
            } => half_light_radius_arcsec / HLR_PER_SIGMA,
        }
    }
}

/// Line-of-sight jitter kernel: a Gaussian, optionally sheared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LosSmear {
    pub sigma_arcsec: f64,
    pub shear: Option<(f64, f64)>,
}

impl LosSmear {
    /// Resolve the smearing configuration.
    ///
    /// Shear needs both components; supplying only one is an error.
    pub fn from_config(
        sigma_arcsec: Option<f64>,
        e1: Option<f64>,
        e2: Option<f64>,
    ) -> Result<Option<Self>> {
        let shear = match (e1, e2) {
            (Some(g1), Some(g2)) => {
                if g1 * g1 + g2 * g2 >= 1.0 {
                    return Err(SimError::config(format!(
                        "los motion shear ({g1}, {g2}) must have magnitude below 1"
                    )));
                }
                Some((g1, g2))
            }
            (None, None) => None,
            _ => {
                return Err(SimError::config("Must provide both los motion e1 and e2."));
            }
        };
        Ok(sigma_arcsec.map(|sigma_arcsec| LosSmear {
            sigma_arcsec,
            shear,
        }))
    }

    /// Covariance of the smearing kernel, arcsec²
    pub fn covariance(&self) -> Matrix2<f64> {
        let var = self.sigma_arcsec * self.sigma_arcsec;
        match self.shear {
            None => Matrix2::identity() * var,
            Some((g1, g2)) => {
                let norm = 1.0 / (1.0 - g1 * g1 - g2 * g2).sqrt();
                let s = Matrix2::new(1.0 + g1, g2, g2, 1.0 - g1) * norm;
                s * s.transpose() * var
            }
        }
    }
}

/// Root-sum-square of the wavefront coefficients, in waves
pub fn wavefront_rms(aberrations: &[f64]) -> f64 {
    aberrations.iter().map(|a| a * a).sum::<f64>().sqrt()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Psf {
    core: PsfCore,
    aberrations: Vec<f64>,
    smear: Option<LosSmear>,
    covariance: Matrix2<f64>,
}

impl Psf {
    pub fn new(core: PsfCore, aberrations: Vec<f64>, smear: Option<LosSmear>) -> Self {
        let sigma = core.sigma_arcsec();
        let broadening = 1.0 + (2.0 * PI * wavefront_rms(&aberrations)).powi(2);
        let mut covariance = Matrix2::identity() * (sigma * sigma * broadening);
        if let Some(smear) = &smear {
            covariance += smear.covariance();
        }
        Self {
            core,
            aberrations,
            smear,
            covariance,
        }
    }

    pub fn core(&self) -> PsfCore {
        self.core
    }

    /// Effective aberration vector, in waves
    pub fn aberrations(&self) -> &[f64] {
        &self.aberrations
    }

    pub fn smear(&self) -> Option<&LosSmear> {
        self.smear.as_ref()
    }

    /// Second moments in arcsec²
    pub fn covariance(&self) -> &Matrix2<f64> {
        &self.covariance
    }

    /// Determinant radius √σ_xσ_y, arcsec
    pub fn size_arcsec(&self) -> f64 {
        self.covariance.determinant().sqrt().sqrt()
    }

    /// Draw the PSF, convolved with a round Gaussian of `extra_sigma_arcsec`,
    /// onto a square stamp.
    ///
    /// `offset` is the source position relative to the stamp's central pixel,
    /// in pixels. The stamp sums to `flux`.
    pub fn draw(
        &self,
        pixel_scale_arcsec: f64,
        extra_sigma_arcsec: f64,
        offset: (f64, f64),
        flux: f64,
    ) -> Array2<f64> {
        let pix2 = pixel_scale_arcsec * pixel_scale_arcsec;
        let extra = extra_sigma_arcsec * extra_sigma_arcsec;
        let cov = (self.covariance + Matrix2::identity() * extra) / pix2;

        let max_sigma = cov.m11.max(cov.m22).sqrt();
        let half = (5.0 * max_sigma).ceil().max(2.0) as usize;
        let size = 2 * half + 1;

        let inv = cov.try_inverse().unwrap_or_else(Matrix2::identity);
        let mut stamp = Array2::from_shape_fn((size, size), |(row, col)| {
            let d = Vector2::new(
                col as f64 - half as f64 - offset.0,
                row as f64 - half as f64 - offset.1,
            );
            (-0.5 * d.dot(&(inv * d))).exp()
        });

        let total = stamp.sum();
        if total > 0.0 {
            stamp.mapv_inplace(|v| v * flux / total);
        }
        stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gaussian_core_from_hlr() {
        let core = PsfCore::Gaussian {
            half_light_radius_arcsec: HLR_PER_SIGMA * 0.2,
        };
        assert_relative_eq!(core.sigma_arcsec(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_partial_shear_rejected() {
        assert!(matches!(
            LosSmear::from_config(Some(0.01), Some(0.1), None),
            Err(SimError::Configuration(_))
        ));
        assert!(matches!(
            LosSmear::from_config(Some(0.01), None, Some(0.1)),
            Err(SimError::Configuration(_))
        ));
        assert_eq!(LosSmear::from_config(None, None, None).unwrap(), None);
    }

    #[test]
    fn test_shear_preserves_area() {
        let smear = LosSmear::from_config(Some(0.02), Some(0.3), Some(-0.1))
            .unwrap()
            .unwrap();
        let cov = smear.covariance();
        assert_relative_eq!(cov.determinant(), 0.02f64.powi(4), epsilon = 1e-15);
        assert!(cov.m11 > cov.m22);
    }

    #[test]
    fn test_aberrations_broaden() {
        let core = PsfCore::Diffraction { sigma_arcsec: 0.05 };
        let sharp = Psf::new(core, vec![0.0; 4], None);
        let blurred = Psf::new(core, vec![0.05, 0.0, 0.02, 0.0], None);
        assert_relative_eq!(sharp.size_arcsec(), 0.05, epsilon = 1e-12);
        assert!(blurred.size_arcsec() > sharp.size_arcsec());
    }

    #[test]
    fn test_draw_conserves_flux_and_centers() {
        let psf = Psf::new(PsfCore::Diffraction { sigma_arcsec: 0.2 }, vec![], None);
        let stamp = psf.draw(0.11, 0.0, (0.0, 0.0), 1000.0);
        assert_relative_eq!(stamp.sum(), 1000.0, epsilon = 1e-9);

        let (rows, cols) = stamp.dim();
        assert_eq!(rows, cols);
        assert_eq!(rows % 2, 1);
        let mid = rows / 2;
        let peak = stamp[[mid, mid]];
        assert!(stamp.iter().all(|&v| v <= peak));
    }
}
