//! Aberration perturbation modes.
//!
//! The configured aberration vector (wavefront coefficients in waves) can be
//! modulated per detector, per pointing, or per object position. Exactly one
//! mode is active; it is resolved once from the configuration flags, first
//! match wins in the order listed on [`AberrationMode`].

use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::algo::misc::{linspace, LinearInterpolator};
use crate::error::{Result, SimError};
use crate::hardware::DetectorId;

/// Mission length covered by the aberration time series, in seconds
pub const MISSION_DURATION_S: f64 = 5.0 * 365.0 * 24.0 * 60.0 * 60.0;

/// Pointing time elapsed per time series grid second
pub const TIME_SAMPLE_S: f64 = 60.0;

/// Wavelength the time series amplitudes are quoted at, nanometers
pub const FIDUCIAL_WAVELENGTH_NM: f64 = 1293.0;

/// Radius of the focal plane used to normalize the gradient, millimeters
pub const FOCAL_PLANE_GRADIENT_SCALE_MM: f64 = 88.115;

/// Draws above this value disable line-of-sight smearing for the pointing
pub const LOS_SKIP_THRESHOLD: f64 = 0.15;

/// Active aberration perturbation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AberrationMode {
    /// Scaled by a detector-seeded draw and the object's offset from the
    /// detector center along one axis. Never cached.
    ChipGradient,
    /// Scaled by the detector's vertical offset in the focal plane
    FocalPlaneGradient,
    /// Scaled by one detector-seeded draw
    DetectorRandom,
    /// Scaled by the preloaded time series at the pointing's mission time
    TimeVarying,
    /// Used as configured
    None,
}

/// Raw configuration switches, as they appear in the run configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AberrationFlags {
    pub random_aberration_gradient: bool,
    pub gradient_aberration: bool,
    pub random_aberration: bool,
    pub oscillating_aberration: bool,
}

impl AberrationMode {
    /// First enabled mode in priority order; later flags are ignored.
    pub fn from_flags(flags: AberrationFlags) -> Self {
        if flags.random_aberration_gradient {
            AberrationMode::ChipGradient
        } else if flags.gradient_aberration {
            AberrationMode::FocalPlaneGradient
        } else if flags.random_aberration {
            AberrationMode::DetectorRandom
        } else if flags.oscillating_aberration {
            AberrationMode::TimeVarying
        } else {
            AberrationMode::None
        }
    }

    /// Can one PSF serve every object on the detector?
    pub fn is_cacheable(self) -> bool {
        self != AberrationMode::ChipGradient
    }
}

/// First uniform draw in `[0, 1)` from a fresh generator with the given seed
pub fn seeded_draw(seed: u64) -> f64 {
    ChaCha8Rng::seed_from_u64(seed).gen::<f64>()
}

/// Per-detector draw used by the random and chip-gradient modes
pub fn detector_draw(detector: DetectorId) -> f64 {
    seeded_draw(detector.seed())
}

/// Per-pointing draw used by the random line-of-sight policy
pub fn dither_draw(dither: usize) -> f64 {
    seeded_draw(dither as u64)
}

/// Detector axis the chip-gradient mode varies along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientAxis {
    X,
    Y,
}

/// Axis choice for `detector`: a coin flip on a fresh generator seeded with
/// the detector id, so it is the same for every object on the detector.
pub fn gradient_axis(detector: DetectorId) -> GradientAxis {
    if detector_draw(detector) > 0.5 {
        GradientAxis::X
    } else {
        GradientAxis::Y
    }
}

/// Chip-gradient scale for an object at pixel `position` on `detector`.
pub fn chip_gradient_scale(detector: DetectorId, position: (f64, f64), half_size: f64) -> f64 {
    let coord = match gradient_axis(detector) {
        GradientAxis::X => position.0,
        GradientAxis::Y => position.1,
    };
    detector_draw(detector) * 3f64.sqrt() * (coord - half_size + 0.5) / half_size
}

/// Focal-plane gradient scale for a detector centered `y_mm` from the boresight
pub fn focal_plane_gradient_scale(y_mm: f64) -> f64 {
    y_mm * 3f64.sqrt() / FOCAL_PLANE_GRADIENT_SCALE_MM
}

#[derive(Debug, Deserialize)]
struct SeriesRow {
    value: f64,
}

/// Aberration amplitude over the mission, sampled on a uniform time grid.
#[derive(Debug, Clone)]
pub struct AberrationTimeSeries {
    interp: LinearInterpolator,
}

impl AberrationTimeSeries {
    /// Samples spread evenly over [`MISSION_DURATION_S`], first at mission start
    pub fn from_values(values: Vec<f64>) -> Result<Self> {
        let times = linspace(0.0, MISSION_DURATION_S, values.len());
        Ok(Self {
            interp: LinearInterpolator::new(times, values)?,
        })
    }

    /// Load samples from a CSV file with a single `value` column
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let values = reader
            .deserialize::<SeriesRow>()
            .map(|row| row.map(|r| r.value))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if values.is_empty() {
            return Err(SimError::config(format!(
                "aberration time series {} is empty",
                path.as_ref().display()
            )));
        }
        log::debug!("Loaded {} aberration samples", values.len());
        Self::from_values(values)
    }

    /// Scale factor at `elapsed_s` seconds after mission start.
    ///
    /// The grid is queried at `elapsed_s / TIME_SAMPLE_S`, so one grid second
    /// covers a minute of mission time.
    pub fn scale_at(&self, elapsed_s: f64) -> Result<f64> {
        Ok(self.interp.eval(elapsed_s / TIME_SAMPLE_S)? / FIDUCIAL_WAVELENGTH_NM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn det(id: u8) -> DetectorId {
        DetectorId::new(id).unwrap()
    }

    #[test]
    fn test_priority_order() {
        let all = AberrationFlags {
            random_aberration_gradient: true,
            gradient_aberration: true,
            random_aberration: true,
            oscillating_aberration: true,
        };
        assert_eq!(AberrationMode::from_flags(all), AberrationMode::ChipGradient);

        let flags = AberrationFlags {
            random_aberration: true,
            oscillating_aberration: true,
            ..Default::default()
        };
        assert_eq!(AberrationMode::from_flags(flags), AberrationMode::DetectorRandom);

        let flags = AberrationFlags {
            gradient_aberration: true,
            random_aberration: true,
            ..Default::default()
        };
        assert_eq!(AberrationMode::from_flags(flags), AberrationMode::FocalPlaneGradient);

        assert_eq!(
            AberrationMode::from_flags(AberrationFlags::default()),
            AberrationMode::None
        );
    }

    #[test]
    fn test_seeded_draws_are_reproducible() {
        for id in DetectorId::all() {
            let a = detector_draw(id);
            assert_eq!(a, detector_draw(id));
            assert!((0.0..1.0).contains(&a));
        }
        assert_eq!(dither_draw(42), dither_draw(42));
        assert_ne!(detector_draw(det(1)), detector_draw(det(2)));
    }

    #[test]
    fn test_chip_gradient_axis_is_fixed_per_detector() {
        for id in DetectorId::all() {
            let axis = gradient_axis(id);
            let expected = if detector_draw(id) > 0.5 {
                GradientAxis::X
            } else {
                GradientAxis::Y
            };
            assert_eq!(axis, expected);
        }
    }

    #[test]
    fn test_chip_gradient_scale() {
        let id = det(4);
        let half = 2044.0;
        // Half a pixel below the center is the zero crossing
        assert_relative_eq!(chip_gradient_scale(id, (half - 0.5, half - 0.5), half), 0.0);

        let edge = chip_gradient_scale(id, (2.0 * half, 2.0 * half), half);
        let expected = detector_draw(id) * 3f64.sqrt() * (half + 0.5) / half;
        assert_relative_eq!(edge, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_focal_plane_gradient() {
        assert_relative_eq!(
            focal_plane_gradient_scale(FOCAL_PLANE_GRADIENT_SCALE_MM),
            3f64.sqrt()
        );
        assert_eq!(focal_plane_gradient_scale(0.0), 0.0);
    }

    #[test]
    fn test_time_series_interpolation() {
        let series = AberrationTimeSeries::from_values(vec![0.0, 1293.0, 0.0]).unwrap();
        let end = MISSION_DURATION_S * TIME_SAMPLE_S;
        assert_relative_eq!(series.scale_at(0.0).unwrap(), 0.0);
        assert_relative_eq!(series.scale_at(end / 2.0).unwrap(), 1.0);
        assert_relative_eq!(series.scale_at(end / 4.0).unwrap(), 0.5, epsilon = 1e-12);
        // A day of pointing time is a day / 60 into the grid
        assert_relative_eq!(
            series.scale_at(86_400.0).unwrap(),
            2.0 * 1440.0 / MISSION_DURATION_S,
            epsilon = 1e-15
        );
        assert!(series.scale_at(-1.0).is_err());
        assert!(series.scale_at(end * 1.01).is_err());
    }

    #[test]
    fn test_time_series_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.csv");
        std::fs::write(&path, "value\n10.0\n20.0\n").unwrap();
        let series = AberrationTimeSeries::from_csv(&path).unwrap();
        assert_relative_eq!(
            series.scale_at(MISSION_DURATION_S * TIME_SAMPLE_S).unwrap(),
            20.0 / FIDUCIAL_WAVELENGTH_NM
        );

        std::fs::write(&path, "value\n").unwrap();
        assert!(matches!(
            AberrationTimeSeries::from_csv(&path),
            Err(SimError::Configuration(_))
        ));
    }
}
