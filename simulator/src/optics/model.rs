//! Per-detector PSF construction and caching.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SimError};
use crate::hardware::telescope::models;
use crate::hardware::{DetectorId, GeometryTable, TelescopeConfig};
use crate::photometry::Filter;
use crate::pointing::PointingFrame;

use super::aberration::{
    chip_gradient_scale, detector_draw, dither_draw, focal_plane_gradient_scale, AberrationMode,
    AberrationTimeSeries, LOS_SKIP_THRESHOLD,
};
use super::psf::{LosSmear, Psf, PsfCore};

/// Optics settings resolved from the run configuration.
#[derive(Debug, Clone)]
pub struct OpticsConfig {
    pub telescope: TelescopeConfig,
    /// Extra wavefront coefficients, waves
    pub aberrations: Vec<f64>,
    pub mode: AberrationMode,
    /// Replaces the diffraction core with a Gaussian of this half-light radius (arcsec)
    pub gauss_psf: Option<f64>,
    /// Line-of-sight jitter sigma, arcsec
    pub los_motion: Option<f64>,
    pub los_motion_e1: Option<f64>,
    pub los_motion_e2: Option<f64>,
    /// Smear only a seeded random subset of pointings
    pub random_los_motion: bool,
}

impl Default for OpticsConfig {
    fn default() -> Self {
        Self {
            telescope: models::SURVEY_2P4M.clone(),
            aberrations: Vec::new(),
            mode: AberrationMode::None,
            gauss_psf: None,
            los_motion: None,
            los_motion_e1: None,
            los_motion_e2: None,
            random_los_motion: false,
        }
    }
}

/// Cache key for a built PSF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PsfKey {
    pub detector: DetectorId,
    pub mode: AberrationMode,
    perturbation: u64,
}

impl PsfKey {
    pub fn perturbation(&self) -> f64 {
        f64::from_bits(self.perturbation)
    }
}

#[derive(Debug, Clone)]
struct OpticsBinding {
    detector: DetectorId,
    filter: Filter,
    dither: usize,
    elapsed_s: f64,
    smear: Option<LosSmear>,
}

/// Builds PSFs for the bound detector under the configured aberration mode.
#[derive(Debug)]
pub struct OpticsModel {
    config: OpticsConfig,
    geometry: Arc<GeometryTable>,
    series: Option<Arc<AberrationTimeSeries>>,
    smear: Option<LosSmear>,
    binding: Option<OpticsBinding>,
    cache: HashMap<PsfKey, Arc<Psf>>,
}

impl OpticsModel {
    pub fn new(
        config: OpticsConfig,
        geometry: Arc<GeometryTable>,
        series: Option<Arc<AberrationTimeSeries>>,
    ) -> Result<Self> {
        let smear = LosSmear::from_config(
            config.los_motion,
            config.los_motion_e1,
            config.los_motion_e2,
        )?;
        if config.mode == AberrationMode::TimeVarying && series.is_none() {
            return Err(SimError::config(
                "time-varying aberrations need an aberration time series",
            ));
        }
        Ok(Self {
            config,
            geometry,
            series,
            smear,
            binding: None,
            cache: HashMap::new(),
        })
    }

    pub fn mode(&self) -> AberrationMode {
        self.config.mode
    }

    /// Rebind to the frame's current detector and pointing; drops cached PSFs.
    pub fn rebuild(&mut self, frame: &PointingFrame) -> Result<()> {
        let detector = frame.detector()?;
        let dither = frame.dither_index()?;
        let filter = frame
            .filter()
            .ok_or_else(|| SimError::state("no filter bound; cannot build the PSF"))?;

        let smear = match self.smear {
            Some(_) if self.config.random_los_motion && dither_draw(dither) > LOS_SKIP_THRESHOLD => {
                log::debug!("Line-of-sight smearing disabled for dither {dither}");
                None
            }
            other => other,
        };

        self.cache.clear();
        self.binding = Some(OpticsBinding {
            detector,
            filter,
            dither,
            elapsed_s: frame.elapsed_mission_seconds()?,
            smear,
        });
        Ok(())
    }

    fn binding(&self, detector: DetectorId) -> Result<&OpticsBinding> {
        let binding = self
            .binding
            .as_ref()
            .ok_or_else(|| SimError::state("optics not bound to a detector"))?;
        if binding.detector != detector {
            return Err(SimError::state(format!(
                "optics bound to detector {}, not {detector}",
                binding.detector
            )));
        }
        Ok(binding)
    }

    /// Scale applied to the aberration vector for an object at `position`.
    pub fn perturbation(&self, detector: DetectorId, position: Option<(f64, f64)>) -> Result<f64> {
        let binding = self.binding(detector)?;
        let half = self.geometry.half_size();
        Ok(match self.config.mode {
            AberrationMode::ChipGradient => {
                chip_gradient_scale(detector, position.unwrap_or((half, half)), half)
            }
            AberrationMode::FocalPlaneGradient => {
                focal_plane_gradient_scale(self.geometry.gradient_offset_mm(detector))
            }
            AberrationMode::DetectorRandom => detector_draw(detector),
            AberrationMode::TimeVarying => match &self.series {
                Some(series) => series.scale_at(binding.elapsed_s)?,
                None => 1.0,
            },
            AberrationMode::None => 1.0,
        })
    }

    /// Key under which the detector's PSF is cached; `None` when the mode
    /// builds a fresh PSF per object.
    pub fn cache_key(&self, detector: DetectorId) -> Result<Option<PsfKey>> {
        if !self.config.mode.is_cacheable() {
            self.binding(detector)?;
            return Ok(None);
        }
        Ok(Some(PsfKey {
            detector,
            mode: self.config.mode,
            perturbation: self.perturbation(detector, None)?.to_bits(),
        }))
    }

    /// PSF for an object on `detector` at pixel `position` (detector center when absent).
    pub fn psf_for(
        &mut self,
        detector: DetectorId,
        position: Option<(f64, f64)>,
    ) -> Result<Arc<Psf>> {
        let key = self.cache_key(detector)?;
        if let Some(psf) = key.as_ref().and_then(|k| self.cache.get(k)) {
            return Ok(psf.clone());
        }

        let scale = self.perturbation(detector, position)?;
        let psf = Arc::new(self.build(detector, scale)?);
        if let Some(key) = key {
            self.cache.insert(key, psf.clone());
        }
        Ok(psf)
    }

    fn build(&self, detector: DetectorId, scale: f64) -> Result<Psf> {
        let binding = self.binding(detector)?;
        let core = match self.config.gauss_psf {
            Some(hlr) => PsfCore::Gaussian {
                half_light_radius_arcsec: hlr,
            },
            None => PsfCore::Diffraction {
                sigma_arcsec: self
                    .config
                    .telescope
                    .diffraction_sigma_arcsec(binding.filter.effective_wavelength_nm()),
            },
        };
        let aberrations = self.config.aberrations.iter().map(|a| a * scale).collect();
        log::trace!(
            "Building PSF for detector {detector} dither {} (scale {scale:.4})",
            binding.dither
        );
        Ok(Psf::new(core, aberrations, binding.smear))
    }

    /// Number of PSFs currently cached
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::telescope::models::SURVEY_2P4M;
    use crate::optics::aberration::{AberrationFlags, MISSION_DURATION_S, TIME_SAMPLE_S};
    use crate::pointing::{DitherRow, DitherSchedule, FocalPlaneWcs};
    use approx::assert_relative_eq;

    fn config(mode: AberrationMode) -> OpticsConfig {
        OpticsConfig {
            telescope: SURVEY_2P4M.clone(),
            aberrations: vec![0.0, 0.02, 0.01, 0.0],
            mode,
            gauss_psf: None,
            los_motion: None,
            los_motion_e1: None,
            los_motion_e2: None,
            random_los_motion: false,
        }
    }

    fn schedule() -> DitherSchedule {
        DitherSchedule::new(
            (0..20)
                .map(|i| DitherRow {
                    ra: 10.0 + i as f64 * 0.1,
                    dec: 20.0,
                    pa: 0.0,
                    date: 59000.0 + i as f64,
                    filter: Filter::J129,
                })
                .collect(),
        )
    }

    fn bound_frame(dither: usize, detector: u8) -> PointingFrame {
        let geometry = Arc::new(GeometryTable::default());
        let wcs = Arc::new(FocalPlaneWcs::new(geometry.clone()));
        let mut frame = PointingFrame::new(geometry, wcs, None, true, 0);
        frame.bind_dither(&schedule(), dither).unwrap();
        frame
            .bind_detector(DetectorId::new(detector).unwrap())
            .unwrap();
        frame
    }

    fn model(config: OpticsConfig, series: Option<AberrationTimeSeries>) -> OpticsModel {
        OpticsModel::new(config, Arc::new(GeometryTable::default()), series.map(Arc::new)).unwrap()
    }

    #[test]
    fn test_unbound_is_state_error() {
        let mut optics = model(config(AberrationMode::None), None);
        let det = DetectorId::new(1).unwrap();
        assert!(matches!(optics.psf_for(det, None), Err(SimError::State(_))));
    }

    #[test]
    fn test_cached_per_detector() {
        let mut optics = model(config(AberrationMode::DetectorRandom), None);
        let frame = bound_frame(0, 7);
        optics.rebuild(&frame).unwrap();
        let det = frame.detector().unwrap();

        let a = optics.psf_for(det, Some((10.0, 10.0))).unwrap();
        let b = optics.psf_for(det, Some((4000.0, 20.0))).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(optics.cached(), 1);
        assert_relative_eq!(a.aberrations()[1], 0.02 * detector_draw(det), epsilon = 1e-15);

        // Binding another detector clears the cache
        optics.rebuild(&bound_frame(0, 8)).unwrap();
        assert_eq!(optics.cached(), 0);
        assert!(matches!(optics.psf_for(det, None), Err(SimError::State(_))));
    }

    #[test]
    fn test_random_mode_wins_over_time_varying() {
        let flags = AberrationFlags {
            random_aberration: true,
            oscillating_aberration: true,
            ..Default::default()
        };
        let mode = AberrationMode::from_flags(flags);
        let series = AberrationTimeSeries::from_values(vec![1.0, 2.0, 3.0]).unwrap();
        let mut optics = model(config(mode), Some(series));
        assert_eq!(optics.mode(), AberrationMode::DetectorRandom);

        let det = DetectorId::new(11).unwrap();
        optics.rebuild(&bound_frame(0, 11)).unwrap();
        let first = optics.cache_key(det).unwrap();
        optics.rebuild(&bound_frame(3, 11)).unwrap();
        let second = optics.cache_key(det).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.map(|k| k.perturbation()), Some(detector_draw(det)));
    }

    #[test]
    fn test_chip_gradient_not_cached() {
        let mut optics = model(config(AberrationMode::ChipGradient), None);
        let frame = bound_frame(0, 2);
        optics.rebuild(&frame).unwrap();
        let det = frame.detector().unwrap();

        assert_eq!(optics.cache_key(det).unwrap(), None);
        let a = optics.psf_for(det, Some((0.0, 0.0))).unwrap();
        let b = optics.psf_for(det, Some((4087.0, 4087.0))).unwrap();
        assert_eq!(optics.cached(), 0);
        assert_ne!(a.aberrations(), b.aberrations());
    }

    #[test]
    fn test_focal_plane_gradient_uses_detector_offset() {
        let mut optics = model(config(AberrationMode::FocalPlaneGradient), None);
        let frame = bound_frame(0, 1);
        optics.rebuild(&frame).unwrap();
        let det = frame.detector().unwrap();
        let geometry = GeometryTable::default();
        assert_relative_eq!(
            optics.perturbation(det, None).unwrap(),
            geometry.gradient_offset_mm(det) * 3f64.sqrt() / 88.115
        );
    }

    #[test]
    fn test_time_varying_follows_pointing_date() {
        let n = 5 * 365 + 1;
        let values: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let series = AberrationTimeSeries::from_values(values).unwrap();
        let mut optics = model(config(AberrationMode::TimeVarying), Some(series));

        let frame = bound_frame(4, 5);
        optics.rebuild(&frame).unwrap();
        let det = frame.detector().unwrap();
        // Four days after mission start, read off the grid at one second per minute
        let grid_s = 4.0 * 86_400.0 / TIME_SAMPLE_S;
        let expected = grid_s * (n - 1) as f64 / MISSION_DURATION_S / 1293.0;
        assert_relative_eq!(optics.perturbation(det, None).unwrap(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_time_varying_needs_series() {
        let err = OpticsModel::new(
            config(AberrationMode::TimeVarying),
            Arc::new(GeometryTable::default()),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn test_random_los_subset() {
        let mut cfg = config(AberrationMode::None);
        cfg.los_motion = Some(0.01);
        cfg.random_los_motion = true;
        let mut optics = model(cfg, None);

        for dither in 0..20 {
            let frame = bound_frame(dither, 9);
            optics.rebuild(&frame).unwrap();
            let psf = optics.psf_for(frame.detector().unwrap(), None).unwrap();
            assert_eq!(psf.smear().is_some(), dither_draw(dither) <= LOS_SKIP_THRESHOLD);
        }
    }

    #[test]
    fn test_gauss_psf_override() {
        let mut cfg = config(AberrationMode::None);
        cfg.gauss_psf = Some(0.3);
        let mut optics = model(cfg, None);
        let frame = bound_frame(0, 3);
        optics.rebuild(&frame).unwrap();
        let psf = optics.psf_for(frame.detector().unwrap(), None).unwrap();
        assert_eq!(
            psf.core(),
            PsfCore::Gaussian {
                half_light_radius_arcsec: 0.3
            }
        );
    }
}
