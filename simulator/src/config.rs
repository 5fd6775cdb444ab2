//! Run configuration.
//!
//! Loaded once from a JSON file. Every field has a default, so a minimal
//! file only names the dither schedule and the catalogs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::hardware::telescope::models;
use crate::hardware::{DetectorId, GeometryTable, DEFAULT_CHIP_ENLARGE, DEFAULT_PIXELS};
use crate::io::OutputWriter;
use crate::optics::{AberrationFlags, AberrationMode, AberrationTimeSeries, LosSmear, OpticsConfig};
use crate::photometry::Filter;
use crate::pipeline::{InMemoryCatalog, PipelineOptions};
use crate::pointing::DitherSchedule;

/// Default pre-cut radius around the boresight, radians
pub const DEFAULT_BORESIGHT_RADIUS: f64 = 0.009;

/// Default AB zeropoint for converting magnitudes to detector counts
pub const DEFAULT_ZEROPOINT: f64 = 26.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// CSV dither schedule (`ra,dec,pa,date,filter`)
    pub dither_file: PathBuf,
    pub galaxy_catalog: Option<PathBuf>,
    pub star_catalog: Option<PathBuf>,
    pub transient_catalog: Option<PathBuf>,

    /// Durable output root
    pub out_path: PathBuf,
    /// Fast scratch location; artifacts are copied to `out_path` when finished
    pub tmpdir: Option<PathBuf>,
    pub run_name: String,

    /// Fixed filter; adopted from each schedule row when absent
    pub filter: Option<Filter>,
    /// Detectors to simulate; every detector when absent
    pub detectors: Option<Vec<u8>>,
    /// Reject dithers whose recorded filter differs from `filter`
    pub check_filter: bool,

    pub boresight_radius: f64,
    /// Footprint tolerance, in chip widths
    pub chip_enlarge: f64,
    pub n_pix: usize,

    /// Wavefront coefficients (waves) scaled by the aberration mode
    pub extra_aberrations: Vec<f64>,
    #[serde(flatten)]
    pub aberration_flags: AberrationFlags,
    /// CSV with a `value` column sampled uniformly over the mission
    pub aberration_series: Option<PathBuf>,

    /// Line-of-sight jitter, arcsec
    pub los_motion: Option<f64>,
    pub los_motion_e1: Option<f64>,
    pub los_motion_e2: Option<f64>,
    pub random_los_motion: bool,
    /// Gaussian PSF half-light radius, arcsec
    pub gauss_psf: Option<f64>,

    pub skip_stamps: bool,
    pub overwrite: bool,
    pub workers: usize,
    pub zeropoint: f64,
    pub gain: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dither_file: PathBuf::from("dither.csv"),
            galaxy_catalog: None,
            star_catalog: None,
            transient_catalog: None,
            out_path: PathBuf::from("out"),
            tmpdir: None,
            run_name: "imsim".to_string(),
            filter: None,
            detectors: None,
            check_filter: true,
            boresight_radius: DEFAULT_BORESIGHT_RADIUS,
            chip_enlarge: DEFAULT_CHIP_ENLARGE,
            n_pix: DEFAULT_PIXELS,
            extra_aberrations: Vec::new(),
            aberration_flags: AberrationFlags::default(),
            aberration_series: None,
            los_motion: None,
            los_motion_e1: None,
            los_motion_e2: None,
            random_los_motion: false,
            gauss_psf: None,
            skip_stamps: false,
            overwrite: false,
            workers: 1,
            zeropoint: DEFAULT_ZEROPOINT,
            gain: 1.0,
        }
    }
}

impl SimConfig {
    /// Read and validate a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_name.is_empty() {
            return Err(SimError::config("run_name must not be empty"));
        }
        if self.workers == 0 {
            return Err(SimError::config("workers must be at least 1"));
        }
        if self.n_pix == 0 {
            return Err(SimError::config("n_pix must be positive"));
        }
        if !(self.gain > 0.0) {
            return Err(SimError::config(format!("gain must be positive, got {}", self.gain)));
        }
        if !(self.boresight_radius > 0.0) {
            return Err(SimError::config("boresight_radius must be positive"));
        }
        if self.chip_enlarge < 0.0 {
            return Err(SimError::config("chip_enlarge must not be negative"));
        }
        if let Some(hlr) = self.gauss_psf {
            if !(hlr > 0.0) {
                return Err(SimError::config("gauss_psf must be a positive half-light radius"));
            }
        }
        LosSmear::from_config(self.los_motion, self.los_motion_e1, self.los_motion_e2)?;
        if self.aberration_mode() == AberrationMode::TimeVarying && self.aberration_series.is_none() {
            return Err(SimError::config(
                "oscillating_aberration needs an aberration_series file",
            ));
        }
        self.detector_list()?;
        Ok(())
    }

    /// Active aberration mode: the first enabled flag in priority order
    pub fn aberration_mode(&self) -> AberrationMode {
        AberrationMode::from_flags(self.aberration_flags)
    }

    pub fn optics_config(&self) -> OpticsConfig {
        OpticsConfig {
            telescope: models::SURVEY_2P4M.clone(),
            aberrations: self.extra_aberrations.clone(),
            mode: self.aberration_mode(),
            gauss_psf: self.gauss_psf,
            los_motion: self.los_motion,
            los_motion_e1: self.los_motion_e1,
            los_motion_e2: self.los_motion_e2,
            random_los_motion: self.random_los_motion,
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            boresight_radius: self.boresight_radius,
            skip_stamps: self.skip_stamps,
            gain: self.gain,
        }
    }

    pub fn geometry(&self) -> Arc<GeometryTable> {
        Arc::new(GeometryTable::new(self.chip_enlarge, self.n_pix))
    }

    pub fn output_writer(&self) -> OutputWriter {
        OutputWriter::new(
            &self.out_path,
            self.tmpdir.clone(),
            &self.run_name,
            self.overwrite,
        )
    }

    /// Configured detectors, or all of them
    pub fn detector_list(&self) -> Result<Vec<DetectorId>> {
        match &self.detectors {
            Some(ids) => ids.iter().map(|&id| DetectorId::new(id)).collect(),
            None => Ok(DetectorId::all().collect()),
        }
    }

    pub fn load_schedule(&self) -> Result<DitherSchedule> {
        DitherSchedule::from_csv(&self.dither_file)
    }

    pub fn load_catalog(&self) -> Result<InMemoryCatalog> {
        InMemoryCatalog::from_csv(
            self.galaxy_catalog.as_deref(),
            self.star_catalog.as_deref(),
            self.transient_catalog.as_deref(),
        )
    }

    /// The aberration time series, when one is configured
    pub fn load_aberration_series(&self) -> Result<Option<Arc<AberrationTimeSeries>>> {
        self.aberration_series
            .as_ref()
            .map(|path| AberrationTimeSeries::from_csv(path).map(Arc::new))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config: SimConfig =
            serde_json::from_str(r#"{"dither_file": "d.csv", "run_name": "wide"}"#).unwrap();
        assert_eq!(config.dither_file, PathBuf::from("d.csv"));
        assert_eq!(config.n_pix, DEFAULT_PIXELS);
        assert!(config.check_filter);
        assert_eq!(config.aberration_mode(), AberrationMode::None);
        assert_eq!(config.detector_list().unwrap().len(), 18);
        config.validate().unwrap();
    }

    #[test]
    fn test_flags_resolve_in_priority_order() {
        let config: SimConfig = serde_json::from_str(
            r#"{"random_aberration": true, "oscillating_aberration": true, "aberration_series": "s.csv"}"#,
        )
        .unwrap();
        assert_eq!(config.aberration_mode(), AberrationMode::DetectorRandom);
        assert_eq!(config.optics_config().mode, AberrationMode::DetectorRandom);
    }

    #[test]
    fn test_filter_parsed_from_name() {
        let config: SimConfig = serde_json::from_str(r#"{"filter": "H158"}"#).unwrap();
        assert_eq!(config.filter, Some(Filter::H158));
        assert!(serde_json::from_str::<SimConfig>(r#"{"filter": "X999"}"#).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let partial_shear = SimConfig {
            los_motion: Some(0.01),
            los_motion_e1: Some(0.1),
            ..SimConfig::default()
        };
        assert!(matches!(partial_shear.validate(), Err(SimError::Configuration(_))));

        let bad_detector = SimConfig {
            detectors: Some(vec![3, 19]),
            ..SimConfig::default()
        };
        assert!(bad_detector.validate().is_err());

        let no_series = SimConfig {
            aberration_flags: AberrationFlags {
                oscillating_aberration: true,
                ..AberrationFlags::default()
            },
            ..SimConfig::default()
        };
        assert!(no_series.validate().is_err());

        let zero_gain = SimConfig {
            gain: 0.0,
            ..SimConfig::default()
        };
        assert!(zero_gain.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"detectors": [1, 2], "workers": 4}"#).unwrap();
        let config = SimConfig::load(&path).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(
            config.detector_list().unwrap(),
            vec![DetectorId::new(1).unwrap(), DetectorId::new(2).unwrap()]
        );
    }
}
