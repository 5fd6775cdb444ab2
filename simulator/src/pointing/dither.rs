//! Dither schedule: the survey's list of pointings.
//!
//! Each row holds the boresight position and position angle in degrees, the
//! observation date as a Modified Julian Date, and the filter in use. The row
//! index is the dither index, the stable key used in file names and truth
//! tables.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::photometry::Filter;
use crate::star_math::Pose;

/// Seconds per day, for converting MJD differences to elapsed time
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// One pointing of the survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DitherRow {
    /// Boresight right ascension in degrees
    pub ra: f64,
    /// Boresight declination in degrees
    pub dec: f64,
    /// Focal-plane position angle in degrees
    pub pa: f64,
    /// Observation date (MJD)
    pub date: f64,
    pub filter: Filter,
}

impl DitherRow {
    pub fn pose(&self) -> Pose {
        Pose::from_degrees(self.ra, self.dec, self.pa)
    }
}

/// MJD of the Unix epoch (1970-01-01T00:00:00Z)
pub const MJD_UNIX_EPOCH: f64 = 40_587.0;

/// Convert a Modified Julian Date to a UTC timestamp (microsecond resolution)
pub fn mjd_to_datetime(mjd: f64) -> Option<DateTime<Utc>> {
    let micros = ((mjd - MJD_UNIX_EPOCH) * SECONDS_PER_DAY * 1.0e6).round() as i64;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

#[derive(Debug, Clone, Default)]
pub struct DitherSchedule {
    rows: Vec<DitherRow>,
}

impl DitherSchedule {
    pub fn new(rows: Vec<DitherRow>) -> Self {
        Self { rows }
    }

    /// Load a schedule from CSV with header `ra,dec,pa,date,filter`
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let rows = reader
            .deserialize::<DitherRow>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        log::debug!(
            "Loaded {} pointings from {}",
            rows.len(),
            path.as_ref().display()
        );
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row for a dither index; a missing index is a configuration error
    pub fn get(&self, dither: usize) -> Result<&DitherRow> {
        self.rows.get(dither).ok_or_else(|| {
            SimError::config(format!(
                "dither {dither} not in schedule of {} pointings",
                self.rows.len()
            ))
        })
    }

    /// Earliest observation date in the schedule (MJD)
    pub fn mission_start_mjd(&self) -> Option<f64> {
        self.rows.iter().map(|r| r.date).reduce(f64::min)
    }

    /// Dither indices observed through `filter`
    pub fn dithers_in(&self, filter: Filter) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(i, r)| (r.filter == filter).then_some(i))
            .collect()
    }
}
