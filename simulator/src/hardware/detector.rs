//! Detector (chip) identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Number of physical detectors in the focal plane
pub const N_DETECTORS: usize = 18;

/// Validated detector id in `1..=N_DETECTORS`.
///
/// Holding a `DetectorId` is proof the id names a physical detector, so the
/// geometry and optics lookups keyed by it cannot fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DetectorId(u8);

impl DetectorId {
    pub fn new(id: u8) -> Result<Self> {
        if id == 0 || id as usize > N_DETECTORS {
            return Err(SimError::config(format!(
                "detector id {id} outside 1..={N_DETECTORS}"
            )));
        }
        Ok(Self(id))
    }

    /// The 1-based id as stored in truth tables and file names
    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based row in per-detector lookup tables
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Every detector in the focal plane, in id order
    pub fn all() -> impl Iterator<Item = DetectorId> {
        (1..=N_DETECTORS as u8).map(DetectorId)
    }

    /// Seed for the per-detector deterministic generators
    pub fn seed(self) -> u64 {
        self.0 as u64
    }
}

impl TryFrom<u8> for DetectorId {
    type Error = SimError;

    fn try_from(id: u8) -> Result<Self> {
        DetectorId::new(id)
    }
}

impl From<DetectorId> for u8 {
    fn from(id: DetectorId) -> u8 {
        id.0
    }
}

impl fmt::Display for DetectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
