//! Survey filter set.
//!
//! Bandpass and zeropoint tables live outside this crate; the simulation only
//! needs the filter identity (for file names, the schedule consistency check
//! and header metadata) and an effective wavelength for sizing the PSF core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Filter {
    R062,
    Z087,
    Y106,
    J129,
    H158,
    F184,
    W146,
    K213,
}

impl Filter {
    pub const ALL: [Filter; 8] = [
        Filter::R062,
        Filter::Z087,
        Filter::Y106,
        Filter::J129,
        Filter::H158,
        Filter::F184,
        Filter::W146,
        Filter::K213,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Filter::R062 => "R062",
            Filter::Z087 => "Z087",
            Filter::Y106 => "Y106",
            Filter::J129 => "J129",
            Filter::H158 => "H158",
            Filter::F184 => "F184",
            Filter::W146 => "W146",
            Filter::K213 => "K213",
        }
    }

    /// Effective wavelength of the bandpass in nanometers
    pub fn effective_wavelength_nm(self) -> f64 {
        match self {
            Filter::R062 => 620.0,
            Filter::Z087 => 869.0,
            Filter::Y106 => 1060.0,
            Filter::J129 => 1293.0,
            Filter::H158 => 1577.0,
            Filter::F184 => 1842.0,
            Filter::W146 => 1464.0,
            Filter::K213 => 2130.0,
        }
    }
}

impl FromStr for Filter {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Filter::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SimError::config(format!("Supplied invalid filter: {wanted}")))
    }
}

impl TryFrom<String> for Filter {
    type Error = SimError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Filter> for String {
    fn from(f: Filter) -> String {
        f.name().to_string()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        for filter in Filter::ALL {
            assert_eq!(filter.name().parse::<Filter>().unwrap(), filter);
        }
        assert_eq!("h158".parse::<Filter>().unwrap(), Filter::H158);
    }

    #[test]
    fn test_unknown_filter_is_configuration_error() {
        let err = "X999".parse::<Filter>().unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn test_wavelengths_increase_with_name() {
        assert!(Filter::R062.effective_wavelength_nm() < Filter::J129.effective_wavelength_nm());
        assert!(Filter::H158.effective_wavelength_nm() < Filter::K213.effective_wavelength_nm());
    }
}
