//! Photometric bookkeeping: the survey filter set and magnitude conversions

pub mod filters;

pub use filters::Filter;

/// Flux in detector counts for an AB magnitude given the band zeropoint
pub fn mag_to_flux(mag: f64, zeropoint: f64) -> f64 {
    10f64.powf(-0.4 * (mag - zeropoint))
}
