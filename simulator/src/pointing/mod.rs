//! Pointing geometry: the dither schedule, world-coordinate mappings and the
//! per-dither frame used for coordinate transforms and footprint tests.

pub mod dither;
pub mod frame;
pub mod wcs;

pub use dither::{mjd_to_datetime, DitherRow, DitherSchedule};
pub use frame::{DateWindows, FrameState, PointingFrame};
pub use wcs::{FocalPlaneWcs, SkyMapping, WcsProvider};
