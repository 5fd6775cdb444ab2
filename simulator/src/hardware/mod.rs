//! Hardware module: detector ids, focal-plane layout and telescope optics

pub mod detector;
pub mod focal_plane;
pub mod telescope;

pub use detector::{DetectorId, N_DETECTORS};
pub use focal_plane::{GeometryTable, CHIP_WIDTH_RAD, DEFAULT_CHIP_ENLARGE, DEFAULT_PIXELS};
pub use telescope::TelescopeConfig;
