//! Optics model: aberration modes, PSF construction and per-detector caching

pub mod aberration;
pub mod model;
pub mod psf;

pub use aberration::{AberrationFlags, AberrationMode, AberrationTimeSeries};
pub use model::{OpticsConfig, OpticsModel, PsfKey};
pub use psf::{LosSmear, Psf, PsfCore};
