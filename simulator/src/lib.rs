//! Space-telescope survey image simulation
//!
//! This crate projects catalog objects onto the detectors of a wide-field
//! focal plane, renders them through a per-detector optics model and
//! accumulates detector images and truth tables across a pool of workers.

pub mod algo;
pub mod config;
pub mod error;
pub mod hardware;
pub mod io;
pub mod observation;
pub mod optics;
pub mod photometry;
pub mod pipeline;
pub mod pointing;
pub mod sims;
pub mod star_math;

// Re-exports for easier access
pub use config::SimConfig;
pub use error::{Result, SimError};
pub use hardware::{DetectorId, GeometryTable, TelescopeConfig};
pub use observation::Observation;
pub use optics::{AberrationMode, OpticsModel};
pub use photometry::Filter;
pub use pipeline::{AccumulationPipeline, ObjectClass, PointingOutcome};
pub use pointing::{DitherSchedule, PointingFrame};
