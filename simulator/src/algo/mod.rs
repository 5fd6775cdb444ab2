//! Numerical helpers shared by the geometry and optics modules

pub mod misc;

pub use misc::{interp, linspace, InterpError, LinearInterpolator};
