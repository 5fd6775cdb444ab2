//! Error types shared across the simulation pipeline.
//!
//! Configuration and state errors are raised immediately and never retried
//! locally. Degenerate-but-valid inputs (an empty candidate set, a renderer
//! result without a usable stamp) are not errors and never surface here.

use std::path::PathBuf;

use thiserror::Error;

use crate::algo::misc::InterpError;

/// Errors that can occur while configuring or running a pointing simulation
#[derive(Error, Debug)]
pub enum SimError {
    /// Invalid or missing required parameter
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation invoked before its required binding
    #[error("state error: {0}")]
    State(String),

    /// Output artifact exists and the overwrite policy forbids replacing it
    #[error("output already exists: {}", .0.display())]
    OutputExists(PathBuf),

    /// Collective transfer between workers failed
    #[error("worker {rank} failed: {reason}")]
    Worker { rank: usize, reason: String },

    /// A collective partner left the group before the exchange finished
    #[error("worker {rank} lost worker {peer} during a collective")]
    PeerLost { rank: usize, peer: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FITS error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stamp encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("interpolation error: {0}")]
    Interp(#[from] InterpError),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Configuration(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        SimError::State(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
