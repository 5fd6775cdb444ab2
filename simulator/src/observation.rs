//! A pointing frame paired with the optics model that follows it.
//!
//! Binding a detector (or moving to another dither while a detector is
//! bound) rebuilds the optics, so the PSF cache never outlives the pointing
//! it was built for.

use crate::error::Result;
use crate::hardware::DetectorId;
use crate::optics::OpticsModel;
use crate::pointing::{DitherSchedule, FrameState, PointingFrame};

#[derive(Debug)]
pub struct Observation {
    pub frame: PointingFrame,
    pub optics: OpticsModel,
}

impl Observation {
    pub fn new(frame: PointingFrame, optics: OpticsModel) -> Self {
        Self { frame, optics }
    }

    pub fn bind_dither(&mut self, schedule: &DitherSchedule, index: usize) -> Result<()> {
        self.frame.bind_dither(schedule, index)?;
        if self.frame.state() == FrameState::DetectorBound {
            self.optics.rebuild(&self.frame)?;
        }
        Ok(())
    }

    pub fn bind_detector(&mut self, detector: DetectorId) -> Result<()> {
        self.frame.bind_detector(detector)?;
        self.optics.rebuild(&self.frame)
    }
}
