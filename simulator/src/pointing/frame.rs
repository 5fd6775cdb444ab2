//! Pointing frame: the telescope pose for one dither plus the bound detector.
//!
//! A frame moves through three states. `Unbound` frames can do nothing but
//! bind a dither; `DitherBound` frames can project to the focal plane and run
//! neighbor searches around the boresight; `DetectorBound` frames additionally
//! test detector containment and search around the detector's sky center.
//! Rebinding either level recomputes everything downstream of it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use ndarray::{Array1, ArrayView1, Zip};

use super::dither::{mjd_to_datetime, DitherSchedule, SECONDS_PER_DAY};
use super::wcs::WcsProvider;
use crate::error::{Result, SimError};
use crate::hardware::{DetectorId, GeometryTable};
use crate::photometry::Filter;
use crate::star_math::{chord_for_angle, radec_to_xyz, Boresight, Pose};

/// Binding level of a [`PointingFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Unbound,
    DitherBound,
    DetectorBound,
}

/// Per-object activity windows (MJD, inclusive on both ends).
#[derive(Debug, Clone, Copy)]
pub struct DateWindows<'a> {
    pub start_mjd: ArrayView1<'a, f64>,
    pub end_mjd: ArrayView1<'a, f64>,
}

#[derive(Debug, Clone)]
struct DitherBinding {
    index: usize,
    boresight: Boresight,
    date_mjd: f64,
    mission_start_mjd: f64,
}

#[derive(Debug, Clone)]
struct DetectorBinding {
    id: DetectorId,
    sky_center: (f64, f64),
    center_xyz: Vector3<f64>,
}

pub struct PointingFrame {
    geometry: Arc<GeometryTable>,
    wcs: Arc<dyn WcsProvider>,
    fixed_filter: Option<Filter>,
    filter: Option<Filter>,
    check_filter: bool,
    rank: usize,
    dither: Option<DitherBinding>,
    detector: Option<DetectorBinding>,
}

impl PointingFrame {
    /// Create an unbound frame.
    ///
    /// `filter` fixes the filter for every dither bound later; when `None`
    /// the frame adopts the filter recorded in the schedule row.
    pub fn new(
        geometry: Arc<GeometryTable>,
        wcs: Arc<dyn WcsProvider>,
        filter: Option<Filter>,
        check_filter: bool,
        rank: usize,
    ) -> Self {
        Self {
            geometry,
            wcs,
            fixed_filter: filter,
            filter,
            check_filter,
            rank,
            dither: None,
            detector: None,
        }
    }

    pub fn state(&self) -> FrameState {
        match (&self.dither, &self.detector) {
            (None, _) => FrameState::Unbound,
            (Some(_), None) => FrameState::DitherBound,
            (Some(_), Some(_)) => FrameState::DetectorBound,
        }
    }

    pub fn geometry(&self) -> &Arc<GeometryTable> {
        &self.geometry
    }

    /// Bind the pointing at `index` in the schedule.
    pub fn bind_dither(&mut self, schedule: &DitherSchedule, index: usize) -> Result<()> {
        let row = schedule.get(index)?;

        if let Some(fixed) = self.fixed_filter {
            if self.check_filter && fixed != row.filter {
                return Err(SimError::config(format!(
                    "Requested filter {fixed} and dither {index} pointing ({}) do not match",
                    row.filter
                )));
            }
        }
        self.filter = Some(self.fixed_filter.unwrap_or(row.filter));

        let mission_start_mjd = schedule.mission_start_mjd().unwrap_or(row.date);
        self.dither = Some(DitherBinding {
            index,
            boresight: Boresight::new(row.pose()),
            date_mjd: row.date,
            mission_start_mjd,
        });
        log::debug!(
            "Bound dither {index}: ra={:.5} dec={:.5} pa={:.3} mjd={:.5}",
            row.ra,
            row.dec,
            row.pa,
            row.date
        );

        if let Some(bound) = self.detector.take() {
            self.bind_detector(bound.id)?;
        }
        Ok(())
    }

    /// Assign a detector and locate its center on the sky.
    pub fn bind_detector(&mut self, id: DetectorId) -> Result<()> {
        let dither = self
            .dither
            .as_ref()
            .ok_or_else(|| SimError::state("no dither bound; cannot assign a detector"))?;

        let mapping = self.wcs.mapping(dither.boresight.pose(), dither.date_mjd, id)?;
        let half = self.geometry.half_size();
        let (ra, dec) = mapping.to_world(half, half)?;

        if self.rank == 0 {
            log::info!(
                "Detector {id} is at position {:.6} {:.6}",
                ra.to_degrees(),
                dec.to_degrees()
            );
        }

        self.detector = Some(DetectorBinding {
            id,
            sky_center: (ra, dec),
            center_xyz: radec_to_xyz(ra, dec),
        });
        Ok(())
    }

    fn dither_binding(&self) -> Result<&DitherBinding> {
        self.dither
            .as_ref()
            .ok_or_else(|| SimError::state("no dither defined to check positions against"))
    }

    fn detector_binding(&self) -> Result<&DetectorBinding> {
        self.dither_binding()?;
        self.detector
            .as_ref()
            .ok_or_else(|| SimError::state("no detector defined to check positions against"))
    }

    pub fn dither_index(&self) -> Result<usize> {
        Ok(self.dither_binding()?.index)
    }

    pub fn pose(&self) -> Result<Pose> {
        Ok(self.dither_binding()?.boresight.pose())
    }

    /// Observation date of the bound dither (MJD)
    pub fn date_mjd(&self) -> Result<f64> {
        Ok(self.dither_binding()?.date_mjd)
    }

    pub fn datetime(&self) -> Result<DateTime<Utc>> {
        let mjd = self.date_mjd()?;
        mjd_to_datetime(mjd)
            .ok_or_else(|| SimError::config(format!("date {mjd} is not a representable MJD")))
    }

    /// Seconds elapsed since the first pointing of the schedule
    pub fn elapsed_mission_seconds(&self) -> Result<f64> {
        let dither = self.dither_binding()?;
        Ok((dither.date_mjd - dither.mission_start_mjd) * SECONDS_PER_DAY)
    }

    pub fn filter(&self) -> Option<Filter> {
        self.filter
    }

    pub fn detector(&self) -> Result<DetectorId> {
        Ok(self.detector_binding()?.id)
    }

    /// Sky position of the bound detector's central pixel (radians)
    pub fn detector_sky_center(&self) -> Result<(f64, f64)> {
        Ok(self.detector_binding()?.sky_center)
    }

    /// Project a sky position (radians) into focal-plane chip units.
    pub fn project_to_chip(&self, ra: f64, dec: f64) -> Result<(f64, f64)> {
        Ok(self.dither_binding()?.boresight.to_focal_plane(ra, dec))
    }

    pub fn project_to_chip_batch(
        &self,
        ra: ArrayView1<f64>,
        dec: ArrayView1<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        Ok(self
            .dither_binding()?
            .boresight
            .to_focal_plane_batch(ra, dec))
    }

    /// Project a sky position onto the bound detector's pixel grid.
    pub fn project_to_pixel(&self, ra: f64, dec: f64) -> Result<(f64, f64)> {
        let detector = self.detector_binding()?.id;
        let (x, y) = self.project_to_chip(ra, dec)?;
        Ok(self.geometry.chip_to_pixel(detector, x, y))
    }

    /// Does the sky position fall on the bound detector?
    pub fn contains_detector(&self, ra: f64, dec: f64) -> Result<bool> {
        let detector = self.detector_binding()?.id;
        let boresight = &self.dither_binding()?.boresight;
        if !boresight.faces(ra, dec) {
            return Ok(false);
        }
        let (x, y) = boresight.to_focal_plane(ra, dec);
        Ok(self.geometry.contains(detector, x, y))
    }

    /// Indices of the positions that fall on the bound detector.
    pub fn contains_detector_batch(
        &self,
        ra: ArrayView1<f64>,
        dec: ArrayView1<f64>,
    ) -> Result<Vec<usize>> {
        let detector = self.detector_binding()?.id;
        let boresight = &self.dither_binding()?.boresight;
        let (xs, ys) = boresight.to_focal_plane_batch(ra, dec);
        Ok(self
            .geometry
            .contains_batch(detector, xs.view(), ys.view())
            .into_iter()
            .filter(|&i| boresight.faces(ra[i], dec[i]))
            .collect())
    }

    /// Indices of the positions within `radius` (radians) of the boresight.
    ///
    /// With `windows`, positions are kept only when the pointing date lies
    /// inside the object's activity window.
    pub fn angular_neighbors(
        &self,
        ra: ArrayView1<f64>,
        dec: ArrayView1<f64>,
        radius: f64,
        windows: Option<DateWindows<'_>>,
    ) -> Result<Vec<usize>> {
        let dither = self.dither_binding()?;
        Ok(neighbors_of(
            dither.boresight.axis(),
            ra,
            dec,
            radius,
            windows,
            dither.date_mjd,
        ))
    }

    /// Like [`angular_neighbors`](Self::angular_neighbors), centered on the
    /// bound detector instead of the boresight.
    pub fn detector_neighbors(
        &self,
        ra: ArrayView1<f64>,
        dec: ArrayView1<f64>,
        radius: f64,
        windows: Option<DateWindows<'_>>,
    ) -> Result<Vec<usize>> {
        let detector = self.detector_binding()?;
        let date = self.dither_binding()?.date_mjd;
        Ok(neighbors_of(
            &detector.center_xyz,
            ra,
            dec,
            radius,
            windows,
            date,
        ))
    }
}

fn neighbors_of(
    center: &Vector3<f64>,
    ra: ArrayView1<f64>,
    dec: ArrayView1<f64>,
    radius: f64,
    windows: Option<DateWindows<'_>>,
    date_mjd: f64,
) -> Vec<usize> {
    let max_chord = chord_for_angle(radius);
    let everything = radius >= std::f64::consts::PI;

    let near = Zip::from(&ra).and(&dec).map_collect(|&ra, &dec| {
        everything || (radec_to_xyz(ra, dec) - center).norm() <= max_chord
    });

    near.iter()
        .enumerate()
        .filter(|&(_, &close)| close)
        .map(|(i, _)| i)
        .filter(|&i| match &windows {
            Some(w) => w.start_mjd[i] <= date_mjd && date_mjd <= w.end_mjd[i],
            None => true,
        })
        .collect()
}

impl std::fmt::Debug for PointingFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointingFrame")
            .field("state", &self.state())
            .field("filter", &self.filter)
            .field("dither", &self.dither.as_ref().map(|d| d.index))
            .field("detector", &self.detector.as_ref().map(|d| d.id))
            .finish()
    }
}
