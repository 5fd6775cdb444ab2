//! Renderer interface and the built-in PSF stamp renderer.
//!
//! A renderer is started once per object class with the candidate rows that
//! passed the footprint test, then advanced until it reports
//! [`RenderStep::Done`]. It may produce fewer results than candidates
//! ([`RenderStep::Empty`] for objects with no usable stamp) and the pipeline
//! never assumes a one-to-one correspondence.

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use super::catalog::{CatalogProvider, ObjectClass};
use crate::error::{Result, SimError};
use crate::observation::Observation;
use crate::photometry::mag_to_flux;

/// Rendered cutout placed on the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    /// Detector column of the stamp's first column
    pub x0: i64,
    /// Detector row of the stamp's first row
    pub y0: i64,
    pub pixels: Array2<f32>,
}

impl Stamp {
    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }

    /// Does any part of the stamp land on an `n_pix` square detector?
    pub fn overlaps(&self, n_pix: usize) -> bool {
        let n = n_pix as i64;
        self.x0 < n
            && self.y0 < n
            && self.x0 + self.width() as i64 > 0
            && self.y0 + self.height() as i64 > 0
    }
}

/// One realized object: truth values plus its stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampRecord {
    /// Index in the full catalog
    pub ind: i64,
    /// Detector pixel position
    pub x: f64,
    pub y: f64,
    /// Sky position, radians
    pub ra: f64,
    pub dec: f64,
    pub mag: f64,
    /// Stamp size in pixels
    pub stamp: i64,
    pub hostid: Option<i64>,
    pub image: Stamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderStep {
    /// No more objects for this class
    Done,
    /// An object was attempted but produced nothing usable
    Empty,
    Rendered(Box<StampRecord>),
}

/// Producer of rendered objects for one class at a time.
pub trait Renderer {
    /// Begin a class; `candidates` are rows of that class's catalog table
    fn start(&mut self, class: ObjectClass, candidates: Vec<usize>);

    /// Render the next object
    fn advance(
        &mut self,
        obs: &mut Observation,
        catalog: &dyn CatalogProvider,
    ) -> Result<RenderStep>;
}

/// Renders each candidate as the PSF (convolved with the object's intrinsic
/// Gaussian size) scaled to the object's flux.
#[derive(Debug)]
pub struct PsfStampRenderer {
    zeropoint: f64,
    class: Option<ObjectClass>,
    queue: std::vec::IntoIter<usize>,
}

impl PsfStampRenderer {
    pub fn new(zeropoint: f64) -> Self {
        Self {
            zeropoint,
            class: None,
            queue: Vec::new().into_iter(),
        }
    }
}

impl Renderer for PsfStampRenderer {
    fn start(&mut self, class: ObjectClass, candidates: Vec<usize>) {
        self.class = Some(class);
        self.queue = candidates.into_iter();
    }

    fn advance(
        &mut self,
        obs: &mut Observation,
        catalog: &dyn CatalogProvider,
    ) -> Result<RenderStep> {
        let class = self
            .class
            .ok_or_else(|| SimError::state("renderer advanced before start"))?;
        let Some(row) = self.queue.next() else {
            return Ok(RenderStep::Done);
        };

        let object = catalog.table(class).object(row);
        let detector = obs.frame.detector()?;
        let (x, y) = obs.frame.project_to_pixel(object.ra, object.dec)?;
        let psf = obs.optics.psf_for(detector, Some((x, y)))?;

        let geometry = obs.frame.geometry();
        let (cx, cy) = (x.round(), y.round());
        let extra_sigma = if class == ObjectClass::Galaxy {
            object.size
        } else {
            0.0
        };
        let kernel = psf.draw(
            geometry.pixel_scale_arcsec(),
            extra_sigma,
            (x - cx, y - cy),
            mag_to_flux(object.mag, self.zeropoint),
        );

        let half = (kernel.nrows() / 2) as i64;
        let image = Stamp {
            x0: cx as i64 - half,
            y0: cy as i64 - half,
            pixels: kernel.mapv(|v| v as f32),
        };
        if !image.overlaps(geometry.n_pix()) {
            return Ok(RenderStep::Empty);
        }

        Ok(RenderStep::Rendered(Box::new(StampRecord {
            ind: object.index as i64,
            x,
            y,
            ra: object.ra,
            dec: object.dec,
            mag: object.mag,
            stamp: image.width() as i64,
            hostid: class.has_host().then_some(object.hostid),
            image,
        })))
    }
}

/// Add `stamp` into `image`, dropping the parts that fall off the edges.
pub fn add_stamp(image: &mut Array2<f64>, stamp: &Stamp) {
    let (rows, cols) = image.dim();
    let row_lo = stamp.y0.max(0);
    let col_lo = stamp.x0.max(0);
    let row_hi = (stamp.y0 + stamp.height() as i64).min(rows as i64);
    let col_hi = (stamp.x0 + stamp.width() as i64).min(cols as i64);
    if row_lo >= row_hi || col_lo >= col_hi {
        return;
    }

    let src = stamp.pixels.slice(s![
        (row_lo - stamp.y0) as usize..(row_hi - stamp.y0) as usize,
        (col_lo - stamp.x0) as usize..(col_hi - stamp.x0) as usize
    ]);
    let mut dst = image.slice_mut(s![
        row_lo as usize..row_hi as usize,
        col_lo as usize..col_hi as usize
    ]);
    dst.zip_mut_with(&src, |d, &v| *d += v as f64);
}
