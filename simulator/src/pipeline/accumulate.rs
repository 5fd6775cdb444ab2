//! Per-pointing accumulation across the worker pool.
//!
//! Every worker runs [`AccumulationPipeline::run`] for the same bound
//! pointing against its own catalog partition. Rendered objects are streamed
//! to the worker's stamp files, recorded in an index table and added into
//! the worker's detector image. The images are then summed on the
//! coordinator, which also receives every worker's index rows and writes the
//! final image and truth tables.

use std::path::PathBuf;

use log::{debug, info};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::catalog::{CatalogProvider, ObjectClass, ObjectTable};
use super::comm::Communicator;
use super::render::{add_stamp, RenderStep, Renderer, Stamp, StampRecord};
use crate::error::{Result, SimError};
use crate::hardware::DetectorId;
use crate::io::fits::ImageHeader;
use crate::io::OutputWriter;
use crate::observation::Observation;
use crate::photometry::Filter;
use crate::pointing::PointingFrame;

/// Catalog index of an attempted but unrealized object
pub const UNREALIZED: i64 = -999;

/// Unit written into the image header
pub const IMAGE_UNIT: &str = "electrons";

/// One row of a truth table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub ind: i64,
    pub sca: i64,
    pub dither: i64,
    pub x: f64,
    pub y: f64,
    pub ra: f64,
    pub dec: f64,
    pub mag: f64,
    pub stamp: i64,
    pub hostid: i64,
}

impl IndexRow {
    pub fn unrealized() -> Self {
        Self {
            ind: UNREALIZED,
            sca: 0,
            dither: 0,
            x: 0.0,
            y: 0.0,
            ra: 0.0,
            dec: 0.0,
            mag: 0.0,
            stamp: 0,
            hostid: -1,
        }
    }

    pub fn is_realized(&self) -> bool {
        self.ind != UNREALIZED
    }

    /// Truth row for a rendered object on `detector` at `dither`
    pub fn from_record(record: &StampRecord, detector: DetectorId, dither: usize) -> Result<Self> {
        let dither = i64::try_from(dither)
            .map_err(|_| SimError::config(format!("dither {dither} does not fit a truth column")))?;
        Ok(Self {
            ind: record.ind,
            sca: i64::from(detector.get()),
            dither,
            x: record.x,
            y: record.y,
            ra: record.ra,
            dec: record.dec,
            mag: record.mag,
            stamp: record.stamp,
            hostid: record.hostid.unwrap_or(-1),
        })
    }
}

/// Index rows of one class on one worker.
///
/// One slot per candidate is reserved up front; slots the renderer never
/// fills keep the [`UNREALIZED`] sentinel.
#[derive(Debug, Clone)]
pub struct IndexTable {
    class: ObjectClass,
    rows: Vec<IndexRow>,
    filled: usize,
}

impl IndexTable {
    pub fn with_candidates(class: ObjectClass, n: usize) -> Self {
        Self {
            class,
            rows: vec![IndexRow::unrealized(); n],
            filled: 0,
        }
    }

    pub fn class(&self) -> ObjectClass {
        self.class
    }

    pub fn record(&mut self, row: IndexRow) {
        match self.rows.get_mut(self.filled) {
            Some(slot) => *slot = row,
            None => self.rows.push(row),
        }
        self.filled += 1;
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Every slot, sentinels included
    pub fn rows(&self) -> &[IndexRow] {
        &self.rows
    }

    pub fn realized(&self) -> Vec<IndexRow> {
        self.rows.iter().copied().filter(IndexRow::is_realized).collect()
    }
}

/// A worker's partial detector image.
#[derive(Debug, Clone)]
pub struct DetectorImage {
    pixels: Array2<f64>,
}

impl DetectorImage {
    pub fn new(n_pix: usize) -> Self {
        Self {
            pixels: Array2::zeros((n_pix, n_pix)),
        }
    }

    pub fn add(&mut self, stamp: &Stamp) {
        add_stamp(&mut self.pixels, stamp);
    }

    pub fn pixels(&self) -> &Array2<f64> {
        &self.pixels
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.pixels
    }
}

/// Rows of `table` that land on the frame's bound detector.
///
/// Objects are first cut to `boresight_radius` around the pointing; time
/// windowed classes also need the pointing date inside their window.
pub fn candidates(
    frame: &PointingFrame,
    table: &ObjectTable,
    class: ObjectClass,
    boresight_radius: f64,
) -> Result<Vec<usize>> {
    let windows = class.is_time_windowed().then(|| table.windows());
    let near = frame.angular_neighbors(table.ra.view(), table.dec.view(), boresight_radius, windows)?;
    if near.is_empty() {
        // An unbound detector is still an error
        frame.detector()?;
        return Ok(near);
    }

    let near_table = table.select(&near);
    let on_chip = frame.contains_detector_batch(near_table.ra.view(), near_table.dec.view())?;
    Ok(on_chip.into_iter().map(|k| near[k]).collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    /// Pre-cut radius around the boresight, radians
    pub boresight_radius: f64,
    pub skip_stamps: bool,
    pub gain: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            boresight_radius: 0.009,
            skip_stamps: false,
            gain: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointingOutcome {
    /// Nothing near the pointing on any worker
    Skipped,
    /// Contributed to the reduction; the coordinator writes the output
    Contributed,
    /// Coordinator only
    Written { image: PathBuf, truth: Vec<PathBuf> },
}

/// Drives one worker through one (filter, dither, detector) unit.
#[derive(Debug, Clone)]
pub struct AccumulationPipeline {
    output: OutputWriter,
    options: PipelineOptions,
}

impl AccumulationPipeline {
    pub fn new(output: OutputWriter, options: PipelineOptions) -> Self {
        Self { output, options }
    }

    pub fn output(&self) -> &OutputWriter {
        &self.output
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn run(
        &self,
        obs: &mut Observation,
        catalog: &dyn CatalogProvider,
        renderer: &mut dyn Renderer,
        comm: &dyn Communicator,
    ) -> Result<PointingOutcome> {
        let detector = obs.frame.detector()?;
        let dither = obs.frame.dither_index()?;
        let filter = obs
            .frame
            .filter()
            .ok_or_else(|| SimError::state("pointing has no filter"))?;
        let rank = comm.rank();

        let mut selected = Vec::with_capacity(ObjectClass::ALL.len());
        for class in ObjectClass::ALL {
            let rows = candidates(
                &obs.frame,
                catalog.table(class),
                class,
                self.options.boresight_radius,
            )?;
            selected.push((class, rows));
        }

        let has_work = selected.iter().any(|(_, rows)| !rows.is_empty());
        if !comm.any(has_work)? {
            if comm.is_root() {
                info!("skipping due to no objects near pointing");
            }
            return Ok(PointingOutcome::Skipped);
        }

        let mut image = DetectorImage::new(obs.frame.geometry().n_pix());
        let mut tables = Vec::with_capacity(selected.len());
        for (class, rows) in selected {
            info!(
                "Attempting to simulate {} {} for SCA {} and dither {} (worker {}).",
                rows.len(),
                class.plural(),
                detector,
                dither,
                rank
            );
            let table = self.accumulate_class(
                obs, catalog, renderer, class, rows, &mut image, filter, rank,
            )?;
            debug!("Worker {rank} realized {} {}", table.len(), class.plural());
            tables.push(table);
        }

        let summed = comm.reduce_sum(image.into_inner())?;
        let mut gathered = Vec::with_capacity(tables.len());
        for table in &tables {
            gathered.push((table.class(), comm.gather_rows(table.class(), table.realized())?));
        }

        let Some(summed) = summed else {
            return Ok(PointingOutcome::Contributed);
        };

        let pixels = finalize_image(summed, self.options.gain);
        let header = self.header(&obs.frame, filter)?;
        let image = self
            .output
            .write_image(&pixels, &header, filter, dither, detector)?;

        // Galaxies come first in class order and their table marks the unit
        // done, so the tables are written back to front
        let mut truth = Vec::with_capacity(gathered.len());
        for (class, rows) in gathered.into_iter().rev() {
            let rows = rows.unwrap_or_default();
            truth.push(self.output.write_truth(class, &rows, filter, dither, detector)?);
        }
        truth.reverse();
        Ok(PointingOutcome::Written { image, truth })
    }

    #[allow(clippy::too_many_arguments)]
    fn accumulate_class(
        &self,
        obs: &mut Observation,
        catalog: &dyn CatalogProvider,
        renderer: &mut dyn Renderer,
        class: ObjectClass,
        rows: Vec<usize>,
        image: &mut DetectorImage,
        filter: Filter,
        rank: usize,
    ) -> Result<IndexTable> {
        let detector = obs.frame.detector()?;
        let dither = obs.frame.dither_index()?;

        let mut stream = if self.options.skip_stamps || rows.is_empty() {
            None
        } else {
            Some(self.output.open_stream(class, filter, dither, detector, rank)?)
        };

        let mut table = IndexTable::with_candidates(class, rows.len());
        renderer.start(class, rows);
        loop {
            match renderer.advance(obs, catalog)? {
                RenderStep::Done => break,
                RenderStep::Empty => continue,
                RenderStep::Rendered(record) => {
                    if let Some(stream) = stream.as_mut() {
                        stream.append(&record)?;
                    }
                    table.record(IndexRow::from_record(&record, detector, dither)?);
                    image.add(&record.image);
                }
            }
        }

        if let Some(stream) = stream {
            let durable = self.output.stamp_path(class, filter, dither, detector, rank);
            self.output.finish_stream(stream, &durable)?;
        }
        Ok(table)
    }

    fn header(&self, frame: &PointingFrame, filter: Filter) -> Result<ImageHeader> {
        let pose = frame.pose()?;
        Ok(ImageHeader {
            filter: filter.name().to_string(),
            dither: frame.dither_index()? as i64,
            sca: i64::from(frame.detector()?.get()),
            ra_targ: pose.ra.to_degrees(),
            dec_targ: pose.dec.to_degrees(),
            pa_fpa: pose.pa.to_degrees(),
            mjd_obs: frame.date_mjd()?,
            date_obs: frame.datetime()?.to_rfc3339(),
            gain: self.options.gain,
            bunit: IMAGE_UNIT.to_string(),
        })
    }
}

/// Scale the summed image by the gain and narrow it to 32-bit floats
pub fn finalize_image(summed: Array2<f64>, gain: f64) -> Array2<f32> {
    summed.mapv(|v| (v / gain) as f32)
}
