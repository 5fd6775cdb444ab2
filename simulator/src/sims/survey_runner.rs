//! Survey driver: runs the worker pool over (filter, dither, detector) units.
//!
//! Every worker of a unit builds its own observation and renderer, takes a
//! strided slice of the catalog and runs the accumulation pipeline. The
//! coordinator's outcome is the unit's outcome.

use std::sync::Arc;
use std::thread;

use log::{info, warn};

use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::hardware::{DetectorId, GeometryTable};
use crate::observation::Observation;
use crate::optics::{AberrationTimeSeries, OpticsModel};
use crate::photometry::Filter;
use crate::pipeline::{
    thread_group, AccumulationPipeline, CatalogProvider, Communicator, InMemoryCatalog,
    PointingOutcome, PsfStampRenderer, SoloComm, ROOT,
};
use crate::pointing::{DitherSchedule, FocalPlaneWcs, PointingFrame, WcsProvider};

/// Everything the workers share for a run
pub struct Survey {
    pub config: SimConfig,
    pub schedule: DitherSchedule,
    pub catalog: InMemoryCatalog,
    pub series: Option<Arc<AberrationTimeSeries>>,
    pub geometry: Arc<GeometryTable>,
    pub wcs: Arc<dyn WcsProvider>,
}

impl Survey {
    /// Load the schedule, catalogs and aberration series named by `config`
    pub fn load(config: SimConfig) -> Result<Self> {
        let schedule = config.load_schedule()?;
        let catalog = config.load_catalog()?;
        let series = config.load_aberration_series()?;
        Self::new(config, schedule, catalog, series)
    }

    pub fn new(
        config: SimConfig,
        schedule: DitherSchedule,
        catalog: InMemoryCatalog,
        series: Option<Arc<AberrationTimeSeries>>,
    ) -> Result<Self> {
        config.validate()?;
        let geometry = config.geometry();
        let wcs: Arc<dyn WcsProvider> = Arc::new(FocalPlaneWcs::new(geometry.clone()));
        Ok(Self {
            config,
            schedule,
            catalog,
            series,
            geometry,
            wcs,
        })
    }

    /// Filter a dither is simulated in
    pub fn filter_for(&self, dither: usize) -> Result<Filter> {
        match self.config.filter {
            Some(filter) => Ok(filter),
            None => Ok(self.schedule.get(dither)?.filter),
        }
    }

    /// Dithers to simulate: those in the configured filter, or the whole schedule
    pub fn dithers(&self) -> Vec<usize> {
        match self.config.filter {
            Some(filter) if self.config.check_filter => self.schedule.dithers_in(filter),
            _ => (0..self.schedule.len()).collect(),
        }
    }
}

impl std::fmt::Debug for Survey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Survey")
            .field("run_name", &self.config.run_name)
            .field("dithers", &self.schedule.len())
            .field("workers", &self.config.workers)
            .finish_non_exhaustive()
    }
}

fn run_worker(
    survey: &Survey,
    dither: usize,
    detector: DetectorId,
    catalog: &dyn CatalogProvider,
    comm: &dyn Communicator,
) -> Result<PointingOutcome> {
    let config = &survey.config;
    let frame = PointingFrame::new(
        survey.geometry.clone(),
        survey.wcs.clone(),
        config.filter,
        config.check_filter,
        comm.rank(),
    );
    let optics = OpticsModel::new(
        config.optics_config(),
        survey.geometry.clone(),
        survey.series.clone(),
    )?;
    let mut obs = Observation::new(frame, optics);
    obs.bind_dither(&survey.schedule, dither)?;
    obs.bind_detector(detector)?;

    let mut renderer = PsfStampRenderer::new(config.zeropoint);
    let pipeline = AccumulationPipeline::new(config.output_writer(), config.pipeline_options());
    pipeline.run(&mut obs, catalog, &mut renderer, comm)
}

/// Simulate one (dither, detector) unit with the configured worker count.
///
/// A failing worker aborts the unit. Its peers stop at their next collective
/// with [`SimError::PeerLost`]; the failure itself is what gets returned.
pub fn run_pointing(survey: &Survey, dither: usize, detector: DetectorId) -> Result<PointingOutcome> {
    let workers = survey.config.workers.max(1);
    if workers == 1 {
        return run_worker(survey, dither, detector, &survey.catalog, &SoloComm);
    }

    let results: Vec<Result<PointingOutcome>> = thread::scope(|s| {
        let handles: Vec<_> = thread_group(workers)
            .into_iter()
            .map(|comm| {
                s.spawn(move || {
                    let part = survey.catalog.partition(comm.rank(), comm.size());
                    run_worker(survey, dither, detector, &part, &comm)
                })
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle.join().unwrap_or_else(|_| {
                    Err(SimError::Worker {
                        rank,
                        reason: "worker thread panicked".to_string(),
                    })
                })
            })
            .collect()
    });

    let mut root = None;
    let mut lost = None;
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(outcome) if rank == ROOT => root = Some(outcome),
            Ok(_) => {}
            Err(err @ SimError::PeerLost { .. }) => {
                lost.get_or_insert(err);
            }
            Err(err) => {
                warn!("Worker {rank} failed on SCA {detector} dither {dither}: {err}");
                return Err(err);
            }
        }
    }
    if let Some(err) = lost {
        return Err(err);
    }
    root.ok_or_else(|| SimError::Worker {
        rank: ROOT,
        reason: "coordinator produced no outcome".to_string(),
    })
}

/// Tally of a survey run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurveySummary {
    pub written: usize,
    pub empty: usize,
    pub resumed: usize,
}

/// Run every requested (dither, detector) unit in order.
///
/// With `resume`, units whose truth table already exists are skipped.
pub fn run_survey(
    survey: &Survey,
    dithers: &[usize],
    detectors: &[DetectorId],
    resume: bool,
) -> Result<SurveySummary> {
    let output = survey.config.output_writer();
    let mut summary = SurveySummary::default();

    for &dither in dithers {
        let filter = survey.filter_for(dither)?;
        for &detector in detectors {
            if resume && output.already_simulated(detector, dither, filter) {
                info!("SCA {detector} dither {dither} ({filter}) already simulated, skipping");
                summary.resumed += 1;
                continue;
            }
            match run_pointing(survey, dither, detector)? {
                PointingOutcome::Written { .. } => summary.written += 1,
                PointingOutcome::Skipped => summary.empty += 1,
                PointingOutcome::Contributed => {
                    warn!("Coordinator reported no output for SCA {detector} dither {dither}")
                }
            }
        }
    }

    info!(
        "Survey {} finished: {} written, {} empty, {} resumed",
        survey.config.run_name, summary.written, summary.empty, summary.resumed
    );
    Ok(summary)
}
