//! Drivers that run the pipeline over a survey

pub mod survey_runner;

pub use survey_runner::{run_pointing, run_survey, Survey, SurveySummary};
