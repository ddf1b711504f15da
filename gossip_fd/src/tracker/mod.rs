//! The coordinator of experiments. Detectors register with the [`Tracker`], which plans an
//! [`Experiment`] for them, tells each detector when to start, when to crash and when to stop,
//! and collects the crashes they report.

use crate::testkit::LogLevel;

mod experiment;
mod tracker;

pub const LOG_LEVEL: LogLevel = LogLevel::Info;

#[rustfmt::skip]
pub use {
  experiment::ExpectedCrash,
  experiment::Experiment,
  experiment::ExperimentError,
  experiment::ExperimentReport,
  experiment::ProtocolSettings,
  experiment::ReportedCrash,
  tracker::Tracker,
  tracker::TrackerConfig,
  tracker::TrackerMsg,
};
