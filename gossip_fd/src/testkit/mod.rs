//! Logging, unreliable delivery and a deterministic simulator for whole clusters of detectors.

mod failure_config;
mod logging;
mod simulation;

#[rustfmt::skip]
pub use {
  failure_config::DELAY,
  failure_config::FailureConfig,
  failure_config::FailureConfigMap,
  failure_config::FailureMode,
  failure_config::PACKET_DROP,
  logging::Logger,
  logging::LoggerMsg,
  logging::LogLevel,
  simulation::SimReport,
  simulation::Simulation,
  simulation::SimTimer,
};
