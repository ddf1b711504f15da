//! The gossip-style failure detector.
//!
//! Each node runs one [`NodeController`]. The tracker starts it with an [`ExperimentParams`],
//! after which it:
//! - pushes its heartbeat vector to a random peer every `gossip_time`, favouring peers it has not
//!   heard of in a while ([`GossipEngine`]),
//! - marks a peer Failed when the peer's counter has not risen for `fail_time`, reports it to the
//!   tracker, and removes it `fail_time * CLEANUP_FACTOR` later ([`FailureDetector`]),
//! - multicasts its vector to everyone with a probability that grows every
//!   [`CATASTROPHE_INTERVAL`] it has not ([`Catastrophe`]).
//!
//! The controller does not know about sockets or clocks. It talks to the world through an
//! [`Environment`]: [`DetectorActor`] runs it on a [`Node`](crate::core::Node), and
//! [`Simulation`](crate::testkit::Simulation) runs many of them on a virtual clock.

use crate::testkit::LogLevel;
use std::time::Duration;

mod actor;
mod catastrophe;
mod controller;
mod environment;
mod failure;
mod gossip;
mod messages;
mod peer_state;
mod peer_table;

pub const LOG_LEVEL: LogLevel = LogLevel::Info;

pub const CATASTROPHE_INTERVAL: Duration = Duration::from_millis(1000);
pub const CLEANUP_FACTOR: u32 = 2;

pub const DEFAULT_GOSSIP_TIME: Duration = Duration::from_millis(1000);
pub const DEFAULT_FAIL_TIME: Duration = Duration::from_millis(2500);
pub const DEFAULT_MULTICAST_PARAM: f64 = 3.0;
pub const DEFAULT_MULTICAST_MAX_WAIT: u64 = 20;

#[cfg(test)]
pub(crate) use environment::test_env;

#[rustfmt::skip]
pub use {
  actor::DetectorActor,
  catastrophe::Catastrophe,
  catastrophe::probability,
  controller::ControllerState,
  controller::NodeController,
  controller::RunState,
  environment::Environment,
  failure::FailureDetector,
  gossip::GossipEngine,
  messages::Beats,
  messages::beats_to_string,
  messages::DetectorMsg,
  messages::DetectorRemoteMsg,
  messages::Epoch,
  messages::ExperimentParams,
  messages::node_dest,
  messages::NODE_NAME,
  messages::tracker_dest,
  messages::TrackerRemoteMsg,
  messages::TRACKER_NAME,
  peer_state::PeerState,
  peer_state::PeerStatus,
  peer_table::PeerTable,
  peer_table::PeerTableError,
  peer_table::quiescence_weight,
};
