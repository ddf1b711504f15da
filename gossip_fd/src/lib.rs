//! A gossip-style failure detector, in the manner of "A Gossip-Style Failure Detection Service".
//!
//! Every node keeps a heartbeat counter for every peer it knows. Nodes periodically push their
//! vector of counters to a random peer, chosen with a bias towards peers that have not been heard
//! of in a while. A peer whose counter has not risen for a configured amount of time is reported
//! as failed, and forgotten some time later. When many nodes crash at once, random gossip alone
//! spreads information too slowly, so each node also multicasts its vector with a probability that
//! grows every second it has not done so.
//!
//! The crate is split in four parts:
//! - [`core`](crate::core): a small actor runtime. Actors, references, timers and UDP remoting.
//! - [`detector`](crate::detector): the detector itself. The protocol logic is a plain state
//!   machine, [`NodeController`](crate::detector::NodeController), driven through an
//!   [`Environment`](crate::detector::Environment). The
//!   [`DetectorActor`](crate::detector::DetectorActor) runs it on top of [`core`](crate::core).
//! - [`tracker`](crate::tracker): the coordinator that registers nodes, runs experiments and
//!   collects crash reports.
//! - [`testkit`](crate::testkit): logging, unreliable delivery and a discrete-event
//!   [`Simulation`](crate::testkit::Simulation) of many detectors.

pub mod core;
pub mod detector;
pub mod testkit;
pub mod tracker;
