use crate::core::{DeserializeError, Destination, Socket};
use crate::detector::{
  DEFAULT_FAIL_TIME, DEFAULT_GOSSIP_TIME, DEFAULT_MULTICAST_MAX_WAIT,
  DEFAULT_MULTICAST_PARAM,
};
use im::OrdMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Heartbeat counters of every Correct peer a node knows of, as it sends them to others.
pub type Beats = OrdMap<Socket, u64>;

/// Numbers the runs of one controller. Every timer message carries the epoch it was scheduled
/// in, and a controller drops timers from any run but the current one.
pub type Epoch = u64;

pub const NODE_NAME: &str = "gsfd-node";
pub const TRACKER_NAME: &str = "gsfd-tracker";

pub fn node_dest() -> Destination<DetectorRemoteMsg> {
  Destination::new(NODE_NAME)
}

pub fn tracker_dest() -> Destination<TrackerRemoteMsg> {
  Destination::new(TRACKER_NAME)
}

pub fn beats_to_string(beats: &Beats) -> String {
  format!(
    "{{{}}}",
    beats.iter().map(|(s, b)| format!("{}: {}", s, b)).join(", ")
  )
}

/// Everything a node needs to take part in one experiment. Immutable for the length of the run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentParams {
  /// Every node taking part, the receiver included.
  pub peers: Vec<Socket>,
  /// If set, the receiver crashes itself this long after starting.
  pub self_crash: Option<Duration>,
  pub gossip_time: Duration,
  /// How long a peer's heartbeat may stay unchanged before the peer is considered failed.
  pub fail_time: Duration,
  /// Whether a node replies to gossip with its own vector.
  pub pull_by_gossip: bool,
  /// The exponent of the catastrophe multicast probability. Must be positive.
  pub multicast_param: f64,
  /// The number of reminders after which a catastrophe multicast is certain.
  pub multicast_max_wait: u64,
}
impl Default for ExperimentParams {
  fn default() -> Self {
    ExperimentParams {
      peers: Vec::new(),
      self_crash: None,
      gossip_time: DEFAULT_GOSSIP_TIME,
      fail_time: DEFAULT_FAIL_TIME,
      pull_by_gossip: false,
      multicast_param: DEFAULT_MULTICAST_PARAM,
      multicast_max_wait: DEFAULT_MULTICAST_MAX_WAIT,
    }
  }
}

/// Messages a detector accepts from the network. The socket in the peer messages identifies the
/// sender.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DetectorRemoteMsg {
  Start(ExperimentParams),
  Stop,
  Shutdown,
  Gossip(Socket, Beats),
  GossipReply(Socket, Beats),
  CatastropheMulticast(Socket, Beats),
}

#[derive(Debug, PartialEq)]
pub enum DetectorMsg {
  Remote(DetectorRemoteMsg),
  SelfCrash(Epoch),
  GossipReminder(Epoch),
  CatastropheReminder(Epoch),
  /// A fail timer for a peer, with the peer's generation when it was scheduled.
  Fail(Epoch, Socket, u64),
  Cleanup(Epoch, Socket, u64),
  Malformed(DeserializeError),
}
impl DetectorMsg {
  /// The run a timer message belongs to. `None` for everything that is not a timer.
  pub fn epoch(&self) -> Option<Epoch> {
    match self {
      DetectorMsg::SelfCrash(e) => Some(*e),
      DetectorMsg::GossipReminder(e) => Some(*e),
      DetectorMsg::CatastropheReminder(e) => Some(*e),
      DetectorMsg::Fail(e, _, _) => Some(*e),
      DetectorMsg::Cleanup(e, _, _) => Some(*e),
      DetectorMsg::Remote(_) | DetectorMsg::Malformed(_) => None,
    }
  }
}
impl From<DetectorRemoteMsg> for DetectorMsg {
  fn from(msg: DetectorRemoteMsg) -> Self {
    DetectorMsg::Remote(msg)
  }
}
impl From<DeserializeError> for DetectorMsg {
  fn from(e: DeserializeError) -> Self {
    DetectorMsg::Malformed(e)
  }
}

/// Messages the tracker accepts from detectors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerRemoteMsg {
  Registration(Socket),
  Crash(Socket),
  CrashReport { failed: Socket, reporter: Socket },
}

#[cfg(test)]
use crate::core::{deserialize, serialize, Host};

#[test]
fn test_remote_msg_serde() {
  let a = Socket::new(Host::from("127.0.0.1"), 5501);
  let b = Socket::new(Host::from("node-b"), 5502);
  let beats: Beats =
    vec![(a.clone(), 4u64), (b.clone(), 9u64)].into_iter().collect();
  let msg = DetectorRemoteMsg::Gossip(a.clone(), beats.clone());
  let bytes = serialize(&msg).unwrap();
  assert_eq!(deserialize::<DetectorRemoteMsg>(&bytes[..]).unwrap(), msg);
  assert_eq!(
    beats_to_string(&beats),
    "{node-b:5502: 9, 127.0.0.1:5501: 4}"
  );
  assert!(deserialize::<TrackerRemoteMsg>(&bytes[..]).is_err());
}

#[test]
fn test_only_timers_have_an_epoch() {
  let a = Socket::new(Host::from("127.0.0.1"), 5501);
  assert_eq!(DetectorMsg::SelfCrash(3).epoch(), Some(3));
  assert_eq!(DetectorMsg::GossipReminder(4).epoch(), Some(4));
  assert_eq!(DetectorMsg::Fail(5, a.clone(), 0).epoch(), Some(5));
  assert_eq!(DetectorMsg::Cleanup(6, a, 1).epoch(), Some(6));
  assert_eq!(DetectorMsg::Remote(DetectorRemoteMsg::Stop).epoch(), None);
}
