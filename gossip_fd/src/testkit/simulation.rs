use crate::core::{Cancellable, Host, Socket};
use crate::detector::{
  DetectorMsg, DetectorRemoteMsg, Environment, ExperimentParams,
  NodeController, TrackerRemoteMsg,
};
use crate::testkit::{FailureConfigMap, LogLevel, LoggerMsg};
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::Duration;

/// A timer of a simulated node. Cancelling it marks its id, and the simulation skips marked
/// timers unless told to [`ignore_cancellation`](Simulation::ignore_cancellation).
#[derive(Debug)]
pub struct SimTimer {
  id: u64,
  cancelled: Rc<RefCell<HashSet<u64>>>,
}
impl SimTimer {
  pub(crate) fn new(id: u64, cancelled: Rc<RefCell<HashSet<u64>>>) -> SimTimer {
    SimTimer {
      id: id,
      cancelled: cancelled,
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }
}
impl Cancellable for SimTimer {
  fn cancel(&self) {
    self.cancelled.borrow_mut().insert(self.id);
  }
}

/// A message a simulated node sent to the tracker.
#[derive(Clone, Debug, PartialEq)]
pub struct SimReport {
  pub time: Duration,
  pub from: Socket,
  pub msg: TrackerRemoteMsg,
}

struct Event {
  time: u64,
  seq: u64,
  to: Socket,
  msg: DetectorMsg,
  timer: Option<u64>,
}
// Earliest first, ties broken by scheduling order.
impl PartialEq for Event {
  fn eq(&self, other: &Self) -> bool {
    self.time == other.time && self.seq == other.seq
  }
}
impl Eq for Event {}
impl PartialOrd for Event {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}
impl Ord for Event {
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .time
      .cmp(&self.time)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

struct SimNode {
  controller: NodeController<SimTimer>,
  rng: SmallRng,
}

enum Outgoing {
  Timer(u64, Duration, DetectorMsg),
  Send(Socket, DetectorRemoteMsg),
}

struct SimEnv<'a> {
  me: &'a Socket,
  now: u64,
  rng: &'a mut SmallRng,
  next_timer: &'a mut u64,
  cancelled: &'a Rc<RefCell<HashSet<u64>>>,
  out: Vec<Outgoing>,
  reports: Vec<TrackerRemoteMsg>,
  shutdown: bool,
  log_level: LogLevel,
}
impl Environment for SimEnv<'_> {
  type Timer = SimTimer;
  type Rng = SmallRng;

  fn me(&self) -> &Socket {
    self.me
  }

  fn schedule(&mut self, delay: Duration, msg: DetectorMsg) -> SimTimer {
    let id = *self.next_timer;
    *self.next_timer += 1;
    self.out.push(Outgoing::Timer(id, delay, msg));
    SimTimer::new(id, self.cancelled.clone())
  }

  fn send(&mut self, to: &Socket, msg: DetectorRemoteMsg) {
    self.out.push(Outgoing::Send(to.clone(), msg));
  }

  fn report(&mut self, msg: TrackerRemoteMsg) {
    self.reports.push(msg);
  }

  fn rng(&mut self) -> &mut SmallRng {
    self.rng
  }

  fn shutdown(&mut self) {
    self.shutdown = true;
  }

  fn log(&self, msg: LoggerMsg) {
    if let LoggerMsg::Log(level, s) = msg {
      if level >= self.log_level {
        println!("[{:>7}ms] {} {:?}: {}", self.now, self.me, level, s);
      }
    }
  }
}

/// A deterministic discrete-event simulation of a cluster of detectors. Time is virtual and
/// advances in milliseconds. Peer messages go through a [`FailureConfigMap`], keyed by the
/// receiver, and messages for the tracker are collected as [`SimReport`]s.
///
/// ```ignore
/// let mut sim = Simulation::new(42);
/// let nodes = sim.add_nodes(3);
/// sim.start_all(Duration::ZERO, &ExperimentParams::default());
/// sim.send_at(Duration::ZERO, &nodes[1], DetectorRemoteMsg::Stop);
/// sim.run_until(Duration::from_secs(10));
/// ```
pub struct Simulation {
  nodes: HashMap<Socket, SimNode>,
  queue: BinaryHeap<Event>,
  now: u64,
  seq: u64,
  next_timer: u64,
  cancelled: Rc<RefCell<HashSet<u64>>>,
  honor_cancellation: bool,
  fail_map: FailureConfigMap,
  rng: SmallRng,
  reports: Vec<SimReport>,
  log_level: LogLevel,
}
impl Simulation {
  pub fn new(seed: u64) -> Simulation {
    Simulation {
      nodes: HashMap::new(),
      queue: BinaryHeap::new(),
      now: 0,
      seq: 0,
      next_timer: 0,
      cancelled: Rc::new(RefCell::new(HashSet::new())),
      honor_cancellation: true,
      fail_map: FailureConfigMap::default(),
      rng: SmallRng::seed_from_u64(seed),
      reports: Vec::new(),
      log_level: LogLevel::Off,
    }
  }

  pub fn with_fail_map(mut self, fail_map: FailureConfigMap) -> Self {
    self.fail_map = fail_map;
    self
  }

  /// Delivers cancelled timers anyway, as a real runtime may when a timer fires just before it is
  /// cancelled.
  pub fn ignore_cancellation(mut self) -> Self {
    self.honor_cancellation = false;
    self
  }

  pub fn with_log_level(mut self, level: LogLevel) -> Self {
    self.log_level = level;
    self
  }

  pub fn add_node(&mut self, socket: Socket) {
    let node = SimNode {
      controller: NodeController::new(),
      rng: SmallRng::seed_from_u64(self.rng.gen()),
    };
    self.nodes.insert(socket, node);
  }

  /// Adds `n` nodes on consecutive ports of 127.0.0.1, and returns their sockets.
  pub fn add_nodes(&mut self, n: u16) -> Vec<Socket> {
    let first = self.nodes.len() as u16;
    (first..first + n)
      .map(|i| {
        let socket = Socket::new(Host::from("127.0.0.1"), 5500 + i);
        self.add_node(socket.clone());
        socket
      })
      .collect()
  }

  pub fn sockets(&self) -> Vec<Socket> {
    self.nodes.keys().cloned().sorted().collect()
  }

  pub fn now(&self) -> Duration {
    Duration::from_millis(self.now)
  }

  pub fn controller(
    &self,
    socket: &Socket,
  ) -> Option<&NodeController<SimTimer>> {
    self.nodes.get(socket).map(|n| &n.controller)
  }

  pub fn reports(&self) -> &[SimReport] {
    &self.reports[..]
  }

  /// Delivers `msg` to `to` at `at`, reliably.
  pub fn send_at(
    &mut self,
    at: Duration,
    to: &Socket,
    msg: DetectorRemoteMsg,
  ) {
    let time = at.as_millis() as u64;
    self.push(time, to.clone(), DetectorMsg::Remote(msg), None);
  }

  /// Starts every node at `at`, with `params` and every node as peers.
  pub fn start_all(&mut self, at: Duration, params: &ExperimentParams) {
    let mut params = params.clone();
    params.peers = self.sockets();
    for socket in params.peers.clone().iter() {
      self.send_at(at, socket, DetectorRemoteMsg::Start(params.clone()));
    }
  }

  /// Processes every event up to and including `until`.
  pub fn run_until(&mut self, until: Duration) {
    let until = until.as_millis() as u64;
    while self.queue.peek().map_or(false, |e| e.time <= until) {
      if let Some(event) = self.queue.pop() {
        self.now = event.time;
        self.deliver(event);
      }
    }
    self.now = self.now.max(until);
  }

  fn push(
    &mut self,
    time: u64,
    to: Socket,
    msg: DetectorMsg,
    timer: Option<u64>,
  ) {
    let seq = self.seq;
    self.seq += 1;
    self.queue.push(Event {
      time: time,
      seq: seq,
      to: to,
      msg: msg,
      timer: timer,
    });
  }

  fn deliver(&mut self, event: Event) {
    if let Some(id) = event.timer {
      let cancelled = self.cancelled.borrow_mut().remove(&id);
      if cancelled && self.honor_cancellation {
        return;
      }
    }
    let node = match self.nodes.get_mut(&event.to) {
      Some(node) => node,
      None => return,
    };
    let mut env = SimEnv {
      me: &event.to,
      now: self.now,
      rng: &mut node.rng,
      next_timer: &mut self.next_timer,
      cancelled: &self.cancelled,
      out: Vec::new(),
      reports: Vec::new(),
      shutdown: false,
      log_level: self.log_level,
    };
    node.controller.handle(&mut env, event.msg);
    let SimEnv {
      out,
      reports,
      shutdown,
      ..
    } = env;

    let time = Duration::from_millis(self.now);
    for msg in reports {
      self.reports.push(SimReport {
        time: time,
        from: event.to.clone(),
        msg: msg,
      });
    }
    for out in out {
      match out {
        Outgoing::Timer(id, delay, msg) => {
          let at = self.now + delay.as_millis() as u64;
          self.push(at, event.to.clone(), msg, Some(id));
        }
        Outgoing::Send(to, msg) => {
          let cfg = *self.fail_map.get(&to);
          if cfg.sample_drop(&mut self.rng) {
            continue;
          }
          let delay = cfg
            .sample_delay_with(&mut self.rng)
            .map_or(0, |d| d.as_millis() as u64);
          self.push(self.now + delay, to, DetectorMsg::Remote(msg), None);
        }
      }
    }
    if shutdown {
      self.nodes.remove(&event.to);
    }
  }
}

#[test]
fn test_events_in_time_then_schedule_order() {
  let mut sim = Simulation::new(1);
  let s = sim.add_nodes(1).remove(0);
  sim.send_at(Duration::from_millis(20), &s, DetectorRemoteMsg::Stop);
  sim.send_at(Duration::from_millis(10), &s, DetectorRemoteMsg::Stop);
  sim.send_at(Duration::from_millis(10), &s, DetectorRemoteMsg::Shutdown);
  let order = std::iter::from_fn(|| sim.queue.pop())
    .map(|e| (e.time, e.seq))
    .collect_vec();
  assert_eq!(order, vec![(10, 1), (10, 2), (20, 0)]);
}

#[test]
fn test_shutdown_removes_node() {
  let mut sim = Simulation::new(1);
  let nodes = sim.add_nodes(2);
  sim.start_all(Duration::ZERO, &ExperimentParams::default());
  sim.send_at(Duration::from_millis(500), &nodes[0], DetectorRemoteMsg::Shutdown);
  sim.run_until(Duration::from_millis(499));
  assert!(sim.controller(&nodes[0]).unwrap().is_running());
  sim.run_until(Duration::from_millis(500));
  assert!(sim.controller(&nodes[0]).is_none());
  assert_eq!(sim.now(), Duration::from_millis(500));
  assert!(sim.controller(&nodes[1]).unwrap().is_running());
}
