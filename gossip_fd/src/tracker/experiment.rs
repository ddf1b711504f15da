use crate::core::Socket;
use crate::detector::ExperimentParams;
use itertools::Itertools;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::{Duration, Instant};

/// The protocol settings shared by every node in an experiment.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolSettings {
  pub gossip_time: Duration,
  pub fail_time: Duration,
  pub pull_by_gossip: bool,
  pub multicast_param: f64,
  pub multicast_max_wait: u64,
}
impl Default for ProtocolSettings {
  fn default() -> Self {
    let params = ExperimentParams::default();
    ProtocolSettings {
      gossip_time: params.gossip_time,
      fail_time: params.fail_time,
      pull_by_gossip: params.pull_by_gossip,
      multicast_param: params.multicast_param,
      multicast_max_wait: params.multicast_max_wait,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedCrash {
  pub node: Socket,
  /// Offset from the start of the experiment.
  pub delta: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportedCrash {
  pub node: Socket,
  pub reporter: Socket,
  pub delta: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExperimentError {
  NoNodes,
  ZeroDuration,
  AlreadyStarted,
  AlreadyStopped,
  NotStarted,
  NotStopped,
}
impl fmt::Display for ExperimentError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ExperimentError::NoNodes => "an experiment needs at least one node",
      ExperimentError::ZeroDuration => "an experiment needs a positive duration",
      ExperimentError::AlreadyStarted => "the experiment was already started",
      ExperimentError::AlreadyStopped => "the experiment was already stopped",
      ExperimentError::NotStarted => "the experiment has not started",
      ExperimentError::NotStopped => "the experiment has not stopped",
    };
    write!(f, "{}", s)
  }
}
impl std::error::Error for ExperimentError {}

/// One run of the detector over a fixed set of nodes, with the crashes planned for it and the
/// crashes the detectors reported.
#[derive(Debug)]
pub struct Experiment {
  id: String,
  nodes: Vec<Socket>,
  duration: Duration,
  settings: ProtocolSettings,
  expected: Vec<ExpectedCrash>,
  reported: Vec<ReportedCrash>,
  crashed: Vec<(Socket, Duration)>,
  start: Option<Instant>,
  stop: Option<Instant>,
}
impl Experiment {
  /// Plans an experiment. The nodes are sorted and shuffled with a generator seeded by `seed`.
  /// A crash count is drawn from `[0, n)`, and the node at that position of the permutation
  /// crashes at a random point of the run. Exactly one node crashes, whatever the count.
  pub fn generate(
    nodes: &[Socket],
    duration: Duration,
    seed: u64,
    settings: ProtocolSettings,
  ) -> Result<Experiment, ExperimentError> {
    if nodes.is_empty() {
      return Err(ExperimentError::NoNodes);
    }
    let millis = duration.as_millis() as u64;
    if millis == 0 {
      return Err(ExperimentError::ZeroDuration);
    }
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut permutation = nodes.iter().cloned().sorted().collect_vec();
    permutation.shuffle(&mut rng);
    let crashes = rng.gen_range(0..permutation.len());
    let expected = vec![ExpectedCrash {
      node: permutation[crashes].clone(),
      delta: Duration::from_millis(rng.gen_range(0..millis)),
    }];
    Ok(Experiment {
      id: format!(
        "nodes-{}__duration-{}__seed-{}",
        nodes.len(),
        millis,
        seed
      ),
      nodes: nodes.iter().cloned().sorted().collect(),
      duration: duration,
      settings: settings,
      expected: expected,
      reported: Vec::new(),
      crashed: Vec::new(),
      start: None,
      stop: None,
    })
  }

  pub fn id(&self) -> &str {
    self.id.as_str()
  }

  pub fn nodes(&self) -> &[Socket] {
    &self.nodes[..]
  }

  pub fn duration(&self) -> Duration {
    self.duration
  }

  pub fn expected_crashes(&self) -> &[ExpectedCrash] {
    &self.expected[..]
  }

  pub fn reported_crashes(&self) -> &[ReportedCrash] {
    &self.reported[..]
  }

  /// The parameters to start `node` with.
  pub fn params_for(&self, node: &Socket) -> ExperimentParams {
    ExperimentParams {
      peers: self.nodes.clone(),
      self_crash: self
        .expected
        .iter()
        .find(|c| c.node == *node)
        .map(|c| c.delta),
      gossip_time: self.settings.gossip_time,
      fail_time: self.settings.fail_time,
      pull_by_gossip: self.settings.pull_by_gossip,
      multicast_param: self.settings.multicast_param,
      multicast_max_wait: self.settings.multicast_max_wait,
    }
  }

  pub fn start(&mut self, now: Instant) -> Result<(), ExperimentError> {
    if self.start.is_some() {
      return Err(ExperimentError::AlreadyStarted);
    }
    self.start = Some(now);
    Ok(())
  }

  pub fn stop(&mut self, now: Instant) -> Result<(), ExperimentError> {
    if self.start.is_none() {
      return Err(ExperimentError::NotStarted);
    }
    if self.stop.is_some() {
      return Err(ExperimentError::AlreadyStopped);
    }
    self.stop = Some(now);
    Ok(())
  }

  /// Records that `reporter` declared `node` failed.
  pub fn add_crash(
    &mut self,
    node: Socket,
    reporter: Socket,
    now: Instant,
  ) -> Result<(), ExperimentError> {
    let delta = self.delta(now)?;
    self.reported.push(ReportedCrash {
      node: node,
      reporter: reporter,
      delta: delta,
    });
    Ok(())
  }

  /// Records that `node` crashed itself as planned.
  pub fn add_self_crash(
    &mut self,
    node: Socket,
    now: Instant,
  ) -> Result<(), ExperimentError> {
    let delta = self.delta(now)?;
    self.crashed.push((node, delta));
    Ok(())
  }

  pub fn report(&self) -> Result<ExperimentReport<'_>, ExperimentError> {
    if self.stop.is_none() {
      return Err(ExperimentError::NotStopped);
    }
    Ok(ExperimentReport { exp: self })
  }

  fn delta(&self, now: Instant) -> Result<Duration, ExperimentError> {
    self
      .start
      .map(|start| now.saturating_duration_since(start))
      .ok_or(ExperimentError::NotStarted)
  }
}

/// A summary of a stopped [`Experiment`], for the log.
pub struct ExperimentReport<'a> {
  exp: &'a Experiment,
}
impl ExperimentReport<'_> {
  /// Reports about nodes that were never planned to crash.
  pub fn false_positives(&self) -> Vec<&ReportedCrash> {
    self
      .exp
      .reported
      .iter()
      .filter(|r| !self.exp.expected.iter().any(|c| c.node == r.node))
      .collect()
  }

  /// Planned crashes that no node reported.
  pub fn undetected(&self) -> Vec<&ExpectedCrash> {
    self
      .exp
      .expected
      .iter()
      .filter(|c| !self.exp.reported.iter().any(|r| r.node == c.node))
      .collect()
  }
}
impl fmt::Display for ExperimentReport<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let exp = self.exp;
    writeln!(f, "Experiment {}", exp.id)?;
    writeln!(
      f,
      "  nodes: {}, duration: {}ms, gossip: {}ms, fail: {}ms, pull: {}, multicast: {}/{}",
      exp.nodes.len(),
      exp.duration.as_millis(),
      exp.settings.gossip_time.as_millis(),
      exp.settings.fail_time.as_millis(),
      exp.settings.pull_by_gossip,
      exp.settings.multicast_param,
      exp.settings.multicast_max_wait
    )?;
    for c in exp.expected.iter() {
      writeln!(f, "  expected crash of {} at {}ms", c.node, c.delta.as_millis())?;
    }
    for (node, delta) in exp.crashed.iter() {
      writeln!(f, "  {} crashed at {}ms", node, delta.as_millis())?;
    }
    for r in exp.reported.iter() {
      writeln!(
        f,
        "  {} reported {} at {}ms",
        r.reporter,
        r.node,
        r.delta.as_millis()
      )?;
    }
    write!(
      f,
      "  false positives: {}, undetected: {}",
      self.false_positives().len(),
      self.undetected().len()
    )
  }
}

#[cfg(test)]
use crate::core::Host;

#[cfg(test)]
fn sockets(n: u16) -> Vec<Socket> {
  (0..n)
    .map(|i| Socket::new(Host::from("127.0.0.1"), 5500 + i))
    .collect()
}

#[test]
fn test_generate_is_deterministic() {
  let nodes = sockets(5);
  let mut shuffled = nodes.clone();
  shuffled.reverse();
  let d = Duration::from_millis(30_000);
  let a = Experiment::generate(&nodes, d, 17, ProtocolSettings::default()).unwrap();
  let b =
    Experiment::generate(&shuffled, d, 17, ProtocolSettings::default()).unwrap();
  assert_eq!(a.expected_crashes(), b.expected_crashes());
  assert_eq!(a.id(), "nodes-5__duration-30000__seed-17");
  assert_eq!(a.expected_crashes().len(), 1);
  assert!(a.expected_crashes()[0].delta < d);
  assert!(nodes.contains(&a.expected_crashes()[0].node));
}

#[test]
fn test_single_node_always_crashes() {
  let nodes = sockets(1);
  for seed in 0..20 {
    let exp = Experiment::generate(
      &nodes,
      Duration::from_millis(1000),
      seed,
      ProtocolSettings::default(),
    )
    .unwrap();
    assert_eq!(exp.expected_crashes()[0].node, nodes[0]);
  }
}

#[test]
fn test_params_for_crashing_node() {
  let nodes = sockets(4);
  let exp = Experiment::generate(
    &nodes,
    Duration::from_millis(10_000),
    3,
    ProtocolSettings::default(),
  )
  .unwrap();
  let crash = exp.expected_crashes()[0].clone();
  for node in nodes.iter() {
    let params = exp.params_for(node);
    assert_eq!(params.peers, nodes);
    assert_eq!(params.fail_time, Duration::from_millis(2500));
    if *node == crash.node {
      assert_eq!(params.self_crash, Some(crash.delta));
    } else {
      assert_eq!(params.self_crash, None);
    }
  }
}

#[test]
fn test_experiment_lifecycle_errors() {
  let nodes = sockets(2);
  assert_eq!(
    Experiment::generate(&[], Duration::from_millis(5), 0, ProtocolSettings::default())
      .err(),
    Some(ExperimentError::NoNodes)
  );
  assert_eq!(
    Experiment::generate(&nodes, Duration::ZERO, 0, ProtocolSettings::default())
      .err(),
    Some(ExperimentError::ZeroDuration)
  );
  let mut exp = Experiment::generate(
    &nodes,
    Duration::from_millis(5000),
    0,
    ProtocolSettings::default(),
  )
  .unwrap();
  let t0 = Instant::now();
  assert_eq!(
    exp.add_crash(nodes[0].clone(), nodes[1].clone(), t0),
    Err(ExperimentError::NotStarted)
  );
  assert_eq!(exp.stop(t0), Err(ExperimentError::NotStarted));
  assert_eq!(exp.start(t0), Ok(()));
  assert_eq!(exp.start(t0), Err(ExperimentError::AlreadyStarted));
  assert!(exp.report().is_err());
  let t1 = t0 + Duration::from_millis(2600);
  exp
    .add_crash(nodes[0].clone(), nodes[1].clone(), t1)
    .unwrap();
  assert_eq!(exp.reported_crashes()[0].delta, Duration::from_millis(2600));
  assert_eq!(exp.stop(t1), Ok(()));
  assert_eq!(exp.stop(t1), Err(ExperimentError::AlreadyStopped));
  let report = exp.report().unwrap();
  let text = report.to_string();
  assert!(text.starts_with("Experiment nodes-2__duration-5000__seed-0"));
  assert!(text.contains("reported 127.0.0.1:5500 at 2600ms"));
}
