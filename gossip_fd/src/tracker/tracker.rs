use crate::core::{
  Actor, ActorContext, DeserializeError, LocalRef, Node, Socket,
};
use crate::detector::{
  node_dest, DetectorRemoteMsg, ExperimentParams, TrackerRemoteMsg,
  TRACKER_NAME,
};
use crate::tracker::{Experiment, ProtocolSettings, LOG_LEVEL};
use crate::{debug, error, info, trace, warn};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use TrackerMsg::*;
use TrackerRemoteMsg::*;

/// Configures a [`Tracker`].
#[derive(Clone, Debug)]
pub struct TrackerConfig {
  /// The number of registrations to wait for before the first experiment.
  ///
  /// default: 3
  pub expected_nodes: usize,
  /// The number of experiments to run, one after another.
  ///
  /// default: 1
  pub experiments: usize,
  /// How long each experiment runs.
  ///
  /// default: 30 seconds
  pub duration: Duration,
  /// Experiment `i` is generated with seed `seed + i`.
  ///
  /// default: 0
  pub seed: u64,
  /// default: 1 second
  pub gossip_time: Duration,
  /// default: 2.5 seconds
  pub fail_time: Duration,
  /// default: 3
  pub multicast_param: f64,
  /// default: 20
  pub multicast_max_wait: u64,
  /// default: false
  pub pull_by_gossip: bool,
  /// The pause between two experiments, so stale messages of one do not reach the next.
  ///
  /// default: 5 seconds
  pub settle_time: Duration,
}
impl TrackerConfig {
  pub fn settings(&self) -> ProtocolSettings {
    ProtocolSettings {
      gossip_time: self.gossip_time,
      fail_time: self.fail_time,
      pull_by_gossip: self.pull_by_gossip,
      multicast_param: self.multicast_param,
      multicast_max_wait: self.multicast_max_wait,
    }
  }
}
impl Default for TrackerConfig {
  fn default() -> Self {
    let params = ExperimentParams::default();
    TrackerConfig {
      expected_nodes: 3,
      experiments: 1,
      duration: Duration::from_secs(30),
      seed: 0,
      gossip_time: params.gossip_time,
      fail_time: params.fail_time,
      multicast_param: params.multicast_param,
      multicast_max_wait: params.multicast_max_wait,
      pull_by_gossip: params.pull_by_gossip,
      settle_time: Duration::from_secs(5),
    }
  }
}

pub enum TrackerMsg {
  Remote(TrackerRemoteMsg),
  NextExperiment,
  EndExperiment(usize),
  Malformed(DeserializeError),
}
impl From<TrackerRemoteMsg> for TrackerMsg {
  fn from(msg: TrackerRemoteMsg) -> Self {
    Remote(msg)
  }
}
impl From<DeserializeError> for TrackerMsg {
  fn from(e: DeserializeError) -> Self {
    Malformed(e)
  }
}

/// The coordinator. Waits for `expected_nodes` detectors to register, runs the configured
/// experiments on them, then shuts every detector down and terminates its node.
pub struct Tracker {
  config: TrackerConfig,
  nodes: BTreeSet<Socket>,
  current: Option<Experiment>,
  finished: usize,
  notify: Option<UnboundedSender<TrackerRemoteMsg>>,
}
impl Tracker {
  /// Spawns a tracker on `node`, registered as [`TRACKER_NAME`]. Every message it receives from a
  /// detector is also forwarded to `notify`.
  pub fn new(
    node: &Node,
    config: TrackerConfig,
    notify: Option<UnboundedSender<TrackerRemoteMsg>>,
  ) -> LocalRef<TrackerMsg> {
    let actor = Tracker {
      config: config,
      nodes: BTreeSet::new(),
      current: None,
      finished: 0,
      notify: notify,
    };
    node.spawn_remote::<TrackerMsg, TrackerRemoteMsg, _>(
      actor,
      TRACKER_NAME.to_string(),
    )
  }

  async fn broadcast(&self, node: &Node, msg: DetectorRemoteMsg) {
    let dest = node_dest();
    for socket in self.nodes.iter() {
      node.udp_msg(socket, &dest, &msg).await;
    }
  }

  async fn next_experiment(&mut self, ctx: &ActorContext<TrackerMsg>) {
    if self.finished >= self.config.experiments {
      info!(LOG_LEVEL, &ctx.node, "All experiments done, shutting down");
      self.broadcast(&ctx.node, DetectorRemoteMsg::Shutdown).await;
      ctx.node.terminate();
      return;
    }
    let nodes = self.nodes.iter().cloned().collect::<Vec<_>>();
    let seed = self.config.seed + self.finished as u64;
    let mut exp = match Experiment::generate(
      &nodes,
      self.config.duration,
      seed,
      self.config.settings(),
    ) {
      Ok(exp) => exp,
      Err(e) => {
        error!(LOG_LEVEL, &ctx.node, format!("Cannot plan experiment: {}", e));
        ctx.node.terminate();
        return;
      }
    };
    info!(LOG_LEVEL, &ctx.node, format!("Starting experiment {}", exp.id()));
    let dest = node_dest();
    for socket in nodes.iter() {
      let msg = DetectorRemoteMsg::Start(exp.params_for(socket));
      ctx.node.udp_msg(socket, &dest, &msg).await;
    }
    if let Err(e) = exp.start(Instant::now()) {
      warn!(LOG_LEVEL, &ctx.node, format!("{}", e));
    }
    self.current = Some(exp);
    ctx.node.schedule_local_msg(
      self.config.duration,
      ctx.local_interface(),
      EndExperiment(self.finished),
    );
  }

  async fn end_experiment(&mut self, ctx: &ActorContext<TrackerMsg>) {
    self.broadcast(&ctx.node, DetectorRemoteMsg::Stop).await;
    if let Some(mut exp) = self.current.take() {
      let logged = exp
        .stop(Instant::now())
        .and_then(|_| exp.report().map(|r| r.to_string()));
      match logged {
        Ok(report) => info!(LOG_LEVEL, &ctx.node, report),
        Err(e) => warn!(LOG_LEVEL, &ctx.node, format!("{}", e)),
      }
    }
    self.finished += 1;
    ctx.node.schedule_local_msg(
      self.config.settle_time,
      ctx.local_interface(),
      NextExperiment,
    );
  }

  /// Copies `msg` to the notify channel, if any. Forgets the channel once its receiver is gone.
  fn forward(&mut self, node: &Node, msg: &TrackerRemoteMsg) {
    if let Some(notify) = &self.notify {
      if notify.send(msg.clone()).is_err() {
        trace!(
          LOG_LEVEL,
          node,
          format!("Notify channel closed, dropped {:?}", msg)
        );
        self.notify = None;
      }
    }
  }

  fn record(&mut self, ctx: &ActorContext<TrackerMsg>, msg: &TrackerRemoteMsg) {
    let exp = match self.current.as_mut() {
      Some(exp) => exp,
      None => {
        warn!(
          LOG_LEVEL,
          &ctx.node,
          format!("{:?} outside of an experiment", msg)
        );
        return;
      }
    };
    let now = Instant::now();
    let result = match msg {
      Crash(node) => exp.add_self_crash(node.clone(), now),
      CrashReport { failed, reporter } => {
        exp.add_crash(failed.clone(), reporter.clone(), now)
      }
      Registration(_) => Ok(()),
    };
    if let Err(e) = result {
      warn!(LOG_LEVEL, &ctx.node, format!("{}", e));
    }
  }
}
#[async_trait]
impl Actor<TrackerMsg> for Tracker {
  async fn pre_start(&mut self, ctx: &ActorContext<TrackerMsg>) {
    info!(
      LOG_LEVEL,
      &ctx.node,
      format!(
        "Tracker waiting for {} nodes on {}",
        self.config.expected_nodes,
        ctx.node.socket()
      )
    );
  }

  async fn recv(&mut self, ctx: &ActorContext<TrackerMsg>, msg: TrackerMsg) {
    match msg {
      Remote(msg) => {
        self.forward(&ctx.node, &msg);
        match msg {
          Registration(socket) => {
            debug!(LOG_LEVEL, &ctx.node, format!("Registered {}", socket));
            self.nodes.insert(socket);
            if self.nodes.len() == self.config.expected_nodes
              && self.current.is_none()
              && self.finished == 0
            {
              ctx.local_interface().send(NextExperiment);
            }
          }
          msg => {
            info!(LOG_LEVEL, &ctx.node, format!("{:?}", msg));
            self.record(ctx, &msg);
          }
        }
      }
      NextExperiment => self.next_experiment(ctx).await,
      EndExperiment(i) => {
        if i == self.finished && self.current.is_some() {
          self.end_experiment(ctx).await;
        }
      }
      Malformed(e) => {
        warn!(LOG_LEVEL, &ctx.node, format!("Malformed message: {}", e))
      }
    }
  }
}

#[cfg(test)]
use crate::core::{Host, NodeConfig};

#[test]
fn test_forward_forgets_a_closed_channel() {
  let mut config = NodeConfig::default();
  config.socket = Socket::new(Host::from("127.0.0.1"), 0);
  config.compute_threads = 1;
  let node = Node::new(config).unwrap();
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  let mut tracker = Tracker {
    config: TrackerConfig::default(),
    nodes: BTreeSet::new(),
    current: None,
    finished: 0,
    notify: Some(tx),
  };
  let msg = Registration(node.socket().clone());
  tracker.forward(&node, &msg);
  assert_eq!(rx.try_recv().ok(), Some(msg.clone()));
  assert!(tracker.notify.is_some());

  drop(rx);
  tracker.forward(&node, &msg);
  assert!(tracker.notify.is_none());
  tracker.forward(&node, &msg);
}
