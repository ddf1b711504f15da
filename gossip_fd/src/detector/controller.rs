use crate::core::Cancellable;
use crate::detector::{
  Catastrophe, DetectorMsg, DetectorRemoteMsg, Environment, Epoch,
  ExperimentParams, FailureDetector, GossipEngine, PeerTable, TrackerRemoteMsg,
  LOG_LEVEL,
};
use crate::{debug, error, info, warn};
use DetectorMsg::*;
use DetectorRemoteMsg::*;

/// Everything a running node owns: its view of the cluster and every live timer.
pub struct RunState<T> {
  epoch: Epoch,
  params: ExperimentParams,
  table: PeerTable<T>,
  failure: FailureDetector,
  gossip: GossipEngine<T>,
  catastrophe: Catastrophe<T>,
  self_crash: Option<T>,
}
impl<T: Cancellable> RunState<T> {
  fn start<E: Environment<Timer = T>>(
    params: ExperimentParams,
    epoch: Epoch,
    env: &mut E,
  ) -> RunState<T> {
    let me = env.me().clone();
    let mut table = PeerTable::new(params.peers.iter().cloned(), me);
    let failure = FailureDetector::new(params.fail_time, epoch);
    failure.arm_all(&mut table, env);
    let mut gossip =
      GossipEngine::new(params.gossip_time, params.pull_by_gossip, epoch);
    gossip.start(env);
    let mut catastrophe = Catastrophe::new(
      params.multicast_param,
      params.multicast_max_wait,
      epoch,
    );
    catastrophe.start(env);
    let self_crash =
      params.self_crash.map(|d| env.schedule(d, SelfCrash(epoch)));
    RunState {
      epoch: epoch,
      params: params,
      table: table,
      failure: failure,
      gossip: gossip,
      catastrophe: catastrophe,
      self_crash: self_crash,
    }
  }

  fn stop(&mut self) {
    self.gossip.cancel();
    self.catastrophe.cancel();
    if let Some(timer) = self.self_crash.take() {
      timer.cancel();
    }
    self.table.clear();
  }

  pub fn epoch(&self) -> Epoch {
    self.epoch
  }

  pub fn params(&self) -> &ExperimentParams {
    &self.params
  }

  pub fn table(&self) -> &PeerTable<T> {
    &self.table
  }

  pub fn gossip(&self) -> &GossipEngine<T> {
    &self.gossip
  }

  pub fn catastrophe(&self) -> &Catastrophe<T> {
    &self.catastrophe
  }

  /// Handles a protocol message. Lifecycle messages are the controller's business.
  fn handle<E: Environment<Timer = T>>(
    &mut self,
    env: &mut E,
    msg: DetectorMsg,
  ) {
    match msg {
      GossipReminder(_) => self.gossip.tick(&mut self.table, env),
      CatastropheReminder(_) => self.catastrophe.tick(&mut self.table, env),
      Fail(_, peer, g) => {
        if let Err(e) = self.failure.on_fail(&mut self.table, env, &peer, g) {
          warn!(LOG_LEVEL, env, format!("Dropped fail timer: {}", e));
        }
      }
      Cleanup(_, peer, g) => {
        let table = &mut self.table;
        if let Err(e) = self.failure.on_cleanup(table, env, &peer, g) {
          warn!(LOG_LEVEL, env, format!("Dropped cleanup timer: {}", e));
        }
      }
      Remote(Gossip(from, beats)) => {
        let table = &mut self.table;
        self.gossip.on_gossip(&self.failure, table, env, &from, &beats);
      }
      Remote(GossipReply(_, beats)) => {
        self.gossip.on_reply(&self.failure, &mut self.table, env, &beats);
      }
      Remote(CatastropheMulticast(from, beats)) => {
        debug!(LOG_LEVEL, env, format!("Multicast from {}", from));
        let table = &mut self.table;
        self.catastrophe.on_multicast(&self.failure, table, env, &beats);
      }
      other => {
        error!(LOG_LEVEL, env, format!("Unexpected message: {:?}", other))
      }
    }
  }
}

pub enum ControllerState<T> {
  Idle,
  Running(RunState<T>),
}

/// The detector of one node, as a state machine. It is Idle until the tracker starts an
/// experiment, and Running until the experiment stops or the node crashes itself. Everything it
/// does to the outside world goes through an [`Environment`].
///
/// Every Start begins a new epoch. Timers of earlier runs may still fire if cancelling them
/// failed, and are dropped because their epoch is not the current one.
pub struct NodeController<T> {
  state: ControllerState<T>,
  epoch: Epoch,
}
impl<T: Cancellable> NodeController<T> {
  pub fn new() -> NodeController<T> {
    NodeController {
      state: ControllerState::Idle,
      epoch: 0,
    }
  }

  /// The epoch of the latest run, or 0 if the controller was never started.
  pub fn epoch(&self) -> Epoch {
    self.epoch
  }

  pub fn state(&self) -> &ControllerState<T> {
    &self.state
  }

  pub fn is_running(&self) -> bool {
    match self.state {
      ControllerState::Idle => false,
      ControllerState::Running(_) => true,
    }
  }

  pub fn run_state(&self) -> Option<&RunState<T>> {
    match &self.state {
      ControllerState::Idle => None,
      ControllerState::Running(run) => Some(run),
    }
  }

  pub fn table(&self) -> Option<&PeerTable<T>> {
    self.run_state().map(|run| run.table())
  }

  pub fn handle<E: Environment<Timer = T>>(
    &mut self,
    env: &mut E,
    msg: DetectorMsg,
  ) {
    let current = self.run_state().map(|run| run.epoch);
    if let (Some(epoch), Some(current)) = (msg.epoch(), current) {
      if epoch != current {
        debug!(
          LOG_LEVEL,
          env,
          format!("Dropped {:?} from epoch {}, now {}", msg, epoch, current)
        );
        return;
      }
    }
    match msg {
      Remote(Shutdown) => {
        self.teardown();
        info!(LOG_LEVEL, env, "Shutting down");
        env.shutdown();
      }
      Remote(Start(params)) => {
        if self.teardown() {
          debug!(LOG_LEVEL, env, "Restarting a running experiment");
        }
        info!(
          LOG_LEVEL,
          env,
          format!("Starting with {} peers", params.peers.len())
        );
        self.epoch += 1;
        let run = RunState::start(params, self.epoch, env);
        self.state = ControllerState::Running(run);
      }
      Remote(Stop) => {
        if self.teardown() {
          info!(LOG_LEVEL, env, "Stopped");
        }
      }
      Malformed(e) => match self.state {
        ControllerState::Idle => {
          warn!(LOG_LEVEL, env, format!("Malformed message: {}", e))
        }
        ControllerState::Running(_) => {
          error!(LOG_LEVEL, env, format!("Malformed message: {}", e))
        }
      },
      SelfCrash(_) => {
        if let ControllerState::Running(run) = &mut self.state {
          run.self_crash = None;
          self.teardown();
          info!(LOG_LEVEL, env, "Crashing");
          let me = env.me().clone();
          env.report(TrackerRemoteMsg::Crash(me));
        } else {
          warn!(LOG_LEVEL, env, "Dropped SelfCrash while idle");
        }
      }
      msg => match &mut self.state {
        ControllerState::Idle => {
          warn!(LOG_LEVEL, env, format!("Dropped {:?} while idle", msg))
        }
        ControllerState::Running(run) => run.handle(env, msg),
      },
    }
  }

  /// Cancels every timer and forgets the peer table. Returns whether the node was running.
  fn teardown(&mut self) -> bool {
    match std::mem::replace(&mut self.state, ControllerState::Idle) {
      ControllerState::Idle => false,
      ControllerState::Running(mut run) => {
        run.stop();
        true
      }
    }
  }
}
impl<T: Cancellable> Default for NodeController<T> {
  fn default() -> Self {
    NodeController::new()
  }
}

#[cfg(test)]
use crate::core::{DeserializeError, Host, Socket};
#[cfg(test)]
use crate::detector::test_env::TestEnv;
#[cfg(test)]
use crate::testkit::SimTimer;
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
fn started(
  n: u16,
  self_crash: Option<Duration>,
) -> (Vec<Socket>, NodeController<SimTimer>, TestEnv) {
  let s = (0..n)
    .map(|i| Socket::new(Host::from("127.0.0.1"), 5500 + i))
    .collect::<Vec<_>>();
  let mut env = TestEnv::new(s[0].clone());
  let mut ctrl = NodeController::new();
  let params = ExperimentParams {
    peers: s.clone(),
    self_crash: self_crash,
    ..ExperimentParams::default()
  };
  ctrl.handle(&mut env, Remote(Start(params)));
  (s, ctrl, env)
}

#[test]
fn test_idle_drops_protocol_messages() {
  let me = Socket::new(Host::from("127.0.0.1"), 5500);
  let mut env = TestEnv::new(me.clone());
  let mut ctrl = NodeController::<SimTimer>::new();
  ctrl.handle(&mut env, GossipReminder(0));
  ctrl.handle(&mut env, Fail(0, me.clone(), 0));
  ctrl.handle(&mut env, SelfCrash(0));
  ctrl.handle(&mut env, Remote(Stop));
  ctrl.handle(&mut env, Malformed(DeserializeError::Destination));
  assert!(!ctrl.is_running());
  assert!(env.scheduled.is_empty() && env.sent.is_empty());
  assert!(env.reports.is_empty());
}

#[test]
fn test_start_arms_every_timer() {
  let (s, ctrl, env) = started(3, Some(Duration::from_millis(700)));
  assert!(ctrl.is_running());
  let run = ctrl.run_state().unwrap();
  assert!(run.gossip().is_active());
  assert!(run.catastrophe().is_active());
  assert_eq!(run.table().len(), 3);
  assert_eq!(run.params().peers, s);
  assert_eq!(ctrl.epoch(), 1);
  assert_eq!(env.pending(|m| matches!(m, Fail(1, _, 0))).len(), 2);
  assert_eq!(env.pending(|m| *m == SelfCrash(1)).len(), 1);
  assert!(env
    .scheduled
    .iter()
    .any(|(_, d, m)| *m == SelfCrash(1) && *d == Duration::from_millis(700)));
  assert!(env.scheduled.iter().all(|(_, _, m)| m.epoch() == Some(1)));
}

#[test]
fn test_self_crash_tears_down_and_reports() {
  let (s, mut ctrl, mut env) = started(3, Some(Duration::from_millis(700)));
  ctrl.handle(&mut env, SelfCrash(1));
  assert!(!ctrl.is_running());
  assert_eq!(env.reports, vec![TrackerRemoteMsg::Crash(s[0].clone())]);
  // Only the SelfCrash timer itself fired, everything else is cancelled.
  assert_eq!(env.pending(|m| *m != SelfCrash(1)), Vec::<u64>::new());
}

#[test]
fn test_restart_resets_state() {
  let (s, mut ctrl, mut env) = started(3, None);
  ctrl.handle(&mut env, GossipReminder(1));
  let before = env.scheduled.len();
  let params = ExperimentParams {
    peers: s[..2].to_vec(),
    ..ExperimentParams::default()
  };
  ctrl.handle(&mut env, Remote(Start(params)));
  let table = ctrl.table().unwrap();
  assert_eq!(table.len(), 2);
  assert_eq!(table.get(&s[0]).unwrap().beats(), 0);
  // Timer 2 is the reminder that already fired.
  let mut old = env.scheduled[..before].iter().map(|(id, _, _)| *id);
  let mut fresh = env.scheduled[before..].iter().map(|(id, _, _)| *id);
  assert!(old.all(|id| env.is_cancelled(id) || id == 2));
  assert!(fresh.all(|id| !env.is_cancelled(id)));
}

#[test]
fn test_unknown_peer_timer_is_dropped() {
  let (_, mut ctrl, mut env) = started(2, None);
  let stranger = Socket::new(Host::from("10.1.1.1"), 9);
  ctrl.handle(&mut env, Fail(1, stranger.clone(), 0));
  ctrl.handle(&mut env, Cleanup(1, stranger, 0));
  ctrl.handle(&mut env, Malformed(DeserializeError::Destination));
  assert!(ctrl.is_running());
  assert!(env.reports.is_empty());
}

#[test]
fn test_shutdown_terminates() {
  let (_, mut ctrl, mut env) = started(2, None);
  ctrl.handle(&mut env, Remote(Shutdown));
  assert!(!ctrl.is_running());
  assert!(env.shut_down);
  assert_eq!(env.pending(|_| true), Vec::<u64>::new());
}

#[test]
fn test_timers_of_an_earlier_run_are_dropped() {
  let (s, mut ctrl, mut env) = started(3, Some(Duration::from_millis(700)));
  let params = ExperimentParams {
    peers: s.clone(),
    ..ExperimentParams::default()
  };
  ctrl.handle(&mut env, Remote(Start(params)));
  assert_eq!(ctrl.epoch(), 2);
  let scheduled = env.scheduled.len();

  // Everything the first run scheduled fires after all.
  ctrl.handle(&mut env, Fail(1, s[1].clone(), 0));
  ctrl.handle(&mut env, Fail(1, s[2].clone(), 0));
  ctrl.handle(&mut env, Cleanup(1, s[1].clone(), 0));
  ctrl.handle(&mut env, GossipReminder(1));
  ctrl.handle(&mut env, CatastropheReminder(1));
  ctrl.handle(&mut env, SelfCrash(1));

  assert!(ctrl.is_running());
  assert!(env.reports.is_empty() && env.sent.is_empty());
  assert_eq!(env.scheduled.len(), scheduled);
  let table = ctrl.table().unwrap();
  assert_eq!(table.correct_peers(), s);
  assert_eq!(table.get(&s[0]).unwrap().beats(), 0);

  // The current run's timers still count.
  ctrl.handle(&mut env, Fail(2, s[1].clone(), 0));
  assert_eq!(
    env.reports,
    vec![TrackerRemoteMsg::CrashReport {
      failed: s[1].clone(),
      reporter: s[0].clone(),
    }]
  );
}

#[test]
fn test_stop_then_start_begins_a_new_epoch() {
  let (s, mut ctrl, mut env) = started(2, None);
  ctrl.handle(&mut env, Remote(Stop));
  assert_eq!(ctrl.epoch(), 1);
  let params = ExperimentParams {
    peers: s.clone(),
    ..ExperimentParams::default()
  };
  ctrl.handle(&mut env, Remote(Start(params)));
  assert_eq!(ctrl.run_state().unwrap().epoch(), 2);
  let gossip = env.pending(|m| matches!(m, GossipReminder(_)));
  assert_eq!(gossip.len(), 1);
  ctrl.handle(&mut env, GossipReminder(1));
  assert!(env.sent.is_empty());
  assert_eq!(env.pending(|m| matches!(m, GossipReminder(_))), gossip);
}
