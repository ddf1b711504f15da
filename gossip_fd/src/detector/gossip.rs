use crate::core::{Cancellable, Socket};
use crate::detector::{
  beats_to_string, Beats, DetectorMsg, DetectorRemoteMsg, Environment, Epoch,
  FailureDetector, PeerTable, LOG_LEVEL,
};
use crate::{info, trace};
use std::time::Duration;

/// Pushes the local heartbeat vector to one peer every `gossip_time`, and optionally answers
/// gossip with the local vector.
pub struct GossipEngine<T> {
  gossip_time: Duration,
  pull: bool,
  epoch: Epoch,
  timer: Option<T>,
}
impl<T: Cancellable> GossipEngine<T> {
  pub fn new(gossip_time: Duration, pull: bool, epoch: Epoch) -> GossipEngine<T> {
    GossipEngine {
      gossip_time: gossip_time,
      pull: pull,
      epoch: epoch,
      timer: None,
    }
  }

  pub fn is_active(&self) -> bool {
    self.timer.is_some()
  }

  pub fn start<E: Environment<Timer = T>>(&mut self, env: &mut E) {
    self.cancel();
    let reminder = DetectorMsg::GossipReminder(self.epoch);
    self.timer = Some(env.schedule(self.gossip_time, reminder));
  }

  /// Handles a `GossipReminder`: one round of push gossip. Gossip stops for the rest of the run
  /// if there is no peer left to gossip with.
  pub fn tick<E: Environment<Timer = T>>(
    &mut self,
    table: &mut PeerTable<T>,
    env: &mut E,
  ) {
    self.timer = None;
    table.heartbeat();
    let target = match table.select_gossip_target(env.rng()) {
      Some(target) => target,
      None => {
        info!(LOG_LEVEL, env, "Gossip stopped, no peer left");
        return;
      }
    };
    let beats = table.beats();
    trace!(
      LOG_LEVEL,
      env,
      format!("Gossip to {}: {}", target, beats_to_string(&beats))
    );
    let me = table.me().clone();
    env.send(&target, DetectorRemoteMsg::Gossip(me, beats));
    if let Ok(state) = table.get_mut(&target) {
      state.reset_quiescence();
    }
    let reminder = DetectorMsg::GossipReminder(self.epoch);
    self.timer = Some(env.schedule(self.gossip_time, reminder));
  }

  pub fn on_gossip<E: Environment<Timer = T>>(
    &mut self,
    fd: &FailureDetector,
    table: &mut PeerTable<T>,
    env: &mut E,
    from: &Socket,
    beats: &Beats,
  ) {
    fd.refresh(table, env, beats);
    if self.pull {
      let me = table.me().clone();
      env.send(from, DetectorRemoteMsg::GossipReply(me, table.beats()));
    }
  }

  pub fn on_reply<E: Environment<Timer = T>>(
    &mut self,
    fd: &FailureDetector,
    table: &mut PeerTable<T>,
    env: &mut E,
    beats: &Beats,
  ) {
    fd.refresh(table, env, beats);
  }

  pub fn cancel(&mut self) {
    if let Some(timer) = self.timer.take() {
      timer.cancel();
    }
  }
}

#[cfg(test)]
use crate::core::Host;
#[cfg(test)]
use crate::detector::test_env::TestEnv;
#[cfg(test)]
use crate::testkit::SimTimer;

#[cfg(test)]
fn setup(
  n: u16,
  pull: bool,
) -> (Vec<Socket>, PeerTable<SimTimer>, TestEnv, GossipEngine<SimTimer>) {
  let s = (0..n)
    .map(|i| Socket::new(Host::from("127.0.0.1"), 5500 + i))
    .collect::<Vec<_>>();
  let env = TestEnv::new(s[0].clone());
  let table = PeerTable::new(s.clone(), s[0].clone());
  (s, table, env, GossipEngine::new(Duration::from_millis(1000), pull, 0))
}

#[test]
fn test_tick_pushes_and_reschedules() {
  let (s, mut table, mut env, mut gossip) = setup(2, false);
  table.get_mut(&s[1]).unwrap().quiescent();
  gossip.start(&mut env);
  gossip.tick(&mut table, &mut env);
  assert!(gossip.is_active());
  assert_eq!(table.get(&s[0]).unwrap().beats(), 1);
  assert_eq!(table.get(&s[1]).unwrap().quiescence(), 0);
  match &env.sent[..] {
    [(to, DetectorRemoteMsg::Gossip(from, beats))] => {
      assert_eq!(to, &s[1]);
      assert_eq!(from, &s[0]);
      assert_eq!(beats.get(&s[0]), Some(&1));
    }
    other => panic!("unexpected sends: {:?}", other),
  }
  assert_eq!(
    env.pending(|m| *m == DetectorMsg::GossipReminder(0)).len(),
    2
  );
}

#[test]
fn test_gossip_stops_without_target() {
  let (s, mut table, mut env, mut gossip) = setup(2, false);
  table.mark_failed(&s[1]).unwrap();
  gossip.start(&mut env);
  gossip.tick(&mut table, &mut env);
  assert!(!gossip.is_active());
  assert!(env.sent.is_empty());
  assert_eq!(env.scheduled.len(), 1);
}

#[test]
fn test_pull_disabled_sends_no_reply() {
  let (s, mut table, mut env, mut gossip) = setup(2, false);
  let fd = FailureDetector::new(Duration::from_millis(2500), 0);
  let incoming: Beats = vec![(s[1].clone(), 1u64)].into_iter().collect();
  gossip.on_gossip(&fd, &mut table, &mut env, &s[1], &incoming);
  assert!(env.sent.is_empty());
  assert_eq!(table.get(&s[1]).unwrap().beats(), 1);
}

#[test]
fn test_pull_enabled_replies_to_sender() {
  let (s, mut table, mut env, mut gossip) = setup(3, true);
  let fd = FailureDetector::new(Duration::from_millis(2500), 0);
  let incoming: Beats = vec![(s[2].clone(), 7u64)].into_iter().collect();
  gossip.on_gossip(&fd, &mut table, &mut env, &s[2], &incoming);
  match &env.sent[..] {
    [(to, DetectorRemoteMsg::GossipReply(from, beats))] => {
      assert_eq!(to, &s[2]);
      assert_eq!(from, &s[0]);
      assert_eq!(beats.get(&s[2]), Some(&7));
      assert_eq!(beats.len(), 3);
    }
    other => panic!("unexpected sends: {:?}", other),
  }
  let before = env.sent.len();
  gossip.on_reply(&fd, &mut table, &mut env, &incoming);
  assert_eq!(env.sent.len(), before);
}
