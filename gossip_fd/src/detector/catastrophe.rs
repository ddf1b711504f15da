use crate::core::{Cancellable, Socket};
use crate::detector::{
  Beats, DetectorMsg, DetectorRemoteMsg, Environment, Epoch,
  FailureDetector, PeerTable, CATASTROPHE_INTERVAL, LOG_LEVEL,
};
use crate::{debug, trace};
use rand::Rng;

/// The probability of multicasting after `wait` postponed reminders. It reaches 1 at `max_wait`.
pub fn probability(wait: u64, max_wait: u64, exponent: f64) -> f64 {
  if max_wait == 0 {
    1.0
  } else {
    (wait as f64 / max_wait as f64).powf(exponent)
  }
}

/// Catastrophe recovery. Once a second the node multicasts its heartbeat vector to every Correct
/// peer with a probability that grows with the number of seconds it has not done so. Hearing a
/// multicast from someone else starts the count over.
pub struct Catastrophe<T> {
  exponent: f64,
  max_wait: u64,
  wait: u64,
  epoch: Epoch,
  timer: Option<T>,
}
impl<T: Cancellable> Catastrophe<T> {
  pub fn new(exponent: f64, max_wait: u64, epoch: Epoch) -> Catastrophe<T> {
    Catastrophe {
      exponent: exponent,
      max_wait: max_wait,
      wait: 0,
      epoch: epoch,
      timer: None,
    }
  }

  pub fn wait(&self) -> u64 {
    self.wait
  }

  pub fn is_active(&self) -> bool {
    self.timer.is_some()
  }

  pub fn probability(&self) -> f64 {
    probability(self.wait, self.max_wait, self.exponent)
  }

  /// Whether a uniform draw from `[0, 1)` triggers a multicast.
  pub fn decide(&self, draw: f64) -> bool {
    draw < self.probability()
  }

  pub fn start<E: Environment<Timer = T>>(&mut self, env: &mut E) {
    self.cancel();
    self.wait = 0;
    let reminder = DetectorMsg::CatastropheReminder(self.epoch);
    self.timer = Some(env.schedule(CATASTROPHE_INTERVAL, reminder));
  }

  /// Handles a `CatastropheReminder`. Always schedules the next one.
  pub fn tick<E: Environment<Timer = T>>(
    &mut self,
    table: &mut PeerTable<T>,
    env: &mut E,
  ) {
    self.timer = None;
    let draw = env.rng().gen::<f64>();
    if self.decide(draw) {
      self.multicast(table, env);
      self.wait = 0;
    } else {
      self.wait += 1;
      trace!(
        LOG_LEVEL,
        env,
        format!("Multicast postponed, wait {}", self.wait)
      );
    }
    let reminder = DetectorMsg::CatastropheReminder(self.epoch);
    self.timer = Some(env.schedule(CATASTROPHE_INTERVAL, reminder));
  }

  pub fn on_multicast<E: Environment<Timer = T>>(
    &mut self,
    fd: &FailureDetector,
    table: &mut PeerTable<T>,
    env: &mut E,
    beats: &Beats,
  ) {
    self.wait = 0;
    fd.refresh(table, env, beats);
  }

  pub fn cancel(&mut self) {
    if let Some(timer) = self.timer.take() {
      timer.cancel();
    }
  }

  fn multicast<E: Environment<Timer = T>>(
    &mut self,
    table: &mut PeerTable<T>,
    env: &mut E,
  ) {
    table.heartbeat();
    let me = table.me().clone();
    let beats = table.beats();
    let peers: Vec<Socket> = table
      .correct_peers()
      .into_iter()
      .filter(|p| *p != me)
      .collect();
    debug!(
      LOG_LEVEL,
      env,
      format!(
        "Catastrophe multicast to {} peers after {}",
        peers.len(),
        self.wait
      )
    );
    for peer in peers.iter() {
      env.send(
        peer,
        DetectorRemoteMsg::CatastropheMulticast(me.clone(), beats.clone()),
      );
    }
    for (_, state) in table.iter_mut().filter(|(_, p)| p.is_correct()) {
      state.reset_quiescence();
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
use std::time::Duration;

#[test]
fn test_probability_reaches_one() {
  assert_eq!(probability(20, 20, 3.0), 1.0);
  assert_eq!(probability(0, 20, 3.0), 0.0);
  assert!((probability(10, 20, 3.0) - 0.125).abs() < 1e-12);
  assert_eq!(probability(0, 0, 3.0), 1.0);
  assert!(probability(19, 20, 3.0) < 1.0);

  let mut cat = Catastrophe::<SimTimer>::new(3.0, 20, 0);
  cat.wait = 20;
  for draw in [0.0, 0.5, 0.999_999_999, 1.0 - f64::EPSILON].iter() {
    assert!(cat.decide(*draw));
  }
  cat.wait = 0;
  assert!(!cat.decide(0.0));
}

#[test]
fn test_tick_multicasts_at_max_wait() {
  let s = (0..3)
    .map(|i| Socket::new(Host::from("127.0.0.1"), 5500 + i))
    .collect::<Vec<_>>();
  let mut env = TestEnv::new(s[0].clone());
  let mut table = PeerTable::<SimTimer>::new(s.clone(), s[0].clone());
  table.get_mut(&s[1]).unwrap().quiescent();
  table.mark_failed(&s[2]).unwrap();
  let mut cat = Catastrophe::new(3.0, 20, 0);
  cat.start(&mut env);

  cat.tick(&mut table, &mut env);
  assert_eq!(cat.wait(), 1);
  assert!(env.sent.is_empty());

  cat.wait = 20;
  cat.tick(&mut table, &mut env);
  assert_eq!(cat.wait(), 0);
  assert_eq!(table.get(&s[0]).unwrap().beats(), 1);
  assert_eq!(table.get(&s[1]).unwrap().quiescence(), 0);
  assert_eq!(
    env.sent,
    vec![(
      s[1].clone(),
      DetectorRemoteMsg::CatastropheMulticast(s[0].clone(), table.beats())
    )]
  );
  let reminders = env.pending(|m| *m == DetectorMsg::CatastropheReminder(0));
  assert_eq!(reminders.len(), 3);
  assert!(env
    .scheduled
    .iter()
    .all(|(_, d, _)| *d == Duration::from_millis(1000)));
}

#[test]
fn test_multicast_received_resets_wait() {
  let s = (0..2)
    .map(|i| Socket::new(Host::from("127.0.0.1"), 5500 + i))
    .collect::<Vec<_>>();
  let mut env = TestEnv::new(s[0].clone());
  let mut table = PeerTable::<SimTimer>::new(s.clone(), s[0].clone());
  let fd = FailureDetector::new(Duration::from_millis(2500), 0);
  let mut cat = Catastrophe::new(3.0, 20, 0);
  cat.wait = 7;
  let incoming: Beats = vec![(s[1].clone(), 2u64)].into_iter().collect();
  cat.on_multicast(&fd, &mut table, &mut env, &incoming);
  assert_eq!(cat.wait(), 0);
  assert_eq!(table.get(&s[1]).unwrap().beats(), 2);
}
