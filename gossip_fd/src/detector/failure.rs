use crate::core::Socket;
use crate::detector::{
  Beats, DetectorMsg, Environment, Epoch, PeerTable, PeerTableError,
  TrackerRemoteMsg, CLEANUP_FACTOR, LOG_LEVEL,
};
use crate::{debug, info};
use std::time::Duration;

/// Suspects peers whose heartbeat has not risen for `fail_time`, and forgets them
/// `CLEANUP_FACTOR` times as long after that.
///
/// Timers are never cancelled synchronously. Every timer message carries the generation of its
/// peer at the time it was scheduled, and rescheduling bumps the generation, so a message that
/// survived cancellation is recognized as stale and dropped. Timers also carry the epoch of the
/// run, since generations start over with every run.
pub struct FailureDetector {
  fail_time: Duration,
  epoch: Epoch,
}
impl FailureDetector {
  pub fn new(fail_time: Duration, epoch: Epoch) -> FailureDetector {
    FailureDetector {
      fail_time: fail_time,
      epoch: epoch,
    }
  }

  pub fn fail_time(&self) -> Duration {
    self.fail_time
  }

  pub fn cleanup_time(&self) -> Duration {
    self.fail_time * CLEANUP_FACTOR
  }

  /// Schedules the first fail timer of every peer but the local node.
  pub fn arm_all<E: Environment>(
    &self,
    table: &mut PeerTable<E::Timer>,
    env: &mut E,
  ) {
    let me = table.me().clone();
    for (peer, state) in table.iter_mut().filter(|(p, _)| **p != me) {
      let msg = DetectorMsg::Fail(self.epoch, peer.clone(), state.generation());
      state.attach(env.schedule(self.fail_time, msg));
    }
  }

  /// Merges an incoming heartbeat vector. Correct peers whose counter rose get a fresh fail timer,
  /// every other Correct peer becomes more quiescent. The local entry, Failed peers and peers
  /// missing from the table are left alone.
  pub fn refresh<E: Environment>(
    &self,
    table: &mut PeerTable<E::Timer>,
    env: &mut E,
    incoming: &Beats,
  ) {
    let me = table.me().clone();
    let fail_time = self.fail_time;
    let epoch = self.epoch;
    for (peer, state) in table.iter_mut() {
      if *peer == me || !state.is_correct() {
        continue;
      }
      match incoming.get(peer) {
        Some(beats) if state.set_beats(*beats) => {
          state.reset_quiescence();
          state.rearm(|g| {
            env.schedule(fail_time, DetectorMsg::Fail(epoch, peer.clone(), g))
          });
        }
        _ => state.quiescent(),
      }
    }
  }

  /// Handles a fail timer. Returns whether the peer was marked Failed.
  pub fn on_fail<E: Environment>(
    &self,
    table: &mut PeerTable<E::Timer>,
    env: &mut E,
    peer: &Socket,
    generation: u64,
  ) -> Result<bool, PeerTableError> {
    let cleanup_time = self.cleanup_time();
    let epoch = self.epoch;
    let state = table.get_mut(peer)?;
    if generation != state.generation() || !state.is_correct() {
      debug!(
        LOG_LEVEL,
        env,
        format!(
          "Stale fail timer for {}: generation {}, current {}",
          peer,
          generation,
          state.generation()
        )
      );
      return Ok(false);
    }
    state.release_timer();
    state.fail();
    state.rearm(|g| {
      env.schedule(cleanup_time, DetectorMsg::Cleanup(epoch, peer.clone(), g))
    });
    info!(LOG_LEVEL, env, format!("{} failed", peer));
    let reporter = table.me().clone();
    env.report(TrackerRemoteMsg::CrashReport {
      failed: peer.clone(),
      reporter: reporter,
    });
    Ok(true)
  }

  /// Handles a cleanup timer. Returns whether the peer was removed.
  pub fn on_cleanup<E: Environment>(
    &self,
    table: &mut PeerTable<E::Timer>,
    env: &mut E,
    peer: &Socket,
    generation: u64,
  ) -> Result<bool, PeerTableError> {
    let state = table.get_mut(peer)?;
    if generation != state.generation() {
      debug!(
        LOG_LEVEL,
        env,
        format!(
          "Stale cleanup timer for {}: generation {}, current {}",
          peer,
          generation,
          state.generation()
        )
      );
      return Ok(false);
    }
    state.release_timer();
    table.remove(peer)?;
    debug!(LOG_LEVEL, env, format!("Removed {}", peer));
    Ok(true)
  }
}

#[cfg(test)]
use crate::core::Host;
#[cfg(test)]
use crate::detector::test_env::TestEnv;
#[cfg(test)]
use crate::detector::PeerStatus;
#[cfg(test)]
use crate::testkit::SimTimer;

#[cfg(test)]
fn setup(n: u16) -> (Vec<Socket>, PeerTable<SimTimer>, TestEnv, FailureDetector) {
  let s = (0..n)
    .map(|i| Socket::new(Host::from("127.0.0.1"), 5500 + i))
    .collect::<Vec<_>>();
  let mut env = TestEnv::new(s[0].clone());
  let mut table = PeerTable::new(s.clone(), s[0].clone());
  let fd = FailureDetector::new(Duration::from_millis(2500), 0);
  fd.arm_all(&mut table, &mut env);
  (s, table, env, fd)
}

#[test]
fn test_arm_all_skips_self() {
  let (s, table, env, _) = setup(3);
  assert_eq!(env.scheduled.len(), 2);
  assert!(env
    .scheduled
    .iter()
    .all(|(_, d, _)| *d == Duration::from_millis(2500)));
  assert!(!table.get(&s[0]).unwrap().has_timer());
  assert!(table.get(&s[1]).unwrap().has_timer());
  assert!(env.scheduled.contains(&(
    0,
    Duration::from_millis(2500),
    DetectorMsg::Fail(0, s[1].clone(), 0)
  )) || env.scheduled.contains(&(
    1,
    Duration::from_millis(2500),
    DetectorMsg::Fail(0, s[1].clone(), 0)
  )));
}

#[test]
fn test_refresh_extends_lease() {
  let (s, mut table, mut env, fd) = setup(3);
  let incoming: Beats =
    vec![(s[0].clone(), 40u64), (s[1].clone(), 3u64), (s[2].clone(), 0u64)]
      .into_iter()
      .collect();
  fd.refresh(&mut table, &mut env, &incoming);

  // Self is authoritative for its own counter.
  assert_eq!(table.get(&s[0]).unwrap().beats(), 0);
  let b = table.get(&s[1]).unwrap();
  assert_eq!((b.beats(), b.generation(), b.quiescence()), (3, 1, 0));
  let c = table.get(&s[2]).unwrap();
  assert_eq!((c.beats(), c.generation(), c.quiescence()), (0, 0, 1));

  assert!(env
    .pending(|m| *m == DetectorMsg::Fail(0, s[1].clone(), 0))
    .is_empty());
  assert_eq!(
    env.pending(|m| *m == DetectorMsg::Fail(0, s[1].clone(), 1)).len(),
    1
  );
  assert_eq!(
    env.pending(|m| *m == DetectorMsg::Fail(0, s[2].clone(), 0)).len(),
    1
  );

  // Missing from the vector counts as no refresh.
  fd.refresh(&mut table, &mut env, &Beats::new());
  assert_eq!(table.get(&s[1]).unwrap().quiescence(), 1);
  assert_eq!(table.get(&s[2]).unwrap().quiescence(), 2);
}

#[test]
fn test_fail_then_cleanup() {
  let (s, mut table, mut env, fd) = setup(3);
  assert_eq!(fd.on_fail(&mut table, &mut env, &s[1], 0), Ok(true));
  let b = table.get(&s[1]).unwrap();
  assert_eq!(b.status(), PeerStatus::Failed);
  assert_eq!(b.generation(), 1);
  assert_eq!(
    env.reports,
    vec![TrackerRemoteMsg::CrashReport {
      failed: s[1].clone(),
      reporter: s[0].clone()
    }]
  );
  let cleanup = env
    .scheduled
    .iter()
    .find(|(_, _, m)| *m == DetectorMsg::Cleanup(0, s[1].clone(), 1))
    .unwrap();
  assert_eq!(cleanup.1, Duration::from_millis(5000));
  assert!(!table.beats().contains_key(&s[1]));
  let target = table.select_gossip_target_by(&mut env.rng, |_| 1);
  assert_eq!(target, Some(s[2].clone()));

  assert_eq!(fd.on_cleanup(&mut table, &mut env, &s[1], 1), Ok(true));
  assert!(!table.contains(&s[1]));
  assert_eq!(env.reports.len(), 1);
}

#[test]
fn test_stale_timers_are_ignored() {
  let (s, mut table, mut env, fd) = setup(3);
  let incoming: Beats = vec![(s[1].clone(), 1u64)].into_iter().collect();
  fd.refresh(&mut table, &mut env, &incoming);

  // The generation 0 timer fires anyway.
  assert_eq!(fd.on_fail(&mut table, &mut env, &s[1], 0), Ok(false));
  assert!(table.get(&s[1]).unwrap().is_correct());
  assert!(env.reports.is_empty());
  assert_eq!(fd.on_cleanup(&mut table, &mut env, &s[1], 0), Ok(false));
  assert!(table.contains(&s[1]));

  // A second Fail for the same generation after the first one reports nothing new.
  assert_eq!(fd.on_fail(&mut table, &mut env, &s[1], 1), Ok(true));
  assert_eq!(fd.on_fail(&mut table, &mut env, &s[1], 1), Ok(false));
  assert_eq!(env.reports.len(), 1);
  let scheduled = env.scheduled.len();
  assert_eq!(fd.on_cleanup(&mut table, &mut env, &s[1], 1), Ok(false));
  assert_eq!(env.scheduled.len(), scheduled);

  let gone = Socket::new(Host::from("127.0.0.1"), 1);
  assert_eq!(
    fd.on_fail(&mut table, &mut env, &gone, 0),
    Err(PeerTableError::NotFound(gone.clone()))
  );
}

#[test]
fn test_failed_peer_is_not_revived() {
  let (s, mut table, mut env, fd) = setup(2);
  fd.on_fail(&mut table, &mut env, &s[1], 0).unwrap();
  let incoming: Beats = vec![(s[1].clone(), 100u64)].into_iter().collect();
  fd.refresh(&mut table, &mut env, &incoming);
  let b = table.get(&s[1]).unwrap();
  assert_eq!(b.status(), PeerStatus::Failed);
  assert_eq!(b.beats(), 0);
}
