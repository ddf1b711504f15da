use crate::core::{Cancellable, Socket};
use crate::detector::{DetectorMsg, DetectorRemoteMsg, TrackerRemoteMsg};
use crate::testkit::LoggerMsg;
use rand::Rng;
use std::time::Duration;

/// Everything a [`NodeController`](crate::detector::NodeController) needs from the outside world.
/// [`DetectorActor`](crate::detector::DetectorActor) backs it with a real [`Node`](crate::core::Node),
/// [`Simulation`](crate::testkit::Simulation) with a virtual clock.
pub trait Environment {
  type Timer: Cancellable;
  type Rng: Rng;

  /// The identity of the node the controller runs on.
  fn me(&self) -> &Socket;
  /// Delivers `msg` back to the controller after `delay`, unless the timer is cancelled first.
  fn schedule(&mut self, delay: Duration, msg: DetectorMsg) -> Self::Timer;
  /// Sends a message to the detector at `to`. Delivery is not guaranteed.
  fn send(&mut self, to: &Socket, msg: DetectorRemoteMsg);
  /// Sends a message to the tracker.
  fn report(&mut self, msg: TrackerRemoteMsg);
  fn rng(&mut self) -> &mut Self::Rng;
  /// Terminates the process hosting the controller.
  fn shutdown(&mut self);
  fn log(&self, msg: LoggerMsg);
}

#[cfg(test)]
pub(crate) mod test_env {
  use super::*;
  use crate::testkit::SimTimer;
  use hashbrown::HashSet;
  use rand::rngs::SmallRng;
  use rand::SeedableRng;
  use std::cell::RefCell;
  use std::rc::Rc;

  /// Records everything a controller asks for.
  pub struct TestEnv {
    pub me: Socket,
    pub scheduled: Vec<(u64, Duration, DetectorMsg)>,
    pub sent: Vec<(Socket, DetectorRemoteMsg)>,
    pub reports: Vec<TrackerRemoteMsg>,
    pub cancelled: Rc<RefCell<HashSet<u64>>>,
    pub shut_down: bool,
    pub rng: SmallRng,
    next_timer: u64,
  }
  impl TestEnv {
    pub fn new(me: Socket) -> TestEnv {
      TestEnv {
        me: me,
        scheduled: Vec::new(),
        sent: Vec::new(),
        reports: Vec::new(),
        cancelled: Rc::new(RefCell::new(HashSet::new())),
        shut_down: false,
        rng: SmallRng::seed_from_u64(0),
        next_timer: 0,
      }
    }

    pub fn is_cancelled(&self, id: u64) -> bool {
      self.cancelled.borrow().contains(&id)
    }

    /// The scheduled timers whose message matches `pred` and that are still pending.
    pub fn pending<F: Fn(&DetectorMsg) -> bool>(&self, pred: F) -> Vec<u64> {
      self
        .scheduled
        .iter()
        .filter(|(id, _, msg)| pred(msg) && !self.is_cancelled(*id))
        .map(|(id, _, _)| *id)
        .collect()
    }
  }
  impl Environment for TestEnv {
    type Timer = SimTimer;
    type Rng = SmallRng;

    fn me(&self) -> &Socket {
      &self.me
    }

    fn schedule(&mut self, delay: Duration, msg: DetectorMsg) -> SimTimer {
      let id = self.next_timer;
      self.next_timer += 1;
      self.scheduled.push((id, delay, msg));
      SimTimer::new(id, self.cancelled.clone())
    }

    fn send(&mut self, to: &Socket, msg: DetectorRemoteMsg) {
      self.sent.push((to.clone(), msg));
    }

    fn report(&mut self, msg: TrackerRemoteMsg) {
      self.reports.push(msg);
    }

    fn rng(&mut self) -> &mut SmallRng {
      &mut self.rng
    }

    fn shutdown(&mut self) {
      self.shut_down = true;
    }

    fn log(&self, _: LoggerMsg) {}
  }
}
