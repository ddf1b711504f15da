use crate::core::Cancellable;
use PeerStatus::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerStatus {
  Correct,
  Failed,
}

/// What a node knows about one peer. The `generation` is a ticket carried by every timer message
/// scheduled for this peer; a timer message is only honoured if its ticket is still current.
#[derive(Debug)]
pub struct PeerState<T> {
  beats: u64,
  status: PeerStatus,
  quiescence: u64,
  generation: u64,
  timer: Option<T>,
}
impl<T: Cancellable> PeerState<T> {
  pub fn new() -> PeerState<T> {
    PeerState {
      beats: 0,
      status: Correct,
      quiescence: 0,
      generation: 0,
      timer: None,
    }
  }

  pub fn beats(&self) -> u64 {
    self.beats
  }

  pub fn status(&self) -> PeerStatus {
    self.status
  }

  pub fn is_correct(&self) -> bool {
    self.status == Correct
  }

  pub fn quiescence(&self) -> u64 {
    self.quiescence
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn has_timer(&self) -> bool {
    self.timer.is_some()
  }

  pub(crate) fn heartbeat(&mut self) -> u64 {
    self.beats += 1;
    self.beats
  }

  /// Raises the counter to `beats`. Returns false, changing nothing, if `beats` is not higher.
  pub(crate) fn set_beats(&mut self, beats: u64) -> bool {
    if beats > self.beats {
      self.beats = beats;
      true
    } else {
      false
    }
  }

  pub(crate) fn quiescent(&mut self) {
    self.quiescence += 1;
  }

  pub(crate) fn reset_quiescence(&mut self) {
    self.quiescence = 0;
  }

  /// Holds a timer scheduled for the current generation.
  pub(crate) fn attach(&mut self, timer: T) {
    self.cancel_timer();
    self.timer = Some(timer);
  }

  /// Cancels the pending timer, moves to the next generation and holds the timer `schedule`
  /// creates for it. Returns the new generation.
  pub(crate) fn rearm<F>(&mut self, schedule: F) -> u64
  where
    F: FnOnce(u64) -> T,
  {
    self.cancel_timer();
    self.generation += 1;
    self.timer = Some(schedule(self.generation));
    self.generation
  }

  /// Forgets the pending timer without cancelling it, once it has fired.
  pub(crate) fn release_timer(&mut self) -> Option<T> {
    self.timer.take()
  }

  pub(crate) fn cancel_timer(&mut self) {
    if let Some(timer) = self.timer.take() {
      timer.cancel();
    }
  }

  pub(crate) fn fail(&mut self) {
    self.status = Failed;
  }
}

#[cfg(test)]
use std::cell::Cell;
#[cfg(test)]
use std::rc::Rc;

#[cfg(test)]
struct Flag(Rc<Cell<bool>>);
#[cfg(test)]
impl Cancellable for Flag {
  fn cancel(&self) {
    self.0.set(true);
  }
}

#[test]
fn test_beats_never_decrease() {
  let mut state = PeerState::<Flag>::new();
  assert!(state.set_beats(5));
  assert!(!state.set_beats(3));
  assert!(!state.set_beats(5));
  assert_eq!(state.beats(), 5);
  assert_eq!(state.heartbeat(), 6);
}

#[test]
fn test_rearm_cancels_and_bumps_generation() {
  let first = Rc::new(Cell::new(false));
  let second = Rc::new(Cell::new(false));
  let mut state = PeerState::new();
  state.attach(Flag(first.clone()));
  assert_eq!(state.generation(), 0);

  let g = state.rearm(|g| {
    assert_eq!(g, 1);
    Flag(second.clone())
  });
  assert_eq!(g, 1);
  assert!(first.get());
  assert!(!second.get());

  assert!(state.release_timer().is_some());
  assert!(!state.has_timer());
  state.cancel_timer();
  assert!(!second.get());
}
