use crate::core::{Cancellable, Socket};
use crate::detector::{Beats, PeerState};
use hashbrown::HashMap;
use itertools::Itertools;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerTableError {
  NotFound(Socket),
  /// The operation would change the entry of the local node.
  Local(Socket),
}
impl fmt::Display for PeerTableError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PeerTableError::NotFound(s) => write!(f, "unknown peer {}", s),
      PeerTableError::Local(s) => write!(f, "{} is the local node", s),
    }
  }
}
impl std::error::Error for PeerTableError {}

/// The default gossip weight: peers not heard of for longer are more likely to be picked.
pub fn quiescence_weight<T: Cancellable>(state: &PeerState<T>) -> u64 {
  state.quiescence() + 1
}

/// One node's view of the cluster. The local node has an entry like any peer, but it never
/// fails, never holds a timer and is never a gossip target.
pub struct PeerTable<T> {
  me: Socket,
  peers: HashMap<Socket, PeerState<T>>,
}
impl<T: Cancellable> PeerTable<T> {
  pub fn new<I>(peers: I, me: Socket) -> PeerTable<T>
  where
    I: IntoIterator<Item = Socket>,
  {
    let mut map: HashMap<Socket, PeerState<T>> = peers
      .into_iter()
      .map(|s| (s, PeerState::new()))
      .collect();
    map.entry(me.clone()).or_insert_with(PeerState::new);
    PeerTable {
      me: me,
      peers: map,
    }
  }

  pub fn me(&self) -> &Socket {
    &self.me
  }

  pub fn get(&self, peer: &Socket) -> Result<&PeerState<T>, PeerTableError> {
    self
      .peers
      .get(peer)
      .ok_or_else(|| PeerTableError::NotFound(peer.clone()))
  }

  pub fn get_mut(
    &mut self,
    peer: &Socket,
  ) -> Result<&mut PeerState<T>, PeerTableError> {
    self
      .peers
      .get_mut(peer)
      .ok_or_else(|| PeerTableError::NotFound(peer.clone()))
  }

  pub fn contains(&self, peer: &Socket) -> bool {
    self.peers.contains_key(peer)
  }

  pub fn len(&self) -> usize {
    self.peers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.peers.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&Socket, &PeerState<T>)> {
    self.peers.iter()
  }

  pub(crate) fn iter_mut(
    &mut self,
  ) -> impl Iterator<Item = (&Socket, &mut PeerState<T>)> {
    self.peers.iter_mut()
  }

  /// Increments the local heartbeat counter and returns it.
  pub fn heartbeat(&mut self) -> u64 {
    self
      .peers
      .entry(self.me.clone())
      .or_insert_with(PeerState::new)
      .heartbeat()
  }

  pub fn select_gossip_target<R>(&self, rng: &mut R) -> Option<Socket>
  where
    R: Rng + ?Sized,
  {
    self.select_gossip_target_by(rng, quiescence_weight::<T>)
  }

  /// Picks a Correct peer other than the local node, with probability proportional to `weight`.
  /// Returns `None` if there is no candidate, or every candidate weighs 0.
  pub fn select_gossip_target_by<R, W>(
    &self,
    rng: &mut R,
    weight: W,
  ) -> Option<Socket>
  where
    R: Rng + ?Sized,
    W: Fn(&PeerState<T>) -> u64,
  {
    let candidates = self
      .peers
      .iter()
      .filter(|(s, p)| **s != self.me && p.is_correct())
      .sorted_by(|a, b| a.0.cmp(b.0))
      .collect_vec();
    let dist =
      WeightedIndex::new(candidates.iter().map(|(_, p)| weight(p))).ok()?;
    Some(candidates[dist.sample(rng)].0.clone())
  }

  /// A snapshot of the counters of every Correct peer.
  pub fn beats(&self) -> Beats {
    self
      .peers
      .iter()
      .filter(|(_, p)| p.is_correct())
      .map(|(s, p)| (s.clone(), p.beats()))
      .collect()
  }

  pub fn correct_peers(&self) -> Vec<Socket> {
    self
      .peers
      .iter()
      .filter(|(_, p)| p.is_correct())
      .map(|(s, _)| s.clone())
      .sorted()
      .collect()
  }

  pub fn mark_failed(&mut self, peer: &Socket) -> Result<(), PeerTableError> {
    if *peer == self.me {
      return Err(PeerTableError::Local(peer.clone()));
    }
    self.get_mut(peer)?.fail();
    Ok(())
  }

  /// Deletes the entry of `peer`, cancelling its pending timer.
  pub fn remove(
    &mut self,
    peer: &Socket,
  ) -> Result<PeerState<T>, PeerTableError> {
    if *peer == self.me {
      return Err(PeerTableError::Local(peer.clone()));
    }
    let mut state = self
      .peers
      .remove(peer)
      .ok_or_else(|| PeerTableError::NotFound(peer.clone()))?;
    state.cancel_timer();
    Ok(state)
  }

  /// Cancels every pending timer and forgets every peer.
  pub fn clear(&mut self) {
    for (_, state) in self.peers.iter_mut() {
      state.cancel_timer();
    }
    self.peers.clear();
  }
}

#[cfg(test)]
use crate::core::Host;
#[cfg(test)]
use crate::testkit::SimTimer;
#[cfg(test)]
use rand::rngs::SmallRng;
#[cfg(test)]
use rand::SeedableRng;

#[cfg(test)]
fn sockets(n: u16) -> Vec<Socket> {
  (0..n)
    .map(|i| Socket::new(Host::from("127.0.0.1"), 5500 + i))
    .collect()
}

#[test]
fn test_new_table_includes_self() {
  let s = sockets(3);
  let table = PeerTable::<SimTimer>::new(s[1..].to_vec(), s[0].clone());
  assert_eq!(table.len(), 3);
  assert_eq!(table.correct_peers(), s);
  assert!(table.iter().all(|(_, p)| p.beats() == 0 && !p.has_timer()));
  assert_eq!(
    table.get(&Socket::new(Host::from("127.0.0.1"), 1)).unwrap_err(),
    PeerTableError::NotFound(Socket::new(Host::from("127.0.0.1"), 1))
  );
}

#[test]
fn test_gossip_target_excludes_self_and_failed() {
  let s = sockets(4);
  let mut table = PeerTable::<SimTimer>::new(s.clone(), s[0].clone());
  table.mark_failed(&s[1]).unwrap();
  let mut rng = SmallRng::seed_from_u64(99);
  let mut seen = hashbrown::HashSet::new();
  for _ in 0..200 {
    seen.insert(table.select_gossip_target(&mut rng).unwrap());
  }
  assert_eq!(seen.len(), 2);
  assert!(seen.contains(&s[2]) && seen.contains(&s[3]));
  assert_eq!(
    table.mark_failed(&s[0]),
    Err(PeerTableError::Local(s[0].clone()))
  );
}

#[test]
fn test_gossip_target_follows_weight() {
  let s = sockets(3);
  let mut table = PeerTable::<SimTimer>::new(s.clone(), s[0].clone());
  let mut rng = SmallRng::seed_from_u64(5);
  for _ in 0..50 {
    let target = table
      .select_gossip_target_by(&mut rng, |p| if p.beats() > 0 { 1 } else { 0 });
    assert_eq!(target, None);
  }
  table.get_mut(&s[2]).unwrap().set_beats(1);
  for _ in 0..50 {
    let target = table
      .select_gossip_target_by(&mut rng, |p| if p.beats() > 0 { 1 } else { 0 });
    assert_eq!(target, Some(s[2].clone()));
  }
}

#[test]
fn test_no_gossip_target_alone() {
  let s = sockets(1);
  let table = PeerTable::<SimTimer>::new(vec![], s[0].clone());
  assert_eq!(table.select_gossip_target(&mut SmallRng::seed_from_u64(1)), None);
}

#[test]
fn test_beats_snapshot_is_isolated() {
  let s = sockets(3);
  let mut table = PeerTable::<SimTimer>::new(s.clone(), s[0].clone());
  table.heartbeat();
  let snapshot = table.beats();
  table.heartbeat();
  table.mark_failed(&s[1]).unwrap();
  assert_eq!(snapshot.get(&s[0]), Some(&1));
  assert_eq!(snapshot.get(&s[1]), Some(&0));
  let now = table.beats();
  assert_eq!(now.get(&s[0]), Some(&2));
  assert_eq!(now.get(&s[1]), None);
}

#[test]
fn test_remove_and_clear() {
  let s = sockets(3);
  let mut table = PeerTable::<SimTimer>::new(s.clone(), s[0].clone());
  assert!(table.remove(&s[1]).is_ok());
  assert!(!table.contains(&s[1]));
  assert_eq!(
    table.remove(&s[1]).err(),
    Some(PeerTableError::NotFound(s[1].clone()))
  );
  assert!(table.remove(&s[0]).is_err());
  table.clear();
  assert!(table.is_empty());
}
