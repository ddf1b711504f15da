use crate::core::Socket;
use im::HashMap;
use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::env::var;
use std::time::Duration;

pub static PACKET_DROP: Lazy<f64> = Lazy::new(|| {
  var("GSFD_PACKET_DROP")
    .map(|x| x.parse().ok())
    .ok()
    .flatten()
    .unwrap_or(0.0)
});

pub static DELAY: Lazy<Option<(Duration, Duration)>> = Lazy::new(|| {
  var("GSFD_MIN_DELAY")
    .map(|x| x.parse().ok().map(Duration::from_millis))
    .ok()
    .flatten()
    .zip(
      var("GSFD_MAX_DELAY")
        .map(|x| x.parse().ok().map(Duration::from_millis))
        .ok()
        .flatten(),
    )
    .filter(|(x, y)| x <= y)
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureMode {
  Message,
  None,
}

#[derive(Default, Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct FailureConfig {
  pub drop_prob: f64,
  pub delay: Option<(Duration, Duration)>,
}
impl FailureConfig {
  /// Reads `GSFD_PACKET_DROP`, `GSFD_MIN_DELAY` and `GSFD_MAX_DELAY`. Missing or unparsable
  /// variables leave delivery reliable.
  pub fn from_env() -> FailureConfig {
    FailureConfig {
      drop_prob: *PACKET_DROP,
      delay: *DELAY,
    }
  }

  pub fn is_reliable(&self) -> bool {
    self.drop_prob <= 0.0 && self.delay.is_none()
  }

  pub fn sample_drop<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
    self.drop_prob > 0.0 && rng.gen::<f64>() < self.drop_prob
  }

  pub fn sample_delay_with<R: Rng + ?Sized>(
    &self,
    rng: &mut R,
  ) -> Option<Duration> {
    self.delay.map(|(min, max)| {
      let range = min.as_millis()..=max.as_millis();
      Duration::from_millis(rng.gen_range(range) as u64)
    })
  }

  pub fn sample_delay(&self) -> Option<Duration> {
    self.sample_delay_with(&mut rand::thread_rng())
  }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct FailureConfigMap {
  pub cluster_wide: FailureConfig,
  pub node_wide: HashMap<Socket, FailureConfig>,
}
impl FailureConfigMap {
  pub fn get(&self, socket: &Socket) -> &FailureConfig {
    self.node_wide.get(socket).unwrap_or(&self.cluster_wide)
  }
}

#[cfg(test)]
use crate::core::Host;
#[cfg(test)]
use rand::rngs::SmallRng;
#[cfg(test)]
use rand::SeedableRng;

#[test]
fn test_failure_config_map_lookup() {
  let noisy = Socket::new(Host::from("10.0.0.1"), 4000);
  let quiet = Socket::new(Host::from("10.0.0.2"), 4000);
  let mut map = FailureConfigMap::default();
  map.node_wide.insert(
    noisy.clone(),
    FailureConfig {
      drop_prob: 1.0,
      delay: Some((Duration::from_millis(5), Duration::from_millis(10))),
    },
  );
  assert!(map.get(&quiet).is_reliable());
  assert!(!map.get(&noisy).is_reliable());

  let mut rng = SmallRng::seed_from_u64(7);
  assert!(map.get(&noisy).sample_drop(&mut rng));
  assert!(!map.get(&quiet).sample_drop(&mut rng));
  for _ in 0..100 {
    let d = map.get(&noisy).sample_delay_with(&mut rng).unwrap();
    assert!(d >= Duration::from_millis(5) && d <= Duration::from_millis(10));
  }
  assert_eq!(map.get(&quiet).sample_delay(), None);
}
