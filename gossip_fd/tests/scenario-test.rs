use gossip_fd::core::{Host, Socket};
use gossip_fd::detector::{
  DetectorRemoteMsg, ExperimentParams, PeerStatus, TrackerRemoteMsg,
};
use gossip_fd::testkit::{FailureConfig, FailureConfigMap, SimReport, Simulation};
use std::time::Duration;

const fn ms(millis: u64) -> Duration {
  Duration::from_millis(millis)
}

fn reports_about<'a>(sim: &'a Simulation, failed: &Socket) -> Vec<&'a SimReport> {
  sim
    .reports()
    .iter()
    .filter(|r| match &r.msg {
      TrackerRemoteMsg::CrashReport { failed: f, .. } => f == failed,
      _ => false,
    })
    .collect()
}

fn status(sim: &Simulation, at: &Socket, of: &Socket) -> Option<PeerStatus> {
  sim
    .controller(at)
    .and_then(|c| c.table())
    .and_then(|t| t.get(of).ok())
    .map(|p| p.status())
}

fn stopped_node(sim: Simulation) {
  let mut sim = sim;
  let nodes = sim.add_nodes(3);
  let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);
  sim.start_all(ms(0), &ExperimentParams::default());
  sim.send_at(ms(0), b, DetectorRemoteMsg::Stop);

  sim.run_until(ms(2499));
  assert!(!sim.controller(b).unwrap().is_running());
  assert_eq!(status(&sim, a, b), Some(PeerStatus::Correct));
  assert_eq!(status(&sim, c, b), Some(PeerStatus::Correct));
  assert!(reports_about(&sim, b).is_empty());

  sim.run_until(ms(2501));
  assert_eq!(status(&sim, a, b), Some(PeerStatus::Failed));
  assert_eq!(status(&sim, c, b), Some(PeerStatus::Failed));
  let reports = reports_about(&sim, b);
  assert_eq!(reports.len(), 2);
  for (report, reporter) in reports.iter().zip([a, c].iter()) {
    assert_eq!(report.time, ms(2500));
    assert_eq!(
      report.msg,
      TrackerRemoteMsg::CrashReport {
        failed: b.clone(),
        reporter: (*reporter).clone(),
      }
    );
  }

  sim.run_until(ms(7499));
  assert!(sim.controller(a).unwrap().table().unwrap().contains(b));
  assert!(sim.controller(c).unwrap().table().unwrap().contains(b));
  sim.run_until(ms(7500));
  assert!(!sim.controller(a).unwrap().table().unwrap().contains(b));
  assert!(!sim.controller(c).unwrap().table().unwrap().contains(b));

  sim.run_until(ms(30_000));
  assert_eq!(status(&sim, a, b), None);
  assert_eq!(status(&sim, c, b), None);
  assert_eq!(reports_about(&sim, b).len(), 2);
}

#[test]
fn stopped_node_is_detected_and_removed() {
  stopped_node(Simulation::new(7));
}

#[test]
fn stale_timers_do_not_change_the_outcome() {
  stopped_node(Simulation::new(7).ignore_cancellation());
}

#[test]
fn steady_gossip_has_no_false_failures() {
  for sim in vec![Simulation::new(1), Simulation::new(2).ignore_cancellation()] {
    let mut sim = sim;
    let nodes = sim.add_nodes(2);
    sim.start_all(ms(0), &ExperimentParams::default());
    sim.run_until(ms(60_000));
    assert!(sim.reports().is_empty());
    for node in nodes.iter() {
      let table = sim.controller(node).unwrap().table().unwrap();
      assert_eq!(table.correct_peers(), nodes);
      // One heartbeat per second of gossip, plus one per multicast.
      assert!(table.get(node).unwrap().beats() >= 60);
    }
  }
}

#[test]
fn self_crash_is_reported_once_by_everyone() {
  let mut sim = Simulation::new(11);
  let nodes = sim.add_nodes(3);
  let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);
  let params = ExperimentParams {
    peers: nodes.clone(),
    ..ExperimentParams::default()
  };
  for node in nodes.iter() {
    let mut params = params.clone();
    if node == b {
      params.self_crash = Some(ms(3000));
    }
    sim.send_at(ms(0), node, DetectorRemoteMsg::Start(params));
  }
  sim.run_until(ms(20_000));

  let crashes = sim
    .reports()
    .iter()
    .filter(|r| r.msg == TrackerRemoteMsg::Crash(b.clone()))
    .collect::<Vec<_>>();
  assert_eq!(crashes.len(), 1);
  assert_eq!(crashes[0].time, ms(3000));
  assert_eq!(&crashes[0].from, b);

  for reporter in [a, c].iter() {
    let reports = reports_about(&sim, b)
      .into_iter()
      .filter(|r| &r.from == *reporter)
      .collect::<Vec<_>>();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].time >= ms(2500) && reports[0].time <= ms(7500));
  }
  assert!(!sim.controller(b).unwrap().is_running());
}

#[test]
fn certain_multicast_keeps_everyone_alive() {
  let mut sim = Simulation::new(3);
  let nodes = sim.add_nodes(4);
  let params = ExperimentParams {
    gossip_time: ms(600_000),
    multicast_max_wait: 0,
    ..ExperimentParams::default()
  };
  sim.start_all(ms(0), &params);
  let d = nodes[3].clone();
  sim.send_at(ms(5000), &d, DetectorRemoteMsg::Stop);
  sim.run_until(ms(6499));
  assert!(sim.reports().is_empty());

  // The last multicast of d went out at 4000.
  sim.run_until(ms(6500));
  let reports = reports_about(&sim, &d);
  assert_eq!(reports.len(), 3);
  assert!(reports.iter().all(|r| r.time == ms(6500)));
  sim.run_until(ms(30_000));
  assert_eq!(sim.reports().len(), 3);
}

#[test]
fn deaf_node_suspects_everyone() {
  let deaf = Socket::new(Host::from("127.0.0.1"), 5502);
  let mut fail_map = FailureConfigMap::default();
  fail_map.node_wide.insert(
    deaf.clone(),
    FailureConfig {
      drop_prob: 1.0,
      delay: None,
    },
  );
  let mut sim = Simulation::new(5).with_fail_map(fail_map);
  let nodes = sim.add_nodes(3);
  assert_eq!(nodes[2], deaf);
  sim.start_all(ms(0), &ExperimentParams::default());
  sim.run_until(ms(2500));
  let suspected = sim
    .reports()
    .iter()
    .filter(|r| r.from == deaf)
    .collect::<Vec<_>>();
  assert_eq!(suspected.len(), 2);
  let mut failed = Vec::new();
  for report in suspected {
    assert_eq!(report.time, ms(2500));
    match &report.msg {
      TrackerRemoteMsg::CrashReport { failed: f, reporter } => {
        assert_eq!(reporter, &deaf);
        failed.push(f.clone());
      }
      other => panic!("unexpected report {:?}", other),
    }
  }
  failed.sort();
  assert_eq!(failed, nodes[..2].to_vec());
  let table = sim.controller(&deaf).unwrap().table().unwrap();
  assert_eq!(table.correct_peers(), vec![deaf.clone()]);
}

#[test]
fn restart_resets_the_table() {
  let mut sim = Simulation::new(9);
  let nodes = sim.add_nodes(2);
  sim.start_all(ms(0), &ExperimentParams::default());
  sim.send_at(ms(0), &nodes[1], DetectorRemoteMsg::Stop);
  sim.run_until(ms(3000));
  assert_eq!(status(&sim, &nodes[0], &nodes[1]), Some(PeerStatus::Failed));

  sim.start_all(ms(3000), &ExperimentParams::default());
  sim.run_until(ms(3000));
  assert_eq!(status(&sim, &nodes[0], &nodes[1]), Some(PeerStatus::Correct));
  let table = sim.controller(&nodes[0]).unwrap().table().unwrap();
  assert_eq!(table.get(&nodes[1]).unwrap().generation(), 0);
  assert_eq!(table.get(&nodes[0]).unwrap().beats(), 0);
  sim.run_until(ms(30_000));
  assert_eq!(reports_about(&sim, &nodes[1]).len(), 1);
}

#[test]
fn restart_ignores_timers_of_the_old_run() {
  let mut sim = Simulation::new(4).ignore_cancellation();
  sim.add_nodes(3);
  sim.start_all(ms(0), &ExperimentParams::default());
  sim.start_all(ms(2400), &ExperimentParams::default());
  // The first run's fail timers fire at 2500, the second run's at 4900 at the earliest.
  sim.run_until(ms(4899));
  assert!(sim.reports().is_empty());
}

#[test]
fn stop_then_start_ignores_timers_of_the_old_run() {
  let mut sim = Simulation::new(6).ignore_cancellation();
  let nodes = sim.add_nodes(3);
  sim.start_all(ms(0), &ExperimentParams::default());
  for node in nodes.iter() {
    sim.send_at(ms(1200), node, DetectorRemoteMsg::Stop);
  }
  sim.start_all(ms(2000), &ExperimentParams::default());
  sim.run_until(ms(4499));
  assert!(sim.reports().is_empty());
  for node in nodes.iter() {
    assert_eq!(sim.controller(node).unwrap().epoch(), 2);
  }
}

#[test]
fn restart_keeps_a_single_gossip_chain() {
  let mut sim = Simulation::new(8).ignore_cancellation();
  let nodes = sim.add_nodes(2);
  let params = ExperimentParams {
    multicast_max_wait: 1_000_000,
    ..ExperimentParams::default()
  };
  sim.start_all(ms(0), &params);
  sim.start_all(ms(500), &params);
  // Ticks at 1500, 2500, .., 10500.
  sim.run_until(ms(11_000));
  assert!(sim.reports().is_empty());
  for node in nodes.iter() {
    let table = sim.controller(node).unwrap().table().unwrap();
    assert_eq!(table.get(node).unwrap().beats(), 10);
  }
}
