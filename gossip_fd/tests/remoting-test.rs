use async_trait::async_trait;
use crossbeam::channel::{unbounded, Receiver, Sender};
use gossip_fd::core::{
  Actor, ActorContext, ActorSignal, DeserializeError, Destination, Host, Node,
  NodeConfig, Socket,
};
use gossip_fd::detector::{
  node_dest, DetectorActor, DetectorRemoteMsg, ExperimentParams,
  TrackerRemoteMsg, TRACKER_NAME,
};
use gossip_fd::testkit::{LogLevel, LoggerMsg};
use gossip_fd::tracker::{Experiment, Tracker, TrackerConfig, TrackerMsg};
use maplit::hashset;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::block_on;

const TIMEOUT: Duration = Duration::from_secs(10);

fn local_node(level: LogLevel) -> Node {
  let mut config = NodeConfig::default();
  config.socket = Socket::new(Host::from("127.0.0.1"), 0);
  config.compute_threads = 2;
  config.log_level = level;
  Node::new(config).unwrap()
}

#[derive(Debug, PartialEq)]
enum ProbeMsg {
  Started,
  Text(String),
  Bad(DeserializeError),
  Stopped,
}
impl From<String> for ProbeMsg {
  fn from(s: String) -> Self {
    ProbeMsg::Text(s)
  }
}
impl From<DeserializeError> for ProbeMsg {
  fn from(e: DeserializeError) -> Self {
    ProbeMsg::Bad(e)
  }
}

struct Probe {
  tester: Sender<ProbeMsg>,
}
#[async_trait]
impl Actor<ProbeMsg> for Probe {
  async fn pre_start(&mut self, _: &ActorContext<ProbeMsg>) {
    self.tester.send(ProbeMsg::Started).unwrap();
  }

  async fn recv(&mut self, _: &ActorContext<ProbeMsg>, msg: ProbeMsg) {
    self.tester.send(msg).unwrap();
  }

  async fn post_stop(&mut self, _: &ActorContext<ProbeMsg>) {
    self.tester.send(ProbeMsg::Stopped).unwrap();
  }
}

#[test]
fn remote_messages_reach_registered_actors() {
  let node = local_node(LogLevel::Error);
  let (tx, rx) = unbounded();
  node.spawn_remote::<ProbeMsg, String, _>(
    Probe { tester: tx },
    "probe".to_string(),
  );
  assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ProbeMsg::Started);

  let socket = node.socket().clone();
  assert_ne!(socket.udp, 0);
  let text = Destination::<String>::new("probe");
  let mut expected = HashSet::new();
  for i in 0..10 {
    let msg = format!("hello-{}", i);
    block_on(node.udp_msg(&socket, &text, &msg));
    expected.insert(msg);
  }
  // Same name, wrong type: the body does not decode as a String.
  block_on(node.udp_msg(&socket, &Destination::<Vec<u64>>::new("probe"), &vec![7]));
  // Nobody is registered under this name.
  block_on(node.udp_msg(&socket, &Destination::<String>::new("nobody"), &"x".to_string()));

  let mut recvd = HashSet::new();
  let mut bad = 0;
  while recvd.len() < expected.len() || bad < 1 {
    match rx.recv_timeout(TIMEOUT).unwrap() {
      ProbeMsg::Text(s) => {
        recvd.insert(s);
      }
      ProbeMsg::Bad(DeserializeError::Body(_)) => bad += 1,
      other => panic!("unexpected {:?}", other),
    }
  }
  assert_eq!(recvd, expected);
  assert_eq!(bad, 1);

  block_on(node.udp_signal(&socket, &text, ActorSignal::Term));
  assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ProbeMsg::Stopped);
}

/// Stands in for the tracker, forwarding every report to the test.
struct Collector {
  tester: Sender<TrackerRemoteMsg>,
  started: Sender<()>,
}
#[async_trait]
impl Actor<TrackerMsg> for Collector {
  async fn pre_start(&mut self, _: &ActorContext<TrackerMsg>) {
    self.started.send(()).unwrap();
  }

  async fn recv(&mut self, _: &ActorContext<TrackerMsg>, msg: TrackerMsg) {
    if let TrackerMsg::Remote(msg) = msg {
      self.tester.send(msg).unwrap();
    }
  }
}

fn collector(node: &Node) -> Receiver<TrackerRemoteMsg> {
  let (tx, rx) = unbounded();
  let (started_tx, started_rx) = unbounded();
  node.spawn_remote::<TrackerMsg, TrackerRemoteMsg, _>(
    Collector {
      tester: tx,
      started: started_tx,
    },
    TRACKER_NAME.to_string(),
  );
  started_rx.recv_timeout(TIMEOUT).unwrap();
  rx
}

#[test]
fn detectors_report_a_self_crash() {
  let tracker = local_node(LogLevel::Info);
  tracker.log(LoggerMsg::SetLevel(LogLevel::Error));
  let reports = collector(&tracker);
  let a = local_node(LogLevel::Error);
  let b = local_node(LogLevel::Error);
  DetectorActor::new(&a, tracker.socket().clone());
  DetectorActor::new(&b, tracker.socket().clone());

  let mut registered = HashSet::new();
  while registered.len() < 2 {
    match reports.recv_timeout(TIMEOUT).unwrap() {
      TrackerRemoteMsg::Registration(s) => registered.insert(s),
      other => panic!("unexpected {:?}", other),
    };
  }
  assert_eq!(
    registered,
    hashset! {a.socket().clone(), b.socket().clone()}
  );

  let params = ExperimentParams {
    peers: vec![a.socket().clone(), b.socket().clone()],
    gossip_time: Duration::from_millis(100),
    fail_time: Duration::from_millis(600),
    ..ExperimentParams::default()
  };
  let mut crashing = params.clone();
  crashing.self_crash = Some(Duration::from_millis(300));
  let dest = node_dest();
  block_on(tracker.udp_msg(a.socket(), &dest, &DetectorRemoteMsg::Start(params)));
  block_on(tracker.udp_msg(b.socket(), &dest, &DetectorRemoteMsg::Start(crashing)));

  let crash = TrackerRemoteMsg::Crash(b.socket().clone());
  let report = TrackerRemoteMsg::CrashReport {
    failed: b.socket().clone(),
    reporter: a.socket().clone(),
  };
  let mut seen = Vec::new();
  while !(seen.contains(&crash) && seen.contains(&report)) {
    let msg = reports.recv_timeout(TIMEOUT).unwrap();
    assert!(msg == crash || msg == report, "unexpected {:?}", msg);
    seen.push(msg);
  }

  for node in [&a, &b].iter() {
    block_on(tracker.udp_msg(node.socket(), &dest, &DetectorRemoteMsg::Shutdown));
    let terminated =
      block_on(async { timeout(TIMEOUT, node.terminated()).await });
    assert!(terminated.is_ok());
  }
}

#[test]
fn tracker_runs_an_experiment_to_the_end() {
  let tracker = local_node(LogLevel::Error);
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  let config = TrackerConfig {
    expected_nodes: 3,
    experiments: 1,
    duration: Duration::from_millis(1500),
    seed: 42,
    gossip_time: Duration::from_millis(100),
    fail_time: Duration::from_millis(400),
    settle_time: Duration::from_millis(200),
    ..TrackerConfig::default()
  };
  Tracker::new(&tracker, config.clone(), Some(tx));
  // Lets the tracker register before the detectors announce themselves.
  std::thread::sleep(Duration::from_millis(100));
  let nodes = (0..3)
    .map(|_| {
      let node = local_node(LogLevel::Error);
      DetectorActor::new(&node, tracker.socket().clone());
      node
    })
    .collect::<Vec<_>>();

  let mut recvd = Vec::new();
  let finished = block_on(async {
    timeout(TIMEOUT, async {
      tokio::select! {
        _ = tracker.terminated() => (),
        _ = async {
          while let Some(msg) = rx.recv().await {
            recvd.push(msg);
          }
        } => (),
      }
    })
    .await
  });
  assert!(finished.is_ok());
  while let Ok(msg) = rx.try_recv() {
    recvd.push(msg);
  }
  for node in nodes.iter() {
    let terminated =
      block_on(async { timeout(TIMEOUT, node.terminated()).await });
    assert!(terminated.is_ok());
  }

  let sockets = nodes.iter().map(|n| n.socket().clone()).collect::<Vec<_>>();
  let registrations = recvd
    .iter()
    .filter(|m| matches!(m, TrackerRemoteMsg::Registration(_)))
    .count();
  assert_eq!(registrations, 3);

  // The tracker plans the same crash from the same seed.
  let plan =
    Experiment::generate(&sockets, config.duration, 42, config.settings())
      .unwrap();
  let planned = &plan.expected_crashes()[0];
  let crashes = recvd
    .iter()
    .filter_map(|m| match m {
      TrackerRemoteMsg::Crash(s) => Some(s.clone()),
      _ => None,
    })
    .collect::<Vec<_>>();
  // A crash planned right before the end may lose the race with Stop.
  if planned.delta + Duration::from_millis(200) < config.duration {
    assert_eq!(crashes, vec![planned.node.clone()]);
  } else {
    assert!(crashes.len() <= 1);
  }
}
