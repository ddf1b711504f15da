use gossip_fd::core::{Host, Node, NodeConfig, Socket};
use gossip_fd::detector::DetectorActor;
use gossip_fd::testkit::{FailureConfig, FailureConfigMap, FailureMode};
use std::env::args;
use std::process::exit;

const USAGE: &str = "usage: gsfd-node <host> <port> <tracker-host> <tracker-port>";

fn main() {
  let args = args().collect::<Vec<_>>();
  if args.len() != 5 {
    eprintln!("{}", USAGE);
    exit(1);
  }
  let port = args[2].parse::<u16>().expect("port must be a u16");
  let tracker = Socket::new(
    Host::from(args[3].clone()),
    args[4].parse::<u16>().expect("tracker port must be a u16"),
  );

  let mut config = NodeConfig::default();
  config.socket = Socket::new(Host::from(args[1].clone()), port);
  // GSFD_PACKET_DROP, GSFD_MIN_DELAY and GSFD_MAX_DELAY make peer messages unreliable.
  let fail_cfg = FailureConfig::from_env();
  if !fail_cfg.is_reliable() {
    config.failure_mode = FailureMode::Message;
    config.fail_map = FailureConfigMap {
      cluster_wide: fail_cfg,
      node_wide: im::HashMap::new(),
    };
  }
  let node = Node::new(config).expect("could not start the node");
  DetectorActor::new(&node, tracker);
  println!("Started detector on {}", node.socket());
  node.rt().block_on(node.terminated());
}
