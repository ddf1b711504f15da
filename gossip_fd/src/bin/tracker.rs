use gossip_fd::core::{Host, Node, NodeConfig, Socket};
use gossip_fd::tracker::{Tracker, TrackerConfig};
use std::env::args;
use std::process::exit;
use std::time::Duration;

const USAGE: &str = "usage: gsfd-tracker <host> <port> <expected-nodes> \
                     [experiments] [duration-ms] [seed]";

fn main() {
  let args = args().collect::<Vec<_>>();
  if args.len() < 4 || args.len() > 7 {
    eprintln!("{}", USAGE);
    exit(1);
  }
  let port = args[2].parse::<u16>().expect("port must be a u16");
  let mut config = TrackerConfig::default();
  config.expected_nodes = args[3].parse().expect("expected-nodes must be a number");
  if let Some(x) = args.get(4) {
    config.experiments = x.parse().expect("experiments must be a number");
  }
  if let Some(x) = args.get(5) {
    let millis = x.parse().expect("duration-ms must be a number");
    config.duration = Duration::from_millis(millis);
  }
  if let Some(x) = args.get(6) {
    config.seed = x.parse().expect("seed must be a number");
  }

  let mut node_config = NodeConfig::default();
  node_config.socket = Socket::new(Host::from(args[1].clone()), port);
  let node = Node::new(node_config).expect("could not start the node");
  Tracker::new(&node, config, None);
  node.rt().block_on(node.terminated());
}
