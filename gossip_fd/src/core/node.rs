use crate::core::{
  run_single, udp_receiver, Actor, ActorContext, ActorSignal, DeserializeError,
  Destination, Interpretations, LocalActorMsg, LocalRef, MessagePackets,
  Registry, RegistryMsg, Socket, LOG_LEVEL,
};
use crate::testkit::{FailureConfigMap, FailureMode, LogLevel, Logger, LoggerMsg};
use crate::{error, trace, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::max;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A scheduled message that can be withdrawn. Cancelling is best effort: the message may already
/// sit in the mailbox, so receivers must be able to recognize stale ones.
pub trait Cancellable {
  fn cancel(&self);
}
impl Cancellable for JoinHandle<()> {
  fn cancel(&self) {
    self.abort();
  }
}

/// Configures a [`Node`].
pub struct NodeConfig {
  /// The socket this [`Node`] binds and advertises. If the UDP port is 0, the operating system
  /// picks one, and [`Node::socket`] reports the chosen port.
  ///
  /// default: `0.0.0.0:0`
  pub socket: Socket,
  /// The number of worker threads of the runtime.
  ///
  /// default: the number of logical CPUs
  pub compute_threads: usize,
  /// The level the node's [`Logger`] starts at. Can be changed with
  /// [`LoggerMsg::SetLevel`](crate::testkit::LoggerMsg::SetLevel).
  ///
  /// default: `LogLevel::Info`
  pub log_level: LogLevel,
  /// How [`Node::udp_select`] delivers messages.
  ///
  /// default: `FailureMode::None`
  pub failure_mode: FailureMode,
  /// Drop probabilities and delays applied by [`Node::udp_select`] in
  /// [`FailureMode::Message`].
  ///
  /// default: reliable for every destination
  pub fail_map: FailureConfigMap,
}
impl Default for NodeConfig {
  fn default() -> Self {
    NodeConfig {
      socket: Socket::default(),
      compute_threads: num_cpus::get(),
      log_level: LogLevel::Info,
      failure_mode: FailureMode::None,
      fail_map: FailureConfigMap::default(),
    }
  }
}

struct NodeImpl {
  socket: Socket,
  rt: Runtime,
  udp: Arc<UdpSocket>,
  registry: LocalRef<RegistryMsg>,
  logger: LocalRef<LoggerMsg>,
  failure_mode: FailureMode,
  fail_map: FailureConfigMap,
  terminated: Notify,
}

/// A process hosting actors. Owns the runtime, the UDP socket remote messages arrive on, and the
/// registry that routes them to actors by name.
#[derive(Clone)]
pub struct Node {
  node: Arc<NodeImpl>,
}
impl Node {
  pub fn new(config: NodeConfig) -> std::io::Result<Node> {
    let rt = Builder::new_multi_thread()
      .worker_threads(max(1, config.compute_threads))
      .thread_name("gsfd-worker")
      .enable_all()
      .build()?;
    let std_udp = std::net::UdpSocket::bind(config.socket.to_udp_addr()?)?;
    std_udp.set_nonblocking(true)?;
    let mut socket = config.socket;
    socket.udp = std_udp.local_addr()?.port();
    let udp = {
      let _guard = rt.enter();
      Arc::new(UdpSocket::from_std(std_udp)?)
    };
    let (reg_tx, reg_rx) = unbounded_channel::<LocalActorMsg<RegistryMsg>>();
    let (log_tx, log_rx) = unbounded_channel::<LocalActorMsg<LoggerMsg>>();
    let node = Node {
      node: Arc::new(NodeImpl {
        socket: socket,
        rt: rt,
        udp: udp.clone(),
        registry: ActorContext::create_local::<RegistryMsg>(reg_tx.clone()),
        logger: ActorContext::create_local::<LoggerMsg>(log_tx.clone()),
        failure_mode: config.failure_mode,
        fail_map: config.fail_map,
        terminated: Notify::new(),
      }),
    };
    let logger = Logger::new(config.log_level, node.socket().clone());
    let ctx = ActorContext {
      tx: log_tx,
      name: "logger".to_string(),
      node: node.clone(),
    };
    node.rt().spawn(run_single(logger, ctx, log_rx, None));
    let ctx = ActorContext {
      tx: reg_tx,
      name: "registry".to_string(),
      node: node.clone(),
    };
    node.rt().spawn(run_single(Registry::new(), ctx, reg_rx, None));
    node.rt().spawn(udp_receiver(node.clone(), udp));
    Ok(node)
  }

  pub fn socket(&self) -> &Socket {
    &self.node.socket
  }

  pub fn rt(&self) -> &Runtime {
    &self.node.rt
  }

  pub fn registry(&self, msg: RegistryMsg) {
    self.node.registry.send(msg);
  }

  pub fn log(&self, msg: LoggerMsg) {
    self.node.logger.send(msg);
  }

  /// Spawns an actor that only receives local messages.
  pub fn spawn<S, A>(&self, actor: A, name: String) -> LocalRef<S>
  where
    S: Send + 'static,
    A: Actor<S> + Send + 'static,
  {
    let (tx, rx) = unbounded_channel::<LocalActorMsg<S>>();
    let ctx = ActorContext {
      tx: tx,
      name: name,
      node: self.clone(),
    };
    let local = ctx.local_interface::<S>();
    self.rt().spawn(run_single(actor, ctx, rx, None));
    local
  }

  /// Spawns an actor and registers it under `name`, so remote nodes can send it messages of type
  /// `R`.
  pub fn spawn_remote<S, R, A>(&self, actor: A, name: String) -> LocalRef<S>
  where
    S: From<R> + From<DeserializeError> + Send + 'static,
    R: DeserializeOwned + Send + 'static,
    A: Actor<S> + Send + 'static,
  {
    let (tx, rx) = unbounded_channel::<LocalActorMsg<S>>();
    let ctx = ActorContext {
      tx: tx,
      name: name,
      node: self.clone(),
    };
    let local = ctx.local_interface::<S>();
    let recvr = ctx.ser_recvr::<R>();
    self.rt().spawn(run_single(actor, ctx, rx, Some(recvr)));
    local
  }

  /// Sends `msg` to `actor` after `delay`. Aborting the returned handle withdraws the message if it
  /// has not been sent yet.
  pub fn schedule_local_msg<T: Send + 'static>(
    &self,
    delay: Duration,
    actor: LocalRef<T>,
    msg: T,
  ) -> JoinHandle<()> {
    self.rt().spawn(async move {
      sleep(delay).await;
      actor.send(msg);
    })
  }

  /// Sends a message to a remote actor, as reliably as UDP allows.
  pub async fn udp_msg<T: Serialize>(
    &self,
    socket: &Socket,
    dest: &Destination<T>,
    msg: &T,
  ) {
    if let Some(packets) = self.packets(socket, dest, Interpretations::Message, msg)
    {
      self.send_packets(socket, &packets).await;
    }
  }

  pub async fn udp_signal<T>(
    &self,
    socket: &Socket,
    dest: &Destination<T>,
    sig: ActorSignal,
  ) {
    if let Some(packets) = self.packets(socket, dest, Interpretations::Signal, &sig)
    {
      self.send_packets(socket, &packets).await;
    }
  }

  /// Sends a message to a remote actor, dropping or delaying it according to this node's
  /// [`FailureMode`] and [`FailureConfigMap`].
  pub async fn udp_select<T: Serialize>(
    &self,
    socket: &Socket,
    dest: &Destination<T>,
    msg: &T,
  ) {
    match self.node.failure_mode {
      FailureMode::None => self.udp_msg(socket, dest, msg).await,
      FailureMode::Message => {
        let fail_cfg = self.node.fail_map.get(socket);
        // We need to do the serialization work, even if the send fails.
        let packets =
          match self.packets(socket, dest, Interpretations::Message, msg) {
            Some(packets) => packets,
            None => return,
          };
        let dropped = fail_cfg.sample_drop(&mut rand::thread_rng());
        if dropped {
          trace!(LOG_LEVEL, self, format!("Dropped message to {}", socket));
          return;
        }
        match fail_cfg.sample_delay() {
          Some(dur) => {
            let node = self.clone();
            let socket = socket.clone();
            self.rt().spawn(async move {
              sleep(dur).await;
              node.send_packets(&socket, &packets).await;
            });
          }
          None => self.send_packets(socket, &packets).await,
        }
      }
    }
  }

  /// Wakes up whoever waits on [`terminated`](Node::terminated), usually the main thread.
  pub fn terminate(&self) {
    self.node.terminated.notify_one();
  }

  pub async fn terminated(&self) {
    self.node.terminated.notified().await;
  }

  fn packets<T: Serialize, I>(
    &self,
    socket: &Socket,
    dest: &Destination<I>,
    intp: Interpretations,
    msg: &T,
  ) -> Option<MessagePackets> {
    match MessagePackets::new(msg, intp, dest.name()) {
      Ok(packets) => Some(packets),
      Err(e) => {
        error!(LOG_LEVEL, self, format!("Cannot send to {}: {}", socket, e));
        None
      }
    }
  }

  async fn send_packets(&self, socket: &Socket, packets: &MessagePackets) {
    let addr = match socket.as_udp_addr().await {
      Ok(addrs) if !addrs.is_empty() => addrs[0],
      _ => {
        warn!(LOG_LEVEL, self, format!("No resolution for {}", socket));
        return;
      }
    };
    if let Err(e) = self.node.udp.send_to(packets.bytes(), addr).await {
      warn!(LOG_LEVEL, self, format!("Send to {} failed: {}", socket, e));
    }
  }
}
