use crate::core::{Actor, ActorContext, LocalRef, Node, Socket};
use crate::detector::{
  node_dest, tracker_dest, DetectorMsg, DetectorRemoteMsg, Environment,
  NodeController, TrackerRemoteMsg, LOG_LEVEL, NODE_NAME,
};
use crate::info;
use crate::testkit::LoggerMsg;
use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Runs a [`NodeController`] on a [`Node`]. Registered as [`NODE_NAME`], so the tracker and the
/// other detectors can reach it.
pub struct DetectorActor {
  tracker: Socket,
  controller: NodeController<JoinHandle<()>>,
  rng: SmallRng,
}
impl DetectorActor {
  pub fn new(node: &Node, tracker: Socket) -> LocalRef<DetectorMsg> {
    let actor = DetectorActor {
      tracker: tracker,
      controller: NodeController::new(),
      rng: SmallRng::from_entropy(),
    };
    node.spawn_remote::<DetectorMsg, DetectorRemoteMsg, _>(
      actor,
      NODE_NAME.to_string(),
    )
  }
}
#[async_trait]
impl Actor<DetectorMsg> for DetectorActor {
  async fn pre_start(&mut self, ctx: &ActorContext<DetectorMsg>) {
    let me = ctx.node.socket().clone();
    info!(
      LOG_LEVEL,
      &ctx.node,
      format!("Registering with tracker {}", self.tracker)
    );
    ctx
      .node
      .udp_msg(
        &self.tracker,
        &tracker_dest(),
        &TrackerRemoteMsg::Registration(me),
      )
      .await;
  }

  async fn recv(&mut self, ctx: &ActorContext<DetectorMsg>, msg: DetectorMsg) {
    let (outbox, reports) = {
      let mut env = ActorEnv {
        ctx: ctx,
        rng: &mut self.rng,
        outbox: Vec::new(),
        reports: Vec::new(),
      };
      self.controller.handle(&mut env, msg);
      (env.outbox, env.reports)
    };
    let dest = node_dest();
    for (to, msg) in outbox.iter() {
      ctx.node.udp_select(to, &dest, msg).await;
    }
    let dest = tracker_dest();
    for msg in reports.iter() {
      ctx.node.udp_msg(&self.tracker, &dest, msg).await;
    }
  }
}

/// Timers are tasks on the node's runtime. Sends are buffered while the controller runs and
/// flushed by the actor afterwards.
struct ActorEnv<'a> {
  ctx: &'a ActorContext<DetectorMsg>,
  rng: &'a mut SmallRng,
  outbox: Vec<(Socket, DetectorRemoteMsg)>,
  reports: Vec<TrackerRemoteMsg>,
}
impl Environment for ActorEnv<'_> {
  type Timer = JoinHandle<()>;
  type Rng = SmallRng;

  fn me(&self) -> &Socket {
    self.ctx.node.socket()
  }

  fn schedule(&mut self, delay: Duration, msg: DetectorMsg) -> JoinHandle<()> {
    self
      .ctx
      .node
      .schedule_local_msg(delay, self.ctx.local_interface(), msg)
  }

  fn send(&mut self, to: &Socket, msg: DetectorRemoteMsg) {
    self.outbox.push((to.clone(), msg));
  }

  fn report(&mut self, msg: TrackerRemoteMsg) {
    self.reports.push(msg);
  }

  fn rng(&mut self) -> &mut SmallRng {
    self.rng
  }

  fn shutdown(&mut self) {
    self.ctx.node.terminate();
  }

  fn log(&self, msg: LoggerMsg) {
    self.ctx.node.log(msg);
  }
}
