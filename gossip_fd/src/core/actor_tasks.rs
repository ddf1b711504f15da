use crate::core::{
  Actor, ActorContext, ActorSignal, LocalActorMsg, RegistryMsg, SerializedRecvr,
  LOG_LEVEL,
};
use crate::error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot::channel;

pub(in crate::core) async fn run_single<S, A>(
  mut actor: A,
  ctx: ActorContext<S>,
  mut rx: UnboundedReceiver<LocalActorMsg<S>>,
  recvr: Option<SerializedRecvr>,
) where
  S: Send + 'static,
  A: Actor<S> + Send + 'static,
{
  let register = recvr.is_some();
  if let Some(recvr) = recvr {
    let (tx, rx) = channel::<()>();
    ctx
      .node
      .registry(RegistryMsg::Register(ctx.name.clone(), recvr, tx));
    if rx.await.is_err() {
      error!(
        LOG_LEVEL,
        &ctx.node,
        format!("Could not register {}", ctx.name)
      );
    }
  }
  actor.pre_start(&ctx).await;
  while let Some(msg) = rx.recv().await {
    match msg {
      LocalActorMsg::Msg(m) => actor.recv(&ctx, m).await,
      LocalActorMsg::Signal(ActorSignal::Term) => break,
    };
  }
  actor.post_stop(&ctx).await;
  if register {
    ctx.node.registry(RegistryMsg::Deregister(ctx.name.clone()));
  }
}
