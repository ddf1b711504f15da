use crate::core::{
  deserialize_msg, DeserializeError, Interpretations, LocalRef, Node,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Hands a datagram body addressed to an actor over to that actor. Returns false if the actor is
/// gone.
pub type SerializedRecvr = Box<dyn Fn(Interpretations, &[u8]) -> bool + Send>;

#[async_trait]
pub trait Actor<Msg: Send + 'static> {
  async fn pre_start(&mut self, _: &ActorContext<Msg>) {}
  async fn recv(&mut self, ctx: &ActorContext<Msg>, msg: Msg);
  async fn post_stop(&mut self, _: &ActorContext<Msg>) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorSignal {
  Term,
}

pub enum LocalActorMsg<T> {
  Msg(T),
  Signal(ActorSignal),
}

pub fn local_actor_msg_convert<S: From<I>, I>(
  msg: LocalActorMsg<I>,
) -> LocalActorMsg<S> {
  match msg {
    LocalActorMsg::Msg(m) => LocalActorMsg::Msg(S::from(m)),
    LocalActorMsg::Signal(s) => LocalActorMsg::Signal(s),
  }
}

pub struct ActorContext<Specific> {
  pub tx: UnboundedSender<LocalActorMsg<Specific>>,
  pub name: String,
  pub node: Node,
}
impl<Specific: Send + 'static> ActorContext<Specific> {
  pub(in crate::core) fn create_local<T: Send + 'static>(
    sender: UnboundedSender<LocalActorMsg<Specific>>,
  ) -> LocalRef<T>
  where
    Specific: From<T>,
  {
    LocalRef {
      func: Arc::new(move |x: LocalActorMsg<T>| {
        sender.send(local_actor_msg_convert(x)).is_ok()
      }),
    }
  }

  pub fn local_interface<T: Send + 'static>(&self) -> LocalRef<T>
  where
    Specific: From<T>,
  {
    Self::create_local::<T>(self.tx.clone())
  }

  /// Builds the receiver the registry uses to deliver remote messages of type `R`. Bodies that
  /// fail to decode are still delivered, as a [`DeserializeError`], so the actor decides how
  /// loudly to complain.
  pub fn ser_recvr<R>(&self) -> SerializedRecvr
  where
    R: DeserializeOwned + Send + 'static,
    Specific: From<R> + From<DeserializeError>,
  {
    let sender = self.tx.clone();
    Box::new(move |intp: Interpretations, bytes: &[u8]| {
      let msg = match deserialize_msg::<R>(intp, bytes) {
        Ok(msg) => local_actor_msg_convert(msg),
        Err(e) => LocalActorMsg::Msg(Specific::from(e)),
      };
      sender.send(msg).is_ok()
    })
  }
}
