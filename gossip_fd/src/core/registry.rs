use crate::core::{Actor, ActorContext, DatagramHeader, SerializedRecvr, LOG_LEVEL};
use crate::{trace, warn};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::oneshot::Sender;

pub enum RegistryMsg {
  Forward(DatagramHeader, Vec<u8>),
  Register(String, SerializedRecvr, Sender<()>),
  Deregister(String),
}

pub struct Registry {
  pub register: HashMap<String, SerializedRecvr>,
}
impl Registry {
  pub fn new() -> Registry {
    Registry {
      register: HashMap::new(),
    }
  }
}
#[async_trait]
impl Actor<RegistryMsg> for Registry {
  async fn recv(&mut self, ctx: &ActorContext<RegistryMsg>, msg: RegistryMsg) {
    match msg {
      RegistryMsg::Forward(header, bytes) => {
        let (dest, body) = match header.split(&bytes[..]) {
          Ok(x) => x,
          Err(e) => {
            warn!(LOG_LEVEL, &ctx.node, format!("Dropped datagram: {}", e));
            return;
          }
        };
        let delivered = match self.register.get(dest) {
          Some(recvr) => recvr(header.intp, body),
          None => {
            warn!(
              LOG_LEVEL,
              &ctx.node,
              format!("Cannot send to {}, not in register", dest)
            );
            return;
          }
        };
        if !delivered {
          self.register.remove(dest);
          warn!(
            LOG_LEVEL,
            &ctx.node,
            format!("Forward message to {} failed, removing actor", dest)
          );
        }
      }
      RegistryMsg::Register(name, channel, confirmation) => {
        trace!(
          LOG_LEVEL,
          &ctx.node,
          format!("Adding actor to registry: {}", name)
        );
        self.register.insert(name.clone(), channel);
        if let Err(_) = confirmation.send(()) {
          warn!(
            LOG_LEVEL,
            &ctx.node,
            format!("Could not confirm {}, removing from registry", name)
          );
          self.register.remove(&name);
        }
      }
      RegistryMsg::Deregister(name) => {
        trace!(
          LOG_LEVEL,
          &ctx.node,
          format!("Removing actor from registry: {}", name)
        );
        self.register.remove(&name);
      }
    }
  }
}
