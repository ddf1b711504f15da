//! The base functionality the detector runs on: spawning actors, binding sockets, forging
//! destinations and sending messages.
//!
//! ### Actors
//! An actor is any type implementing [`Actor`] for its message type. Each actor runs as one task on
//! the [`Node`]'s runtime and processes its mailbox one message at a time. [`LocalRef`] sends it
//! messages from the same process.
//!
//! ```ignore
//! struct MyActor { count: u64 }
//! #[async_trait]
//! impl Actor<MyMsg> for MyActor { ... }
//!
//! let mut config = NodeConfig::default();
//! config.socket = Socket::new(Host::from("127.0.0.1"), 5500);
//! let node = Node::new(config)?;
//! let local: LocalRef<MyMsg> = node.spawn(MyActor { count: 0 }, "my-actor".to_string());
//! ```
//!
//! ### Remote Messages
//! Actors spawned with [`Node::spawn_remote`] are registered by name. A remote node reaches them
//! with a [`Socket`] and a [`Destination`], which carries the name and the type of remote message
//! accepted. The actor's message type must be convertible from the remote type, and from
//! [`DeserializeError`] so it hears about garbage addressed to it.
//!
//! ```ignore
//! let dest = Destination::<MyRemoteMsg>::new("my-actor");
//! node.udp_msg(&socket, &dest, &MyRemoteMsg::Hello).await;
//! ```
//!
//! Each message is one datagram: a 7 byte header, the destination name and the CBOR body.
//! [`Node::udp_select`] sends unreliably, dropping and delaying messages according to a
//! [`FailureMode`](crate::testkit::FailureMode) and a
//! [`FailureConfigMap`](crate::testkit::FailureConfigMap).
//!
//! ### Timers
//! [`Node::schedule_local_msg`] delivers a message to a local actor after a delay. The handle can
//! be cancelled through [`Cancellable`], but a message already in the mailbox stays there.
//!
//! ### Logging
//! Define a [`LogLevel`] for your module, and call one of the log macros. They all have the same
//! arguments: the module's level, the node and anything that implements
//! [`Display`](std::fmt::Display).
//!
//! - [`trace`](crate::trace)
//! - [`debug`](crate::debug)
//! - [`info`](crate::info)
//! - [`warn`](crate::warn)
//! - [`error`](crate::error)
//! - [`fatal`](crate::fatal)
//!
//! ```ignore
//! const LEVEL: LogLevel = LogLevel::Debug;
//! // Not logged, Trace is below Debug
//! trace!(LEVEL, &node, "kelp");
//! // Logged, Warn is above Debug
//! warn!(LEVEL, &node, "sharks");
//! ```

use crate::testkit::LogLevel;

mod actor;
mod actor_ref;
mod actor_tasks;
mod node;
mod packets;
mod registry;
mod remoting;
mod udp_receiver;

pub const LOG_LEVEL: LogLevel = LogLevel::Warn;

#[rustfmt::skip]
pub(in crate::core) use {
  actor::local_actor_msg_convert,
  actor_tasks::run_single,
  registry::Registry,
  udp_receiver::udp_receiver,
};

#[rustfmt::skip]
pub use {
  actor::SerializedRecvr,
  packets::DatagramHeader,
  packets::deserialize,
  packets::deserialize_msg,
  packets::DeserializeError,
  packets::Interpretations,
  packets::MessagePackets,
  packets::PacketError,
  packets::serialize,
  packets::MAX_UDP_PAYLOAD,
  registry::RegistryMsg,
};

// Actual public interface
#[rustfmt::skip]
pub use {
  actor::Actor,
  actor::ActorContext,
  actor::ActorSignal,
  actor::LocalActorMsg,
  actor_ref::LocalRef,
  node::Cancellable,
  node::Node,
  node::NodeConfig,
  remoting::Destination,
  remoting::Host,
  remoting::Socket,
};
