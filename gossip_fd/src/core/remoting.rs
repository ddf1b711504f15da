use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::{fmt, str::FromStr};
use tokio::net::lookup_host;

/// The DNS name or IP address of the machine hosting a [`Node`](crate::core::Node).
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize)]
pub enum Host {
  DNS(String),
  IP(IpAddr),
}
impl From<String> for Host {
  fn from(s: String) -> Self {
    match IpAddr::from_str(s.as_str()) {
      Ok(ip) => Host::IP(ip),
      Err(_) => Host::DNS(s),
    }
  }
}
impl From<&str> for Host {
  fn from(s: &str) -> Self {
    Host::from(s.to_string())
  }
}

/// The remote address of a [`Node`](crate::core::Node), reachable by remoting. Detectors also use
/// it as the identity of a peer.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, Ord, PartialOrd)]
pub struct Socket {
  /// The DNS name or IP address of the machine hosting the [`Node`](crate::core::Node).
  pub host: Host,
  /// The UDP port our [`Node`](crate::core::Node) receives on.
  pub udp: u16,
}
impl Socket {
  /// Creates a new [`Socket`]
  pub fn new(host: Host, udp: u16) -> Socket {
    Socket {
      host: host,
      udp: udp,
    }
  }

  /// Uses the UDP port of this [`Socket`] in a raw [`SocketAddr`]. If the [`Host`] for this
  /// [`Socket`] is a DNS name, this funtion will perform a DNS lookup. Only returns an error if the
  /// DNS lookup fails.
  pub async fn as_udp_addr(&self) -> std::io::Result<Vec<SocketAddr>> {
    match &self.host {
      Host::IP(ip) => Ok(vec![SocketAddr::new(*ip, self.udp)]),
      Host::DNS(s) => lookup_host((s.as_str(), self.udp))
        .await
        .map(|x| x.filter(|a| a.is_ipv4()).collect()),
    }
  }

  /// Blocking version of [`as_udp_addr`](Socket::as_udp_addr), used before a runtime exists.
  pub fn to_udp_addr(&self) -> std::io::Result<SocketAddr> {
    let mut addrs = match &self.host {
      Host::IP(ip) => vec![SocketAddr::new(*ip, self.udp)].into_iter(),
      Host::DNS(s) => (s.as_str(), self.udp).to_socket_addrs()?,
    };
    addrs.find(|a| a.is_ipv4()).ok_or_else(|| {
      std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        format!("no IPv4 address for {}", self),
      )
    })
  }
}
impl fmt::Display for Socket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.host {
      Host::DNS(s) => write!(f, "{}:{}", s, self.udp),
      Host::IP(ip) => write!(f, "{}:{}", ip, self.udp),
    }
  }
}
impl Default for Socket {
  fn default() -> Self {
    Self {
      host: Host::IP(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
      udp: 0,
    }
  }
}

/// The local part of an actor's messaging address: the name it was registered under and the type
/// of message it accepts from remote nodes.
pub struct Destination<I> {
  name: String,
  x: PhantomData<fn() -> I>,
}
impl<I> Destination<I> {
  /// Forges a new [`Destination`]
  pub fn new<S: Into<String>>(name: S) -> Destination<I> {
    Destination {
      name: name.into(),
      x: PhantomData,
    }
  }

  /// The registered name of the destination actor.
  pub fn name(&self) -> &str {
    self.name.as_str()
  }
}
impl<I> Clone for Destination<I> {
  fn clone(&self) -> Self {
    Destination::new(self.name.clone())
  }
}
impl<I> PartialEq for Destination<I> {
  fn eq(&self, other: &Self) -> bool {
    self.name == other.name
  }
}
impl<I> Eq for Destination<I> {}
impl<I> Hash for Destination<I> {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    self.name.hash(state);
  }
}
impl<I> Debug for Destination<I> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Destination")
      .field("Interface", &std::any::type_name::<I>())
      .field("name", &self.name)
      .finish()
  }
}

#[test]
fn test_host_from_string() {
  assert_eq!(
    Host::from("127.0.0.1"),
    Host::IP(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
  );
  assert_eq!(Host::from("localhost"), Host::DNS("localhost".to_string()));
  let socket = Socket::new(Host::from("127.0.0.1"), 4000);
  assert_eq!(socket.to_string(), "127.0.0.1:4000");
  assert_eq!(
    socket.to_udp_addr().unwrap(),
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 4000)
  );
}
