use crate::core::{DatagramHeader, Node, RegistryMsg, LOG_LEVEL, MAX_UDP_PAYLOAD};
use crate::{trace, warn};
use std::sync::Arc;
use tokio::net::UdpSocket;

pub(in crate::core) async fn udp_receiver(node: Node, udp: Arc<UdpSocket>) {
  let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
  loop {
    let len = match udp.recv_from(&mut buf[..]).await {
      Ok((len, _)) => len,
      Err(e) => {
        trace!(LOG_LEVEL, &node, format!("UDP receive error: {}", e));
        continue;
      }
    };
    match DatagramHeader::parse(&buf[..len]) {
      Ok(header) => {
        node.registry(RegistryMsg::Forward(header, buf[..len].to_vec()))
      }
      Err(e) => warn!(LOG_LEVEL, &node, format!("Dropped datagram: {}", e)),
    }
  }
}
