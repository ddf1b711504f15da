use crate::core::{ActorSignal, LocalActorMsg};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::TryFrom;
use std::fmt;

pub const MAX_UDP_PAYLOAD: usize = 65507;

/// How the body of a datagram should be read.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Interpretations {
  Message = 0,
  Signal = 1,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeserializeError {
  Truncated { expected: usize, actual: usize },
  Interpretation(u8),
  Destination,
  Body(String),
}
impl fmt::Display for DeserializeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DeserializeError::Truncated { expected, actual } => {
        write!(f, "expected {} bytes, got {}", expected, actual)
      }
      DeserializeError::Interpretation(x) => {
        write!(f, "unknown interpretation byte {}", x)
      }
      DeserializeError::Destination => write!(f, "destination is not UTF-8"),
      DeserializeError::Body(e) => write!(f, "undecodable body: {}", e),
    }
  }
}
impl std::error::Error for DeserializeError {}

#[derive(Debug)]
pub enum PacketError {
  Serialize(serde_cbor::Error),
  TooLarge(usize),
}
impl fmt::Display for PacketError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PacketError::Serialize(e) => write!(f, "could not serialize: {}", e),
      PacketError::TooLarge(size) => {
        write!(f, "{} bytes do not fit in one datagram", size)
      }
    }
  }
}
impl std::error::Error for PacketError {}

/*
We can't use Serde for the header because we need to know exactly how big the
byte slice is. A datagram is this header, the destination name and the
serialized body, concatenated. Without knowing where the name ends we can't
tell where the body starts.
 */
#[derive(Debug, Eq, PartialEq)]
pub struct DatagramHeader {
  pub intp: Interpretations,
  pub msg_size: u32,
  pub dest_size: u16,
}
// Serialization is big endian
impl DatagramHeader {
  pub const SIZE: usize = 7;

  pub fn put(&self, buf: &mut [u8]) {
    buf[0] = self.intp.into();
    buf[1..5].copy_from_slice(&self.msg_size.to_be_bytes());
    buf[5..7].copy_from_slice(&self.dest_size.to_be_bytes());
  }

  pub fn parse(buf: &[u8]) -> Result<DatagramHeader, DeserializeError> {
    if buf.len() < Self::SIZE {
      return Err(DeserializeError::Truncated {
        expected: Self::SIZE,
        actual: buf.len(),
      });
    }
    let intp = Interpretations::try_from(buf[0])
      .map_err(|_| DeserializeError::Interpretation(buf[0]))?;
    Ok(DatagramHeader {
      intp: intp,
      msg_size: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
      dest_size: u16::from_be_bytes([buf[5], buf[6]]),
    })
  }

  pub fn total(&self) -> usize {
    Self::SIZE + self.dest_size as usize + self.msg_size as usize
  }

  /// Splits a whole datagram into the destination name and the body.
  pub fn split<'a>(
    &self,
    buf: &'a [u8],
  ) -> Result<(&'a str, &'a [u8]), DeserializeError> {
    if buf.len() != self.total() {
      return Err(DeserializeError::Truncated {
        expected: self.total(),
        actual: buf.len(),
      });
    }
    let (dest, body) = buf[Self::SIZE..].split_at(self.dest_size as usize);
    let dest =
      std::str::from_utf8(dest).map_err(|_| DeserializeError::Destination)?;
    Ok((dest, body))
  }
}

/// One message, laid out as a single datagram.
pub struct MessagePackets {
  bytes: Vec<u8>,
}
impl MessagePackets {
  pub fn new<T: Serialize>(
    item: &T,
    intp: Interpretations,
    dest: &str,
  ) -> Result<MessagePackets, PacketError> {
    let body = serialize(item).map_err(PacketError::Serialize)?;
    let total = DatagramHeader::SIZE + dest.len() + body.len();
    if total > MAX_UDP_PAYLOAD || dest.len() > u16::MAX as usize {
      return Err(PacketError::TooLarge(total));
    }
    let header = DatagramHeader {
      intp: intp,
      msg_size: body.len() as u32,
      dest_size: dest.len() as u16,
    };
    let mut bytes = vec![0u8; DatagramHeader::SIZE];
    header.put(&mut bytes[..]);
    bytes.extend_from_slice(dest.as_bytes());
    bytes.extend_from_slice(&body[..]);
    Ok(MessagePackets { bytes: bytes })
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes[..]
  }
}

pub fn serialize<T: Serialize>(
  item: &T,
) -> Result<Vec<u8>, serde_cbor::Error> {
  serde_cbor::to_vec(item)
}

pub fn deserialize<T: DeserializeOwned>(
  bytes: &[u8],
) -> Result<T, DeserializeError> {
  serde_cbor::from_slice(bytes).map_err(|e| DeserializeError::Body(e.to_string()))
}

pub fn deserialize_msg<T: DeserializeOwned>(
  intp: Interpretations,
  bytes: &[u8],
) -> Result<LocalActorMsg<T>, DeserializeError> {
  match intp {
    Interpretations::Message => deserialize::<T>(bytes).map(LocalActorMsg::Msg),
    Interpretations::Signal => {
      deserialize::<ActorSignal>(bytes).map(LocalActorMsg::Signal)
    }
  }
}

#[test]
fn test_datagram_header_serde() {
  let header = DatagramHeader {
    intp: Interpretations::Signal,
    msg_size: 0x8b5d7015,
    dest_size: 0x8531,
  };
  let mut buf = [0u8; DatagramHeader::SIZE];
  header.put(&mut buf);
  assert_eq!(Ok(header), DatagramHeader::parse(&buf[..]));
}

#[test]
fn test_datagram_rejects_garbage() {
  assert_eq!(
    DatagramHeader::parse(&[0u8; 3][..]),
    Err(DeserializeError::Truncated {
      expected: DatagramHeader::SIZE,
      actual: 3
    })
  );
  assert_eq!(
    DatagramHeader::parse(&[9u8, 0, 0, 0, 0, 0, 0][..]),
    Err(DeserializeError::Interpretation(9))
  );
}

#[test]
fn test_message_packets_layout() {
  let packets =
    MessagePackets::new(&vec![1u64, 2, 3], Interpretations::Message, "gsfd-node")
      .unwrap();
  let header = DatagramHeader::parse(packets.bytes()).unwrap();
  let (dest, body) = header.split(packets.bytes()).unwrap();
  assert_eq!(dest, "gsfd-node");
  match deserialize_msg::<Vec<u64>>(header.intp, body).unwrap() {
    LocalActorMsg::Msg(v) => assert_eq!(v, vec![1, 2, 3]),
    LocalActorMsg::Signal(_) => panic!("expected a message"),
  }
  let bad = &packets.bytes()[..packets.bytes().len() - 1];
  assert!(header.split(bad).is_err());
}

#[test]
fn test_body_serde() {
  let bytes = serialize(&"gsfd".to_string()).unwrap();
  assert_eq!(deserialize::<String>(&bytes[..]), Ok("gsfd".to_string()));
  assert!(matches!(
    deserialize::<u64>(&bytes[..]),
    Err(DeserializeError::Body(_))
  ));
}
