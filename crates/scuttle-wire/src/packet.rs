//! Transport packets
//!
//! Packets are the payload of broadcast waves. Layout:
//! - Byte 0: Wire version
//! - Byte 1: Packet kind
//! - Publish: one event
//! - Session: destination relay (8, LE) | initiator flag (1) | message
//! - Direct: destination relay (8, LE) | length (4, LE) | payload
//! - Topic: topic (4, LE) | length (4, LE) | payload

use bytes::{Buf, BufMut, Bytes, BytesMut};

use scuttle_core::{Event, RelayId, ScuttleError, ScuttleResult, TopicId};

use crate::{ensure, get_event, put_event, ProtocolMessage};

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 0;

const KIND_PUBLISH: u8 = 0x01;
const KIND_SESSION: u8 = 0x02;
const KIND_DIRECT: u8 = 0x03;
const KIND_TOPIC: u8 = 0x04;

/// What a wave carries
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    /// A freshly appended event pushed to everyone in range
    Publish(Event),
    /// One replication step addressed to a single relay
    Session {
        to: RelayId,
        /// Set when the sender opened the session
        initiator: bool,
        message: ProtocolMessage,
    },
    /// Application payload for exactly one relay; everyone else relays it
    Direct { to: RelayId, payload: Bytes },
    /// Application payload for every relay subscribed to `topic`
    Topic { topic: TopicId, payload: Bytes },
}

impl Packet {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_u8(WIRE_VERSION);
        match self {
            Packet::Publish(event) => {
                buf.put_u8(KIND_PUBLISH);
                put_event(&mut buf, event);
            }
            Packet::Session {
                to,
                initiator,
                message,
            } => {
                buf.put_u8(KIND_SESSION);
                buf.put_u64_le(to.0);
                buf.put_u8(u8::from(*initiator));
                message.encode(&mut buf);
            }
            Packet::Direct { to, payload } => {
                buf.put_u8(KIND_DIRECT);
                buf.put_u64_le(to.0);
                put_payload(&mut buf, payload);
            }
            Packet::Topic { topic, payload } => {
                buf.put_u8(KIND_TOPIC);
                buf.put_u32_le(topic.0);
                put_payload(&mut buf, payload);
            }
        }
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> ScuttleResult<Self> {
        ensure(&buf, 2)?;
        let version = buf.get_u8();
        if version != WIRE_VERSION {
            return Err(ScuttleError::InvalidWireFormat(format!(
                "unsupported wire version {}",
                version
            )));
        }

        let packet = match buf.get_u8() {
            KIND_PUBLISH => Packet::Publish(get_event(&mut buf)?),
            KIND_SESSION => {
                ensure(&buf, 9)?;
                let to = RelayId::new(buf.get_u64_le());
                let initiator = match buf.get_u8() {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(ScuttleError::InvalidWireFormat(format!(
                            "bad initiator flag {}",
                            other
                        )))
                    }
                };
                let message = ProtocolMessage::decode(&mut buf)?;
                Packet::Session {
                    to,
                    initiator,
                    message,
                }
            }
            KIND_DIRECT => {
                ensure(&buf, 8)?;
                let to = RelayId::new(buf.get_u64_le());
                Packet::Direct {
                    to,
                    payload: get_payload(&mut buf)?,
                }
            }
            KIND_TOPIC => {
                ensure(&buf, 4)?;
                let topic = TopicId::new(buf.get_u32_le());
                Packet::Topic {
                    topic,
                    payload: get_payload(&mut buf)?,
                }
            }
            other => return Err(ScuttleError::UnknownMessageType(other)),
        };

        if buf.has_remaining() {
            return Err(ScuttleError::InvalidWireFormat(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }
        Ok(packet)
    }
}

fn put_payload(buf: &mut BytesMut, payload: &Bytes) {
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
}

fn get_payload(buf: &mut &[u8]) -> ScuttleResult<Bytes> {
    ensure(buf, 4)?;
    let len = buf.get_u32_le() as usize;
    ensure(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}
