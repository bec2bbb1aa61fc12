//! Log events
//!
//! An event is one entry of an append-only feed. Each carries its author,
//! its position in the feed, the hash of its predecessor and a signature
//! over all of that plus the content.

use std::collections::BTreeMap;

use crate::{FeedId, ScuttleError, ScuttleResult};

/// SHA-256 digest linking an event to its predecessor
pub type EventHash = [u8; 32];

/// Ed25519 signature bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Events grouped by feed, sent in reply to a peer's frontier
pub type News = BTreeMap<FeedId, Vec<Event>>;

/// Content type tags on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContentType {
    Post = 0x01,

    // Interest management
    Follow = 0x10,
    Unfollow = 0x11,
    Block = 0x12,
    Unblock = 0x13,

    // Encrypted payload addressed to one feed
    Sealed = 0x20,
}

impl ContentType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(ContentType::Post),
            0x10 => Some(ContentType::Follow),
            0x11 => Some(ContentType::Unfollow),
            0x12 => Some(ContentType::Block),
            0x13 => Some(ContentType::Unblock),
            0x20 => Some(ContentType::Sealed),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// What an event says
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    /// Opaque application payload
    Post(Vec<u8>),
    Follow(FeedId),
    Unfollow(FeedId),
    Block(FeedId),
    Unblock(FeedId),
    /// Payload encrypted to `recipient`; everyone replicates it, only the
    /// recipient can open it
    Sealed { recipient: FeedId, envelope: Vec<u8> },
}

impl Content {
    pub fn content_type(&self) -> ContentType {
        match self {
            Content::Post(_) => ContentType::Post,
            Content::Follow(_) => ContentType::Follow,
            Content::Unfollow(_) => ContentType::Unfollow,
            Content::Block(_) => ContentType::Block,
            Content::Unblock(_) => ContentType::Unblock,
            Content::Sealed { .. } => ContentType::Sealed,
        }
    }

    /// Follow/unfollow/block/unblock events steer replication and are not
    /// handed to the application
    pub fn is_interest(&self) -> bool {
        matches!(
            self,
            Content::Follow(_) | Content::Unfollow(_) | Content::Block(_) | Content::Unblock(_)
        )
    }

    /// The feed an interest event is about
    pub fn interest_target(&self) -> Option<FeedId> {
        match self {
            Content::Follow(id) | Content::Unfollow(id) | Content::Block(id) | Content::Unblock(id) => {
                Some(*id)
            }
            _ => None,
        }
    }

    /// Encode content for signing and for the wire
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.content_type().to_byte());
        match self {
            Content::Post(data) => {
                buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buf.extend_from_slice(data);
            }
            Content::Follow(id) | Content::Unfollow(id) | Content::Block(id) | Content::Unblock(id) => {
                buf.extend_from_slice(id.as_bytes());
            }
            Content::Sealed { recipient, envelope } => {
                buf.extend_from_slice(recipient.as_bytes());
                buf.extend_from_slice(&(envelope.len() as u32).to_le_bytes());
                buf.extend_from_slice(envelope);
            }
        }
        buf
    }

    /// Decode content, returning it with the number of bytes consumed
    pub fn decode(buf: &[u8]) -> ScuttleResult<(Self, usize)> {
        let tag = *buf.first().ok_or(ScuttleError::BufferTooShort {
            expected: 1,
            actual: 0,
        })?;
        let content_type =
            ContentType::from_byte(tag).ok_or(ScuttleError::UnknownContentType(tag))?;
        let body = &buf[1..];

        match content_type {
            ContentType::Post => {
                let (data, used) = read_blob(body)?;
                Ok((Content::Post(data), 1 + used))
            }
            ContentType::Follow | ContentType::Unfollow | ContentType::Block | ContentType::Unblock => {
                let id = read_feed(body)?;
                let content = match content_type {
                    ContentType::Follow => Content::Follow(id),
                    ContentType::Unfollow => Content::Unfollow(id),
                    ContentType::Block => Content::Block(id),
                    _ => Content::Unblock(id),
                };
                Ok((content, 1 + FeedId::LEN))
            }
            ContentType::Sealed => {
                let recipient = read_feed(body)?;
                let (envelope, used) = read_blob(&body[FeedId::LEN..])?;
                Ok((
                    Content::Sealed {
                        recipient,
                        envelope,
                    },
                    1 + FeedId::LEN + used,
                ))
            }
        }
    }
}

fn read_feed(buf: &[u8]) -> ScuttleResult<FeedId> {
    if buf.len() < FeedId::LEN {
        return Err(ScuttleError::BufferTooShort {
            expected: FeedId::LEN,
            actual: buf.len(),
        });
    }
    FeedId::from_slice(&buf[..FeedId::LEN])
        .ok_or_else(|| ScuttleError::InvalidWireFormat("feed id".into()))
}

fn read_blob(buf: &[u8]) -> ScuttleResult<(Vec<u8>, usize)> {
    if buf.len() < 4 {
        return Err(ScuttleError::BufferTooShort {
            expected: 4,
            actual: buf.len(),
        });
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + len {
        return Err(ScuttleError::BufferTooShort {
            expected: 4 + len,
            actual: buf.len(),
        });
    }
    Ok((buf[4..4 + len].to_vec(), 4 + len))
}

/// A signed, hash-chained log entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Feed this event belongs to
    pub author: FeedId,
    /// Hash of the previous event, `None` for the first one
    pub previous: Option<EventHash>,
    /// Position in the feed, starting at 1
    pub index: u64,
    pub content: Content,
    pub signature: [u8; SIGNATURE_SIZE],
}

impl Event {
    /// An event with an all-zero signature, to be signed by its author
    pub fn unsigned(
        author: FeedId,
        previous: Option<EventHash>,
        index: u64,
        content: Content,
    ) -> Self {
        Event {
            author,
            previous,
            index,
            content,
            signature: [0u8; SIGNATURE_SIZE],
        }
    }

    /// Bytes covered by the signature
    ///
    /// Format: author(32) | has_previous(1) | [previous(32)] | index(8) | content
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 1 + 32 + 8 + 16);
        buf.extend_from_slice(self.author.as_bytes());
        match &self.previous {
            Some(hash) => {
                buf.push(1);
                buf.extend_from_slice(hash);
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&self.index.to_le_bytes());
        buf.extend_from_slice(&self.content.encode());
        buf
    }

    /// Signing payload followed by the signature, the input of the event hash
    pub fn hash_input(&self) -> Vec<u8> {
        let mut buf = self.signing_payload();
        buf.extend_from_slice(&self.signature);
        buf
    }

    pub fn is_interest(&self) -> bool {
        self.content.is_interest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(b: u8) -> FeedId {
        FeedId([b; 32])
    }

    #[test]
    fn test_content_roundtrip_all_kinds() {
        let contents = vec![
            Content::Post(b"hello".to_vec()),
            Content::Post(Vec::new()),
            Content::Follow(feed(1)),
            Content::Unfollow(feed(2)),
            Content::Block(feed(3)),
            Content::Unblock(feed(4)),
            Content::Sealed {
                recipient: feed(5),
                envelope: vec![9; 48],
            },
        ];

        for content in contents {
            let encoded = content.encode();
            let (decoded, used) = Content::decode(&encoded).unwrap();
            assert_eq!(decoded, content);
            assert_eq!(used, encoded.len());
        }
    }

    #[test]
    fn test_content_decode_rejects_unknown_tag() {
        assert_eq!(
            Content::decode(&[0x7f, 0, 0]),
            Err(ScuttleError::UnknownContentType(0x7f))
        );
    }

    #[test]
    fn test_content_decode_rejects_truncated_blob() {
        let mut encoded = Content::Post(b"hello".to_vec()).encode();
        encoded.truncate(encoded.len() - 2);
        assert!(matches!(
            Content::decode(&encoded),
            Err(ScuttleError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_interest_classification() {
        assert!(Content::Follow(feed(1)).is_interest());
        assert!(Content::Unblock(feed(1)).is_interest());
        assert!(!Content::Post(vec![]).is_interest());
        assert_eq!(Content::Block(feed(8)).interest_target(), Some(feed(8)));
        assert_eq!(Content::Post(vec![1]).interest_target(), None);
    }

    #[test]
    fn test_signing_payload_binds_previous_and_index() {
        let first = Event::unsigned(feed(1), None, 1, Content::Post(b"x".to_vec()));
        let second = Event::unsigned(feed(1), Some([7u8; 32]), 1, Content::Post(b"x".to_vec()));
        let third = Event::unsigned(feed(1), None, 2, Content::Post(b"x".to_vec()));

        assert_ne!(first.signing_payload(), second.signing_payload());
        assert_ne!(first.signing_payload(), third.signing_payload());
        assert_eq!(first.hash_input().len(), first.signing_payload().len() + SIGNATURE_SIZE);
    }
}
