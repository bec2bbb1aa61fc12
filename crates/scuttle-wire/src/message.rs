//! Replication protocol messages

use std::collections::BTreeSet;

use bytes::{Buf, BufMut};

use scuttle_core::{FeedId, Frontier, News, ScuttleError, ScuttleResult};

use crate::{ensure, get_feed_set, get_frontier, get_news, put_feed_set, put_frontier, put_news};

/// Message type tags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ids = 0x10,
    Frontier = 0x11,
    News = 0x12,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x10 => Some(MessageType::Ids),
            0x11 => Some(MessageType::Frontier),
            0x12 => Some(MessageType::News),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Ids => "ids",
            MessageType::Frontier => "frontier",
            MessageType::News => "news",
        }
    }
}

/// One step of a replication session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolMessage {
    /// Feeds the sender replicates, exchanged first under open replication
    Ids(BTreeSet<FeedId>),
    /// Last index per feed the sender holds
    Frontier(Frontier),
    /// Events the receiver is missing according to its frontier
    News(News),
}

impl ProtocolMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ProtocolMessage::Ids(_) => MessageType::Ids,
            ProtocolMessage::Frontier(_) => MessageType::Frontier,
            ProtocolMessage::News(_) => MessageType::News,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.message_type().to_byte());
        match self {
            ProtocolMessage::Ids(feeds) => put_feed_set(buf, feeds),
            ProtocolMessage::Frontier(frontier) => put_frontier(buf, frontier),
            ProtocolMessage::News(news) => put_news(buf, news),
        }
    }

    pub fn decode(buf: &mut impl Buf) -> ScuttleResult<Self> {
        ensure(buf, 1)?;
        let tag = buf.get_u8();
        match MessageType::from_byte(tag) {
            Some(MessageType::Ids) => Ok(ProtocolMessage::Ids(get_feed_set(buf)?)),
            Some(MessageType::Frontier) => Ok(ProtocolMessage::Frontier(get_frontier(buf)?)),
            Some(MessageType::News) => Ok(ProtocolMessage::News(get_news(buf)?)),
            None => Err(ScuttleError::UnknownMessageType(tag)),
        }
    }

    /// Number of events carried, zero for anything but news
    pub fn event_count(&self) -> usize {
        match self {
            ProtocolMessage::News(news) => news.values().map(Vec::len).sum(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use scuttle_core::{Content, Event};
    use scuttle_crypto::{sign_event, Identity};

    fn roundtrip(message: &ProtocolMessage) -> ProtocolMessage {
        let mut buf = BytesMut::new();
        message.encode(&mut buf);
        let mut reader = buf.freeze();
        let decoded = ProtocolMessage::decode(&mut reader).unwrap();
        assert!(!reader.has_remaining());
        decoded
    }

    #[test]
    fn test_ids_and_frontier_roundtrip() {
        let ids: BTreeSet<FeedId> = [FeedId([1; 32]), FeedId([2; 32])].into_iter().collect();
        let ids_msg = ProtocolMessage::Ids(ids);
        assert_eq!(roundtrip(&ids_msg), ids_msg);

        let frontier: Frontier = [(FeedId([1; 32]), 3)].into_iter().collect();
        let frontier_msg = ProtocolMessage::Frontier(frontier);
        assert_eq!(roundtrip(&frontier_msg), frontier_msg);
    }

    #[test]
    fn test_news_roundtrip() {
        let identity = Identity::from_bytes(&[5u8; 32]);
        let event = sign_event(
            &identity,
            Event::unsigned(identity.feed_id(), None, 1, Content::Post(b"hello".to_vec())),
        );
        let mut news = News::new();
        news.insert(identity.feed_id(), vec![event]);
        news.insert(FeedId([9; 32]), Vec::new());

        let message = ProtocolMessage::News(news);
        assert_eq!(message.event_count(), 1);
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_unknown_message_type() {
        let mut reader: &[u8] = &[0x42, 0, 0, 0, 0];
        assert_eq!(
            ProtocolMessage::decode(&mut reader),
            Err(ScuttleError::UnknownMessageType(0x42))
        );
    }
}
