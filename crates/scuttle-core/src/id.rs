//! Identity types for Scuttle
//!
//! Feeds are named by their author's Ed25519 public key. Relays are the
//! simulated radios carrying traffic and use compact 64-bit ids.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Feed identity - the Ed25519 public key that names an append-only log
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct FeedId(pub [u8; 32]);

impl FeedId {
    pub const LEN: usize = 32;

    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        FeedId(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        FeedId(bytes)
    }

    /// Build from a slice, `None` unless it is exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(FeedId(array))
    }

    /// First four key bytes, enough to tell feeds apart in logs
    #[inline]
    pub fn short(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Feed({:08x})", self.short())
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Relay identity - a node of the simulated broadcast medium
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct RelayId(pub u64);

impl RelayId {
    pub const ZERO: RelayId = RelayId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        RelayId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        RelayId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relay({})", self.0)
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Multicast topic relays can subscribe to
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TopicId(pub u32);

impl TopicId {
    #[inline]
    pub fn new(topic: u32) -> Self {
        TopicId(topic)
    }
}

impl fmt::Debug for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self.0)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_id_display_is_full_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let id = FeedId::new(bytes);

        let hex = id.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("ab00"));
        assert!(hex.ends_with("01"));
        assert_eq!(format!("{:?}", id), "Feed(ab000000)");
    }

    #[test]
    fn test_feed_id_from_slice() {
        assert!(FeedId::from_slice(&[1u8; 31]).is_none());
        assert_eq!(FeedId::from_slice(&[7u8; 32]), Some(FeedId([7u8; 32])));
    }

    #[test]
    fn test_relay_id_roundtrip() {
        let id = RelayId::new(0xdead_beef);
        assert_eq!(RelayId::from_bytes(id.to_bytes()), id);
        assert_eq!(format!("{:?}", id), "Relay(3735928559)");
    }

    #[test]
    fn test_topic_formatting() {
        let topic = TopicId::new(4);
        assert_eq!(topic.to_string(), "#4");
        assert_eq!(format!("{:?}", topic), "Topic(4)");
    }
}
