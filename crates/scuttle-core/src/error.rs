//! Error types for Scuttle

use std::fmt;

use thiserror::Error;

use crate::{FeedId, RelayId};

/// Why an event does not extend its log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainFault {
    /// Index is not `last + 1`
    IndexGap { expected: u64, actual: u64 },
    /// `previous` is not the hash of the current last event
    BrokenLink { index: u64 },
}

impl fmt::Display for ChainFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainFault::IndexGap { expected, actual } => {
                write!(f, "expected index {}, got {}", expected, actual)
            }
            ChainFault::BrokenLink { index } => {
                write!(f, "previous hash mismatch at index {}", index)
            }
        }
    }
}

/// Core Scuttle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScuttleError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("Unknown content type: {0:#04x}")]
    UnknownContentType(u8),

    // Crypto errors
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Sealed payload is addressed to {0:?}")]
    NotRecipient(FeedId),

    // Log errors
    #[error("Chain violation in {feed:?}: {fault}")]
    ChainViolation { feed: FeedId, fault: ChainFault },

    #[error("Unknown identity: {0:?}")]
    UnknownIdentity(FeedId),

    // Session errors
    #[error("Session with {0:?} abandoned")]
    SessionAbandoned(RelayId),

    #[error("Unexpected {message} from {peer:?}")]
    UnexpectedMessage { peer: RelayId, message: &'static str },

    // Transport errors
    #[error("Message lost")]
    MessageLost,

    #[error("Collision")]
    Collision,

    #[error("Duplicate or stale wave {sequence} from {origin:?}, expected {expected}")]
    DuplicateOrStale {
        origin: RelayId,
        sequence: u64,
        expected: u64,
    },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for Scuttle operations
pub type ScuttleResult<T> = Result<T, ScuttleError>;
