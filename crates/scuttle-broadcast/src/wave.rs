//! Transmissions on the medium

use bytes::Bytes;

use scuttle_core::{RelayId, Tick, TopicId};

/// A flooded packet, sequenced per originating relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    /// Relay that created the wave
    pub source: RelayId,
    /// Position in the source's stream, starting at 0
    pub sequence: u64,
    /// Encoded `Packet`
    pub payload: Bytes,
    pub created_at: Tick,
    /// Relay that put this copy on the air
    pub forwarder: RelayId,
}

impl Wave {
    pub fn new(source: RelayId, sequence: u64, payload: Bytes, created_at: Tick) -> Self {
        Self {
            source,
            sequence,
            payload,
            created_at,
            forwarder: source,
        }
    }

    /// Copy of this wave re-broadcast by `relay`
    pub fn forwarded_by(&self, relay: RelayId) -> Self {
        Self {
            forwarder: relay,
            ..self.clone()
        }
    }
}

/// Ask neighbors for the waves of `target` from `from_sequence` on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArqRequest {
    pub requester: RelayId,
    pub target: RelayId,
    pub from_sequence: u64,
}

/// Anything a relay puts on the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmission {
    Wave(Wave),
    Arq(ArqRequest),
}

impl Transmission {
    /// Relay physically transmitting
    pub fn sender(&self) -> RelayId {
        match self {
            Transmission::Wave(wave) => wave.forwarder,
            Transmission::Arq(request) => request.requester,
        }
    }

    pub fn is_wave(&self) -> bool {
        matches!(self, Transmission::Wave(_))
    }

    /// Bytes on the air, headers excluded
    pub fn payload_len(&self) -> usize {
        match self {
            Transmission::Wave(wave) => wave.payload.len(),
            Transmission::Arq(_) => 0,
        }
    }
}

/// Who an application payload is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    Relay(RelayId),
    Topic(TopicId),
}

/// Addressed payload handed to the application at its destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMessage {
    /// Relay that sent it
    pub from: RelayId,
    pub address: Address,
    pub payload: Bytes,
    pub sent_at: Tick,
    pub received_at: Tick,
}

impl AppMessage {
    /// Ticks from sending to delivery
    pub fn latency(&self) -> u64 {
        self.received_at.since(self.sent_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarding_keeps_identity() {
        let wave = Wave::new(RelayId(1), 4, Bytes::from_static(b"abc"), Tick(9));
        assert_eq!(wave.forwarder, RelayId(1));

        let copy = wave.forwarded_by(RelayId(7));
        assert_eq!(copy.forwarder, RelayId(7));
        assert_eq!(copy.source, wave.source);
        assert_eq!(copy.sequence, wave.sequence);
        assert_eq!(copy.payload, wave.payload);
    }

    #[test]
    fn test_sender() {
        let wave = Wave::new(RelayId(1), 0, Bytes::new(), Tick(0)).forwarded_by(RelayId(2));
        assert_eq!(Transmission::Wave(wave).sender(), RelayId(2));

        let arq = ArqRequest {
            requester: RelayId(5),
            target: RelayId(1),
            from_sequence: 3,
        };
        assert_eq!(Transmission::Arq(arq).sender(), RelayId(5));
        assert!(!Transmission::Arq(arq).is_wave());
    }
}
