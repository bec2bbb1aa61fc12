//! Feed keys
//!
//! An Ed25519 verifying key is itself the feed id. The same key, moved to
//! its Montgomery form, doubles as the X25519 key private messages are
//! sealed to.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use x25519_dalek::StaticSecret;

use scuttle_core::{FeedId, ScuttleError, ScuttleResult};

/// Secret half of a feed: the only thing that may append to it
#[derive(Clone)]
pub struct Identity {
    key: SigningKey,
}

impl Identity {
    /// Fresh identity from the OS RNG
    pub fn generate() -> Self {
        Self::generate_with(&mut OsRng)
    }

    /// Deterministic for a seeded RNG
    pub fn generate_with<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        Identity {
            key: SigningKey::generate(rng),
        }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Identity {
            key: SigningKey::from_bytes(secret),
        }
    }

    /// Secret seed, for persisting the identity
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }

    pub fn feed_id(&self) -> FeedId {
        FeedId::new(self.key.verifying_key().to_bytes())
    }

    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            key: self.key.verifying_key(),
        }
    }

    pub fn sign(&self, payload: &[u8]) -> [u8; 64] {
        self.key.sign(payload).to_bytes()
    }

    pub fn verify(&self, payload: &[u8], signature: &[u8; 64]) -> bool {
        self.public().verify(payload, signature)
    }

    pub(crate) fn exchange_secret(&self) -> StaticSecret {
        StaticSecret::from(self.key.to_scalar_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Identity").field(&self.feed_id()).finish()
    }
}

/// Verifying half of a feed, recovered from its id alone
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicIdentity {
    key: VerifyingKey,
}

impl PublicIdentity {
    /// Fails when the id is not a valid curve point
    pub fn from_feed(feed: &FeedId) -> ScuttleResult<Self> {
        VerifyingKey::from_bytes(feed.as_bytes())
            .map(|key| PublicIdentity { key })
            .map_err(|_| ScuttleError::InvalidPublicKey)
    }

    pub fn feed_id(&self) -> FeedId {
        FeedId::new(self.key.to_bytes())
    }

    /// Strict verification, rejecting malleable signatures
    pub fn verify(&self, payload: &[u8], signature: &[u8; 64]) -> bool {
        let signature = Signature::from_bytes(signature);
        self.key.verify_strict(payload, &signature).is_ok()
    }

    pub(crate) fn exchange_public(&self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.key.to_montgomery().to_bytes())
    }
}

impl std::fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PublicIdentity").field(&self.feed_id()).finish()
    }
}
