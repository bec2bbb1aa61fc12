//! Event hashing, signing and verification

use sha2::{Digest, Sha256};

use scuttle_core::{Event, EventHash, FeedId, ScuttleError, ScuttleResult};

use crate::{Identity, PublicIdentity};

/// SHA-256 of arbitrary bytes
pub fn digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash that the next event of the feed links to
pub fn hash_event(event: &Event) -> EventHash {
    digest(&event.hash_input())
}

/// Fill in the signature of an event authored by `identity`
pub fn sign_event(identity: &Identity, mut event: Event) -> Event {
    event.signature = identity.sign(&event.signing_payload());
    event
}

/// Check that `event` was signed by the owner of `feed`
pub fn verify_event(feed: &FeedId, event: &Event) -> ScuttleResult<()> {
    if event.author != *feed {
        return Err(ScuttleError::InvalidSignature);
    }
    let public = PublicIdentity::from_feed(feed).map_err(|_| ScuttleError::InvalidSignature)?;
    if public.verify(&event.signing_payload(), &event.signature) {
        Ok(())
    } else {
        Err(ScuttleError::InvalidSignature)
    }
}
