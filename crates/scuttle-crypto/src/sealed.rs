//! Sealed private payloads
//!
//! A sealed payload is readable by one feed only. The sender runs X25519
//! between a fresh ephemeral key and the Montgomery form of the
//! recipient's feed key, derives a one-time ChaCha20-Poly1305 key with
//! HKDF-SHA256 and prepends its ephemeral public key to the ciphertext.
//!
//! Envelope format: ephemeral_public(32) | ciphertext | tag(16)

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};

use scuttle_core::{Content, FeedId, ScuttleError, ScuttleResult};

use crate::{Identity, PublicIdentity};

/// Key size for ChaCha20-Poly1305
pub const KEY_SIZE: usize = 32;

/// Nonce size for ChaCha20-Poly1305
pub const NONCE_SIZE: usize = 12;

/// Tag size for ChaCha20-Poly1305
pub const TAG_SIZE: usize = 16;

/// Ephemeral X25519 public key carried in front of the ciphertext
pub const EPHEMERAL_KEY_SIZE: usize = 32;

const SEALED_INFO: &[u8] = b"SCUTTLE_SEALED_v0";

/// Encrypt `plaintext` so only `recipient` can read it
pub fn seal<R: CryptoRng + RngCore>(
    recipient: &FeedId,
    plaintext: &[u8],
    rng: &mut R,
) -> ScuttleResult<Vec<u8>> {
    let public = PublicIdentity::from_feed(recipient)?;
    let ephemeral = EphemeralSecret::random_from_rng(rng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&public.exchange_public());

    let cipher = cipher_for(shared.as_bytes(), ephemeral_public.as_bytes())?;
    let ciphertext = cipher
        .encrypt(
            &Nonce::default(),
            Payload {
                msg: plaintext,
                aad: recipient.as_bytes(),
            },
        )
        .map_err(|_| ScuttleError::DecryptionFailed)?;

    let mut envelope = Vec::with_capacity(EPHEMERAL_KEY_SIZE + ciphertext.len());
    envelope.extend_from_slice(ephemeral_public.as_bytes());
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypt an envelope addressed to `identity`
pub fn open(identity: &Identity, envelope: &[u8]) -> ScuttleResult<Vec<u8>> {
    if envelope.len() < EPHEMERAL_KEY_SIZE + TAG_SIZE {
        return Err(ScuttleError::BufferTooShort {
            expected: EPHEMERAL_KEY_SIZE + TAG_SIZE,
            actual: envelope.len(),
        });
    }
    let mut ephemeral_bytes = [0u8; EPHEMERAL_KEY_SIZE];
    ephemeral_bytes.copy_from_slice(&envelope[..EPHEMERAL_KEY_SIZE]);
    let ephemeral_public = PublicKey::from(ephemeral_bytes);
    let shared = identity.exchange_secret().diffie_hellman(&ephemeral_public);

    let cipher = cipher_for(shared.as_bytes(), &ephemeral_bytes)?;
    cipher
        .decrypt(
            &Nonce::default(),
            Payload {
                msg: &envelope[EPHEMERAL_KEY_SIZE..],
                aad: identity.feed_id().as_bytes(),
            },
        )
        .map_err(|_| ScuttleError::DecryptionFailed)
}

/// Build `Content::Sealed` for `recipient`
pub fn seal_content<R: CryptoRng + RngCore>(
    recipient: FeedId,
    plaintext: &[u8],
    rng: &mut R,
) -> ScuttleResult<Content> {
    let envelope = seal(&recipient, plaintext, rng)?;
    Ok(Content::Sealed {
        recipient,
        envelope,
    })
}

/// Read sealed content addressed to `identity`
pub fn open_content(identity: &Identity, content: &Content) -> ScuttleResult<Vec<u8>> {
    match content {
        Content::Sealed {
            recipient,
            envelope,
        } => {
            if *recipient != identity.feed_id() {
                return Err(ScuttleError::NotRecipient(*recipient));
            }
            open(identity, envelope)
        }
        _ => Err(ScuttleError::InvalidWireFormat(
            "content is not sealed".into(),
        )),
    }
}

fn cipher_for(shared: &[u8; 32], salt: &[u8; 32]) -> ScuttleResult<ChaCha20Poly1305> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared);
    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(SEALED_INFO, &mut key)
        .map_err(|_| ScuttleError::DecryptionFailed)?;
    ChaCha20Poly1305::new_from_slice(&key).map_err(|_| ScuttleError::DecryptionFailed)
}
