//! Scuttle Crypto - Identities, event signatures and sealed payloads
//!
//! Provides the cryptographic primitives of the log layer:
//! - Identity management (Ed25519), the public key doubling as feed id
//! - Event hashing (SHA-256), signing and verification
//! - Sealed private payloads (X25519 + HKDF + ChaCha20-Poly1305)

pub mod identity;
pub mod signing;
pub mod sealed;

pub use identity::*;
pub use signing::*;
pub use sealed::*;
