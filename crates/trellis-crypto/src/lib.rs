//! # trellis-crypto: Crypto primitives behind a provider trait
//!
//! The protocol engine never calls a crypto library directly; everything
//! goes through [`CryptoProvider`] so platforms can substitute hardware
//! accelerators or spec-exact suites. The crate bundles
//! [`SoftwareCrypto`], a pure-software provider built on the workspace's
//! RustCrypto stack, and the SPAKE2+ construction PASE runs on.
//!
//! Key sizes follow the Matter session layer: 16-byte symmetric session
//! keys, 13-byte AEAD nonces (security flags + counter + source node id),
//! 32-byte public keys and 64-byte signatures.

mod error;
mod provider;
mod software;
mod spake2p;

pub use error::CryptoError;
pub use provider::{
    AEAD_KEY_LEN, AEAD_NONCE_LEN, AEAD_TAG_LEN, CryptoProvider, PUBLIC_KEY_LEN, SECRET_KEY_LEN,
    SHA256_LEN, SIGNATURE_LEN,
};
pub use software::SoftwareCrypto;
pub use spake2p::{PaseVerifier, Spake2Keys, Spake2P, Spake2Role, derive_pase_verifier};
