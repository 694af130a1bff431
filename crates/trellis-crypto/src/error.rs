//! Crypto errors.

/// Errors surfaced by crypto providers and constructions.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD open failed: wrong key, nonce, AAD or a tampered frame.
    #[error("authenticated decryption failed")]
    AeadTagMismatch,

    /// A signature did not verify.
    #[error("signature verification failed")]
    InvalidSignature,

    /// Peer key material is not a valid curve point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// A PAKE confirmation MAC did not match.
    #[error("key confirmation failed")]
    ConfirmationMismatch,
}
