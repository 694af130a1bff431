//! The provider trait.

use crate::CryptoError;

/// SHA-256 digest length.
pub const SHA256_LEN: usize = 32;

/// Symmetric session key length.
pub const AEAD_KEY_LEN: usize = 16;

/// AEAD nonce length: security flags (1) + counter (4) + node id (8).
pub const AEAD_NONCE_LEN: usize = 13;

/// AEAD authentication tag length.
pub const AEAD_TAG_LEN: usize = 16;

/// Curve secret/public key lengths.
pub const SECRET_KEY_LEN: usize = 32;
pub const PUBLIC_KEY_LEN: usize = 32;

/// Signature length.
pub const SIGNATURE_LEN: usize = 64;

/// Platform crypto primitives.
///
/// Byte-array in, byte-array out, object safe. The engine composes
/// handshakes and the secure channel from these; a platform provider may
/// route them to hardware. The bundled [`crate::SoftwareCrypto`] serves
/// development and tests.
pub trait CryptoProvider {
    /// Fills `out` with cryptographically secure random bytes.
    fn fill_random(&self, out: &mut [u8]);

    fn sha256(&self, data: &[u8]) -> [u8; SHA256_LEN];

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; SHA256_LEN];

    /// HKDF-SHA-256 extract-and-expand into `okm`.
    fn hkdf_sha256(&self, salt: &[u8], ikm: &[u8], info: &[u8], okm: &mut [u8]);

    /// Seals `plaintext`; returns ciphertext with the tag appended.
    fn aead_encrypt(
        &self,
        key: &[u8; AEAD_KEY_LEN],
        nonce: &[u8; AEAD_NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Vec<u8>;

    /// Opens a sealed frame produced by [`CryptoProvider::aead_encrypt`].
    fn aead_decrypt(
        &self,
        key: &[u8; AEAD_KEY_LEN],
        nonce: &[u8; AEAD_NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Generates an ephemeral key-agreement keypair.
    fn ecdh_generate(&self) -> ([u8; SECRET_KEY_LEN], [u8; PUBLIC_KEY_LEN]);

    /// Computes the shared secret with a peer's public key.
    fn ecdh_shared_secret(
        &self,
        secret: &[u8; SECRET_KEY_LEN],
        peer_public: &[u8; PUBLIC_KEY_LEN],
    ) -> Result<[u8; SECRET_KEY_LEN], CryptoError>;

    /// Generates a signing key.
    fn generate_signing_key(&self) -> [u8; SECRET_KEY_LEN];

    /// The public half of a signing key.
    fn signing_public_key(&self, secret: &[u8; SECRET_KEY_LEN]) -> [u8; PUBLIC_KEY_LEN];

    fn sign(&self, secret: &[u8; SECRET_KEY_LEN], message: &[u8]) -> [u8; SIGNATURE_LEN];

    fn verify(
        &self,
        public: &[u8; PUBLIC_KEY_LEN],
        message: &[u8],
        signature: &[u8; SIGNATURE_LEN],
    ) -> Result<(), CryptoError>;
}
