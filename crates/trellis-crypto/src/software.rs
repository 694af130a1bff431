//! The bundled pure-software provider.
//!
//! Built on the workspace's RustCrypto stack: SHA-256/HKDF/HMAC, AES-GCM
//! with the 13-byte session nonce, X25519 key agreement and Ed25519
//! signatures. Spec-exact interop suites (P-256, AES-CCM) arrive through
//! a platform provider implementing the same trait.

use std::cell::RefCell;

use aes_gcm::aead::generic_array::typenum::{U13, U16};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{AesGcm, KeyInit, aes::Aes128};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use crate::provider::{
    AEAD_KEY_LEN, AEAD_NONCE_LEN, CryptoProvider, PUBLIC_KEY_LEN, SECRET_KEY_LEN, SHA256_LEN,
    SIGNATURE_LEN,
};
use crate::CryptoError;

type SessionAead = AesGcm<Aes128, U13, U16>;

/// Software crypto provider.
pub struct SoftwareCrypto {
    rng: RefCell<StdRng>,
}

impl SoftwareCrypto {
    /// Provider seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: RefCell::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic provider for tests and simulation.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for SoftwareCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoProvider for SoftwareCrypto {
    fn fill_random(&self, out: &mut [u8]) {
        self.rng.borrow_mut().fill_bytes(out);
    }

    fn sha256(&self, data: &[u8]) -> [u8; SHA256_LEN] {
        Sha256::digest(data).into()
    }

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; SHA256_LEN] {
        let mut mac =
            <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    fn hkdf_sha256(&self, salt: &[u8], ikm: &[u8], info: &[u8], okm: &mut [u8]) {
        Hkdf::<Sha256>::new(Some(salt), ikm)
            .expand(info, okm)
            .expect("output length within HKDF bounds");
    }

    fn aead_encrypt(
        &self,
        key: &[u8; AEAD_KEY_LEN],
        nonce: &[u8; AEAD_NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Vec<u8> {
        let cipher = SessionAead::new(key.into());
        cipher
            .encrypt(
                nonce.into(),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .expect("AES-GCM encryption is infallible for in-memory buffers")
    }

    fn aead_decrypt(
        &self,
        key: &[u8; AEAD_KEY_LEN],
        nonce: &[u8; AEAD_NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = SessionAead::new(key.into());
        cipher
            .decrypt(
                nonce.into(),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::AeadTagMismatch)
    }

    fn ecdh_generate(&self) -> ([u8; SECRET_KEY_LEN], [u8; PUBLIC_KEY_LEN]) {
        let secret = x25519_dalek::StaticSecret::random_from_rng(&mut *self.rng.borrow_mut());
        let public = x25519_dalek::PublicKey::from(&secret);
        (secret.to_bytes(), public.to_bytes())
    }

    fn ecdh_shared_secret(
        &self,
        secret: &[u8; SECRET_KEY_LEN],
        peer_public: &[u8; PUBLIC_KEY_LEN],
    ) -> Result<[u8; SECRET_KEY_LEN], CryptoError> {
        let secret = x25519_dalek::StaticSecret::from(*secret);
        let peer = x25519_dalek::PublicKey::from(*peer_public);
        let shared = secret.diffie_hellman(&peer);
        // An all-zero output means the peer supplied a low-order point.
        if shared.as_bytes() == &[0u8; 32] {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(*shared.as_bytes())
    }

    fn generate_signing_key(&self) -> [u8; SECRET_KEY_LEN] {
        ed25519_dalek::SigningKey::generate(&mut *self.rng.borrow_mut()).to_bytes()
    }

    fn signing_public_key(&self, secret: &[u8; SECRET_KEY_LEN]) -> [u8; PUBLIC_KEY_LEN] {
        ed25519_dalek::SigningKey::from_bytes(secret)
            .verifying_key()
            .to_bytes()
    }

    fn sign(&self, secret: &[u8; SECRET_KEY_LEN], message: &[u8]) -> [u8; SIGNATURE_LEN] {
        use ed25519_dalek::Signer;
        ed25519_dalek::SigningKey::from_bytes(secret)
            .sign(message)
            .to_bytes()
    }

    fn verify(
        &self,
        public: &[u8; PUBLIC_KEY_LEN],
        message: &[u8],
        signature: &[u8; SIGNATURE_LEN],
    ) -> Result<(), CryptoError> {
        use ed25519_dalek::Verifier;
        let key = ed25519_dalek::VerifyingKey::from_bytes(public)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        key.verify(message, &ed25519_dalek::Signature::from_bytes(signature))
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl std::fmt::Debug for SoftwareCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SoftwareCrypto")
    }
}
