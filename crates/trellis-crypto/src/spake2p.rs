//! SPAKE2+ for PASE.
//!
//! The password-authenticated key exchange commissioning runs on. The
//! group is Ristretto over Curve25519; the password-derived scalars come
//! from PBKDF2-HMAC-SHA-256 so the wire-visible PBKDF parameter
//! negotiation (salt, iteration count) keeps its meaning.
//!
//! Roles follow the protocol: the *prover* knows the passcode (the
//! commissioner), the *verifier* holds the registration record `(w0, L)`
//! (the device). Both ends derive a shared transcript; confirmation MACs
//! prove key agreement before any session key is used.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use sha2::Sha512;
use zeroize::Zeroize;

use crate::provider::CryptoProvider;
use crate::CryptoError;

/// Shared-key material produced by a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spake2Keys {
    /// The main shared secret; session keys derive from it.
    pub ke: [u8; 32],
    /// Prover-side confirmation key.
    pub kc_a: [u8; 16],
    /// Verifier-side confirmation key.
    pub kc_b: [u8; 16],
}

/// The password registration record held by the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaseVerifier {
    /// Password scalar, shared by both roles.
    pub w0: [u8; 32],
    /// Prover-only second scalar.
    pub w1: [u8; 32],
    /// `w1 * G`, the verifier's registration point (compressed).
    pub l: [u8; 32],
}

/// Derives the PASE verifier from a passcode.
///
/// PBKDF2-HMAC-SHA-256 over the little-endian passcode with the
/// negotiated salt and iteration count, expanded to two wide scalars.
pub fn derive_pase_verifier(
    crypto: &dyn CryptoProvider,
    passcode: u32,
    salt: &[u8],
    iterations: u32,
) -> PaseVerifier {
    let mut derived = [0u8; 128];
    pbkdf2_hmac_sha256(crypto, &passcode.to_le_bytes(), salt, iterations, &mut derived);

    let mut w0_wide = [0u8; 64];
    let mut w1_wide = [0u8; 64];
    w0_wide.copy_from_slice(&derived[..64]);
    w1_wide.copy_from_slice(&derived[64..]);
    derived.zeroize();

    let w0 = Scalar::from_bytes_mod_order_wide(&w0_wide);
    let w1 = Scalar::from_bytes_mod_order_wide(&w1_wide);
    w0_wide.zeroize();
    w1_wide.zeroize();

    let l = (RISTRETTO_BASEPOINT_POINT * w1).compress();
    PaseVerifier {
        w0: w0.to_bytes(),
        w1: w1.to_bytes(),
        l: l.to_bytes(),
    }
}

/// PBKDF2-HMAC-SHA-256 via the provider's HMAC.
fn pbkdf2_hmac_sha256(
    crypto: &dyn CryptoProvider,
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    out: &mut [u8],
) {
    let iterations = iterations.max(1);
    for (block_index, chunk) in out.chunks_mut(32).enumerate() {
        let mut block_input = salt.to_vec();
        block_input.extend_from_slice(&(block_index as u32 + 1).to_be_bytes());

        let mut u = crypto.hmac_sha256(password, &block_input);
        let mut acc = u;
        for _ in 1..iterations {
            u = crypto.hmac_sha256(password, &u);
            for (a, b) in acc.iter_mut().zip(u.iter()) {
                *a ^= b;
            }
        }
        chunk.copy_from_slice(&acc[..chunk.len()]);
    }
}

/// Which side of the exchange this context plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spake2Role {
    Prover,
    Verifier,
}

/// One in-flight SPAKE2+ exchange.
pub struct Spake2P {
    role: Spake2Role,
    context: Vec<u8>,
    w0: Scalar,
    /// Prover only.
    w1: Option<Scalar>,
    /// Verifier only.
    l: Option<RistrettoPoint>,
    ephemeral: Scalar,
    own_share: Option<CompressedRistretto>,
}

impl Spake2P {
    /// Creates the prover side from the full verifier record.
    pub fn prover(crypto: &dyn CryptoProvider, context: &[u8], verifier: &PaseVerifier) -> Self {
        Self {
            role: Spake2Role::Prover,
            context: context.to_vec(),
            w0: scalar_from_bytes(&verifier.w0),
            w1: Some(scalar_from_bytes(&verifier.w1)),
            l: None,
            ephemeral: random_scalar(crypto),
            own_share: None,
        }
    }

    /// Creates the verifier side from the registration record `(w0, L)`.
    pub fn verifier(
        crypto: &dyn CryptoProvider,
        context: &[u8],
        w0: &[u8; 32],
        l: &[u8; 32],
    ) -> Result<Self, CryptoError> {
        let l_point = CompressedRistretto::from_slice(l)
            .ok()
            .and_then(|c| c.decompress())
            .ok_or(CryptoError::InvalidPublicKey)?;
        Ok(Self {
            role: Spake2Role::Verifier,
            context: context.to_vec(),
            w0: scalar_from_bytes(w0),
            w1: None,
            l: Some(l_point),
            ephemeral: random_scalar(crypto),
            own_share: None,
        })
    }

    pub fn role(&self) -> Spake2Role {
        self.role
    }

    /// Produces this side's public share (`pA` or `pB`).
    pub fn start(&mut self) -> [u8; 32] {
        let blind = match self.role {
            Spake2Role::Prover => point_m(),
            Spake2Role::Verifier => point_n(),
        };
        let share = RISTRETTO_BASEPOINT_POINT * self.ephemeral + blind * self.w0;
        let compressed = share.compress();
        self.own_share = Some(compressed);
        compressed.to_bytes()
    }

    /// Consumes the peer's share and derives the shared keys.
    ///
    /// Call [`Spake2P::start`] first; the transcript needs both shares.
    pub fn complete(
        &self,
        crypto: &dyn CryptoProvider,
        peer_share: &[u8; 32],
    ) -> Result<Spake2Keys, CryptoError> {
        let own = self.own_share.ok_or(CryptoError::InvalidPublicKey)?;
        let peer_point = CompressedRistretto::from_slice(peer_share)
            .ok()
            .and_then(|c| c.decompress())
            .ok_or(CryptoError::InvalidPublicKey)?;

        // Strip the peer's password blind, then derive Z and V.
        let (p_a, p_b, z, v) = match self.role {
            Spake2Role::Prover => {
                let unblinded = peer_point - point_n() * self.w0;
                let z = unblinded * self.ephemeral;
                let v = unblinded * self.w1.expect("prover carries w1");
                (own.to_bytes(), *peer_share, z, v)
            }
            Spake2Role::Verifier => {
                let unblinded = peer_point - point_m() * self.w0;
                let z = unblinded * self.ephemeral;
                let v = self.l.expect("verifier carries L") * self.ephemeral;
                (*peer_share, own.to_bytes(), z, v)
            }
        };

        // Transcript hash binds context, both shares, both secrets and w0.
        let mut transcript = Vec::with_capacity(self.context.len() + 32 * 5);
        transcript.extend_from_slice(&self.context);
        transcript.extend_from_slice(&p_a);
        transcript.extend_from_slice(&p_b);
        transcript.extend_from_slice(z.compress().as_bytes());
        transcript.extend_from_slice(v.compress().as_bytes());
        transcript.extend_from_slice(&self.w0.to_bytes());
        let tt = crypto.sha256(&transcript);

        let mut ke = [0u8; 32];
        crypto.hkdf_sha256(&[], &tt, b"SharedKey", &mut ke);
        let mut confirmation = [0u8; 32];
        crypto.hkdf_sha256(&[], &tt, b"ConfirmationKeys", &mut confirmation);

        let mut kc_a = [0u8; 16];
        let mut kc_b = [0u8; 16];
        kc_a.copy_from_slice(&confirmation[..16]);
        kc_b.copy_from_slice(&confirmation[16..]);
        Ok(Spake2Keys { ke, kc_a, kc_b })
    }

    /// This side's confirmation MAC over the peer's share.
    pub fn confirmation(
        &self,
        crypto: &dyn CryptoProvider,
        keys: &Spake2Keys,
        peer_share: &[u8; 32],
    ) -> [u8; 32] {
        let key = match self.role {
            Spake2Role::Prover => &keys.kc_a,
            Spake2Role::Verifier => &keys.kc_b,
        };
        crypto.hmac_sha256(key, peer_share)
    }

    /// Checks the peer's confirmation MAC over this side's share.
    pub fn verify_confirmation(
        &self,
        crypto: &dyn CryptoProvider,
        keys: &Spake2Keys,
        peer_mac: &[u8],
    ) -> Result<(), CryptoError> {
        use subtle::ConstantTimeEq;
        let own = self.own_share.ok_or(CryptoError::ConfirmationMismatch)?;
        let key = match self.role {
            Spake2Role::Prover => &keys.kc_b,
            Spake2Role::Verifier => &keys.kc_a,
        };
        let expected = crypto.hmac_sha256(key, own.as_bytes());
        if expected.ct_eq(peer_mac).into() {
            Ok(())
        } else {
            Err(CryptoError::ConfirmationMismatch)
        }
    }
}

impl std::fmt::Debug for Spake2P {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spake2P").field("role", &self.role).finish()
    }
}

fn scalar_from_bytes(bytes: &[u8; 32]) -> Scalar {
    // Widen-and-reduce is canonical for already-reduced input and keeps
    // foreign bytes in range.
    let mut wide = [0u8; 64];
    wide[..32].copy_from_slice(bytes);
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn random_scalar(crypto: &dyn CryptoProvider) -> Scalar {
    let mut wide = [0u8; 64];
    crypto.fill_random(&mut wide);
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    scalar
}

/// The prover's blinding point `M`.
fn point_m() -> RistrettoPoint {
    RistrettoPoint::hash_from_bytes::<Sha512>(b"Trellis SPAKE2+ point M")
}

/// The verifier's blinding point `N`.
fn point_n() -> RistrettoPoint {
    RistrettoPoint::hash_from_bytes::<Sha512>(b"Trellis SPAKE2+ point N")
}
