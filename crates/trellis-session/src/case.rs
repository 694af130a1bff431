//! CASE: certificate-authenticated session establishment.
//!
//! Three messages over the unsecured session:
//!
//! ```text
//! initiator                    responder
//!   Sigma1             ─────────▶
//!            ◀───────── Sigma2
//!   Sigma3             ─────────▶
//!            ◀───────── StatusReport
//! ```
//!
//! Both peers prove possession of their fabric-issued operational
//! certificate by signing the ephemeral key transcript; the resulting
//! session binds to `(fabric_index, peer node id)`. Certificate parsing
//! and trust evaluation live with the fabric layer behind
//! [`CertificateValidator`].

use bytes::Bytes;
use tracing::debug;
use trellis_crypto::{AEAD_NONCE_LEN, CryptoProvider};
use trellis_tlv::{TlvTag, TlvValue, TlvWriter};
use trellis_types::{FabricIndex, NodeId, SessionId};

use crate::secure_channel::{StatusReport, opcodes};
use crate::session::{
    EstablishedSession, SessionKeys, SessionKind, SessionParameters, SessionRole,
};
use crate::SessionError;

const SIGMA2_NONCE: &[u8; AEAD_NONCE_LEN] = b"NCASE_Sigma2N";
const SIGMA3_NONCE: &[u8; AEAD_NONCE_LEN] = b"NCASE_Sigma3N";

/// The identity a validated peer certificate asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerIdentity {
    pub node_id: NodeId,
    pub fabric_index: FabricIndex,
}

/// Local material CASE needs for one fabric.
#[derive(Clone)]
pub struct CaseCredentials {
    pub fabric_index: FabricIndex,
    pub local_node_id: NodeId,
    /// Our node operational certificate, TLV-encoded.
    pub noc: Bytes,
    /// Operational signing key matching the NOC.
    pub signing_key: [u8; 32],
    /// The fabric's identity protection key.
    pub ipk: [u8; 16],
    /// The fabric CA's root public key.
    pub root_public_key: [u8; 32],
    /// The fabric id under that root.
    pub fabric_id: u64,
}

impl std::fmt::Debug for CaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseCredentials")
            .field("fabric_index", &self.fabric_index)
            .field("local_node_id", &self.local_node_id)
            .finish()
    }
}

/// Certificate trust decisions, implemented by the fabric layer.
pub trait CertificateValidator {
    /// Matches a Sigma1 destination id against the local fabrics.
    fn resolve_destination(
        &self,
        initiator_random: &[u8],
        destination_id: &[u8],
    ) -> Option<CaseCredentials>;

    /// Validates a peer NOC within a fabric and extracts its identity.
    fn validate_peer_noc(
        &self,
        fabric_index: FabricIndex,
        noc: &[u8],
    ) -> Result<PeerIdentity, SessionError>;
}

/// Computes the Sigma1 destination id for a target peer.
///
/// `HMAC(ipk, initiator_random || root_public_key || fabric_id || node_id)`;
/// only a node holding the fabric's IPK can produce or match it.
pub fn destination_id(
    crypto: &dyn CryptoProvider,
    ipk: &[u8; 16],
    initiator_random: &[u8; 32],
    root_public_key: &[u8; 32],
    fabric_id: u64,
    node_id: NodeId,
) -> [u8; 32] {
    let mut input = Vec::with_capacity(32 + 32 + 8 + 8);
    input.extend_from_slice(initiator_random);
    input.extend_from_slice(root_public_key);
    input.extend_from_slice(&fabric_id.to_le_bytes());
    input.extend_from_slice(&node_id.as_u64().to_le_bytes());
    crypto.hmac_sha256(ipk, &input)
}

/// Output of feeding one handshake message into a CASE state machine.
#[derive(Debug, Default)]
pub struct CaseOutput {
    pub response: Option<(u8, Bytes)>,
    pub established: Option<EstablishedSession>,
}

// ============================================================================
// Responder
// ============================================================================

enum ResponderState {
    Idle,
    AwaitSigma3 {
        credentials: CaseCredentials,
        shared: [u8; 32],
        transcript: Vec<u8>,
        peer_session_id: SessionId,
        peer_params: SessionParameters,
    },
    Complete,
}

/// The device side of CASE.
pub struct CaseResponder {
    local_session_id: SessionId,
    local_params: SessionParameters,
    state: ResponderState,
}

impl CaseResponder {
    pub fn new(local_session_id: SessionId, local_params: SessionParameters) -> Self {
        Self {
            local_session_id,
            local_params,
            state: ResponderState::Idle,
        }
    }

    pub fn on_message(
        &mut self,
        crypto: &dyn CryptoProvider,
        validator: &dyn CertificateValidator,
        opcode: u8,
        payload: &Bytes,
    ) -> Result<CaseOutput, SessionError> {
        match opcode {
            opcodes::CASE_SIGMA1 => self.on_sigma1(crypto, validator, payload),
            opcodes::CASE_SIGMA3 => self.on_sigma3(crypto, validator, payload),
            other => Err(SessionError::UnexpectedMessage {
                protocol: "CASE",
                opcode: other,
                state: "responder",
            }),
        }
    }

    fn on_sigma1(
        &mut self,
        crypto: &dyn CryptoProvider,
        validator: &dyn CertificateValidator,
        payload: &Bytes,
    ) -> Result<CaseOutput, SessionError> {
        let sigma1 = trellis_tlv::decode(payload)?;
        let initiator_random = sigma1
            .member(1)
            .and_then(TlvValue::as_bytes)
            .ok_or(SessionError::MissingField { field: 1 })?;
        let peer_session_id = SessionId::new(
            sigma1
                .member(2)
                .and_then(TlvValue::as_u64)
                .ok_or(SessionError::MissingField { field: 2 })? as u16,
        );
        let destination = sigma1
            .member(3)
            .and_then(TlvValue::as_bytes)
            .ok_or(SessionError::MissingField { field: 3 })?;
        let initiator_eph: [u8; 32] = sigma1
            .member(4)
            .and_then(TlvValue::as_bytes)
            .and_then(|b| <[u8; 32]>::try_from(b.as_ref()).ok())
            .ok_or(SessionError::MissingField { field: 4 })?;
        let peer_params = sigma1
            .member(5)
            .map(SessionParameters::from_tlv)
            .unwrap_or_default();

        let Some(credentials) = validator.resolve_destination(initiator_random, destination)
        else {
            // No shared trust root; tell the peer and stay idle.
            return Ok(CaseOutput {
                response: Some((
                    opcodes::STATUS_REPORT,
                    StatusReport::failure(
                        crate::secure_channel::SecureChannelStatus::NoSharedTrustRoots,
                    )
                    .encode(),
                )),
                established: None,
            });
        };

        let (eph_secret, eph_public) = crypto.ecdh_generate();
        let shared = crypto.ecdh_shared_secret(&eph_secret, &initiator_eph)?;

        let mut responder_random = [0u8; 32];
        crypto.fill_random(&mut responder_random);

        // TBE2: our certificate plus the transcript signature.
        let mut to_sign = Vec::new();
        to_sign.extend_from_slice(&credentials.noc);
        to_sign.extend_from_slice(&eph_public);
        to_sign.extend_from_slice(&initiator_eph);
        let signature = crypto.sign(&credentials.signing_key, &to_sign);

        let mut tbe = TlvWriter::new();
        tbe.start_struct(TlvTag::Anonymous);
        tbe.bytes(TlvTag::context(1), &credentials.noc);
        tbe.bytes(TlvTag::context(3), &signature);
        tbe.end_container();

        let sigma1_hash = crypto.sha256(payload);
        let mut s2k = [0u8; 16];
        let mut salt = Vec::new();
        salt.extend_from_slice(&credentials.ipk);
        salt.extend_from_slice(&responder_random);
        salt.extend_from_slice(&eph_public);
        salt.extend_from_slice(&sigma1_hash);
        crypto.hkdf_sha256(&salt, &shared, b"Sigma2", &mut s2k);
        let encrypted2 = crypto.aead_encrypt(&s2k, SIGMA2_NONCE, &[], &tbe.finish());

        let mut writer = TlvWriter::new();
        writer.start_struct(TlvTag::Anonymous);
        writer.bytes(TlvTag::context(1), &responder_random);
        writer.unsigned(
            TlvTag::context(2),
            u64::from(self.local_session_id.as_u16()),
        );
        writer.bytes(TlvTag::context(3), &eph_public);
        writer.bytes(TlvTag::context(4), &encrypted2);
        writer.value(TlvTag::context(5), &self.local_params.to_tlv());
        writer.end_container();
        let sigma2 = writer.finish();

        let mut transcript = Vec::new();
        transcript.extend_from_slice(payload);
        transcript.extend_from_slice(&sigma2);

        self.state = ResponderState::AwaitSigma3 {
            credentials,
            shared,
            transcript,
            peer_session_id,
            peer_params,
        };
        Ok(CaseOutput {
            response: Some((opcodes::CASE_SIGMA2, sigma2)),
            established: None,
        })
    }

    fn on_sigma3(
        &mut self,
        crypto: &dyn CryptoProvider,
        validator: &dyn CertificateValidator,
        payload: &Bytes,
    ) -> Result<CaseOutput, SessionError> {
        let ResponderState::AwaitSigma3 {
            credentials,
            shared,
            transcript,
            peer_session_id,
            peer_params,
        } = &self.state
        else {
            return Err(SessionError::UnexpectedMessage {
                protocol: "CASE",
                opcode: opcodes::CASE_SIGMA3,
                state: "responder",
            });
        };

        let sigma3 = trellis_tlv::decode(payload)?;
        let encrypted3 = sigma3
            .member(1)
            .and_then(TlvValue::as_bytes)
            .ok_or(SessionError::MissingField { field: 1 })?;

        let mut s3k = [0u8; 16];
        let mut salt = Vec::new();
        salt.extend_from_slice(&credentials.ipk);
        salt.extend_from_slice(&crypto.sha256(transcript));
        crypto.hkdf_sha256(&salt, shared, b"Sigma3", &mut s3k);
        let tbe3 = crypto.aead_decrypt(&s3k, SIGMA3_NONCE, &[], encrypted3)?;

        let tbe3 = trellis_tlv::decode(&tbe3)?;
        let peer_noc = tbe3
            .member(1)
            .and_then(TlvValue::as_bytes)
            .ok_or(SessionError::MissingField { field: 1 })?;
        let signature: [u8; 64] = tbe3
            .member(3)
            .and_then(TlvValue::as_bytes)
            .and_then(|b| <[u8; 64]>::try_from(b.as_ref()).ok())
            .ok_or(SessionError::MissingField { field: 3 })?;

        let peer = validator.validate_peer_noc(credentials.fabric_index, peer_noc)?;

        // The signature covers the peer's certificate and the ephemeral
        // transcript; its key comes out of the validated NOC.
        let peer_public = noc_public_key(peer_noc)?;
        let mut signed = Vec::new();
        signed.extend_from_slice(peer_noc);
        signed.extend_from_slice(transcript);
        crypto.verify(&peer_public, &signed, &signature)?;

        let mut session_transcript = transcript.clone();
        session_transcript.extend_from_slice(payload);
        let mut salt = Vec::new();
        salt.extend_from_slice(&credentials.ipk);
        salt.extend_from_slice(&crypto.sha256(&session_transcript));
        let keys = SessionKeys::derive(crypto, shared, &salt, b"SessionKeys");

        let established = EstablishedSession {
            kind: SessionKind::Case,
            role: SessionRole::Responder,
            local_id: self.local_session_id,
            peer_id: *peer_session_id,
            keys,
            local_node_id: credentials.local_node_id,
            peer_node_id: peer.node_id,
            fabric_index: Some(credentials.fabric_index),
            parameters: *peer_params,
        };
        self.state = ResponderState::Complete;
        debug!(
            local_session = %self.local_session_id,
            peer = %established.peer_node_id,
            "CASE established (responder)"
        );
        Ok(CaseOutput {
            response: Some((
                opcodes::STATUS_REPORT,
                StatusReport::session_establishment_success().encode(),
            )),
            established: Some(established),
        })
    }
}

// ============================================================================
// Initiator
// ============================================================================

enum InitiatorState {
    Idle,
    AwaitSigma2 {
        sigma1: Bytes,
        eph_secret: [u8; 32],
        eph_public: [u8; 32],
    },
    AwaitStatus {
        pending: EstablishedSession,
    },
    Complete,
}

/// The controller side of CASE.
pub struct CaseInitiator {
    credentials: CaseCredentials,
    target: NodeId,
    local_session_id: SessionId,
    local_params: SessionParameters,
    state: InitiatorState,
}

impl CaseInitiator {
    pub fn new(
        credentials: CaseCredentials,
        target: NodeId,
        local_session_id: SessionId,
        local_params: SessionParameters,
    ) -> Self {
        Self {
            credentials,
            target,
            local_session_id,
            local_params,
            state: InitiatorState::Idle,
        }
    }

    /// Builds Sigma1.
    pub fn start(&mut self, crypto: &dyn CryptoProvider) -> (u8, Bytes) {
        let mut initiator_random = [0u8; 32];
        crypto.fill_random(&mut initiator_random);
        let (eph_secret, eph_public) = crypto.ecdh_generate();

        let destination = destination_id(
            crypto,
            &self.credentials.ipk,
            &initiator_random,
            &self.credentials.root_public_key,
            self.credentials.fabric_id,
            self.target,
        );

        let mut writer = TlvWriter::new();
        writer.start_struct(TlvTag::Anonymous);
        writer.bytes(TlvTag::context(1), &initiator_random);
        writer.unsigned(
            TlvTag::context(2),
            u64::from(self.local_session_id.as_u16()),
        );
        writer.bytes(TlvTag::context(3), &destination);
        writer.bytes(TlvTag::context(4), &eph_public);
        writer.value(TlvTag::context(5), &self.local_params.to_tlv());
        writer.end_container();
        let sigma1 = writer.finish();

        self.state = InitiatorState::AwaitSigma2 {
            sigma1: sigma1.clone(),
            eph_secret,
            eph_public,
        };
        (opcodes::CASE_SIGMA1, sigma1)
    }

    pub fn on_message(
        &mut self,
        crypto: &dyn CryptoProvider,
        validator: &dyn CertificateValidator,
        opcode: u8,
        payload: &Bytes,
    ) -> Result<CaseOutput, SessionError> {
        match opcode {
            opcodes::CASE_SIGMA2 => self.on_sigma2(crypto, validator, payload),
            opcodes::STATUS_REPORT => self.on_status(payload),
            other => Err(SessionError::UnexpectedMessage {
                protocol: "CASE",
                opcode: other,
                state: "initiator",
            }),
        }
    }

    fn on_sigma2(
        &mut self,
        crypto: &dyn CryptoProvider,
        validator: &dyn CertificateValidator,
        payload: &Bytes,
    ) -> Result<CaseOutput, SessionError> {
        let InitiatorState::AwaitSigma2 {
            sigma1,
            eph_secret,
            eph_public,
        } = &self.state
        else {
            return Err(SessionError::UnexpectedMessage {
                protocol: "CASE",
                opcode: opcodes::CASE_SIGMA2,
                state: "initiator",
            });
        };

        let sigma2 = trellis_tlv::decode(payload)?;
        let responder_random = sigma2
            .member(1)
            .and_then(TlvValue::as_bytes)
            .ok_or(SessionError::MissingField { field: 1 })?;
        let peer_session_id = SessionId::new(
            sigma2
                .member(2)
                .and_then(TlvValue::as_u64)
                .ok_or(SessionError::MissingField { field: 2 })? as u16,
        );
        let responder_eph: [u8; 32] = sigma2
            .member(3)
            .and_then(TlvValue::as_bytes)
            .and_then(|b| <[u8; 32]>::try_from(b.as_ref()).ok())
            .ok_or(SessionError::MissingField { field: 3 })?;
        let encrypted2 = sigma2
            .member(4)
            .and_then(TlvValue::as_bytes)
            .ok_or(SessionError::MissingField { field: 4 })?;
        let peer_params = sigma2
            .member(5)
            .map(SessionParameters::from_tlv)
            .unwrap_or_default();

        let shared = crypto.ecdh_shared_secret(eph_secret, &responder_eph)?;

        let sigma1_hash = crypto.sha256(sigma1);
        let mut s2k = [0u8; 16];
        let mut salt = Vec::new();
        salt.extend_from_slice(&self.credentials.ipk);
        salt.extend_from_slice(responder_random);
        salt.extend_from_slice(&responder_eph);
        salt.extend_from_slice(&sigma1_hash);
        crypto.hkdf_sha256(&salt, &shared, b"Sigma2", &mut s2k);
        let tbe2 = crypto.aead_decrypt(&s2k, SIGMA2_NONCE, &[], encrypted2)?;

        let tbe2 = trellis_tlv::decode(&tbe2)?;
        let peer_noc = tbe2
            .member(1)
            .and_then(TlvValue::as_bytes)
            .ok_or(SessionError::MissingField { field: 1 })?;
        let signature: [u8; 64] = tbe2
            .member(3)
            .and_then(TlvValue::as_bytes)
            .and_then(|b| <[u8; 64]>::try_from(b.as_ref()).ok())
            .ok_or(SessionError::MissingField { field: 3 })?;

        let peer = validator.validate_peer_noc(self.credentials.fabric_index, peer_noc)?;
        if peer.node_id != self.target {
            return Err(SessionError::CertificateRejected);
        }
        let peer_public = noc_public_key(peer_noc)?;
        let mut signed = Vec::new();
        signed.extend_from_slice(peer_noc);
        signed.extend_from_slice(&responder_eph);
        signed.extend_from_slice(eph_public);
        crypto.verify(&peer_public, &signed, &signature)?;

        // TBE3: our certificate, signing the sigma1 || sigma2 transcript.
        let mut transcript = Vec::new();
        transcript.extend_from_slice(sigma1);
        transcript.extend_from_slice(payload);

        let mut to_sign = Vec::new();
        to_sign.extend_from_slice(&self.credentials.noc);
        to_sign.extend_from_slice(&transcript);
        let own_signature = crypto.sign(&self.credentials.signing_key, &to_sign);

        let mut tbe = TlvWriter::new();
        tbe.start_struct(TlvTag::Anonymous);
        tbe.bytes(TlvTag::context(1), &self.credentials.noc);
        tbe.bytes(TlvTag::context(3), &own_signature);
        tbe.end_container();

        let mut s3k = [0u8; 16];
        let mut salt = Vec::new();
        salt.extend_from_slice(&self.credentials.ipk);
        salt.extend_from_slice(&crypto.sha256(&transcript));
        crypto.hkdf_sha256(&salt, &shared, b"Sigma3", &mut s3k);
        let encrypted3 = crypto.aead_encrypt(&s3k, SIGMA3_NONCE, &[], &tbe.finish());

        let mut writer = TlvWriter::new();
        writer.start_struct(TlvTag::Anonymous);
        writer.bytes(TlvTag::context(1), &encrypted3);
        writer.end_container();
        let sigma3 = writer.finish();

        let mut session_transcript = transcript;
        session_transcript.extend_from_slice(&sigma3);
        let mut salt = Vec::new();
        salt.extend_from_slice(&self.credentials.ipk);
        salt.extend_from_slice(&crypto.sha256(&session_transcript));
        let keys = SessionKeys::derive(crypto, &shared, &salt, b"SessionKeys");

        let pending = EstablishedSession {
            kind: SessionKind::Case,
            role: SessionRole::Initiator,
            local_id: self.local_session_id,
            peer_id: peer_session_id,
            keys,
            local_node_id: self.credentials.local_node_id,
            peer_node_id: peer.node_id,
            fabric_index: Some(self.credentials.fabric_index),
            parameters: peer_params,
        };
        self.state = InitiatorState::AwaitStatus { pending };
        Ok(CaseOutput {
            response: Some((opcodes::CASE_SIGMA3, sigma3)),
            established: None,
        })
    }

    fn on_status(&mut self, payload: &Bytes) -> Result<CaseOutput, SessionError> {
        let report = StatusReport::decode(payload.clone())?;
        if !report.is_success() {
            self.state = InitiatorState::Idle;
            return Err(SessionError::PeerStatus(report));
        }
        let InitiatorState::AwaitStatus { pending } =
            std::mem::replace(&mut self.state, InitiatorState::Complete)
        else {
            return Err(SessionError::UnexpectedMessage {
                protocol: "CASE",
                opcode: opcodes::STATUS_REPORT,
                state: "initiator",
            });
        };
        debug!(
            local_session = %self.local_session_id,
            peer = %pending.peer_node_id,
            "CASE established (initiator)"
        );
        Ok(CaseOutput {
            response: None,
            established: Some(pending),
        })
    }
}

/// Extracts the subject public key from a NOC.
///
/// Trellis operational certificates are TLV structs; field 9 carries the
/// subject public key (the fabric layer owns the full schema).
pub(crate) fn noc_public_key(noc: &[u8]) -> Result<[u8; 32], SessionError> {
    let cert = trellis_tlv::decode(noc)?;
    cert.member(9)
        .and_then(TlvValue::as_bytes)
        .and_then(|b| <[u8; 32]>::try_from(b.as_ref()).ok())
        .ok_or(SessionError::MissingField { field: 9 })
}
