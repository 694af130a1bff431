//! PASE: passcode-authenticated session establishment.
//!
//! SPAKE2+ over five messages:
//!
//! ```text
//! initiator                    responder
//!   PBKDFParamRequest  ─────────▶
//!            ◀───────── PBKDFParamResponse
//!   Pake1 (pA)         ─────────▶
//!            ◀───────── Pake2 (pB, cB)
//!   Pake3 (cA)         ─────────▶
//!            ◀───────── StatusReport
//! ```
//!
//! The SPAKE2+ context is the literal [`crate::PASE_CONTEXT`] hashed with
//! both PBKDF parameter messages, so a handshake cannot be stitched from
//! mismatched negotiations. The responder allows one PASE in flight: a
//! fresh PBKDFParamRequest aborts and restarts any prior attempt.

use bytes::Bytes;
use tracing::{debug, warn};
use trellis_crypto::{CryptoProvider, PaseVerifier, Spake2Keys, Spake2P, derive_pase_verifier};
use trellis_tlv::{TlvTag, TlvValue, TlvWriter};
use trellis_types::{NodeId, SessionId};

use crate::secure_channel::{StatusReport, opcodes};
use crate::session::{
    EstablishedSession, SessionKeys, SessionKind, SessionParameters, SessionRole,
};
use crate::{PASE_CONTEXT, SessionError};

/// PBKDF parameters the responder advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbkdfParameters {
    pub iterations: u32,
    pub salt: Bytes,
}

/// Output of feeding one handshake message into a PASE state machine.
#[derive(Debug, Default)]
pub struct PaseOutput {
    /// Response to send back on the same exchange.
    pub response: Option<(u8, Bytes)>,
    /// Present once the handshake completed on this side.
    pub established: Option<EstablishedSession>,
}

// ============================================================================
// Responder
// ============================================================================

enum ResponderState {
    Idle,
    AwaitPake1 {
        context: [u8; 32],
        peer_session_id: SessionId,
        peer_params: SessionParameters,
    },
    AwaitPake3 {
        spake: Spake2P,
        keys: Spake2Keys,
        peer_pa: [u8; 32],
        peer_session_id: SessionId,
        peer_params: SessionParameters,
    },
    Complete,
}

/// The device side of PASE.
///
/// Holds the registration record `(w0, L)` and the advertised PBKDF
/// parameters; never the passcode itself.
pub struct PaseResponder {
    local_session_id: SessionId,
    w0: [u8; 32],
    l: [u8; 32],
    pbkdf: PbkdfParameters,
    local_params: SessionParameters,
    state: ResponderState,
}

impl PaseResponder {
    pub fn new(
        local_session_id: SessionId,
        w0: [u8; 32],
        l: [u8; 32],
        pbkdf: PbkdfParameters,
        local_params: SessionParameters,
    ) -> Self {
        Self {
            local_session_id,
            w0,
            l,
            pbkdf,
            local_params,
            state: ResponderState::Idle,
        }
    }

    /// Builds the responder from a commissioning passcode.
    pub fn from_passcode(
        crypto: &dyn CryptoProvider,
        passcode: u32,
        pbkdf: PbkdfParameters,
        local_session_id: SessionId,
        local_params: SessionParameters,
    ) -> Self {
        let verifier = derive_pase_verifier(crypto, passcode, &pbkdf.salt, pbkdf.iterations);
        Self::new(
            local_session_id,
            verifier.w0,
            verifier.l,
            pbkdf,
            local_params,
        )
    }

    /// True while a handshake is underway.
    pub fn in_progress(&self) -> bool {
        !matches!(self.state, ResponderState::Idle | ResponderState::Complete)
    }

    /// Feeds one secure-channel message into the responder.
    pub fn on_message(
        &mut self,
        crypto: &dyn CryptoProvider,
        opcode: u8,
        payload: &Bytes,
    ) -> Result<PaseOutput, SessionError> {
        match opcode {
            opcodes::PBKDF_PARAM_REQUEST => {
                if self.in_progress() {
                    warn!("new PBKDFParamRequest aborts in-flight PASE");
                }
                self.on_param_request(crypto, payload)
            }
            opcodes::PASE_PAKE1 => self.on_pake1(crypto, payload),
            opcodes::PASE_PAKE3 => self.on_pake3(crypto, payload),
            other => Err(SessionError::UnexpectedMessage {
                protocol: "PASE",
                opcode: other,
                state: self.state_name(),
            }),
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            ResponderState::Idle => "idle",
            ResponderState::AwaitPake1 { .. } => "await-pake1",
            ResponderState::AwaitPake3 { .. } => "await-pake3",
            ResponderState::Complete => "complete",
        }
    }

    fn on_param_request(
        &mut self,
        crypto: &dyn CryptoProvider,
        payload: &Bytes,
    ) -> Result<PaseOutput, SessionError> {
        let request = trellis_tlv::decode(payload)?;
        let peer_session_id = SessionId::new(
            request
                .member(2)
                .and_then(TlvValue::as_u64)
                .ok_or(SessionError::MissingField { field: 2 })? as u16,
        );
        let peer_params = request
            .member(5)
            .map(SessionParameters::from_tlv)
            .unwrap_or_default();

        let mut responder_random = [0u8; 32];
        crypto.fill_random(&mut responder_random);

        let mut writer = TlvWriter::new();
        writer.start_struct(TlvTag::Anonymous);
        writer.bytes(
            TlvTag::context(1),
            request
                .member(1)
                .and_then(TlvValue::as_bytes)
                .ok_or(SessionError::MissingField { field: 1 })?,
        );
        writer.bytes(TlvTag::context(2), &responder_random);
        writer.unsigned(
            TlvTag::context(3),
            u64::from(self.local_session_id.as_u16()),
        );
        writer.start_struct(TlvTag::context(4));
        writer.unsigned(TlvTag::context(1), u64::from(self.pbkdf.iterations));
        writer.bytes(TlvTag::context(2), &self.pbkdf.salt);
        writer.end_container();
        writer.value(TlvTag::context(5), &self.local_params.to_tlv());
        writer.end_container();
        let response = writer.finish();

        // Context binds the literal and both negotiation messages.
        let context = pase_context(crypto, payload, &response);
        self.state = ResponderState::AwaitPake1 {
            context,
            peer_session_id,
            peer_params,
        };
        debug!(peer_session = %peer_session_id, "PASE negotiation started");
        Ok(PaseOutput {
            response: Some((opcodes::PBKDF_PARAM_RESPONSE, response)),
            established: None,
        })
    }

    fn on_pake1(
        &mut self,
        crypto: &dyn CryptoProvider,
        payload: &Bytes,
    ) -> Result<PaseOutput, SessionError> {
        let ResponderState::AwaitPake1 {
            context,
            peer_session_id,
            peer_params,
        } = &self.state
        else {
            return Err(SessionError::UnexpectedMessage {
                protocol: "PASE",
                opcode: opcodes::PASE_PAKE1,
                state: self.state_name(),
            });
        };
        let (context, peer_session_id, peer_params) = (*context, *peer_session_id, *peer_params);

        let message = trellis_tlv::decode(payload)?;
        let peer_pa: [u8; 32] = message
            .member(1)
            .and_then(TlvValue::as_bytes)
            .and_then(|b| <[u8; 32]>::try_from(b.as_ref()).ok())
            .ok_or(SessionError::MissingField { field: 1 })?;

        let mut spake = Spake2P::verifier(crypto, &context, &self.w0, &self.l)?;
        let p_b = spake.start();
        let keys = spake.complete(crypto, &peer_pa)?;
        let c_b = spake.confirmation(crypto, &keys, &peer_pa);

        let mut writer = TlvWriter::new();
        writer.start_struct(TlvTag::Anonymous);
        writer.bytes(TlvTag::context(1), &p_b);
        writer.bytes(TlvTag::context(2), &c_b);
        writer.end_container();

        self.state = ResponderState::AwaitPake3 {
            spake,
            keys,
            peer_pa,
            peer_session_id,
            peer_params,
        };
        Ok(PaseOutput {
            response: Some((opcodes::PASE_PAKE2, writer.finish())),
            established: None,
        })
    }

    fn on_pake3(
        &mut self,
        crypto: &dyn CryptoProvider,
        payload: &Bytes,
    ) -> Result<PaseOutput, SessionError> {
        let ResponderState::AwaitPake3 {
            spake,
            keys,
            peer_session_id,
            peer_params,
            ..
        } = &self.state
        else {
            return Err(SessionError::UnexpectedMessage {
                protocol: "PASE",
                opcode: opcodes::PASE_PAKE3,
                state: self.state_name(),
            });
        };

        let message = trellis_tlv::decode(payload)?;
        let c_a = message
            .member(1)
            .and_then(TlvValue::as_bytes)
            .ok_or(SessionError::MissingField { field: 1 })?;
        spake.verify_confirmation(crypto, keys, c_a)?;

        let session_keys = SessionKeys::derive(crypto, &keys.ke, &[], b"SessionKeys");
        let established = EstablishedSession {
            kind: SessionKind::Pase,
            role: SessionRole::Responder,
            local_id: self.local_session_id,
            peer_id: *peer_session_id,
            keys: session_keys,
            local_node_id: NodeId::new(0),
            peer_node_id: NodeId::new(0),
            fabric_index: None,
            parameters: *peer_params,
        };
        self.state = ResponderState::Complete;
        debug!(local_session = %self.local_session_id, "PASE established (responder)");
        Ok(PaseOutput {
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
    AwaitParamResponse { request: Bytes },
    AwaitPake2 { spake: Spake2P },
    AwaitStatus { pending: EstablishedSession },
    Complete,
}

/// The commissioner side of PASE. Holds the passcode.
pub struct PaseInitiator {
    passcode: u32,
    local_session_id: SessionId,
    local_params: SessionParameters,
    peer_session_id: SessionId,
    peer_params: SessionParameters,
    state: InitiatorState,
}

impl PaseInitiator {
    pub fn new(
        passcode: u32,
        local_session_id: SessionId,
        local_params: SessionParameters,
    ) -> Self {
        Self {
            passcode,
            local_session_id,
            local_params,
            peer_session_id: SessionId::UNSECURED,
            peer_params: SessionParameters::default(),
            state: InitiatorState::Idle,
        }
    }

    /// Builds the opening PBKDFParamRequest.
    pub fn start(&mut self, crypto: &dyn CryptoProvider) -> (u8, Bytes) {
        let mut initiator_random = [0u8; 32];
        crypto.fill_random(&mut initiator_random);

        let mut writer = TlvWriter::new();
        writer.start_struct(TlvTag::Anonymous);
        writer.bytes(TlvTag::context(1), &initiator_random);
        writer.unsigned(
            TlvTag::context(2),
            u64::from(self.local_session_id.as_u16()),
        );
        writer.unsigned(TlvTag::context(3), 0); // commissioning passcode id
        writer.boolean(TlvTag::context(4), false);
        writer.value(TlvTag::context(5), &self.local_params.to_tlv());
        writer.end_container();
        let request = writer.finish();

        self.state = InitiatorState::AwaitParamResponse {
            request: request.clone(),
        };
        (opcodes::PBKDF_PARAM_REQUEST, request)
    }

    /// Feeds one secure-channel message into the initiator.
    pub fn on_message(
        &mut self,
        crypto: &dyn CryptoProvider,
        opcode: u8,
        payload: &Bytes,
    ) -> Result<PaseOutput, SessionError> {
        match (&self.state, opcode) {
            (InitiatorState::AwaitParamResponse { .. }, opcodes::PBKDF_PARAM_RESPONSE) => {
                self.on_param_response(crypto, payload)
            }
            (InitiatorState::AwaitPake2 { .. }, opcodes::PASE_PAKE2) => {
                self.on_pake2(crypto, payload)
            }
            (InitiatorState::AwaitStatus { .. }, opcodes::STATUS_REPORT) => {
                self.on_status(payload)
            }
            (_, other) => Err(SessionError::UnexpectedMessage {
                protocol: "PASE",
                opcode: other,
                state: "initiator",
            }),
        }
    }

    fn on_param_response(
        &mut self,
        crypto: &dyn CryptoProvider,
        payload: &Bytes,
    ) -> Result<PaseOutput, SessionError> {
        let InitiatorState::AwaitParamResponse { request } = &self.state else {
            unreachable!("checked by caller");
        };
        let response = trellis_tlv::decode(payload)?;

        self.peer_session_id = SessionId::new(
            response
                .member(3)
                .and_then(TlvValue::as_u64)
                .ok_or(SessionError::MissingField { field: 3 })? as u16,
        );
        self.peer_params = response
            .member(5)
            .map(SessionParameters::from_tlv)
            .unwrap_or_default();

        let pbkdf = response
            .member(4)
            .ok_or(SessionError::MissingField { field: 4 })?;
        let iterations = pbkdf
            .member(1)
            .and_then(TlvValue::as_u64)
            .ok_or(SessionError::MissingField { field: 1 })? as u32;
        let salt = pbkdf
            .member(2)
            .and_then(TlvValue::as_bytes)
            .ok_or(SessionError::MissingField { field: 2 })?
            .clone();

        let verifier: PaseVerifier = derive_pase_verifier(crypto, self.passcode, &salt, iterations);
        let context = pase_context(crypto, request, payload);
        let mut spake = Spake2P::prover(crypto, &context, &verifier);
        let p_a = spake.start();

        let mut writer = TlvWriter::new();
        writer.start_struct(TlvTag::Anonymous);
        writer.bytes(TlvTag::context(1), &p_a);
        writer.end_container();

        self.state = InitiatorState::AwaitPake2 { spake };
        Ok(PaseOutput {
            response: Some((opcodes::PASE_PAKE1, writer.finish())),
            established: None,
        })
    }

    fn on_pake2(
        &mut self,
        crypto: &dyn CryptoProvider,
        payload: &Bytes,
    ) -> Result<PaseOutput, SessionError> {
        let InitiatorState::AwaitPake2 { spake } = &self.state else {
            unreachable!("checked by caller");
        };

        let message = trellis_tlv::decode(payload)?;
        let p_b: [u8; 32] = message
            .member(1)
            .and_then(TlvValue::as_bytes)
            .and_then(|b| <[u8; 32]>::try_from(b.as_ref()).ok())
            .ok_or(SessionError::MissingField { field: 1 })?;
        let c_b = message
            .member(2)
            .and_then(TlvValue::as_bytes)
            .ok_or(SessionError::MissingField { field: 2 })?;

        let keys = spake.complete(crypto, &p_b)?;
        spake.verify_confirmation(crypto, &keys, c_b)?;
        let c_a = spake.confirmation(crypto, &keys, &p_b);

        let mut writer = TlvWriter::new();
        writer.start_struct(TlvTag::Anonymous);
        writer.bytes(TlvTag::context(1), &c_a);
        writer.end_container();

        let session_keys = SessionKeys::derive(crypto, &keys.ke, &[], b"SessionKeys");
        let pending = EstablishedSession {
            kind: SessionKind::Pase,
            role: SessionRole::Initiator,
            local_id: self.local_session_id,
            peer_id: self.peer_session_id,
            keys: session_keys,
            local_node_id: NodeId::new(0),
            peer_node_id: NodeId::new(0),
            fabric_index: None,
            parameters: self.peer_params,
        };
        self.state = InitiatorState::AwaitStatus { pending };
        Ok(PaseOutput {
            response: Some((opcodes::PASE_PAKE3, writer.finish())),
            established: None,
        })
    }

    fn on_status(&mut self, payload: &Bytes) -> Result<PaseOutput, SessionError> {
        let report = StatusReport::decode(payload.clone())?;
        if !report.is_success() {
            self.state = InitiatorState::Idle;
            return Err(SessionError::PeerStatus(report));
        }
        let InitiatorState::AwaitStatus { pending } =
            std::mem::replace(&mut self.state, InitiatorState::Complete)
        else {
            unreachable!("checked by caller");
        };
        debug!(local_session = %self.local_session_id, "PASE established (initiator)");
        Ok(PaseOutput {
            response: None,
            established: Some(pending),
        })
    }
}

/// SPAKE2+ context: literal plus both PBKDF negotiation messages.
fn pase_context(crypto: &dyn CryptoProvider, request: &[u8], response: &[u8]) -> [u8; 32] {
    let mut input = Vec::with_capacity(PASE_CONTEXT.len() + request.len() + response.len());
    input.extend_from_slice(PASE_CONTEXT);
    input.extend_from_slice(request);
    input.extend_from_slice(response);
    crypto.sha256(&input)
}
