//! Integration tests for trellis-session.

use bytes::Bytes;
use trellis_crypto::{CryptoProvider, SoftwareCrypto};
use trellis_exchange::{OutboundFrame, PROTOCOL_INTERACTION, PayloadHeader, SessionHandle};
use trellis_tlv::{TlvTag, TlvWriter};
use trellis_types::{ExchangeId, FabricIndex, NodeId, SessionId, Timestamp};

use crate::counters::CounterVerdict;
use crate::secure_channel::opcodes;
use crate::{
    CaseCredentials, CaseInitiator, CaseResponder, CertificateValidator, EstablishedSession,
    PaseInitiator, PaseResponder, PbkdfParameters, PeerIdentity, SessionCloseReason, SessionError,
    SessionKeys, SessionKind, SessionManager, SessionParameters,
};
use crate::session::SessionRole;

fn at(ms: u64) -> Timestamp {
    Timestamp::from_millis(ms)
}

// ============================================================================
// PASE
// ============================================================================

const PASSCODE: u32 = 20202021;

fn pbkdf_params() -> PbkdfParameters {
    PbkdfParameters {
        iterations: 1000,
        salt: Bytes::from_static(b"SPAKE2P Key Salt"),
    }
}

/// Drives a full PASE handshake, returning both established sessions.
fn run_pase(passcode_initiator: u32) -> Result<(EstablishedSession, EstablishedSession), SessionError> {
    let crypto_i = SoftwareCrypto::seeded(11);
    let crypto_r = SoftwareCrypto::seeded(22);

    let mut initiator = PaseInitiator::new(
        passcode_initiator,
        SessionId::new(100),
        SessionParameters::default(),
    );
    let mut responder = PaseResponder::from_passcode(
        &crypto_r,
        PASSCODE,
        pbkdf_params(),
        SessionId::new(200),
        SessionParameters::default(),
    );

    let (mut opcode, mut payload) = initiator.start(&crypto_i);
    let mut initiator_done = None;
    let mut responder_done = None;

    // Ping-pong until the initiator consumes the status report.
    loop {
        let out = responder.on_message(&crypto_r, opcode, &payload)?;
        if let Some(established) = out.established {
            responder_done = Some(established);
        }
        let Some((resp_opcode, resp_payload)) = out.response else {
            break;
        };
        let out = initiator.on_message(&crypto_i, resp_opcode, &resp_payload)?;
        if let Some(established) = out.established {
            initiator_done = Some(established);
        }
        match out.response {
            Some((o, p)) => {
                opcode = o;
                payload = p;
            }
            None => break,
        }
    }

    Ok((initiator_done.unwrap(), responder_done.unwrap()))
}

#[test]
fn pase_handshake_agrees_on_keys_and_ids() {
    let (initiator, responder) = run_pase(PASSCODE).unwrap();

    assert_eq!(initiator.keys, responder.keys);
    assert_eq!(initiator.kind, SessionKind::Pase);
    assert_eq!(initiator.local_id, SessionId::new(100));
    assert_eq!(initiator.peer_id, SessionId::new(200));
    assert_eq!(responder.local_id, SessionId::new(200));
    assert_eq!(responder.peer_id, SessionId::new(100));
    assert_eq!(initiator.fabric_index, None);
}

#[test]
fn pase_with_wrong_passcode_fails_confirmation() {
    let err = run_pase(11111111).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Crypto(trellis_crypto::CryptoError::ConfirmationMismatch)
    ));
}

#[test]
fn new_pbkdf_request_aborts_prior_attempt() {
    let crypto = SoftwareCrypto::seeded(3);
    let mut responder = PaseResponder::from_passcode(
        &crypto,
        PASSCODE,
        pbkdf_params(),
        SessionId::new(200),
        SessionParameters::default(),
    );

    let mut initiator_a =
        PaseInitiator::new(PASSCODE, SessionId::new(1), SessionParameters::default());
    let (opcode, payload) = initiator_a.start(&crypto);
    responder.on_message(&crypto, opcode, &payload).unwrap();
    assert!(responder.in_progress());

    // A second commissioner starts over; the responder restarts cleanly.
    let mut initiator_b =
        PaseInitiator::new(PASSCODE, SessionId::new(2), SessionParameters::default());
    let (opcode, payload) = initiator_b.start(&crypto);
    let out = responder.on_message(&crypto, opcode, &payload).unwrap();
    assert_eq!(out.response.unwrap().0, opcodes::PBKDF_PARAM_RESPONSE);
}

#[test]
fn pase_rejects_out_of_order_messages() {
    let crypto = SoftwareCrypto::seeded(4);
    let mut responder = PaseResponder::from_passcode(
        &crypto,
        PASSCODE,
        pbkdf_params(),
        SessionId::new(200),
        SessionParameters::default(),
    );
    let err = responder
        .on_message(&crypto, opcodes::PASE_PAKE3, &Bytes::from_static(&[0x15, 0x18]))
        .unwrap_err();
    assert!(matches!(err, SessionError::UnexpectedMessage { .. }));
}

// ============================================================================
// CASE
// ============================================================================

/// Test validator: certificates are TLV structs {1: node id, 9: pubkey},
/// trusted when signed state matches (signature checking happens in the
/// handshake itself).
struct TestValidator {
    credentials: CaseCredentials,
}

impl CertificateValidator for TestValidator {
    fn resolve_destination(
        &self,
        initiator_random: &[u8],
        destination_id: &[u8],
    ) -> Option<CaseCredentials> {
        let crypto = SoftwareCrypto::seeded(0);
        let expected = crate::case::destination_id(
            &crypto,
            &self.credentials.ipk,
            initiator_random.try_into().ok()?,
            &self.credentials.root_public_key,
            self.credentials.fabric_id,
            self.credentials.local_node_id,
        );
        (expected.as_slice() == destination_id).then(|| self.credentials.clone())
    }

    fn validate_peer_noc(
        &self,
        fabric_index: FabricIndex,
        noc: &[u8],
    ) -> Result<PeerIdentity, SessionError> {
        let cert = trellis_tlv::decode(noc).map_err(SessionError::MalformedPayload)?;
        let node_id = cert
            .member(1)
            .and_then(trellis_tlv::TlvValue::as_u64)
            .ok_or(SessionError::CertificateRejected)?;
        Ok(PeerIdentity {
            node_id: NodeId::new(node_id),
            fabric_index,
        })
    }
}

fn test_noc(node_id: NodeId, public_key: &[u8; 32]) -> Bytes {
    let mut writer = TlvWriter::new();
    writer.start_struct(TlvTag::Anonymous);
    writer.unsigned(TlvTag::context(1), node_id.as_u64());
    writer.bytes(TlvTag::context(9), public_key);
    writer.end_container();
    writer.finish()
}

fn credentials_for(crypto: &dyn CryptoProvider, node_id: NodeId) -> CaseCredentials {
    let signing_key = crypto.generate_signing_key();
    let public = crypto.signing_public_key(&signing_key);
    CaseCredentials {
        fabric_index: FabricIndex::new(1),
        local_node_id: node_id,
        noc: test_noc(node_id, &public),
        signing_key,
        ipk: [0x42; 16],
        root_public_key: [0x24; 32],
        fabric_id: 0x1122_3344,
    }
}

#[test]
fn case_handshake_binds_fabric_and_node_ids() {
    let crypto = SoftwareCrypto::seeded(5);
    let controller = credentials_for(&crypto, NodeId::new(0x1000));
    let device = credentials_for(&crypto, NodeId::new(0x2000));

    let controller_validator = TestValidator {
        credentials: controller.clone(),
    };
    let device_validator = TestValidator {
        credentials: device.clone(),
    };

    let mut initiator = CaseInitiator::new(
        controller.clone(),
        NodeId::new(0x2000),
        SessionId::new(301),
        SessionParameters::default(),
    );
    let mut responder = CaseResponder::new(SessionId::new(401), SessionParameters::default());

    let (opcode, sigma1) = initiator.start(&crypto);
    let out = responder
        .on_message(&crypto, &device_validator, opcode, &sigma1)
        .unwrap();
    let (opcode, sigma2) = out.response.unwrap();
    assert_eq!(opcode, opcodes::CASE_SIGMA2);

    let out = initiator
        .on_message(&crypto, &controller_validator, opcode, &sigma2)
        .unwrap();
    let (opcode, sigma3) = out.response.unwrap();
    let out = responder
        .on_message(&crypto, &device_validator, opcode, &sigma3)
        .unwrap();
    let responder_session = out.established.unwrap();
    let (opcode, status) = out.response.unwrap();

    let out = initiator
        .on_message(&crypto, &controller_validator, opcode, &status)
        .unwrap();
    let initiator_session = out.established.unwrap();

    assert_eq!(initiator_session.keys, responder_session.keys);
    assert_eq!(initiator_session.kind, SessionKind::Case);
    assert_eq!(initiator_session.fabric_index, Some(FabricIndex::new(1)));
    assert_eq!(initiator_session.peer_node_id, NodeId::new(0x2000));
    assert_eq!(responder_session.peer_node_id, NodeId::new(0x1000));
}

#[test]
fn case_with_unknown_destination_reports_no_shared_roots() {
    let crypto = SoftwareCrypto::seeded(6);
    let controller = credentials_for(&crypto, NodeId::new(0x1000));
    let device = credentials_for(&crypto, NodeId::new(0x2000));
    // Device IPK differs; the destination id cannot resolve.
    let device_validator = TestValidator {
        credentials: CaseCredentials {
            ipk: [0x99; 16],
            ..device
        },
    };

    let mut initiator = CaseInitiator::new(
        controller,
        NodeId::new(0x2000),
        SessionId::new(301),
        SessionParameters::default(),
    );
    let mut responder = CaseResponder::new(SessionId::new(401), SessionParameters::default());

    let (opcode, sigma1) = initiator.start(&crypto);
    let out = responder
        .on_message(&crypto, &device_validator, opcode, &sigma1)
        .unwrap();
    let (opcode, payload) = out.response.unwrap();
    assert_eq!(opcode, opcodes::STATUS_REPORT);
    assert!(out.established.is_none());

    let report = crate::StatusReport::decode(payload).unwrap();
    assert!(!report.is_success());
}

// ============================================================================
// Session manager
// ============================================================================

fn established_pair(seed: u64, local_id: u16, peer_id: u16) -> (EstablishedSession, EstablishedSession) {
    let crypto = SoftwareCrypto::seeded(seed);
    let keys = SessionKeys::derive(&crypto, b"shared secret", &[], b"SessionKeys");
    let a = EstablishedSession {
        kind: SessionKind::Case,
        role: SessionRole::Initiator,
        local_id: SessionId::new(local_id),
        peer_id: SessionId::new(peer_id),
        keys: keys.clone(),
        local_node_id: NodeId::new(0xA),
        peer_node_id: NodeId::new(0xB),
        fabric_index: Some(FabricIndex::new(1)),
        parameters: SessionParameters::default(),
    };
    let b = EstablishedSession {
        role: SessionRole::Responder,
        local_id: SessionId::new(peer_id),
        peer_id: SessionId::new(local_id),
        local_node_id: NodeId::new(0xB),
        peer_node_id: NodeId::new(0xA),
        keys,
        ..a.clone()
    };
    (a, b)
}

fn frame(session: SessionHandle, counter: u32, payload: &'static [u8]) -> OutboundFrame {
    OutboundFrame {
        session,
        counter,
        payload_header: PayloadHeader::new(PROTOCOL_INTERACTION, 0x02, ExchangeId::new(1), true),
        payload: Bytes::from_static(payload),
    }
}

#[test]
fn sealed_frame_opens_on_the_peer() {
    let crypto = SoftwareCrypto::seeded(7);
    let (a, b) = established_pair(8, 10, 20);

    let mut alice = SessionManager::new(8, NodeId::new(0xA));
    let mut bob = SessionManager::new(8, NodeId::new(0xB));
    let ah = alice.install(a, at(0));
    bob.install(b, at(0));

    let counter = alice.allocate_counter(ah).unwrap();
    let wire = alice
        .seal_frame(&crypto, &frame(ah, counter, b"read request"), at(1))
        .unwrap();

    let verdict = bob.open_frame(&crypto, wire.clone(), at(2)).unwrap();
    assert_eq!(verdict.verdict, CounterVerdict::Fresh);
    assert_eq!(verdict.message.payload.as_ref(), b"read request");

    // Replay of the same datagram is flagged.
    let replay = bob.open_frame(&crypto, wire, at(3)).unwrap();
    assert_eq!(replay.verdict, CounterVerdict::Duplicate);
}

#[test]
fn tampered_frame_is_rejected() {
    let crypto = SoftwareCrypto::seeded(7);
    let (a, b) = established_pair(8, 10, 20);
    let mut alice = SessionManager::new(8, NodeId::new(0xA));
    let mut bob = SessionManager::new(8, NodeId::new(0xB));
    let ah = alice.install(a, at(0));
    bob.install(b, at(0));

    let counter = alice.allocate_counter(ah).unwrap();
    let wire = alice
        .seal_frame(&crypto, &frame(ah, counter, b"read request"), at(1))
        .unwrap();
    let mut tampered = wire.to_vec();
    let last = tampered.len() - 1;
    tampered[last] ^= 1;

    assert!(matches!(
        bob.open_frame(&crypto, Bytes::from(tampered), at(2)),
        Err(SessionError::Crypto(_))
    ));
}

#[test]
fn unknown_session_id_is_rejected() {
    let crypto = SoftwareCrypto::seeded(7);
    let (a, _) = established_pair(8, 10, 20);
    let mut alice = SessionManager::new(8, NodeId::new(0xA));
    let mut bob = SessionManager::new(8, NodeId::new(0xB));
    let ah = alice.install(a, at(0));
    // Bob never installed his half.

    let counter = alice.allocate_counter(ah).unwrap();
    let wire = alice
        .seal_frame(&crypto, &frame(ah, counter, b"hello"), at(1))
        .unwrap();
    assert!(matches!(
        bob.open_frame(&crypto, wire, at(2)),
        Err(SessionError::UnknownSession(20))
    ));
}

#[test]
fn capacity_eviction_closes_least_recent() {
    let mut mgr = SessionManager::new(2, NodeId::new(0xA));
    let closed = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = std::rc::Rc::clone(&closed);
    mgr.on_closed(move |event| sink.borrow_mut().push(*event));

    let (s1, _) = established_pair(1, 11, 21);
    let (s2, _) = established_pair(2, 12, 22);
    let (s3, _) = established_pair(3, 13, 23);

    let h1 = mgr.install(s1, at(0));
    let h2 = mgr.install(s2, at(10));
    // Touch h1 so h2 is the eviction victim.
    mgr.get_mut(h1).unwrap().touch(at(100));
    mgr.install(s3, at(200));

    assert_eq!(mgr.session_count(), 2);
    let events = closed.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].handle, h2);
    assert_eq!(events[0].reason, SessionCloseReason::Evicted);
}

#[test]
fn fabric_removal_closes_bound_sessions() {
    let mut mgr = SessionManager::new(8, NodeId::new(0xA));
    let (s1, _) = established_pair(1, 11, 21);
    let mut s2 = established_pair(2, 12, 22).0;
    s2.fabric_index = Some(FabricIndex::new(2));

    mgr.install(s1, at(0));
    mgr.install(s2, at(0));

    mgr.close_for_fabric(FabricIndex::new(1));
    assert_eq!(mgr.session_count(), 1);
}

#[test]
fn unsecured_frames_pass_through_with_replay_protection() {
    let crypto = SoftwareCrypto::seeded(9);
    let mut alice = SessionManager::new(8, NodeId::new(0xAAAA));
    let mut bob = SessionManager::new(8, NodeId::new(0xBBBB));

    let counter = alice
        .allocate_counter(crate::manager::UNSECURED_HANDLE)
        .unwrap();
    let wire = alice
        .seal_frame(
            &crypto,
            &frame(crate::manager::UNSECURED_HANDLE, counter, b"pbkdf req"),
            at(0),
        )
        .unwrap();

    let verdict = bob.open_frame(&crypto, wire.clone(), at(1)).unwrap();
    assert_eq!(verdict.session, crate::manager::UNSECURED_HANDLE);
    assert_eq!(verdict.verdict, CounterVerdict::Fresh);
    assert_eq!(verdict.message.header.source, Some(NodeId::new(0xAAAA)));

    let replay = bob.open_frame(&crypto, wire, at(2)).unwrap();
    assert_eq!(replay.verdict, CounterVerdict::Duplicate);
}
