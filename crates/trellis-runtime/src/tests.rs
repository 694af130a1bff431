//! Integration tests for trellis-runtime.
//!
//! The end-to-end tests drive a full client stack (session manager,
//! exchange manager, PASE initiator) against a [`ServerNode`] over an
//! in-memory loopback, covering commissioning, reads and invokes.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use trellis_config::TrellisConfig;
use trellis_crypto::{CryptoProvider, SoftwareCrypto};
use trellis_exchange::{
    ExchangeKey, ExchangeManager, ExchangeOutput, MrpConfig, PROTOCOL_INTERACTION,
    PROTOCOL_SECURE_CHANNEL, SendFlags, SessionHandle,
};
use trellis_fabric::FabricAuthority;
use trellis_interaction::{
    AttributePath, CommandData, CommandPath, InvokeRequest, InvokeResponse, InvokeResponseEntry,
    ReadRequest, ReportData, StatusResponse, Subject, opcodes as im,
};
use trellis_model::{
    Access, AttributeSchema, ClusterBuilder, ClusterSchema, Conformance, Constraint, IntWidth,
    Quality, Scope, ValueType,
};
use trellis_session::{
    CaseCredentials, CaseInitiator, CertificateValidator, CounterVerdict, PaseInitiator,
    PeerIdentity, SessionCloseReason, SessionError, SessionManager, SessionParameters,
    UNSECURED_HANDLE,
};
use trellis_store::{Datasource, Transaction};
use trellis_tlv::TlvValue;
use trellis_types::{
    AttributeId, ClusterId, CommandId, DeviceTypeId, EndpointNumber, FabricIndex, NodeId,
    StatusCode, Timestamp, VendorId,
};

use crate::{CommandHandler, ServerNode};

const ON_OFF_CLUSTER: ClusterId = ClusterId::new(0x0006);
const ON_OFF: AttributeId = AttributeId::new(0);
const CMD_ON: CommandId = CommandId::new(1);
const IDENTIFY_CLUSTER: ClusterId = ClusterId::new(0x0003);
const IDENTIFY_TIME: AttributeId = AttributeId::new(0);
const CMD_IDENTIFY: CommandId = CommandId::new(0);

fn at(ms: u64) -> Timestamp {
    Timestamp::from_millis(ms)
}

fn on_off_cluster() -> Arc<ClusterSchema> {
    ClusterBuilder::new("On Off", 0x0006u32)
        .attribute(AttributeSchema {
            id: ON_OFF,
            name: "onOff".into(),
            ty: ValueType::Bool,
            default: Some(TlvValue::Bool(false)),
            quality: Quality::default(),
            conformance: Conformance::Mandatory,
            access: Access::RW_VIEW_OPERATE,
            constraint: Constraint::default(),
        })
        .request(0, "Off", None)
        .request(1, "On", None)
        .build()
        .unwrap()
}

fn identify_cluster() -> Arc<ClusterSchema> {
    ClusterBuilder::new("Identify", 0x0003u32)
        .attribute(AttributeSchema {
            id: IDENTIFY_TIME,
            name: "identifyTime".into(),
            ty: ValueType::UInt(IntWidth::W16),
            default: Some(TlvValue::UnsignedInt(0)),
            quality: Quality::default(),
            conformance: Conformance::Mandatory,
            access: Access::RW_VIEW_OPERATE,
            constraint: Constraint::default(),
        })
        .request(0, "Identify", None)
        .build()
        .unwrap()
}

struct OnOffHandler;

impl CommandHandler for OnOffHandler {
    fn invoke(
        &mut self,
        datasource: &mut Datasource,
        _subject: &Subject,
        command: CommandId,
        _fields: TlvValue,
    ) -> Result<Option<(CommandId, TlvValue)>, StatusCode> {
        let value = match command.as_u32() {
            0 => TlvValue::Bool(false),
            1 => TlvValue::Bool(true),
            _ => return Err(StatusCode::UnsupportedCommand),
        };
        let mut tx = Transaction::read_write();
        let p = tx.join(datasource);
        tx.write(p, ON_OFF, value).map_err(|_| StatusCode::Failure)?;
        tx.resolve();
        Ok(None)
    }
}

struct IdentifyHandler;

impl CommandHandler for IdentifyHandler {
    fn invoke(
        &mut self,
        datasource: &mut Datasource,
        _subject: &Subject,
        command: CommandId,
        fields: TlvValue,
    ) -> Result<Option<(CommandId, TlvValue)>, StatusCode> {
        if command != CMD_IDENTIFY {
            return Err(StatusCode::UnsupportedCommand);
        }
        let seconds = fields.member(0).and_then(TlvValue::as_u64).unwrap_or(0);
        let mut tx = Transaction::read_write();
        let p = tx.join(datasource);
        tx.write(p, IDENTIFY_TIME, TlvValue::UnsignedInt(seconds))
            .map_err(|_| StatusCode::Failure)?;
        tx.resolve();
        Ok(None)
    }
}

fn server_node(crypto: Rc<SoftwareCrypto>) -> ServerNode {
    let config = TrellisConfig::default();
    let mut node = ServerNode::new(crypto, &config, None);
    let ep = node.add_endpoint("light", DeviceTypeId::new(0x0100));
    node.add_cluster(
        ep,
        Scope::new(on_off_cluster(), 0, []),
        Some(Box::new(OnOffHandler)),
    );
    node.add_cluster(
        ep,
        Scope::new(identify_cluster(), 0, []),
        Some(Box::new(IdentifyHandler)),
    );
    node.mark_ready(ep);
    node
}

/// The client half of the loopback: its own session and exchange tables.
struct Client {
    crypto: Rc<SoftwareCrypto>,
    sessions: SessionManager,
    exchange: ExchangeManager,
}

impl Client {
    fn new(crypto: Rc<SoftwareCrypto>) -> Self {
        Self {
            crypto,
            sessions: SessionManager::new(8, NodeId::new(0xC11E)),
            exchange: ExchangeManager::new(MrpConfig::default()),
        }
    }

    /// Sends one reliable message, returning the wire datagram.
    fn send(
        &mut self,
        key: ExchangeKey,
        opcode: u8,
        payload: Bytes,
        final_message: bool,
        now: Timestamp,
    ) -> Bytes {
        let counter = self.sessions.allocate_counter(key.session).unwrap();
        let frame = self
            .exchange
            .send(
                key,
                opcode,
                payload,
                SendFlags {
                    reliable: true,
                    final_message,
                },
                counter,
                now,
            )
            .unwrap();
        self.sessions
            .seal_frame(self.crypto.as_ref(), &frame, now)
            .unwrap()
    }

    /// Feeds inbound datagrams; returns (deliveries, datagrams to send).
    fn receive(
        &mut self,
        datagrams: Vec<Bytes>,
        now: Timestamp,
    ) -> (Vec<trellis_exchange::Delivery>, Vec<Bytes>) {
        let mut deliveries = Vec::new();
        let mut out = Vec::new();
        for wire in datagrams {
            let verdict = self
                .sessions
                .open_frame(self.crypto.as_ref(), wire, now)
                .unwrap();
            let output: ExchangeOutput = match verdict.verdict {
                CounterVerdict::Fresh => {
                    self.exchange.on_message(verdict.session, &verdict.message, now)
                }
                CounterVerdict::Duplicate => {
                    let sessions = &mut self.sessions;
                    let mut alloc =
                        |s: SessionHandle| sessions.allocate_counter(s).unwrap_or(0);
                    self.exchange
                        .acknowledge_duplicate(verdict.session, &verdict.message, &mut alloc)
                }
            };
            deliveries.extend(output.deliveries);
            for frame in &output.frames {
                out.push(
                    self.sessions
                        .seal_frame(self.crypto.as_ref(), frame, now)
                        .unwrap(),
                );
            }
        }
        (deliveries, out)
    }

    /// Flushes owed acks on an exchange toward the peer.
    fn close_exchange(&mut self, key: ExchangeKey, now: Timestamp) -> Vec<Bytes> {
        let sessions = &mut self.sessions;
        let mut alloc = |s: SessionHandle| sessions.allocate_counter(s).unwrap_or(0);
        let output = self.exchange.close(key, &mut alloc);
        output
            .frames
            .iter()
            .filter_map(|frame| {
                self.sessions
                    .seal_frame(self.crypto.as_ref(), frame, now)
                    .ok()
            })
            .collect()
    }
}

/// Runs PASE to completion; returns the client's secure session handle.
fn commission(client: &mut Client, node: &mut ServerNode, now: Timestamp) -> SessionHandle {
    let mut initiator = PaseInitiator::new(
        20202021,
        client.sessions.allocate_session_id(),
        SessionParameters::default(),
    );

    let key = client
        .exchange
        .create(UNSECURED_HANDLE, PROTOCOL_SECURE_CHANNEL, now);
    let (opcode, payload) = initiator.start(client.crypto.as_ref());
    let mut to_node = vec![client.send(key, opcode, payload, false, now)];

    let established = 'handshake: loop {
        let mut from_node = Vec::new();
        for wire in to_node.drain(..) {
            from_node.extend(node.on_datagram(wire, now));
        }
        assert!(!from_node.is_empty(), "handshake stalled");

        let (deliveries, acks) = client.receive(from_node, now);
        to_node = acks;
        for delivery in deliveries {
            let out = initiator
                .on_message(client.crypto.as_ref(), delivery.opcode, &delivery.payload)
                .expect("handshake step");
            if let Some((opcode, payload)) = out.response {
                to_node.push(client.send(key, opcode, payload, false, now));
            }
            if let Some(established) = out.established {
                break 'handshake established;
            }
        }
    };

    // Settle the handshake exchange (acks the final StatusReport).
    for wire in client.close_exchange(key, now) {
        node.on_datagram(wire, now);
    }
    client.sessions.install(established, now)
}

/// Controller-side trust: validates device NOCs against the CA root.
struct RootValidator {
    crypto: Rc<SoftwareCrypto>,
    root_public_key: [u8; 32],
}

impl CertificateValidator for RootValidator {
    fn resolve_destination(
        &self,
        _initiator_random: &[u8],
        _destination_id: &[u8],
    ) -> Option<CaseCredentials> {
        // The controller initiates; it never resolves destinations.
        None
    }

    fn validate_peer_noc(
        &self,
        fabric_index: FabricIndex,
        noc: &[u8],
    ) -> Result<PeerIdentity, SessionError> {
        let contents =
            trellis_fabric::cert::verify(self.crypto.as_ref(), &self.root_public_key, noc)
                .map_err(|_| SessionError::CertificateRejected)?;
        Ok(PeerIdentity {
            node_id: contents.node_id,
            fabric_index,
        })
    }
}

/// Runs CASE to completion; returns the client's operational session.
fn establish_case(
    client: &mut Client,
    node: &mut ServerNode,
    credentials: CaseCredentials,
    validator: &dyn CertificateValidator,
    target: NodeId,
    now: Timestamp,
) -> SessionHandle {
    let mut initiator = CaseInitiator::new(
        credentials,
        target,
        client.sessions.allocate_session_id(),
        SessionParameters::default(),
    );

    let key = client
        .exchange
        .create(UNSECURED_HANDLE, PROTOCOL_SECURE_CHANNEL, now);
    let (opcode, payload) = initiator.start(client.crypto.as_ref());
    let mut to_node = vec![client.send(key, opcode, payload, false, now)];

    let established = 'handshake: loop {
        let mut from_node = Vec::new();
        for wire in to_node.drain(..) {
            from_node.extend(node.on_datagram(wire, now));
        }
        assert!(!from_node.is_empty(), "CASE handshake stalled");

        let (deliveries, acks) = client.receive(from_node, now);
        to_node = acks;
        for delivery in deliveries {
            let out = initiator
                .on_message(
                    client.crypto.as_ref(),
                    validator,
                    delivery.opcode,
                    &delivery.payload,
                )
                .expect("CASE step");
            if let Some((opcode, payload)) = out.response {
                to_node.push(client.send(key, opcode, payload, false, now));
            }
            if let Some(established) = out.established {
                break 'handshake established;
            }
        }
    };

    for wire in client.close_exchange(key, now) {
        node.on_datagram(wire, now);
    }
    client.sessions.install(established, now)
}

/// One reliable round trip: request in, responses out, deliveries back.
fn round_trip(
    client: &mut Client,
    node: &mut ServerNode,
    key: ExchangeKey,
    opcode: u8,
    payload: Bytes,
    now: Timestamp,
) -> Vec<trellis_exchange::Delivery> {
    let wire = client.send(key, opcode, payload, false, now);
    let responses = node.on_datagram(wire, now);
    let (deliveries, acks) = client.receive(responses, now);
    for wire in acks {
        node.on_datagram(wire, now);
    }
    deliveries
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn pase_commissioning_establishes_a_secure_session() {
    let crypto = Rc::new(SoftwareCrypto::seeded(99));
    let mut node = server_node(Rc::clone(&crypto));
    let mut client = Client::new(crypto);

    let handle = commission(&mut client, &mut node, at(0));
    assert!(client.sessions.get(handle).is_some());
    assert_eq!(node.sessions().session_count(), 1);
}

#[test]
fn read_over_pase_session_returns_state() {
    let crypto = Rc::new(SoftwareCrypto::seeded(100));
    let mut node = server_node(Rc::clone(&crypto));
    let mut client = Client::new(crypto);
    let session = commission(&mut client, &mut node, at(0));

    let key = client.exchange.create(session, PROTOCOL_INTERACTION, at(10));
    let request = ReadRequest {
        attribute_paths: vec![AttributePath::concrete(
            EndpointNumber::new(1),
            ON_OFF_CLUSTER,
            ON_OFF,
        )],
        ..ReadRequest::default()
    };
    let deliveries = round_trip(
        &mut client,
        &mut node,
        key,
        im::READ_REQUEST,
        request.encode(),
        at(10),
    );

    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].opcode, im::REPORT_DATA);
    let report = ReportData::decode(&deliveries[0].payload).unwrap();
    assert_eq!(report.attribute_reports.len(), 1);
    assert!(matches!(
        &report.attribute_reports[0],
        trellis_interaction::AttributeReport::Data { value: TlvValue::Bool(false), .. }
    ));

    // The client acknowledges the report; the server closes cleanly.
    let wire = client.send(key, im::STATUS_RESPONSE, StatusResponse::success().encode(), true, at(11));
    node.on_datagram(wire, at(11));
}

#[test]
fn invoke_over_pase_session_flips_the_switch() {
    let crypto = Rc::new(SoftwareCrypto::seeded(101));
    let mut node = server_node(Rc::clone(&crypto));
    let mut client = Client::new(crypto);
    let session = commission(&mut client, &mut node, at(0));

    let key = client.exchange.create(session, PROTOCOL_INTERACTION, at(10));
    let request = InvokeRequest {
        suppress_response: false,
        timed_request: false,
        invokes: vec![CommandData {
            path: CommandPath::concrete(EndpointNumber::new(1), ON_OFF_CLUSTER, CMD_ON),
            fields: TlvValue::Struct(vec![]),
        }],
    };
    let deliveries = round_trip(
        &mut client,
        &mut node,
        key,
        im::INVOKE_REQUEST,
        request.encode(),
        at(10),
    );

    assert_eq!(deliveries[0].opcode, im::INVOKE_RESPONSE);
    let response = InvokeResponse::decode(&deliveries[0].payload).unwrap();
    assert!(matches!(
        response.responses[0],
        InvokeResponseEntry::Status { status: StatusCode::Success, .. }
    ));

    let ds = node
        .endpoint(EndpointNumber::new(1))
        .unwrap()
        .datasource(ON_OFF_CLUSTER)
        .unwrap();
    assert_eq!(ds.get(ON_OFF), Some(&TlvValue::Bool(true)));
}

#[test]
fn case_supersedes_pase_and_carries_identify_invoke() {
    let crypto = Rc::new(SoftwareCrypto::seeded(105));
    let mut node = server_node(Rc::clone(&crypto));
    let mut client = Client::new(Rc::clone(&crypto));

    // Commission over PASE; the commissioning session is live.
    commission(&mut client, &mut node, at(0));
    assert_eq!(node.sessions().session_count(), 1);

    let close_reasons: Rc<RefCell<Vec<SessionCloseReason>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&close_reasons);
    node.sessions().on_closed(move |closed| sink.borrow_mut().push(closed.reason));

    // Install the fabric, as the commissioner would over the PASE channel.
    let mut authority = FabricAuthority::new(crypto.as_ref());
    let device_fabric = {
        let fabrics = node.fabrics();
        let mut manager = fabrics.borrow_mut();
        authority
            .commission(
                crypto.as_ref(),
                &mut manager,
                NodeId::new(0x2000),
                VendorId::new(0xFFF1),
                "home",
            )
            .unwrap()
    };

    // Controller credentials on the same fabric.
    let (controller_noc, controller_key) =
        authority.issue_noc(crypto.as_ref(), device_fabric.fabric_id, NodeId::new(0x1000));
    let credentials = CaseCredentials {
        fabric_index: FabricIndex::new(1),
        local_node_id: NodeId::new(0x1000),
        noc: controller_noc,
        signing_key: controller_key,
        ipk: device_fabric.ipk,
        root_public_key: device_fabric.root_public_key,
        fabric_id: device_fabric.fabric_id.as_u64(),
    };
    let validator = RootValidator {
        crypto: Rc::clone(&crypto),
        root_public_key: device_fabric.root_public_key,
    };

    let case_session = establish_case(
        &mut client,
        &mut node,
        credentials,
        &validator,
        NodeId::new(0x2000),
        at(100),
    );

    // The PASE session is closed, superseded by the operational session.
    assert_eq!(node.sessions().session_count(), 1);
    assert!(
        close_reasons
            .borrow()
            .contains(&SessionCloseReason::SupersededByCase),
        "PASE session must close as superseded, got {:?}",
        close_reasons.borrow()
    );

    // Identify.Identify over the CASE session succeeds.
    let key = client
        .exchange
        .create(case_session, PROTOCOL_INTERACTION, at(200));
    let request = InvokeRequest {
        suppress_response: false,
        timed_request: false,
        invokes: vec![CommandData {
            path: CommandPath::concrete(EndpointNumber::new(1), IDENTIFY_CLUSTER, CMD_IDENTIFY),
            fields: TlvValue::Struct(vec![(
                trellis_tlv::TlvTag::context(0),
                TlvValue::UnsignedInt(5),
            )]),
        }],
    };
    let deliveries = round_trip(
        &mut client,
        &mut node,
        key,
        im::INVOKE_REQUEST,
        request.encode(),
        at(200),
    );

    let response = InvokeResponse::decode(&deliveries[0].payload).unwrap();
    assert!(matches!(
        response.responses[0],
        InvokeResponseEntry::Status { status: StatusCode::Success, .. }
    ));
    assert_eq!(
        node.endpoint(EndpointNumber::new(1))
            .unwrap()
            .datasource(IDENTIFY_CLUSTER)
            .unwrap()
            .get(IDENTIFY_TIME),
        Some(&TlvValue::UnsignedInt(5))
    );
}

#[test]
fn event_reads_return_emitted_events() {
    let crypto = Rc::new(SoftwareCrypto::seeded(104));
    let mut node = server_node(Rc::clone(&crypto));
    let mut client = Client::new(crypto);
    let session = commission(&mut client, &mut node, at(0));

    node.emit_event(
        EndpointNumber::new(1),
        ON_OFF_CLUSTER,
        trellis_types::EventId::new(0),
        trellis_types::EventPriority::Info,
        TlvValue::Struct(vec![]),
    )
    .unwrap();

    let key = client.exchange.create(session, PROTOCOL_INTERACTION, at(10));
    let request = ReadRequest {
        event_paths: vec![trellis_interaction::EventPath {
            endpoint: Some(EndpointNumber::new(1)),
            cluster: Some(ON_OFF_CLUSTER),
            event: None,
        }],
        ..ReadRequest::default()
    };
    let deliveries = round_trip(
        &mut client,
        &mut node,
        key,
        im::READ_REQUEST,
        request.encode(),
        at(10),
    );

    let report = ReportData::decode(&deliveries[0].payload).unwrap();
    assert!(report.attribute_reports.is_empty());
    assert_eq!(report.event_reports.len(), 1);
    assert_eq!(
        report.event_reports[0].number,
        trellis_types::EventNumber::new(1)
    );
    assert_eq!(
        report.event_reports[0].priority,
        trellis_types::EventPriority::Info
    );
}

#[test]
fn replayed_datagram_is_not_reprocessed() {
    let crypto = Rc::new(SoftwareCrypto::seeded(102));
    let mut node = server_node(Rc::clone(&crypto));
    let mut client = Client::new(crypto);
    let session = commission(&mut client, &mut node, at(0));

    let key = client.exchange.create(session, PROTOCOL_INTERACTION, at(10));
    let request = InvokeRequest {
        suppress_response: false,
        timed_request: false,
        invokes: vec![CommandData {
            path: CommandPath::concrete(EndpointNumber::new(1), ON_OFF_CLUSTER, CMD_ON),
            fields: TlvValue::Struct(vec![]),
        }],
    };
    let wire = client.send(key, im::INVOKE_REQUEST, request.encode(), false, at(10));
    let first = node.on_datagram(wire.clone(), at(10));
    assert!(!first.is_empty());

    // Replaying the identical datagram yields an ack at most, never a
    // second invoke response.
    let replay = node.on_datagram(wire, at(11));
    for datagram in replay {
        let (deliveries, _) = client.receive(vec![datagram], at(11));
        assert!(deliveries.is_empty(), "replay must not deliver");
    }
}

#[test]
fn wrong_passcode_never_installs_a_session() {
    let crypto = Rc::new(SoftwareCrypto::seeded(103));
    let mut node = server_node(Rc::clone(&crypto));
    let mut client = Client::new(crypto);

    let mut initiator = PaseInitiator::new(
        11111111,
        client.sessions.allocate_session_id(),
        SessionParameters::default(),
    );
    let key = client
        .exchange
        .create(UNSECURED_HANDLE, PROTOCOL_SECURE_CHANNEL, at(0));
    let (opcode, payload) = initiator.start(client.crypto.as_ref());
    let mut to_node = vec![client.send(key, opcode, payload, false, at(0))];

    // Drive until the node stops responding with handshake progress.
    for _ in 0..8 {
        let mut from_node = Vec::new();
        for wire in to_node.drain(..) {
            from_node.extend(node.on_datagram(wire, at(0)));
        }
        if from_node.is_empty() {
            break;
        }
        let (deliveries, acks) = client.receive(from_node, at(0));
        to_node = acks;
        for delivery in deliveries {
            if let Ok(out) =
                initiator.on_message(client.crypto.as_ref(), delivery.opcode, &delivery.payload)
            {
                if let Some((opcode, payload)) = out.response {
                    to_node.push(client.send(key, opcode, payload, false, at(0)));
                }
                assert!(out.established.is_none());
            }
        }
    }
    assert_eq!(node.sessions().session_count(), 0);
}
