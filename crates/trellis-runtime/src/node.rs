//! The server node driver.
//!
//! [`ServerNode`] wires sessions, exchanges, the secure channel and the
//! interaction server into one deterministic loop:
//!
//! ```text
//! on_datagram(wire, now) -> outbound datagrams
//! poll(now)              -> outbound datagrams (retransmits, reports)
//! ```
//!
//! Platform transports feed datagrams in and carry datagrams out; the
//! node never touches a socket or a clock.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;
use tracing::{debug, trace, warn};
use trellis_config::TrellisConfig;
use trellis_crypto::{CryptoProvider, derive_pase_verifier};
use trellis_exchange::{
    Delivery, ExchangeKey, ExchangeManager, ExchangeOutput, MrpConfig, PROTOCOL_BDX,
    PROTOCOL_INTERACTION, PROTOCOL_SECURE_CHANNEL, SendFlags, SessionHandle,
};
use trellis_fabric::{FabricManager, FabricValidator, PeerAddressStore};
use trellis_interaction::{
    AccessDecision, ConcretePath, EventPath, EventReport, InteractionServer, NodeView,
    ServerOutput, Subject,
};
use trellis_model::{DatatypeSchema, Privilege, Scope, ValueType};
use trellis_session::{
    CaseResponder, CounterVerdict, PaseResponder, PbkdfParameters, SessionCloseReason,
    SessionError, SessionManager, SessionParameters, StatusReport,
    secure_channel_opcodes as sc,
};
use trellis_storage::StorageContext;
use trellis_store::{StoredEvent, Transaction};
use trellis_tlv::TlvValue;
use trellis_types::{
    ClusterId, DeviceTypeId, EndpointNumber, EventId, EventNumber, EventPriority, FabricIndex,
    NodeId, StatusCode, Timestamp,
};

/// Errors surfaced by the node driver.
#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Fabric(#[from] trellis_fabric::FabricError),
}

/// Application hook deciding access for a subject.
pub type AccessPolicy =
    Box<dyn Fn(&Subject, EndpointNumber, ClusterId, Privilege) -> AccessDecision>;

/// A commissioned, running Matter node.
pub struct ServerNode {
    crypto: Rc<dyn CryptoProvider>,
    arena: crate::EndpointArena,
    exchange: ExchangeManager,
    sessions: SessionManager,
    fabrics: Rc<RefCell<FabricManager>>,
    peers: PeerAddressStore,
    interaction: InteractionServer,
    /// One PASE handshake at a time; a new request replaces it.
    pase: Option<(ExchangeKey, PaseResponder)>,
    /// The live commissioning session, until CASE supersedes it.
    pase_session: Option<SessionHandle>,
    case_responders: HashMap<ExchangeKey, CaseResponder>,
    pbkdf: PbkdfParameters,
    pase_w0: [u8; 32],
    pase_l: [u8; 32],
    local_params: SessionParameters,
    /// Committed changes pending delivery to the subscription engine.
    changes: Rc<RefCell<Vec<ConcretePath>>>,
    /// Sessions that died since the last pump.
    dead_sessions: Rc<RefCell<Vec<SessionHandle>>>,
    /// BDX and other app-protocol deliveries awaiting the application.
    app_deliveries: Vec<Delivery>,
    access_policy: Option<AccessPolicy>,
    /// Node-global monotonic event sequence.
    next_event_number: EventNumber,
}

impl ServerNode {
    pub fn new(
        crypto: Rc<dyn CryptoProvider>,
        config: &TrellisConfig,
        storage: Option<StorageContext>,
    ) -> Self {
        let fabrics = Rc::new(RefCell::new(FabricManager::new(
            storage.as_ref().map(|ctx| ctx.child("fabrics")),
        )));
        let peers = PeerAddressStore::new(storage.as_ref().map(|ctx| ctx.child("nodes")));
        let arena = crate::EndpointArena::new(storage.clone());

        let mut salt = [0u8; 16];
        crypto.fill_random(&mut salt);
        let pbkdf = PbkdfParameters {
            iterations: config.commissioning.pbkdf_iterations,
            salt: Bytes::copy_from_slice(&salt),
        };
        let verifier = derive_pase_verifier(
            crypto.as_ref(),
            config.commissioning.passcode,
            &pbkdf.salt,
            pbkdf.iterations,
        );

        let mut ephemeral = [0u8; 8];
        crypto.fill_random(&mut ephemeral);
        let ephemeral_node_id =
            NodeId::new(NodeId::TEMPORARY_RANGE_START | u64::from(ephemeral[0]));

        let sessions = SessionManager::new(16, ephemeral_node_id);
        let dead_sessions: Rc<RefCell<Vec<SessionHandle>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&dead_sessions);
        sessions.on_closed(move |closed| sink.borrow_mut().push(closed.handle));

        Self {
            crypto,
            arena,
            exchange: ExchangeManager::new(MrpConfig::default()),
            sessions,
            fabrics,
            peers,
            interaction: InteractionServer::new(),
            pase: None,
            pase_session: None,
            case_responders: HashMap::new(),
            pbkdf,
            pase_w0: verifier.w0,
            pase_l: verifier.l,
            local_params: SessionParameters::default(),
            changes: Rc::new(RefCell::new(Vec::new())),
            dead_sessions,
            app_deliveries: Vec::new(),
            access_policy: None,
            next_event_number: EventNumber::new(1),
        }
    }

    pub fn fabrics(&self) -> Rc<RefCell<FabricManager>> {
        Rc::clone(&self.fabrics)
    }

    pub fn peers(&mut self) -> &mut PeerAddressStore {
        &mut self.peers
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn interaction(&self) -> &InteractionServer {
        &self.interaction
    }

    /// Installs an application access policy; absent, the node allows
    /// commissioned subjects and the PASE channel.
    pub fn set_access_policy(&mut self, policy: AccessPolicy) {
        self.access_policy = Some(policy);
    }

    // ========================================================================
    // Endpoint assembly
    // ========================================================================

    /// Installs an endpoint under the root.
    pub fn add_endpoint(&mut self, id: &str, device_type: DeviceTypeId) -> EndpointNumber {
        self.arena.install(id, device_type, EndpointNumber::ROOT)
    }

    /// Adds a cluster to an endpoint and wires its change stream into
    /// the subscription engine.
    pub fn add_cluster(
        &mut self,
        endpoint: EndpointNumber,
        scope: Scope,
        handler: Option<Box<dyn crate::CommandHandler>>,
    ) {
        let cluster_id = scope.cluster().id;
        self.arena.add_backing(endpoint, scope, handler);
        if let Some(ds) = self.arena.get(endpoint).and_then(|e| e.datasource(cluster_id)) {
            let sink = Rc::clone(&self.changes);
            ds.on_any_change(move |change| {
                sink.borrow_mut().push(ConcretePath::new(
                    change.endpoint,
                    change.cluster,
                    change.attribute,
                ));
            });
        }
    }

    /// Marks an endpoint ready to serve.
    pub fn mark_ready(&mut self, endpoint: EndpointNumber) {
        self.arena.mark_ready(endpoint);
    }

    /// Emits an event on an endpoint; readable through event paths.
    pub fn emit_event(
        &mut self,
        endpoint: EndpointNumber,
        cluster: ClusterId,
        event: EventId,
        priority: EventPriority,
        payload: TlvValue,
    ) -> Option<EventNumber> {
        let number = self.next_event_number;
        let target = self.arena.get_mut(endpoint)?;
        target.events.push(StoredEvent {
            cluster,
            event,
            number,
            priority,
            payload,
        });
        self.next_event_number = number.next();
        Some(number)
    }

    pub fn endpoint(&self, number: EndpointNumber) -> Option<&crate::Endpoint> {
        self.arena.get(number)
    }

    pub fn endpoint_mut(&mut self, number: EndpointNumber) -> Option<&mut crate::Endpoint> {
        self.arena.get_mut(number)
    }

    // ========================================================================
    // Fabric lifecycle
    // ========================================================================

    /// Removes a fabric with the full data cascade: fabric-scoped rows
    /// are scrubbed, bound sessions and peers dropped, then the manager
    /// signals sanitisation.
    pub fn remove_fabric(&mut self, index: FabricIndex) -> Result<(), NodeError> {
        self.scrub_fabric_scoped_data(index);
        self.sessions.close_for_fabric(index);
        self.peers.remove_fabric(index);
        self.fabrics.borrow_mut().remove(index)?;
        Ok(())
    }

    /// Drops rows written by a fabric from every fabric-scoped list.
    fn scrub_fabric_scoped_data(&mut self, index: FabricIndex) {
        for number in self.arena.numbers() {
            let Some(endpoint) = self.arena.get_mut(number) else {
                continue;
            };
            for cluster_id in endpoint.cluster_ids() {
                let Some(ds) = endpoint.datasource_mut(cluster_id) else {
                    continue;
                };
                let scoped: Vec<_> = ds
                    .scope()
                    .cluster()
                    .attributes
                    .iter()
                    .filter(|a| a.quality.fabric_scoped && a.access.write.is_some())
                    .map(|a| (a.id, a.ty.clone()))
                    .collect();
                for (attribute, ty) in scoped {
                    let Some(TlvValue::Array(rows)) = ds.get(attribute).cloned() else {
                        continue;
                    };
                    let fi_field = fabric_index_field(ds.scope(), &ty);
                    let kept: Vec<TlvValue> = rows
                        .into_iter()
                        .filter(|row| {
                            fi_field
                                .and_then(|f| row.member(f))
                                .and_then(TlvValue::as_u64)
                                .is_none_or(|fi| fi != u64::from(index.as_u8()))
                        })
                        .collect();
                    let mut tx = Transaction::read_write();
                    let p = tx.join(ds);
                    if tx.write(p, attribute, TlvValue::Array(kept)).is_ok() {
                        tx.resolve();
                    }
                }
            }
        }
    }

    // ========================================================================
    // The driver
    // ========================================================================

    /// Processes one inbound datagram; returns datagrams to transmit.
    pub fn on_datagram(&mut self, wire: Bytes, now: Timestamp) -> Vec<Bytes> {
        let verdict = match self
            .sessions
            .open_frame(self.crypto.as_ref(), wire, now)
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "inbound datagram rejected");
                return Vec::new();
            }
        };

        let mut output = ExchangeOutput::default();
        match verdict.verdict {
            CounterVerdict::Duplicate => {
                let sessions = &mut self.sessions;
                let mut alloc = |s: SessionHandle| alloc_counter(sessions, s);
                output.merge(self.exchange.acknowledge_duplicate(
                    verdict.session,
                    &verdict.message,
                    &mut alloc,
                ));
            }
            CounterVerdict::Fresh => {
                output.merge(
                    self.exchange
                        .on_message(verdict.session, &verdict.message, now),
                );
            }
        }

        let deliveries = std::mem::take(&mut output.deliveries);
        for delivery in deliveries {
            output.merge(self.route(delivery, now));
        }
        self.finish_output(output, now)
    }

    /// Advances time: retransmits, standalone acks, subscription reports.
    pub fn poll(&mut self, now: Timestamp) -> Vec<Bytes> {
        let mut output = ExchangeOutput::default();
        {
            let sessions = &mut self.sessions;
            let mut alloc = |s: SessionHandle| alloc_counter(sessions, s);
            output.merge(self.exchange.poll(now, &mut alloc));
        }

        self.pump_changes();

        let reports = {
            let view = ArenaView {
                arena: &self.arena,
                access_policy: self.access_policy.as_deref(),
            };
            self.interaction.poll(&view, now, self.local_params.max_payload)
        };
        for report in reports {
            let key = self
                .exchange
                .create(report.session, PROTOCOL_INTERACTION, now);
            let keep_alive = report.trigger == trellis_interaction::ReportTrigger::KeepAlive;
            let server_output = self.interaction.begin_report_delivery(key, report.chunks);
            output.merge(self.send_server_output(key, server_output, now));
            if keep_alive {
                // Keep-alive reports suppress the response; nothing more
                // rides this exchange.
                self.interaction.exchange_closed(key);
                let sessions = &mut self.sessions;
                let mut alloc = |s: SessionHandle| alloc_counter(sessions, s);
                output.merge(self.exchange.close(key, &mut alloc));
            }
        }

        self.finish_output(output, now)
    }

    /// The earliest instant [`ServerNode::poll`] has work to do.
    pub fn next_wakeup(&self) -> Option<Timestamp> {
        [self.exchange.next_wakeup(), self.interaction.next_wakeup()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Drains application-protocol deliveries (BDX and vendor protocols).
    pub fn drain_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.app_deliveries)
    }

    // ========================================================================
    // Routing
    // ========================================================================

    fn route(&mut self, delivery: Delivery, now: Timestamp) -> ExchangeOutput {
        match delivery.protocol {
            PROTOCOL_SECURE_CHANNEL => self.handle_secure_channel(delivery, now),
            PROTOCOL_INTERACTION => self.handle_interaction(delivery, now),
            PROTOCOL_BDX => {
                trace!(exchange = %delivery.key, "BDX delivery queued for application");
                self.app_deliveries.push(delivery);
                ExchangeOutput::default()
            }
            other => {
                debug!(%other, "delivery for unhandled protocol dropped");
                ExchangeOutput::default()
            }
        }
    }

    fn handle_secure_channel(&mut self, delivery: Delivery, now: Timestamp) -> ExchangeOutput {
        let key = delivery.key;
        let mut output = ExchangeOutput::default();

        let result: Result<(Option<(u8, Bytes)>, bool), SessionError> = match delivery.opcode {
            sc::PBKDF_PARAM_REQUEST | sc::PASE_PAKE1 | sc::PASE_PAKE3 => {
                self.handle_pase(key, delivery.opcode, &delivery.payload, now)
            }
            sc::CASE_SIGMA1 | sc::CASE_SIGMA3 => {
                self.handle_case(key, delivery.opcode, &delivery.payload, now)
            }
            sc::STATUS_REPORT => {
                // Outside a handshake, a status report closes the session.
                if let Ok(report) = StatusReport::decode(delivery.payload.clone()) {
                    if report.code == trellis_session::SecureChannelStatus::CloseSession {
                        self.sessions
                            .close(key.session, SessionCloseReason::PeerClosed);
                    }
                }
                Ok((None, true))
            }
            other => {
                debug!(opcode = other, "unhandled secure-channel opcode");
                Ok((None, false))
            }
        };

        match result {
            Ok((Some((opcode, payload)), final_message)) => {
                output.merge(self.send_on(key, opcode, payload, final_message, now));
            }
            Ok((None, close)) => {
                if close {
                    let sessions = &mut self.sessions;
                    let mut alloc = |s: SessionHandle| alloc_counter(sessions, s);
                    output.merge(self.exchange.close(key, &mut alloc));
                }
            }
            Err(e) => {
                warn!(exchange = %key, error = %e, "secure-channel handshake failed");
                let report = StatusReport::failure(
                    trellis_session::SecureChannelStatus::InvalidParameter,
                );
                output.merge(self.send_on(key, sc::STATUS_REPORT, report.encode(), true, now));
            }
        }
        output
    }

    fn handle_pase(
        &mut self,
        key: ExchangeKey,
        opcode: u8,
        payload: &Bytes,
        now: Timestamp,
    ) -> Result<(Option<(u8, Bytes)>, bool), SessionError> {
        if opcode == sc::PBKDF_PARAM_REQUEST {
            // A new request aborts any PASE in flight.
            if let Some((old_key, _)) = self.pase.take() {
                if old_key != key {
                    warn!(exchange = %old_key, "in-flight PASE aborted by new request");
                }
            }
            let responder = PaseResponder::new(
                self.sessions.allocate_session_id(),
                self.pase_w0,
                self.pase_l,
                self.pbkdf.clone(),
                self.local_params,
            );
            self.pase = Some((key, responder));
        }

        let Some((pase_key, responder)) = self.pase.as_mut() else {
            return Err(SessionError::UnexpectedMessage {
                protocol: "PASE",
                opcode,
                state: "no handshake in flight",
            });
        };
        if *pase_key != key {
            return Err(SessionError::UnexpectedMessage {
                protocol: "PASE",
                opcode,
                state: "different exchange owns the handshake",
            });
        }

        let out = responder.on_message(self.crypto.as_ref(), opcode, payload)?;
        let finished = out.established.is_some();
        if let Some(established) = out.established {
            let handle = self.sessions.install(established, now);
            debug!(session = %handle, "PASE session installed");
            // A restarted commissioning attempt orphans the prior
            // commissioning session.
            if let Some(prior) = self.pase_session.replace(handle) {
                self.sessions.close(prior, SessionCloseReason::LocalClosed);
            }
            self.pase = None;
        }
        Ok((out.response, finished))
    }

    fn handle_case(
        &mut self,
        key: ExchangeKey,
        opcode: u8,
        payload: &Bytes,
        now: Timestamp,
    ) -> Result<(Option<(u8, Bytes)>, bool), SessionError> {
        let validator = FabricValidator {
            manager: Rc::clone(&self.fabrics),
            crypto: Rc::clone(&self.crypto),
        };
        if opcode == sc::CASE_SIGMA1 {
            self.case_responders.insert(
                key,
                CaseResponder::new(self.sessions.allocate_session_id(), self.local_params),
            );
        }
        let Some(responder) = self.case_responders.get_mut(&key) else {
            return Err(SessionError::UnexpectedMessage {
                protocol: "CASE",
                opcode,
                state: "no handshake on this exchange",
            });
        };

        let out = responder.on_message(self.crypto.as_ref(), &validator, opcode, payload)?;
        let finished = out.established.is_some();
        if let Some(established) = out.established {
            let handle = self.sessions.install(established, now);
            debug!(session = %handle, "CASE session installed");
            self.case_responders.remove(&key);
            // Commissioning hand-off: the operational session replaces
            // the PASE session that carried it this far.
            if let Some(pase) = self.pase_session.take() {
                self.sessions
                    .close(pase, SessionCloseReason::SupersededByCase);
            }
        }
        Ok((out.response, finished))
    }

    fn handle_interaction(&mut self, delivery: Delivery, now: Timestamp) -> ExchangeOutput {
        let key = delivery.key;
        let Some(session) = self.sessions.get(key.session) else {
            // Interaction requires a secure session.
            warn!(exchange = %key, "interaction message outside a secure session");
            return ExchangeOutput::default();
        };
        let subject = Subject {
            fabric_index: session.fabric_index.unwrap_or(FabricIndex::NONE),
            node_id: session.peer_node_id,
            is_group: false,
        };
        let peer_node_id = session.peer_node_id;
        let max_payload = session.parameters.max_payload;
        let timed_deadline = self.exchange.timed_deadline(key);

        let result = {
            let mut view = ArenaViewMut {
                arena: &mut self.arena,
                access_policy: self.access_policy.as_deref(),
            };
            self.interaction.handle(
                &mut view,
                key,
                delivery.opcode,
                &delivery.payload,
                &subject,
                peer_node_id,
                timed_deadline,
                max_payload,
                now,
            )
        };
        self.pump_changes();

        let mut output = ExchangeOutput::default();
        match result {
            Ok(server_output) => {
                if let Some(deadline) = server_output.arm_timed {
                    self.exchange.set_timed_deadline(key, deadline);
                }
                output.merge(self.send_server_output(key, server_output, now));
            }
            Err(e) => {
                debug!(exchange = %key, error = %e, "interaction failed");
                let response = trellis_interaction::StatusResponse { status: e.status() };
                output.merge(self.send_on(
                    key,
                    trellis_interaction::opcodes::STATUS_RESPONSE,
                    response.encode(),
                    true,
                    now,
                ));
            }
        }
        output
    }

    fn send_server_output(
        &mut self,
        key: ExchangeKey,
        server_output: ServerOutput,
        now: Timestamp,
    ) -> ExchangeOutput {
        let mut output = ExchangeOutput::default();
        for message in server_output.messages {
            output.merge(self.send_on(
                key,
                message.opcode,
                message.payload,
                message.final_message,
                now,
            ));
        }
        if server_output.close {
            let sessions = &mut self.sessions;
            let mut alloc = |s: SessionHandle| alloc_counter(sessions, s);
            output.merge(self.exchange.close(key, &mut alloc));
        }
        output
    }

    /// Sends one reliable message on an exchange.
    fn send_on(
        &mut self,
        key: ExchangeKey,
        opcode: u8,
        payload: Bytes,
        final_message: bool,
        now: Timestamp,
    ) -> ExchangeOutput {
        let mut output = ExchangeOutput::default();
        let counter = alloc_counter(&mut self.sessions, key.session);
        match self.exchange.send(
            key,
            opcode,
            payload,
            SendFlags {
                reliable: true,
                final_message,
            },
            counter,
            now,
        ) {
            Ok(frame) => output.frames.push(frame),
            Err(e) => warn!(exchange = %key, error = %e, "send failed"),
        }
        output
    }

    /// Delivers committed changes to the subscription engine.
    fn pump_changes(&mut self) {
        for path in self.changes.borrow_mut().drain(..) {
            self.interaction.on_change(path);
        }
    }

    /// Seals frames, processes closures, and returns wire datagrams.
    fn finish_output(&mut self, output: ExchangeOutput, now: Timestamp) -> Vec<Bytes> {
        for (key, error) in &output.closed {
            if let Some(error) = error {
                debug!(exchange = %key, %error, "exchange failed");
            }
            self.interaction.exchange_closed(*key);
            self.case_responders.remove(key);
            if self.pase.as_ref().is_some_and(|(k, _)| k == key) {
                self.pase = None;
            }
        }

        // Sessions that died take their exchanges and subscriptions.
        let dead: Vec<SessionHandle> = self.dead_sessions.borrow_mut().drain(..).collect();
        for handle in dead {
            if self.pase_session == Some(handle) {
                self.pase_session = None;
            }
            let closed = self.exchange.close_session(handle);
            for (key, _) in &closed.closed {
                self.interaction.exchange_closed(*key);
            }
            self.interaction.session_closed(handle);
        }

        let mut wire = Vec::with_capacity(output.frames.len());
        for frame in &output.frames {
            match self.sessions.seal_frame(self.crypto.as_ref(), frame, now) {
                Ok(datagram) => wire.push(datagram),
                Err(e) => warn!(session = %frame.session, error = %e, "frame not sealed"),
            }
        }
        wire
    }
}

impl std::fmt::Debug for ServerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerNode")
            .field("sessions", &self.sessions.session_count())
            .field("exchanges", &self.exchange.exchange_count())
            .finish()
    }
}

/// Counter allocation helper tolerating dead sessions.
fn alloc_counter(sessions: &mut SessionManager, handle: SessionHandle) -> u32 {
    match sessions.allocate_counter(handle) {
        Ok(counter) => counter,
        Err(e) => {
            warn!(session = %handle, error = %e, "counter allocation failed");
            0
        }
    }
}

/// Locates the fabric-index field of a scoped list's row struct.
fn fabric_index_field(scope: &Scope, ty: &ValueType) -> Option<u8> {
    let ValueType::List(inner) = ty else {
        return None;
    };
    let ValueType::Struct(name) = inner.as_ref() else {
        return None;
    };
    match scope.cluster().datatype(name) {
        Some(DatatypeSchema::Struct {
            fabric_index_field, ..
        }) => *fabric_index_field,
        _ => None,
    }
}

// ============================================================================
// NodeView adapters
// ============================================================================

/// Reads matching events out of the arena's per-endpoint logs.
fn arena_events(arena: &crate::EndpointArena, path: &EventPath) -> Vec<EventReport> {
    let numbers = match path.endpoint {
        Some(endpoint) => vec![endpoint],
        None => arena.numbers(),
    };
    let mut reports = Vec::new();
    for number in numbers {
        let Some(endpoint) = arena.get(number) else {
            continue;
        };
        for event in endpoint.events.read(path.cluster, path.event, EventNumber::new(0)) {
            reports.push(EventReport {
                path: EventPath {
                    endpoint: Some(number),
                    cluster: Some(event.cluster),
                    event: Some(event.event),
                },
                number: event.number,
                priority: event.priority,
                payload: event.payload.clone(),
            });
        }
    }
    reports
}

fn default_access(subject: &Subject, _privilege: Privilege) -> AccessDecision {
    // The PASE channel is the commissioning channel: implicit admin.
    // CASE subjects act within their fabric. The application narrows
    // this via its access policy (the ACL cluster is its data).
    if subject.fabric_index == FabricIndex::NONE && subject.node_id.is_operational() {
        AccessDecision::Deny
    } else {
        AccessDecision::Allow
    }
}

struct ArenaView<'a> {
    arena: &'a crate::EndpointArena,
    access_policy: Option<&'a (dyn Fn(&Subject, EndpointNumber, ClusterId, Privilege) -> AccessDecision)>,
}

impl NodeView for ArenaView<'_> {
    fn endpoints(&self) -> Vec<EndpointNumber> {
        self.arena.numbers()
    }

    fn clusters_of(&self, endpoint: EndpointNumber) -> Vec<ClusterId> {
        self.arena
            .get(endpoint)
            .map(crate::Endpoint::cluster_ids)
            .unwrap_or_default()
    }

    fn datasource(
        &self,
        endpoint: EndpointNumber,
        cluster: ClusterId,
    ) -> Option<&trellis_store::Datasource> {
        self.arena.get(endpoint)?.datasource(cluster)
    }

    fn datasource_mut(
        &mut self,
        _endpoint: EndpointNumber,
        _cluster: ClusterId,
    ) -> Option<&mut trellis_store::Datasource> {
        // Read-only view used by subscription polling.
        None
    }

    fn check_access(
        &self,
        subject: &Subject,
        endpoint: EndpointNumber,
        cluster: ClusterId,
        privilege: Privilege,
    ) -> AccessDecision {
        match self.access_policy {
            Some(policy) => policy(subject, endpoint, cluster, privilege),
            None => default_access(subject, privilege),
        }
    }

    fn read_events(&self, path: &EventPath) -> Vec<EventReport> {
        arena_events(self.arena, path)
    }

    fn invoke(
        &mut self,
        _subject: &Subject,
        _endpoint: EndpointNumber,
        _cluster: ClusterId,
        _command: trellis_types::CommandId,
        _fields: TlvValue,
    ) -> Result<Option<(trellis_types::CommandId, TlvValue)>, StatusCode> {
        Err(StatusCode::UnsupportedCommand)
    }
}

struct ArenaViewMut<'a> {
    arena: &'a mut crate::EndpointArena,
    access_policy: Option<&'a (dyn Fn(&Subject, EndpointNumber, ClusterId, Privilege) -> AccessDecision)>,
}

impl NodeView for ArenaViewMut<'_> {
    fn endpoints(&self) -> Vec<EndpointNumber> {
        self.arena.numbers()
    }

    fn clusters_of(&self, endpoint: EndpointNumber) -> Vec<ClusterId> {
        self.arena
            .get(endpoint)
            .map(crate::Endpoint::cluster_ids)
            .unwrap_or_default()
    }

    fn datasource(
        &self,
        endpoint: EndpointNumber,
        cluster: ClusterId,
    ) -> Option<&trellis_store::Datasource> {
        self.arena.get(endpoint)?.datasource(cluster)
    }

    fn datasource_mut(
        &mut self,
        endpoint: EndpointNumber,
        cluster: ClusterId,
    ) -> Option<&mut trellis_store::Datasource> {
        self.arena.get_mut(endpoint)?.datasource_mut(cluster)
    }

    fn check_access(
        &self,
        subject: &Subject,
        endpoint: EndpointNumber,
        cluster: ClusterId,
        privilege: Privilege,
    ) -> AccessDecision {
        match self.access_policy {
            Some(policy) => policy(subject, endpoint, cluster, privilege),
            None => default_access(subject, privilege),
        }
    }

    fn read_events(&self, path: &EventPath) -> Vec<EventReport> {
        arena_events(&*self.arena, path)
    }

    fn invoke(
        &mut self,
        subject: &Subject,
        endpoint: EndpointNumber,
        cluster: ClusterId,
        command: trellis_types::CommandId,
        fields: TlvValue,
    ) -> Result<Option<(trellis_types::CommandId, TlvValue)>, StatusCode> {
        let backing = self
            .arena
            .get_mut(endpoint)
            .and_then(|e| e.backing_mut(cluster))
            .ok_or(StatusCode::UnsupportedCluster)?;
        let Some(handler) = backing.handler.as_mut() else {
            return Err(StatusCode::UnsupportedCommand);
        };
        // The handler borrows the datasource beside it.
        let handler: &mut dyn crate::CommandHandler = handler.as_mut();
        let datasource = &mut backing.datasource;
        handler.invoke(datasource, subject, command, fields)
    }
}
