//! The server-side interaction engine.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};
use trellis_exchange::{ExchangeKey, SessionHandle};
use trellis_model::Privilege;
use trellis_store::{Datasource, Transaction};
use trellis_tlv::TlvValue;
use trellis_types::{
    AttributeId, ClusterId, CommandId, EndpointNumber, FabricIndex, NodeId, StatusCode,
    SubscriptionId, Timestamp,
};

use crate::error::validation_status;
use crate::messages::{
    AttributeReport, EventReport, InvokeRequest, InvokeResponse, InvokeResponseEntry, ReadRequest,
    ReportData, StatusResponse, SubscribeRequest, SubscribeResponse, TimedRequest, WriteRequest,
    WriteResponse, opcodes,
};
use crate::path::{AttributePath, ConcretePath, DataVersionFilter, EventPath};
use crate::subscriptions::{ReportTrigger, ServerSubscription, SubscriptionReport};
use crate::InteractionError;

/// Fixed per-message overhead the chunker reserves beside report entries.
const CHUNK_OVERHEAD: usize = 64;

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub fabric_index: FabricIndex,
    pub node_id: NodeId,
    /// Request arrived on a group address.
    pub is_group: bool,
}

/// Outcome of an access-control check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny,
}

/// What the interaction engines need from the node runtime.
///
/// The runtime owns the endpoint tree and behavior dispatch; the engines
/// own wire semantics.
pub trait NodeView {
    fn endpoints(&self) -> Vec<EndpointNumber>;

    fn clusters_of(&self, endpoint: EndpointNumber) -> Vec<ClusterId>;

    fn datasource(&self, endpoint: EndpointNumber, cluster: ClusterId) -> Option<&Datasource>;

    fn datasource_mut(
        &mut self,
        endpoint: EndpointNumber,
        cluster: ClusterId,
    ) -> Option<&mut Datasource>;

    /// ACL check for one cluster instance at one privilege.
    fn check_access(
        &self,
        subject: &Subject,
        endpoint: EndpointNumber,
        cluster: ClusterId,
        privilege: Privilege,
    ) -> AccessDecision;

    /// Events matching an event path, oldest first.
    ///
    /// Nodes without event storage keep the default empty answer.
    fn read_events(&self, path: &EventPath) -> Vec<EventReport> {
        let _ = path;
        Vec::new()
    }

    /// Dispatches a command to its behavior.
    ///
    /// `Ok(Some(..))` is a response command, `Ok(None)` a bare success.
    fn invoke(
        &mut self,
        subject: &Subject,
        endpoint: EndpointNumber,
        cluster: ClusterId,
        command: CommandId,
        fields: TlvValue,
    ) -> Result<Option<(CommandId, TlvValue)>, StatusCode>;
}

/// One message to send on the exchange.
#[derive(Debug, Clone)]
pub struct OutMessage {
    pub opcode: u8,
    pub payload: Bytes,
    /// Close the exchange after this message settles.
    pub final_message: bool,
}

/// Everything one handling step produced.
#[derive(Debug, Default)]
pub struct ServerOutput {
    pub messages: Vec<OutMessage>,
    /// Arm the exchange's timed-interaction deadline.
    pub arm_timed: Option<Timestamp>,
    /// A subscription finished establishing.
    pub subscription_established: Option<SubscriptionId>,
    /// Close the exchange without sending anything further.
    pub close: bool,
}

impl ServerOutput {
    fn single(opcode: u8, payload: Bytes, final_message: bool) -> Self {
        Self {
            messages: vec![OutMessage {
                opcode,
                payload,
                final_message,
            }],
            ..Self::default()
        }
    }

    /// A bare status response that ends the exchange.
    pub fn status(status: StatusCode) -> Self {
        Self::single(
            opcodes::STATUS_RESPONSE,
            StatusResponse { status }.encode(),
            true,
        )
    }
}

/// Per-exchange continuation state for chunked responses.
struct Continuation {
    /// Remaining (opcode, payload) chunks awaiting StatusResponses.
    remaining: Vec<(u8, Bytes)>,
    /// When this was a subscribe priming report: finish with
    /// SubscribeResponse for the pending subscription.
    subscribe: Option<PendingSubscription>,
    /// Report flows: the client acknowledges the final chunk too.
    acked_to_end: bool,
}

struct PendingSubscription {
    subscription: ServerSubscription,
}

/// The server-side engine: read, write, invoke, subscribe.
pub struct InteractionServer {
    subscriptions: Vec<ServerSubscription>,
    next_subscription_id: u32,
    continuations: HashMap<ExchangeKey, Continuation>,
}

impl Default for InteractionServer {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionServer {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            next_subscription_id: 1,
            continuations: HashMap::new(),
        }
    }

    pub fn subscriptions(&self) -> &[ServerSubscription] {
        &self.subscriptions
    }

    /// Handles one inbound interaction-protocol message.
    pub fn handle(
        &mut self,
        node: &mut dyn NodeView,
        key: ExchangeKey,
        opcode: u8,
        payload: &Bytes,
        subject: &Subject,
        peer_node_id: NodeId,
        timed_deadline: Option<Timestamp>,
        max_payload: usize,
        now: Timestamp,
    ) -> Result<ServerOutput, InteractionError> {
        match opcode {
            opcodes::READ_REQUEST => self.handle_read(node, key, payload, subject, max_payload),
            opcodes::WRITE_REQUEST => {
                self.handle_write(node, payload, subject, timed_deadline, now)
            }
            opcodes::INVOKE_REQUEST => {
                self.handle_invoke(node, key, payload, subject, timed_deadline, max_payload, now)
            }
            opcodes::SUBSCRIBE_REQUEST => {
                self.handle_subscribe(node, key, payload, subject, peer_node_id, max_payload, now)
            }
            opcodes::TIMED_REQUEST => {
                let request = TimedRequest::decode(payload)?;
                let deadline = now + Duration::from_millis(u64::from(request.timeout_ms));
                let mut output = ServerOutput::single(
                    opcodes::STATUS_RESPONSE,
                    StatusResponse::success().encode(),
                    false,
                );
                output.arm_timed = Some(deadline);
                Ok(output)
            }
            opcodes::STATUS_RESPONSE => self.handle_status_response(key, payload, now),
            other => Err(InteractionError::Unexpected { opcode: other }),
        }
    }

    /// Drops continuation state when an exchange dies underneath it.
    pub fn exchange_closed(&mut self, key: ExchangeKey) {
        self.continuations.remove(&key);
    }

    /// Drops subscriptions riding a destroyed session.
    ///
    /// Subscriptions never rebind: a replacement session re-subscribes
    /// from scratch.
    pub fn session_closed(&mut self, session: SessionHandle) {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.session != session);
        if self.subscriptions.len() != before {
            debug!(%session, "subscriptions dropped with session");
        }
    }

    /// Marks subscriptions watching a changed path.
    pub fn on_change(&mut self, path: ConcretePath) {
        for subscription in &mut self.subscriptions {
            if subscription.watches(&path) {
                subscription.dirty.insert(path);
            }
        }
    }

    /// Collects subscription reports that are due.
    pub fn poll(
        &mut self,
        node: &dyn NodeView,
        now: Timestamp,
        max_payload: usize,
    ) -> Vec<SubscriptionReport> {
        let mut reports = Vec::new();
        for subscription in &mut self.subscriptions {
            let Some(trigger) = subscription.due(now) else {
                continue;
            };
            let entries = match trigger {
                ReportTrigger::KeepAlive => Vec::new(),
                ReportTrigger::Changed => {
                    let subject = Subject {
                        fabric_index: subscription.fabric_index,
                        node_id: subscription.peer_node_id,
                        is_group: false,
                    };
                    let paths: Vec<AttributePath> = subscription
                        .dirty
                        .iter()
                        .map(ConcretePath::as_attribute_path)
                        .collect();
                    expand_read(
                        node,
                        &subject,
                        &paths,
                        &[],
                        subscription.fabric_filtered,
                    )
                }
            };
            let chunks = chunk_report(
                entries,
                Vec::new(),
                Some(subscription.id),
                matches!(trigger, ReportTrigger::KeepAlive),
                max_payload,
            );
            subscription.dirty.clear();
            subscription.last_report_at = now;
            reports.push(SubscriptionReport {
                session: subscription.session,
                subscription_id: subscription.id,
                trigger,
                chunks,
            });
        }
        reports
    }

    /// Registers the chunks of an in-flight subscription report so the
    /// continuation flow (StatusResponse between chunks) works on the
    /// report exchange too.
    pub fn begin_report_delivery(
        &mut self,
        key: ExchangeKey,
        mut chunks: Vec<Bytes>,
    ) -> ServerOutput {
        if chunks.is_empty() {
            return ServerOutput::default();
        }
        let first = chunks.remove(0);
        self.continuations.insert(
            key,
            Continuation {
                remaining: chunks
                    .into_iter()
                    .map(|c| (opcodes::REPORT_DATA, c))
                    .collect(),
                subscribe: None,
                acked_to_end: true,
            },
        );
        ServerOutput::single(opcodes::REPORT_DATA, first, false)
    }

    /// Earliest instant any subscription needs a report.
    pub fn next_wakeup(&self) -> Option<Timestamp> {
        self.subscriptions
            .iter()
            .map(ServerSubscription::next_deadline)
            .min()
    }

    // ========================================================================
    // Read
    // ========================================================================

    fn handle_read(
        &mut self,
        node: &mut dyn NodeView,
        key: ExchangeKey,
        payload: &Bytes,
        subject: &Subject,
        max_payload: usize,
    ) -> Result<ServerOutput, InteractionError> {
        let request = ReadRequest::decode(payload)?;
        trace!(paths = request.attribute_paths.len(), "read request");
        let entries = expand_read(
            node,
            subject,
            &request.attribute_paths,
            &request.data_version_filters,
            request.fabric_filtered,
        );
        let events = request
            .event_paths
            .iter()
            .flat_map(|path| node.read_events(path))
            .collect();
        let chunks = chunk_report(entries, events, None, false, max_payload);
        Ok(self.send_chunks(key, chunks, None))
    }

    // ========================================================================
    // Write
    // ========================================================================

    fn handle_write(
        &mut self,
        node: &mut dyn NodeView,
        payload: &Bytes,
        subject: &Subject,
        timed_deadline: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<ServerOutput, InteractionError> {
        let request = WriteRequest::decode(payload)?;

        if subject.is_group {
            if !request.suppress_response {
                return Err(InteractionError::InvalidGroupOperation {
                    reason: "group write must suppress the response",
                });
            }
            if request.timed_request {
                return Err(InteractionError::InvalidGroupOperation {
                    reason: "group write cannot be timed",
                });
            }
            if request.writes.iter().any(|w| w.path.endpoint.is_some()) {
                return Err(InteractionError::InvalidGroupOperation {
                    reason: "group write paths must not be endpoint-scoped",
                });
            }
        }
        if let Some(status) = check_timed(request.timed_request, timed_deadline, now) {
            return Ok(ServerOutput::status(status));
        }

        // Resolution: map each write to concrete locations or a status.
        enum Resolved {
            Apply(ConcretePath, TlvValue),
            Status(AttributePath, StatusCode),
        }
        let mut resolved = Vec::new();
        for write in &request.writes {
            let targets = expand_write_path(node, &write.path);
            if targets.is_empty() {
                resolved.push(Resolved::Status(write.path, unsupported_status(node, &write.path)));
                continue;
            }
            for target in targets {
                let allowed = required_write_privilege(node, &target)
                    .map(|privilege| {
                        node.check_access(subject, target.endpoint, target.cluster, privilege)
                    })
                    .unwrap_or(AccessDecision::Deny);
                if allowed == AccessDecision::Deny {
                    if !write.path.is_wildcard() {
                        resolved.push(Resolved::Status(
                            write.path,
                            StatusCode::UnsupportedAccess,
                        ));
                    }
                    continue;
                }
                if needs_timed_write(node, &target) && !request.timed_request {
                    resolved.push(Resolved::Status(
                        write.path,
                        StatusCode::NeedsTimedInteraction,
                    ));
                    continue;
                }
                resolved.push(Resolved::Apply(target, write.value.clone()));
            }
        }

        // Validation phase: if any value fails validation, nothing in the
        // whole request is applied.
        let mut validation_failures: HashMap<ConcretePath, StatusCode> = HashMap::new();
        for item in &resolved {
            if let Resolved::Apply(path, value) = item {
                let Some(ds) = node.datasource(path.endpoint, path.cluster) else {
                    continue;
                };
                if let Some(schema) = ds.scope().cluster().attribute(path.attribute) {
                    let normalized = ds.supervisor().normalized(schema, value.clone());
                    if let Err(e) = ds.supervisor().validate_attribute(schema, &normalized) {
                        validation_failures.insert(*path, validation_status(&e));
                    }
                }
            }
        }

        let aborted = !validation_failures.is_empty();
        let mut statuses: Vec<(AttributePath, StatusCode)> = Vec::new();
        if aborted {
            warn!(failures = validation_failures.len(), "write aborted by validation");
            for item in &resolved {
                match item {
                    Resolved::Apply(path, _) => {
                        let status = validation_failures
                            .get(path)
                            .copied()
                            .unwrap_or(StatusCode::Failure);
                        statuses.push((path.as_attribute_path(), status));
                    }
                    Resolved::Status(path, status) => statuses.push((*path, *status)),
                }
            }
        } else {
            // Apply phase, grouped per datasource so each cluster commits
            // once and bumps its version once.
            let mut by_cluster: Vec<((EndpointNumber, ClusterId), Vec<(AttributeId, TlvValue)>)> =
                Vec::new();
            for item in &resolved {
                match item {
                    Resolved::Apply(path, value) => {
                        let cluster_key = (path.endpoint, path.cluster);
                        match by_cluster.iter_mut().find(|(k, _)| *k == cluster_key) {
                            Some((_, writes)) => writes.push((path.attribute, value.clone())),
                            None => {
                                by_cluster.push((cluster_key, vec![(path.attribute, value.clone())]));
                            }
                        }
                        statuses.push((path.as_attribute_path(), StatusCode::Success));
                    }
                    Resolved::Status(path, status) => statuses.push((*path, *status)),
                }
            }
            for ((endpoint, cluster), writes) in by_cluster {
                let Some(ds) = node.datasource_mut(endpoint, cluster) else {
                    continue;
                };
                let mut tx = Transaction::read_write();
                let p = tx.join(ds);
                let mut ok = true;
                for (attribute, value) in writes {
                    if let Err(e) = tx.write(p, attribute, value) {
                        // Validated above; a failure here is a store-level
                        // fault, not peer input.
                        warn!(error = %e, "staged write failed at apply time");
                        ok = false;
                        break;
                    }
                }
                if ok {
                    tx.resolve();
                } else {
                    tx.reject();
                }
            }
        }

        if request.suppress_response {
            return Ok(ServerOutput {
                close: true,
                ..ServerOutput::default()
            });
        }
        Ok(ServerOutput::single(
            opcodes::WRITE_RESPONSE,
            WriteResponse { statuses }.encode(),
            true,
        ))
    }

    // ========================================================================
    // Invoke
    // ========================================================================

    fn handle_invoke(
        &mut self,
        node: &mut dyn NodeView,
        key: ExchangeKey,
        payload: &Bytes,
        subject: &Subject,
        timed_deadline: Option<Timestamp>,
        max_payload: usize,
        now: Timestamp,
    ) -> Result<ServerOutput, InteractionError> {
        let request = InvokeRequest::decode(payload)?;
        if subject.is_group && request.timed_request {
            return Err(InteractionError::InvalidGroupOperation {
                reason: "group invoke cannot be timed",
            });
        }
        if let Some(status) = check_timed(request.timed_request, timed_deadline, now) {
            return Ok(ServerOutput::status(status));
        }

        let mut responses = Vec::new();
        for invoke in &request.invokes {
            let endpoints: Vec<EndpointNumber> = match invoke.path.endpoint {
                Some(endpoint) => vec![endpoint],
                None => node.endpoints(),
            };
            for endpoint in endpoints {
                let path = crate::path::CommandPath::concrete(
                    endpoint,
                    invoke.path.cluster,
                    invoke.path.command,
                );
                let Some(ds) = node.datasource(endpoint, invoke.path.cluster) else {
                    if invoke.path.endpoint.is_some() {
                        responses.push(InvokeResponseEntry::Status {
                            path,
                            status: StatusCode::UnsupportedCluster,
                        });
                    }
                    continue;
                };
                if !ds.scope().has_command(invoke.path.command) {
                    if invoke.path.endpoint.is_some() {
                        responses.push(InvokeResponseEntry::Status {
                            path,
                            status: StatusCode::UnsupportedCommand,
                        });
                    }
                    continue;
                }
                let privilege = ds
                    .scope()
                    .cluster()
                    .command(invoke.path.command)
                    .and_then(|c| c.access.write)
                    .unwrap_or(Privilege::Operate);
                if node.check_access(subject, endpoint, invoke.path.cluster, privilege)
                    == AccessDecision::Deny
                {
                    responses.push(InvokeResponseEntry::Status {
                        path,
                        status: StatusCode::UnsupportedAccess,
                    });
                    continue;
                }
                match node.invoke(
                    subject,
                    endpoint,
                    invoke.path.cluster,
                    invoke.path.command,
                    invoke.fields.clone(),
                ) {
                    Ok(Some((response_command, fields))) => {
                        responses.push(InvokeResponseEntry::Command {
                            path: crate::path::CommandPath::concrete(
                                endpoint,
                                invoke.path.cluster,
                                response_command,
                            ),
                            fields,
                        });
                    }
                    Ok(None) => responses.push(InvokeResponseEntry::Status {
                        path,
                        status: StatusCode::Success,
                    }),
                    Err(status) => {
                        responses.push(InvokeResponseEntry::Status { path, status });
                    }
                }
            }
        }

        if request.suppress_response {
            return Ok(ServerOutput {
                close: true,
                ..ServerOutput::default()
            });
        }

        // Chunk when the full response exceeds the payload budget; each
        // entry stays whole.
        let whole = InvokeResponse {
            responses: responses.clone(),
            more_chunks: false,
        }
        .encode();
        if whole.len() <= max_payload || responses.len() <= 1 {
            return Ok(ServerOutput::single(opcodes::INVOKE_RESPONSE, whole, true));
        }

        let mut groups: Vec<Vec<InvokeResponseEntry>> = vec![Vec::new()];
        let mut used = CHUNK_OVERHEAD;
        for entry in responses {
            let len = InvokeResponse {
                responses: vec![entry.clone()],
                more_chunks: false,
            }
            .encode()
            .len();
            if used + len > max_payload && !groups.last().expect("non-empty").is_empty() {
                groups.push(Vec::new());
                used = CHUNK_OVERHEAD;
            }
            used += len;
            groups.last_mut().expect("non-empty").push(entry);
        }
        let total = groups.len();
        let mut chunks: Vec<(u8, Bytes)> = groups
            .into_iter()
            .enumerate()
            .map(|(i, responses)| {
                (
                    opcodes::INVOKE_RESPONSE,
                    InvokeResponse {
                        responses,
                        more_chunks: i + 1 < total,
                    }
                    .encode(),
                )
            })
            .collect();
        let (opcode, first) = chunks.remove(0);
        self.continuations.insert(
            key,
            Continuation {
                remaining: chunks,
                subscribe: None,
                acked_to_end: false,
            },
        );
        Ok(ServerOutput::single(opcode, first, false))
    }

    // ========================================================================
    // Subscribe
    // ========================================================================

    fn handle_subscribe(
        &mut self,
        node: &mut dyn NodeView,
        key: ExchangeKey,
        payload: &Bytes,
        subject: &Subject,
        peer_node_id: NodeId,
        max_payload: usize,
        now: Timestamp,
    ) -> Result<ServerOutput, InteractionError> {
        let request = SubscribeRequest::decode(payload)?;
        if request.min_interval_floor_s > request.max_interval_ceiling_s {
            return Ok(ServerOutput::status(StatusCode::InvalidAction));
        }

        if !request.keep_subscriptions {
            self.subscriptions
                .retain(|s| s.session != key.session);
        }

        let id = SubscriptionId::new(self.next_subscription_id);
        self.next_subscription_id = self.next_subscription_id.wrapping_add(1).max(1);

        let subscription = ServerSubscription {
            id,
            session: key.session,
            peer_node_id,
            fabric_index: subject.fabric_index,
            attribute_paths: request.attribute_paths.clone(),
            event_paths: request.event_paths.clone(),
            fabric_filtered: request.fabric_filtered,
            min_floor: Duration::from_secs(u64::from(request.min_interval_floor_s)),
            max_interval: Duration::from_secs(u64::from(request.max_interval_ceiling_s)),
            last_report_at: now,
            dirty: BTreeSet::new(),
        };
        debug!(subscription = %id, session = %key.session, "subscription priming");

        // Priming report: everything the subscription covers, as a read.
        let entries = expand_read(
            node,
            subject,
            &request.attribute_paths,
            &[],
            request.fabric_filtered,
        );
        let events = request
            .event_paths
            .iter()
            .flat_map(|path| node.read_events(path))
            .collect();
        let chunks = chunk_report(entries, events, Some(id), false, max_payload);
        Ok(self.send_chunks(key, chunks, Some(PendingSubscription { subscription })))
    }

    // ========================================================================
    // Continuations
    // ========================================================================

    fn handle_status_response(
        &mut self,
        key: ExchangeKey,
        payload: &Bytes,
        now: Timestamp,
    ) -> Result<ServerOutput, InteractionError> {
        let response = StatusResponse::decode(payload)?;
        if !response.status.is_success() {
            self.continuations.remove(&key);
            return Err(InteractionError::Status(response.status));
        }

        let Some(mut continuation) = self.continuations.remove(&key) else {
            // Final ack of a single-chunk response; just close.
            return Ok(ServerOutput {
                close: true,
                ..ServerOutput::default()
            });
        };

        if continuation.remaining.is_empty() {
            // Chunks done; a pending subscription completes with
            // SubscribeResponse.
            if let Some(pending) = continuation.subscribe {
                let mut subscription = pending.subscription;
                subscription.last_report_at = now;
                let response = SubscribeResponse {
                    subscription_id: subscription.id,
                    max_interval_s: subscription.max_interval.as_secs() as u16,
                };
                let id = subscription.id;
                debug!(subscription = %id, "subscription established");
                self.subscriptions.push(subscription);
                let mut output =
                    ServerOutput::single(opcodes::SUBSCRIBE_RESPONSE, response.encode(), true);
                output.subscription_established = Some(id);
                return Ok(output);
            }
            return Ok(ServerOutput {
                close: true,
                ..ServerOutput::default()
            });
        }

        let (opcode, next) = continuation.remaining.remove(0);
        let last = continuation.remaining.is_empty();
        if last && !continuation.acked_to_end && continuation.subscribe.is_none() {
            // The client does not acknowledge this final chunk.
            return Ok(ServerOutput::single(opcode, next, true));
        }
        self.continuations.insert(key, continuation);
        Ok(ServerOutput::single(opcode, next, false))
    }

    /// Sends the first report chunk; the rest wait for StatusResponses.
    fn send_chunks(
        &mut self,
        key: ExchangeKey,
        mut chunks: Vec<Bytes>,
        subscribe: Option<PendingSubscription>,
    ) -> ServerOutput {
        let first = if chunks.is_empty() {
            ReportData::default().encode()
        } else {
            chunks.remove(0)
        };
        self.continuations.insert(
            key,
            Continuation {
                remaining: chunks
                    .into_iter()
                    .map(|c| (opcodes::REPORT_DATA, c))
                    .collect(),
                subscribe,
                acked_to_end: true,
            },
        );
        ServerOutput::single(opcodes::REPORT_DATA, first, false)
    }
}

// ============================================================================
// Expansion and chunking
// ============================================================================

/// Expands read paths into report entries.
///
/// Wildcards visit only what exists and is readable under the subject's
/// ACL; concrete paths that fail produce status entries instead.
pub(crate) fn expand_read(
    node: &dyn NodeView,
    subject: &Subject,
    paths: &[AttributePath],
    filters: &[DataVersionFilter],
    fabric_filtered: bool,
) -> Vec<AttributeReport> {
    let mut entries = Vec::new();
    let mut seen: BTreeSet<ConcretePath> = BTreeSet::new();

    for path in paths {
        let endpoints: Vec<EndpointNumber> = match path.endpoint {
            Some(endpoint) => vec![endpoint],
            None => node.endpoints(),
        };
        if path.endpoint.is_some() && !node.endpoints().contains(&endpoints[0]) {
            entries.push(AttributeReport::Status {
                path: *path,
                status: StatusCode::UnsupportedEndpoint,
            });
            continue;
        }

        for endpoint in endpoints {
            let clusters: Vec<ClusterId> = match path.cluster {
                Some(cluster) => vec![cluster],
                None => node.clusters_of(endpoint),
            };
            for cluster in clusters {
                let Some(ds) = node.datasource(endpoint, cluster) else {
                    if path.cluster.is_some() && path.endpoint.is_some() {
                        entries.push(AttributeReport::Status {
                            path: *path,
                            status: StatusCode::UnsupportedCluster,
                        });
                    }
                    continue;
                };

                // Data-version cache: unchanged clusters are omitted.
                let version = ds.data_version();
                if filters
                    .iter()
                    .any(|f| f.endpoint == endpoint && f.cluster == cluster && f.version == version)
                {
                    continue;
                }

                if node.check_access(subject, endpoint, cluster, Privilege::View)
                    == AccessDecision::Deny
                {
                    if !path.is_wildcard() {
                        entries.push(AttributeReport::Status {
                            path: *path,
                            status: StatusCode::UnsupportedAccess,
                        });
                    }
                    continue;
                }

                let attributes: Vec<AttributeId> = match path.attribute {
                    Some(attribute) => vec![attribute],
                    None => ds
                        .scope()
                        .conformant_attributes()
                        .map(|a| a.id)
                        .collect(),
                };
                for attribute in attributes {
                    let concrete = ConcretePath::new(endpoint, cluster, attribute);
                    if !seen.insert(concrete) {
                        continue;
                    }
                    let value = if fabric_filtered {
                        ds.read_scoped(attribute, subject.fabric_index)
                    } else {
                        ds.get(attribute).cloned()
                    };
                    match value {
                        Some(value) => entries.push(AttributeReport::Data {
                            path: concrete,
                            version,
                            value,
                        }),
                        None => {
                            if path.attribute.is_some() {
                                entries.push(AttributeReport::Status {
                                    path: *path,
                                    status: StatusCode::UnsupportedAttribute,
                                });
                            }
                        }
                    }
                }
            }
        }
    }
    entries
}

/// Packs report entries into payload-bounded ReportData chunks.
///
/// Entries are atomic: a chunk boundary never falls inside a struct.
/// Event reports ride the first chunk.
pub(crate) fn chunk_report(
    entries: Vec<AttributeReport>,
    events: Vec<EventReport>,
    subscription_id: Option<SubscriptionId>,
    suppress_response: bool,
    max_payload: usize,
) -> Vec<Bytes> {
    let mut chunks: Vec<Vec<AttributeReport>> = vec![Vec::new()];
    let mut used = CHUNK_OVERHEAD;
    for entry in entries {
        let len = entry.encoded_len();
        if used + len > max_payload && !chunks.last().expect("non-empty").is_empty() {
            chunks.push(Vec::new());
            used = CHUNK_OVERHEAD;
        }
        used += len;
        chunks.last_mut().expect("non-empty").push(entry);
    }

    let total = chunks.len();
    let mut events = Some(events);
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, attribute_reports)| {
            ReportData {
                subscription_id,
                attribute_reports,
                event_reports: events.take().unwrap_or_default(),
                more_chunks: i + 1 < total,
                suppress_response: suppress_response && total == 1,
            }
            .encode()
        })
        .collect()
}

fn expand_write_path(node: &dyn NodeView, path: &AttributePath) -> Vec<ConcretePath> {
    let Some(attribute) = path.attribute else {
        return Vec::new();
    };
    let Some(cluster) = path.cluster else {
        return Vec::new();
    };
    let endpoints: Vec<EndpointNumber> = match path.endpoint {
        Some(endpoint) => vec![endpoint],
        None => node.endpoints(),
    };
    endpoints
        .into_iter()
        .filter(|endpoint| {
            node.datasource(*endpoint, cluster)
                .is_some_and(|ds| ds.scope().has_attribute(attribute))
        })
        .map(|endpoint| ConcretePath::new(endpoint, cluster, attribute))
        .collect()
}

fn required_write_privilege(node: &dyn NodeView, path: &ConcretePath) -> Option<Privilege> {
    node.datasource(path.endpoint, path.cluster)?
        .scope()
        .cluster()
        .attribute(path.attribute)?
        .access
        .write
}

fn needs_timed_write(node: &dyn NodeView, path: &ConcretePath) -> bool {
    node.datasource(path.endpoint, path.cluster)
        .and_then(|ds| ds.scope().cluster().attribute(path.attribute))
        .is_some_and(|a| a.access.timed)
}

fn unsupported_status(node: &dyn NodeView, path: &AttributePath) -> StatusCode {
    match (path.endpoint, path.cluster) {
        (Some(endpoint), _) if !node.endpoints().contains(&endpoint) => {
            StatusCode::UnsupportedEndpoint
        }
        (Some(endpoint), Some(cluster)) if node.datasource(endpoint, cluster).is_none() => {
            StatusCode::UnsupportedCluster
        }
        _ => StatusCode::UnsupportedAttribute,
    }
}

/// Timed-interaction gate for writes and invokes.
fn check_timed(
    timed_request: bool,
    timed_deadline: Option<Timestamp>,
    now: Timestamp,
) -> Option<StatusCode> {
    match (timed_request, timed_deadline) {
        // Request claims a timed window that was never armed.
        (true, None) => Some(StatusCode::TimedRequestMismatch),
        // Armed but expired.
        (true, Some(deadline)) if now > deadline => Some(StatusCode::Timeout),
        // Armed window but the request does not claim it.
        (false, Some(_)) => Some(StatusCode::TimedRequestMismatch),
        _ => None,
    }
}
