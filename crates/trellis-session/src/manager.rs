//! The session registry.
//!
//! Owns every live secure session plus the unsecured session used for
//! establishment, allocates local session ids, seals and opens wire
//! frames, and evicts under capacity pressure. Destruction reasons are
//! published on an event bus so exchanges and subscriptions can fail
//! fast.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};
use trellis_crypto::CryptoProvider;
use trellis_exchange::{Message, MessageHeader, OutboundFrame, SessionHandle};
use trellis_types::{EventBus, EventHandle, FabricIndex, NodeId, SessionId, Timestamp};

use crate::counters::{CounterVerdict, MessageCounter, ReplayWindow};
use crate::session::{EstablishedSession, SecureSession};
use crate::SessionError;

/// Why a session went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCloseReason {
    /// The peer sent StatusReport(CloseSession).
    PeerClosed,
    /// The outbound counter space ran out.
    CounterExhausted,
    /// Evicted under capacity pressure.
    Evicted,
    /// The owning fabric was removed.
    FabricRemoved,
    /// A commissioning PASE session replaced by the operational CASE
    /// session that followed it.
    SupersededByCase,
    /// Local teardown (shutdown, commissioning hand-off).
    LocalClosed,
}

/// A session close notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClosed {
    pub handle: SessionHandle,
    pub reason: SessionCloseReason,
}

/// Result of opening one inbound wire frame.
#[derive(Debug)]
pub struct InboundVerdict {
    pub session: SessionHandle,
    pub message: Message,
    /// Duplicate frames are acked but never delivered.
    pub verdict: CounterVerdict,
}

/// The handle naming the unsecured session.
pub const UNSECURED_HANDLE: SessionHandle = SessionHandle(0);

/// Registry of the node's sessions.
pub struct SessionManager {
    sessions: HashMap<SessionHandle, SecureSession>,
    by_local_id: HashMap<SessionId, SessionHandle>,
    next_handle: u32,
    next_session_id: u16,
    capacity: usize,
    closed: EventBus<SessionClosed>,
    /// Node id stamped on unsecured frames we send.
    ephemeral_node_id: NodeId,
    unsecured_counter: MessageCounter,
    unsecured_replay: HashMap<NodeId, ReplayWindow>,
}

impl SessionManager {
    pub fn new(capacity: usize, ephemeral_node_id: NodeId) -> Self {
        Self {
            sessions: HashMap::new(),
            by_local_id: HashMap::new(),
            next_handle: 1,
            next_session_id: 1,
            capacity,
            closed: EventBus::new(),
            ephemeral_node_id,
            unsecured_counter: MessageCounter::new(1),
            unsecured_replay: HashMap::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn get(&self, handle: SessionHandle) -> Option<&SecureSession> {
        self.sessions.get(&handle)
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut SecureSession> {
        self.sessions.get_mut(&handle)
    }

    /// Sessions bound to a fabric.
    pub fn handles_for_fabric(&self, fabric: FabricIndex) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.fabric_index == Some(fabric))
            .map(|(h, _)| *h)
            .collect()
    }

    /// Registers a close handler.
    pub fn on_closed(&self, handler: impl Fn(&SessionClosed) + 'static) -> EventHandle {
        self.closed.register(handler)
    }

    pub fn detach(&self, handle: EventHandle) {
        self.closed.detach(handle);
    }

    /// Allocates a local session id no live session uses.
    pub fn allocate_session_id(&mut self) -> SessionId {
        loop {
            let id = SessionId::new(self.next_session_id);
            self.next_session_id = self.next_session_id.wrapping_add(1).max(1);
            if !self.by_local_id.contains_key(&id) {
                return id;
            }
        }
    }

    /// Installs an established session, evicting if at capacity.
    pub fn install(&mut self, established: EstablishedSession, now: Timestamp) -> SessionHandle {
        if self.sessions.len() >= self.capacity {
            if let Some(victim) = self
                .sessions
                .iter()
                .min_by_key(|(_, s)| s.last_activity)
                .map(|(h, _)| *h)
            {
                warn!(session = %victim, "evicting least-recent session");
                self.close(victim, SessionCloseReason::Evicted);
            }
        }

        let handle = SessionHandle(self.next_handle);
        self.next_handle += 1;
        let session = SecureSession::new(established, now);
        debug!(
            session = %handle,
            local_id = %session.local_id,
            peer = %session.peer_node_id,
            kind = ?session.kind,
            "session installed"
        );
        self.by_local_id.insert(session.local_id, handle);
        self.sessions.insert(handle, session);
        handle
    }

    /// Destroys a session and announces the reason.
    pub fn close(&mut self, handle: SessionHandle, reason: SessionCloseReason) {
        if let Some(session) = self.sessions.remove(&handle) {
            self.by_local_id.remove(&session.local_id);
            debug!(session = %handle, ?reason, "session closed");
            self.closed.emit(&SessionClosed { handle, reason });
        }
    }

    /// Destroys every session bound to a fabric.
    pub fn close_for_fabric(&mut self, fabric: FabricIndex) {
        for handle in self.handles_for_fabric(fabric) {
            self.close(handle, SessionCloseReason::FabricRemoved);
        }
    }

    /// Allocates the next outbound counter for a session.
    ///
    /// Counter exhaustion destroys the session; callers see the error
    /// and the close event both.
    pub fn allocate_counter(&mut self, handle: SessionHandle) -> Result<u32, SessionError> {
        if handle == UNSECURED_HANDLE {
            return self.unsecured_counter.allocate();
        }
        let session = self
            .sessions
            .get_mut(&handle)
            .ok_or(SessionError::SessionClosed { reason: "destroyed" })?;
        match session.allocate_counter() {
            Ok(counter) => Ok(counter),
            Err(e) => {
                self.close(handle, SessionCloseReason::CounterExhausted);
                Err(e)
            }
        }
    }

    /// Seals an outbound exchange frame into a wire datagram.
    pub fn seal_frame(
        &mut self,
        crypto: &dyn CryptoProvider,
        frame: &OutboundFrame,
        now: Timestamp,
    ) -> Result<Bytes, SessionError> {
        let protected = {
            let mut buf = BytesMut::new();
            frame.payload_header.encode_into(&mut buf);
            buf.extend_from_slice(&frame.payload);
            buf.freeze()
        };

        if frame.session == UNSECURED_HANDLE {
            let header = MessageHeader::unicast(SessionId::UNSECURED, frame.counter)
                .with_source(self.ephemeral_node_id);
            let mut wire = BytesMut::new();
            header.encode_into(&mut wire);
            wire.extend_from_slice(&protected);
            return Ok(wire.freeze());
        }

        let session = self
            .sessions
            .get_mut(&frame.session)
            .ok_or(SessionError::SessionClosed { reason: "destroyed" })?;
        session.touch(now);
        Ok(session.seal(crypto, frame.counter, &protected))
    }

    /// Opens an inbound wire datagram.
    ///
    /// Parses the header, routes to the addressed session, decrypts and
    /// replay-checks. Duplicates come back with
    /// [`CounterVerdict::Duplicate`] so the exchange layer can re-ack
    /// without delivering.
    pub fn open_frame(
        &mut self,
        crypto: &dyn CryptoProvider,
        wire: Bytes,
        now: Timestamp,
    ) -> Result<InboundVerdict, SessionError> {
        let mut rest = wire.clone();
        let header = MessageHeader::decode(&mut rest).map_err(|_| SessionError::FrameRejected {
            reason: "message header malformed",
        })?;
        let header_len = wire.len() - rest.len();

        if header.session_id.is_unsecured() {
            let source = header.source.unwrap_or(NodeId::new(0));
            let verdict = self
                .unsecured_replay
                .entry(source)
                .or_default()
                .check(header.counter);
            let message = Message::from_protected(header, rest).map_err(|_| {
                SessionError::FrameRejected {
                    reason: "unsecured payload malformed",
                }
            })?;
            return Ok(InboundVerdict {
                session: UNSECURED_HANDLE,
                message,
                verdict,
            });
        }

        let handle = *self
            .by_local_id
            .get(&header.session_id)
            .ok_or(SessionError::UnknownSession(header.session_id.as_u16()))?;
        let session = self.sessions.get_mut(&handle).expect("index consistent");

        let message = session.open(crypto, &header, header_len, &wire)?;
        let verdict = session.check_counter(header.counter);
        session.touch(now);
        Ok(InboundVerdict {
            session: handle,
            message,
            verdict,
        })
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
