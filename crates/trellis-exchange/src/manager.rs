//! Exchange demultiplexing and lifecycle.
//!
//! [`ExchangeManager`] is a deterministic state machine. Decrypted
//! inbound messages and the current time go in; [`ExchangeOutput`] comes
//! out with frames to transmit, payloads to deliver to protocol handlers
//! and exchanges that closed. Message counters are allocated by the
//! session layer, so every entry point either takes a counter or a
//! counter allocator.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};
use trellis_types::{ExchangeId, Timestamp};

use crate::message::{ExchangeFlags, Message, PayloadHeader, ProtocolId};
use crate::mrp::{MrpConfig, ReliableContext, RetransmitPoll};
use crate::{OPCODE_STANDALONE_ACK, PROTOCOL_SECURE_CHANNEL};

/// Opaque handle the session layer uses to name a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub u32);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sh#{}", self.0)
    }
}

/// Which side of the exchange this node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeRole {
    Initiator,
    Responder,
}

/// Unique key of an exchange: session, id and our role.
///
/// The same id may exist twice on one session when both peers initiated
/// with it; the role disambiguates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeKey {
    pub session: SessionHandle,
    pub id: ExchangeId,
    pub role: ExchangeRole,
}

impl std::fmt::Display for ExchangeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{:?}", self.session, self.id, self.role)
    }
}

/// Exchange lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Created, no reliable message in flight.
    Active,
    /// A reliable outbound message awaits its ack.
    AwaitingAck,
    /// Closed; kept only until the final ack settles.
    Completed,
}

/// Errors surfaced by exchange operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("exchange {0} does not exist")]
    NoSuchExchange(ExchangeKey),

    #[error("exchange {0} already has an unacknowledged message in flight")]
    AckPending(ExchangeKey),

    #[error("exchange {0} is completed")]
    Closed(ExchangeKey),

    #[error("retry budget exhausted for counter {counter} on {key}")]
    RetryExhausted { key: ExchangeKey, counter: u32 },

    #[error("exchange {0} timed out")]
    Timeout(ExchangeKey),
}

/// Send options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendFlags {
    /// Request MRP reliability (retransmit until acked).
    pub reliable: bool,
    /// Close the exchange once this message settles.
    pub final_message: bool,
}

/// A frame ready for encryption and transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    pub session: SessionHandle,
    pub counter: u32,
    pub payload_header: PayloadHeader,
    pub payload: Bytes,
}

/// An inbound payload delivered to its protocol handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub key: ExchangeKey,
    pub protocol: ProtocolId,
    pub opcode: u8,
    pub payload: Bytes,
    /// True when this message opened the exchange.
    pub unsolicited: bool,
}

/// Everything a processing step produced.
#[derive(Debug, Default)]
pub struct ExchangeOutput {
    pub frames: Vec<OutboundFrame>,
    pub deliveries: Vec<Delivery>,
    /// Exchanges that closed, with the error when not a clean close.
    pub closed: Vec<(ExchangeKey, Option<ExchangeError>)>,
}

impl ExchangeOutput {
    pub fn merge(&mut self, other: ExchangeOutput) {
        self.frames.extend(other.frames);
        self.deliveries.extend(other.deliveries);
        self.closed.extend(other.closed);
    }
}

struct Exchange {
    key: ExchangeKey,
    protocol: ProtocolId,
    state: ExchangeState,
    mrp: ReliableContext,
    /// Unacked outbound frame, kept verbatim for retransmission.
    unacked: Option<OutboundFrame>,
    last_activity: Timestamp,
    timed_deadline: Option<Timestamp>,
}

/// The exchange table of one node.
pub struct ExchangeManager {
    config: MrpConfig,
    idle_timeout: Duration,
    exchanges: HashMap<ExchangeKey, Exchange>,
    next_exchange_id: u16,
    jitter_state: u32,
}

impl ExchangeManager {
    pub fn new(config: MrpConfig) -> Self {
        Self {
            config,
            idle_timeout: Duration::from_secs(90),
            exchanges: HashMap::new(),
            next_exchange_id: 1,
            jitter_state: 0x6D2B_79F5,
        }
    }

    pub fn config(&self) -> &MrpConfig {
        &self.config
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.len()
    }

    pub fn state(&self, key: ExchangeKey) -> Option<ExchangeState> {
        self.exchanges.get(&key).map(|e| e.state)
    }

    /// Opens an initiator exchange on a session.
    pub fn create(
        &mut self,
        session: SessionHandle,
        protocol: ProtocolId,
        now: Timestamp,
    ) -> ExchangeKey {
        let id = ExchangeId::new(self.next_exchange_id);
        self.next_exchange_id = self.next_exchange_id.wrapping_add(1).max(1);
        let key = ExchangeKey {
            session,
            id,
            role: ExchangeRole::Initiator,
        };
        debug!(exchange = %key, %protocol, "exchange opened");
        self.exchanges.insert(
            key,
            Exchange {
                key,
                protocol,
                state: ExchangeState::Active,
                mrp: ReliableContext::new(),
                unacked: None,
                last_activity: now,
                timed_deadline: None,
            },
        );
        key
    }

    /// Sends a message on an exchange.
    ///
    /// `counter` must be freshly allocated from the session's outbound
    /// counter. Any owed acknowledgement piggybacks automatically.
    pub fn send(
        &mut self,
        key: ExchangeKey,
        opcode: u8,
        payload: Bytes,
        flags: SendFlags,
        counter: u32,
        now: Timestamp,
    ) -> Result<OutboundFrame, ExchangeError> {
        let jitter = self.next_jitter();
        let config = self.config;
        let exchange = self
            .exchanges
            .get_mut(&key)
            .ok_or(ExchangeError::NoSuchExchange(key))?;
        if exchange.state == ExchangeState::Completed {
            return Err(ExchangeError::Closed(key));
        }
        if flags.reliable && exchange.mrp.awaiting_ack() {
            return Err(ExchangeError::AckPending(key));
        }

        let mut payload_header = PayloadHeader::new(
            exchange.protocol,
            opcode,
            key.id,
            key.role == ExchangeRole::Initiator,
        );
        if let Some(ack) = exchange.mrp.take_owed_ack() {
            payload_header = payload_header.acking(ack);
        }
        if flags.reliable {
            payload_header.flags.set(ExchangeFlags::RELIABILITY, true);
            exchange.mrp.track(counter, now, &config, jitter);
            exchange.state = ExchangeState::AwaitingAck;
        }
        if flags.final_message {
            exchange.state = ExchangeState::Completed;
        }

        let frame = OutboundFrame {
            session: key.session,
            counter,
            payload_header,
            payload,
        };
        if flags.reliable {
            exchange.unacked = Some(frame.clone());
        }
        exchange.last_activity = now;
        trace!(exchange = %key, opcode, counter, "frame queued");
        Ok(frame)
    }

    /// Processes a decrypted, replay-checked inbound message.
    pub fn on_message(
        &mut self,
        session: SessionHandle,
        message: &Message,
        now: Timestamp,
    ) -> ExchangeOutput {
        let mut output = ExchangeOutput::default();
        let header = &message.payload_header;
        let role = if header.flags.is_initiator() {
            ExchangeRole::Responder
        } else {
            ExchangeRole::Initiator
        };
        let key = ExchangeKey {
            session,
            id: header.exchange_id,
            role,
        };

        let is_standalone_ack =
            header.protocol == PROTOCOL_SECURE_CHANNEL && header.opcode == OPCODE_STANDALONE_ACK;

        let mut unsolicited = false;
        if !self.exchanges.contains_key(&key) {
            // Only a peer-initiated, non-ack message may open an exchange.
            if role != ExchangeRole::Responder || is_standalone_ack {
                trace!(exchange = %key, "message for unknown exchange dropped");
                return output;
            }
            unsolicited = true;
            self.exchanges.insert(
                key,
                Exchange {
                    key,
                    protocol: header.protocol,
                    state: ExchangeState::Active,
                    mrp: ReliableContext::new(),
                    unacked: None,
                    last_activity: now,
                    timed_deadline: None,
                },
            );
            debug!(exchange = %key, protocol = %header.protocol, "exchange accepted");
        }

        let exchange = self.exchanges.get_mut(&key).expect("inserted above");
        exchange.last_activity = now;

        if let Some(ack) = header.ack_counter {
            if exchange.mrp.on_ack(ack) {
                exchange.unacked = None;
                if exchange.state == ExchangeState::AwaitingAck {
                    exchange.state = ExchangeState::Active;
                }
            }
        }

        if header.flags.needs_ack() {
            exchange.mrp.owe_ack(message.header.counter, now, &self.config);
        }

        let completed = exchange.state == ExchangeState::Completed;
        if !is_standalone_ack && !completed {
            output.deliveries.push(Delivery {
                key,
                protocol: header.protocol,
                opcode: header.opcode,
                payload: message.payload.clone(),
                unsolicited,
            });
        }

        // A completed exchange lingers only for ack settlement.
        if completed && !exchange.mrp.awaiting_ack() && exchange.mrp.next_deadline().is_none() {
            self.exchanges.remove(&key);
            output.closed.push((key, None));
        }
        output
    }

    /// Acknowledges a duplicate message without delivering it.
    ///
    /// The session layer calls this when its replay window flags an
    /// already-seen counter that still carried the reliability flag.
    pub fn acknowledge_duplicate(
        &mut self,
        session: SessionHandle,
        message: &Message,
        counter_alloc: &mut dyn FnMut(SessionHandle) -> u32,
    ) -> ExchangeOutput {
        let mut output = ExchangeOutput::default();
        if !message.payload_header.flags.needs_ack() {
            return output;
        }
        let role = if message.payload_header.flags.is_initiator() {
            ExchangeRole::Responder
        } else {
            ExchangeRole::Initiator
        };
        let key = ExchangeKey {
            session,
            id: message.payload_header.exchange_id,
            role,
        };
        trace!(exchange = %key, counter = message.header.counter, "duplicate re-acked");
        output.frames.push(standalone_ack(
            key,
            message.header.counter,
            counter_alloc(session),
        ));
        output
    }

    /// Closes an exchange.
    ///
    /// An owed ack is flushed as a standalone ack; an unacked outbound
    /// message keeps the exchange lingering until it settles.
    pub fn close(
        &mut self,
        key: ExchangeKey,
        counter_alloc: &mut dyn FnMut(SessionHandle) -> u32,
    ) -> ExchangeOutput {
        let mut output = ExchangeOutput::default();
        let Some(exchange) = self.exchanges.get_mut(&key) else {
            return output;
        };
        if let Some(owed) = exchange.mrp.take_owed_ack() {
            output
                .frames
                .push(standalone_ack(key, owed, counter_alloc(key.session)));
        }
        exchange.state = ExchangeState::Completed;
        if !exchange.mrp.awaiting_ack() {
            self.exchanges.remove(&key);
            output.closed.push((key, None));
        }
        output
    }

    /// Drops every exchange on a session (session destroyed).
    pub fn close_session(&mut self, session: SessionHandle) -> ExchangeOutput {
        let mut output = ExchangeOutput::default();
        let keys: Vec<_> = self
            .exchanges
            .keys()
            .filter(|k| k.session == session)
            .copied()
            .collect();
        for key in keys {
            self.exchanges.remove(&key);
            output.closed.push((key, Some(ExchangeError::Closed(key))));
        }
        output
    }

    /// Arms the timed-interaction deadline on an exchange.
    pub fn set_timed_deadline(&mut self, key: ExchangeKey, deadline: Timestamp) {
        if let Some(exchange) = self.exchanges.get_mut(&key) {
            exchange.timed_deadline = Some(deadline);
        }
    }

    /// The live timed-interaction deadline, if armed and not elapsed.
    pub fn timed_deadline(&self, key: ExchangeKey) -> Option<Timestamp> {
        self.exchanges.get(&key).and_then(|e| e.timed_deadline)
    }

    /// Advances time: retransmissions, standalone acks, idle reaping.
    pub fn poll(
        &mut self,
        now: Timestamp,
        counter_alloc: &mut dyn FnMut(SessionHandle) -> u32,
    ) -> ExchangeOutput {
        let mut output = ExchangeOutput::default();
        let config = self.config;
        let mut to_remove = Vec::new();

        for (key, exchange) in &mut self.exchanges {
            if let Some(owed) = exchange.mrp.standalone_ack_due(now) {
                exchange.mrp.take_owed_ack();
                output
                    .frames
                    .push(standalone_ack(*key, owed, counter_alloc(key.session)));
            }

            match exchange.mrp.poll_retransmit(now, &config) {
                RetransmitPoll::Retransmit(counter) => {
                    if let Some(frame) = &exchange.unacked {
                        debug!(exchange = %key, counter, "retransmitting");
                        output.frames.push(frame.clone());
                    }
                }
                RetransmitPoll::Exhausted(counter) => {
                    warn!(exchange = %key, counter, "retry budget exhausted");
                    to_remove.push((
                        *key,
                        Some(ExchangeError::RetryExhausted { key: *key, counter }),
                    ));
                }
                RetransmitPoll::Idle | RetransmitPoll::Waiting(_) => {}
            }

            let idle_for = now.since(exchange.last_activity);
            if idle_for >= self.idle_timeout && !to_remove.iter().any(|(k, _)| k == key) {
                to_remove.push((*key, Some(ExchangeError::Timeout(*key))));
            } else if exchange.state == ExchangeState::Completed
                && !exchange.mrp.awaiting_ack()
                && exchange.mrp.next_deadline().is_none()
                && !to_remove.iter().any(|(k, _)| k == key)
            {
                to_remove.push((*key, None));
            }
        }

        for (key, error) in to_remove {
            self.exchanges.remove(&key);
            output.closed.push((key, error));
        }
        output
    }

    /// Earliest instant [`ExchangeManager::poll`] has work to do.
    pub fn next_wakeup(&self) -> Option<Timestamp> {
        self.exchanges
            .values()
            .filter_map(|e| e.mrp.next_deadline())
            .min()
    }

    /// Bounded jitter for the first retransmit interval.
    fn next_jitter(&mut self) -> Duration {
        // xorshift32; the driver's determinism matters more than the
        // distribution here.
        let mut x = self.jitter_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.jitter_state = x;
        let jitter_ms = self.config.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(u64::from(x) % jitter_ms)
        }
    }
}

impl std::fmt::Debug for ExchangeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeManager")
            .field("exchanges", &self.exchanges.len())
            .finish()
    }
}

fn standalone_ack(key: ExchangeKey, acked_counter: u32, counter: u32) -> OutboundFrame {
    let payload_header = PayloadHeader::new(
        PROTOCOL_SECURE_CHANNEL,
        OPCODE_STANDALONE_ACK,
        key.id,
        key.role == ExchangeRole::Initiator,
    )
    .acking(acked_counter);
    OutboundFrame {
        session: key.session,
        counter,
        payload_header,
        payload: Bytes::new(),
    }
}
