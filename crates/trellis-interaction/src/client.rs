//! The client-side interaction engine.
//!
//! Assembles chunked responses, answers continuation StatusResponses,
//! and tracks subscription liveness. The runtime owns exchanges; the
//! engine is keyed by [`ExchangeKey`].

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use trellis_exchange::ExchangeKey;
use trellis_types::{PeerAddress, StatusCode, SubscriptionId, Timestamp};

use crate::messages::{
    AttributeReport, EventReport, InvokeResponse, ReportData, StatusResponse, SubscribeRequest,
    SubscribeResponse, WriteResponse, opcodes,
};
use crate::InteractionError;

/// A fully assembled read (or priming) result.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub attributes: Vec<AttributeReport>,
    pub events: Vec<EventReport>,
}

/// One standing subscription this node consumes.
#[derive(Debug, Clone)]
pub struct ClientSubscription {
    pub id: SubscriptionId,
    pub peer: PeerAddress,
    pub request: SubscribeRequest,
    pub max_interval: Duration,
    pub max_peer_response_time: Duration,
    pub last_report_at: Timestamp,
    /// Re-establish over a fresh session when the channel dies.
    pub sustained: bool,
}

impl ClientSubscription {
    /// The instant after which the publisher is presumed dead.
    pub fn liveness_deadline(&self) -> Timestamp {
        self.last_report_at + self.max_interval + self.max_peer_response_time
    }
}

/// What one inbound message amounted to.
#[derive(Debug)]
pub enum ClientEvent {
    /// Send this continuation message and keep waiting.
    Continue { opcode: u8, payload: Bytes },
    /// A read finished; the final StatusResponse (if any) is included.
    ReadComplete {
        outcome: ReadOutcome,
        response: Option<(u8, Bytes)>,
    },
    /// A write round trip finished.
    WriteComplete(WriteResponse),
    /// An invoke round trip finished.
    InvokeComplete(InvokeResponse),
    /// A subscription finished establishing, with its priming data.
    SubscribeEstablished {
        id: SubscriptionId,
        max_interval: Duration,
        priming: ReadOutcome,
    },
    /// A standing subscription delivered a report.
    SubscriptionReport {
        id: SubscriptionId,
        outcome: ReadOutcome,
        response: Option<(u8, Bytes)>,
    },
    /// The peer answered with a bare status.
    Status(StatusCode),
}

enum Pending {
    Read {
        assembly: ReadOutcome,
    },
    Subscribe {
        assembly: ReadOutcome,
        peer: PeerAddress,
        request: SubscribeRequest,
        max_peer_response_time: Duration,
        sustained: bool,
    },
    Write,
    Invoke {
        assembled: Vec<crate::messages::InvokeResponseEntry>,
    },
}

/// Client-side request tracking and response assembly.
#[derive(Default)]
pub struct InteractionClient {
    pending: HashMap<ExchangeKey, Pending>,
    subscriptions: HashMap<SubscriptionId, ClientSubscription>,
}

impl InteractionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<&ClientSubscription> {
        self.subscriptions.get(&id)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &ClientSubscription> {
        self.subscriptions.values()
    }

    /// Registers an outgoing read on its exchange.
    pub fn begin_read(&mut self, key: ExchangeKey) {
        self.pending.insert(
            key,
            Pending::Read {
                assembly: ReadOutcome::default(),
            },
        );
    }

    /// Registers an outgoing write on its exchange.
    pub fn begin_write(&mut self, key: ExchangeKey) {
        self.pending.insert(key, Pending::Write);
    }

    /// Registers an outgoing invoke on its exchange.
    pub fn begin_invoke(&mut self, key: ExchangeKey) {
        self.pending.insert(key, Pending::Invoke { assembled: Vec::new() });
    }

    /// Registers an outgoing subscribe on its exchange.
    pub fn begin_subscribe(
        &mut self,
        key: ExchangeKey,
        peer: PeerAddress,
        request: SubscribeRequest,
        max_peer_response_time: Duration,
        sustained: bool,
    ) {
        self.pending.insert(
            key,
            Pending::Subscribe {
                assembly: ReadOutcome::default(),
                peer,
                request,
                max_peer_response_time,
                sustained,
            },
        );
    }

    /// Abandons whatever rode a closed exchange.
    pub fn exchange_closed(&mut self, key: ExchangeKey) {
        self.pending.remove(&key);
    }

    /// Processes an inbound interaction message for a tracked exchange.
    pub fn on_message(
        &mut self,
        key: ExchangeKey,
        opcode: u8,
        payload: &Bytes,
        now: Timestamp,
    ) -> Result<ClientEvent, InteractionError> {
        match opcode {
            opcodes::REPORT_DATA => self.on_report(key, payload, now),
            opcodes::SUBSCRIBE_RESPONSE => self.on_subscribe_response(key, payload, now),
            opcodes::WRITE_RESPONSE => {
                self.pending.remove(&key);
                Ok(ClientEvent::WriteComplete(WriteResponse::decode(payload)?))
            }
            opcodes::INVOKE_RESPONSE => self.on_invoke_response(key, payload),
            opcodes::STATUS_RESPONSE => {
                let status = StatusResponse::decode(payload)?.status;
                self.pending.remove(&key);
                if status.is_success() {
                    Ok(ClientEvent::Status(status))
                } else {
                    Err(InteractionError::Status(status))
                }
            }
            other => Err(InteractionError::Unexpected { opcode: other }),
        }
    }

    fn on_report(
        &mut self,
        key: ExchangeKey,
        payload: &Bytes,
        now: Timestamp,
    ) -> Result<ClientEvent, InteractionError> {
        let report = ReportData::decode(payload)?;

        // A report for an established subscription arrives on its own
        // exchange, outside any pending request.
        if !self.pending.contains_key(&key) {
            let Some(id) = report.subscription_id else {
                return Err(InteractionError::Unexpected {
                    opcode: opcodes::REPORT_DATA,
                });
            };
            let Some(subscription) = self.subscriptions.get_mut(&id) else {
                return Err(InteractionError::Status(StatusCode::InvalidSubscription));
            };
            subscription.last_report_at = now;
            let response = (!report.suppress_response).then(|| {
                (
                    opcodes::STATUS_RESPONSE,
                    StatusResponse::success().encode(),
                )
            });
            return Ok(ClientEvent::SubscriptionReport {
                id,
                outcome: ReadOutcome {
                    attributes: report.attribute_reports,
                    events: report.event_reports,
                },
                response,
            });
        }

        let pending = self.pending.get_mut(&key).expect("checked above");
        let assembly = match pending {
            Pending::Read { assembly } | Pending::Subscribe { assembly, .. } => assembly,
            _ => {
                return Err(InteractionError::Unexpected {
                    opcode: opcodes::REPORT_DATA,
                });
            }
        };
        assembly.attributes.extend(report.attribute_reports);
        assembly.events.extend(report.event_reports);

        if report.more_chunks {
            return Ok(ClientEvent::Continue {
                opcode: opcodes::STATUS_RESPONSE,
                payload: StatusResponse::success().encode(),
            });
        }

        match self.pending.remove(&key).expect("checked above") {
            Pending::Read { assembly } => {
                let response = (!report.suppress_response).then(|| {
                    (
                        opcodes::STATUS_RESPONSE,
                        StatusResponse::success().encode(),
                    )
                });
                Ok(ClientEvent::ReadComplete {
                    outcome: assembly,
                    response,
                })
            }
            pending @ Pending::Subscribe { .. } => {
                // Priming chunks done; the SubscribeResponse is still
                // coming. Ack and keep the assembled priming data.
                self.pending.insert(key, pending);
                Ok(ClientEvent::Continue {
                    opcode: opcodes::STATUS_RESPONSE,
                    payload: StatusResponse::success().encode(),
                })
            }
            _ => unreachable!("matched above"),
        }
    }

    fn on_subscribe_response(
        &mut self,
        key: ExchangeKey,
        payload: &Bytes,
        now: Timestamp,
    ) -> Result<ClientEvent, InteractionError> {
        let response = SubscribeResponse::decode(payload)?;
        let Some(Pending::Subscribe {
            assembly,
            peer,
            request,
            max_peer_response_time,
            sustained,
        }) = self.pending.remove(&key)
        else {
            return Err(InteractionError::Unexpected {
                opcode: opcodes::SUBSCRIBE_RESPONSE,
            });
        };

        let max_interval = Duration::from_secs(u64::from(response.max_interval_s));
        debug!(subscription = %response.subscription_id, "subscription established");
        self.subscriptions.insert(
            response.subscription_id,
            ClientSubscription {
                id: response.subscription_id,
                peer,
                request,
                max_interval,
                max_peer_response_time,
                last_report_at: now,
                sustained,
            },
        );
        Ok(ClientEvent::SubscribeEstablished {
            id: response.subscription_id,
            max_interval,
            priming: assembly,
        })
    }

    fn on_invoke_response(
        &mut self,
        key: ExchangeKey,
        payload: &Bytes,
    ) -> Result<ClientEvent, InteractionError> {
        let response = InvokeResponse::decode(payload)?;
        let Some(Pending::Invoke { mut assembled }) = self.pending.remove(&key) else {
            return Err(InteractionError::Unexpected {
                opcode: opcodes::INVOKE_RESPONSE,
            });
        };
        assembled.extend(response.responses);
        if response.more_chunks {
            self.pending.insert(key, Pending::Invoke { assembled });
            return Ok(ClientEvent::Continue {
                opcode: opcodes::STATUS_RESPONSE,
                payload: StatusResponse::success().encode(),
            });
        }
        Ok(ClientEvent::InvokeComplete(InvokeResponse {
            responses: assembled,
            more_chunks: false,
        }))
    }

    /// Purges subscriptions whose liveness deadline has passed.
    ///
    /// Returns the purged subscriptions so the caller can decide about
    /// re-establishment; a sustained subscription re-sends the same
    /// request over a fresh CASE session. A subscription is never
    /// silently rebound to a different peer node id.
    pub fn poll(&mut self, now: Timestamp) -> Vec<ClientSubscription> {
        let expired: Vec<SubscriptionId> = self
            .subscriptions
            .values()
            .filter(|s| now > s.liveness_deadline())
            .map(|s| s.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                let subscription = self.subscriptions.remove(&id)?;
                warn!(subscription = %id, peer = %subscription.peer, "subscription lost");
                Some(subscription)
            })
            .collect()
    }

    /// Drops subscriptions bound to a dying session's peer.
    pub fn peer_lost(&mut self, peer: PeerAddress) -> Vec<ClientSubscription> {
        let ids: Vec<SubscriptionId> = self
            .subscriptions
            .values()
            .filter(|s| s.peer == peer)
            .map(|s| s.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.subscriptions.remove(&id))
            .collect()
    }

    /// The earliest subscription liveness deadline.
    pub fn next_wakeup(&self) -> Option<Timestamp> {
        self.subscriptions
            .values()
            .map(ClientSubscription::liveness_deadline)
            .min()
    }
}

impl std::fmt::Debug for InteractionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionClient")
            .field("pending", &self.pending.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
