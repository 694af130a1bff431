//! # trellis-exchange: Exchanges and reliable delivery
//!
//! The exchange layer frames Matter messages, demultiplexes them onto
//! exchanges and provides MRP (the ack + retransmit reliability protocol
//! UDP transport needs).
//!
//! The core is a deterministic state machine: inbound messages and time
//! go in, [`ExchangeOutput`] (frames to transmit, payloads to deliver,
//! exchanges that closed) comes out. The session layer owns encryption
//! and counter allocation; this crate works on decrypted [`Message`]
//! values and caller-allocated counters.

mod manager;
mod message;
mod mrp;

pub use manager::{
    Delivery, ExchangeError, ExchangeKey, ExchangeManager, ExchangeOutput, ExchangeRole,
    ExchangeState, OutboundFrame, SendFlags, SessionHandle,
};
pub use message::{
    ExchangeFlags, Message, MessageHeader, PayloadHeader, ProtocolId, SecurityFlags,
    MessageDecodeError,
};
pub use mrp::{MrpConfig, ReliableContext, RetransmitPoll};

/// Protocol id of the secure channel (PASE/CASE, status, standalone ack).
pub const PROTOCOL_SECURE_CHANNEL: ProtocolId = ProtocolId::new(0x0000);

/// Protocol id of the interaction model.
pub const PROTOCOL_INTERACTION: ProtocolId = ProtocolId::new(0x0001);

/// Protocol id of BDX.
pub const PROTOCOL_BDX: ProtocolId = ProtocolId::new(0x0002);

/// Protocol id of user-directed commissioning.
pub const PROTOCOL_UDC: ProtocolId = ProtocolId::new(0x0003);

/// Secure-channel opcode of the standalone acknowledgement.
pub const OPCODE_STANDALONE_ACK: u8 = 0x10;

#[cfg(test)]
mod tests;
