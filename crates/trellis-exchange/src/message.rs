//! Message and payload header codec.
//!
//! # Frame Format
//!
//! ```text
//! message header:
//!   [flags:u8][session_id:u16][security_flags:u8][counter:u32]
//!   [source_node_id:u64?][dest_node_id:u64? | dest_group_id:u16?]
//! payload header:
//!   [exchange_flags:u8][opcode:u8][exchange_id:u16][protocol_id:u16]
//!   [vendor_id:u16?][ack_counter:u32?]
//! payload: application bytes
//! ```
//!
//! All integers little-endian. Over a secure session everything after the
//! message header is encrypted; this codec sees the decrypted form.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use trellis_types::{GroupId, NodeId, SessionId};

/// Message-header flag bits.
const FLAG_SOURCE_PRESENT: u8 = 0x04;
const DSIZ_MASK: u8 = 0x03;
const DSIZ_NONE: u8 = 0x00;
const DSIZ_NODE: u8 = 0x01;
const DSIZ_GROUP: u8 = 0x02;

/// Frame decode failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageDecodeError {
    #[error("frame truncated ({context})")]
    Truncated { context: &'static str },

    #[error("unsupported message version {0}")]
    UnsupportedVersion(u8),

    #[error("reserved destination size bits set")]
    ReservedDsiz,
}

/// A protocol identifier on the payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolId(u16);

impl ProtocolId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proto:0x{:04X}", self.0)
    }
}

/// Security flags of the message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityFlags(u8);

impl SecurityFlags {
    const SESSION_TYPE_MASK: u8 = 0x03;
    const GROUP_SESSION: u8 = 0x01;

    pub fn unicast() -> Self {
        Self(0)
    }

    pub fn group() -> Self {
        Self(Self::GROUP_SESSION)
    }

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    pub fn is_group_session(self) -> bool {
        self.0 & Self::SESSION_TYPE_MASK == Self::GROUP_SESSION
    }
}

/// The unencrypted message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub session_id: SessionId,
    pub security: SecurityFlags,
    pub counter: u32,
    pub source: Option<NodeId>,
    pub destination: Option<NodeId>,
    pub group_destination: Option<GroupId>,
}

impl MessageHeader {
    /// Header for a unicast message on a session.
    pub fn unicast(session_id: SessionId, counter: u32) -> Self {
        Self {
            session_id,
            security: SecurityFlags::unicast(),
            counter,
            source: None,
            destination: None,
            group_destination: None,
        }
    }

    pub fn with_source(mut self, source: NodeId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_destination(mut self, destination: NodeId) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        let mut flags = 0u8;
        if self.source.is_some() {
            flags |= FLAG_SOURCE_PRESENT;
        }
        flags |= match (self.destination, self.group_destination) {
            (Some(_), _) => DSIZ_NODE,
            (None, Some(_)) => DSIZ_GROUP,
            (None, None) => DSIZ_NONE,
        };
        buf.put_u8(flags);
        buf.put_u16_le(self.session_id.as_u16());
        buf.put_u8(self.security.as_byte());
        buf.put_u32_le(self.counter);
        if let Some(source) = self.source {
            buf.put_u64_le(source.as_u64());
        }
        if let Some(destination) = self.destination {
            buf.put_u64_le(destination.as_u64());
        } else if let Some(group) = self.group_destination {
            buf.put_u16_le(group.as_u16());
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, MessageDecodeError> {
        if buf.remaining() < 8 {
            return Err(MessageDecodeError::Truncated {
                context: "message header",
            });
        }
        let flags = buf.get_u8();
        let version = flags >> 4;
        if version != 0 {
            return Err(MessageDecodeError::UnsupportedVersion(version));
        }
        let session_id = SessionId::new(buf.get_u16_le());
        let security = SecurityFlags::from_byte(buf.get_u8());
        let counter = buf.get_u32_le();

        let source = if flags & FLAG_SOURCE_PRESENT != 0 {
            if buf.remaining() < 8 {
                return Err(MessageDecodeError::Truncated {
                    context: "source node id",
                });
            }
            Some(NodeId::new(buf.get_u64_le()))
        } else {
            None
        };

        let (destination, group_destination) = match flags & DSIZ_MASK {
            DSIZ_NONE => (None, None),
            DSIZ_NODE => {
                if buf.remaining() < 8 {
                    return Err(MessageDecodeError::Truncated {
                        context: "destination node id",
                    });
                }
                (Some(NodeId::new(buf.get_u64_le())), None)
            }
            DSIZ_GROUP => {
                if buf.remaining() < 2 {
                    return Err(MessageDecodeError::Truncated {
                        context: "destination group id",
                    });
                }
                (None, Some(GroupId::new(buf.get_u16_le())))
            }
            _ => return Err(MessageDecodeError::ReservedDsiz),
        };

        Ok(Self {
            session_id,
            security,
            counter,
            source,
            destination,
            group_destination,
        })
    }
}

/// Exchange flags of the payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExchangeFlags(u8);

impl ExchangeFlags {
    pub const INITIATOR: u8 = 0x01;
    pub const ACK: u8 = 0x02;
    pub const RELIABILITY: u8 = 0x04;
    pub const SECURED_EXTENSIONS: u8 = 0x08;
    pub const VENDOR: u8 = 0x10;

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    pub fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn is_initiator(self) -> bool {
        self.0 & Self::INITIATOR != 0
    }

    pub fn has_ack(self) -> bool {
        self.0 & Self::ACK != 0
    }

    pub fn needs_ack(self) -> bool {
        self.0 & Self::RELIABILITY != 0
    }

    pub fn has_vendor(self) -> bool {
        self.0 & Self::VENDOR != 0
    }
}

/// The payload (protocol) header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub flags: ExchangeFlags,
    pub opcode: u8,
    pub exchange_id: trellis_types::ExchangeId,
    pub protocol: ProtocolId,
    pub vendor: Option<u16>,
    pub ack_counter: Option<u32>,
}

impl PayloadHeader {
    pub fn new(
        protocol: ProtocolId,
        opcode: u8,
        exchange_id: trellis_types::ExchangeId,
        initiator: bool,
    ) -> Self {
        let mut flags = ExchangeFlags::default();
        flags.set(ExchangeFlags::INITIATOR, initiator);
        Self {
            flags,
            opcode,
            exchange_id,
            protocol,
            vendor: None,
            ack_counter: None,
        }
    }

    pub fn reliable(mut self) -> Self {
        self.flags.set(ExchangeFlags::RELIABILITY, true);
        self
    }

    pub fn acking(mut self, counter: u32) -> Self {
        self.flags.set(ExchangeFlags::ACK, true);
        self.ack_counter = Some(counter);
        self
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        let mut flags = self.flags;
        flags.set(ExchangeFlags::VENDOR, self.vendor.is_some());
        flags.set(ExchangeFlags::ACK, self.ack_counter.is_some());
        buf.put_u8(flags.as_byte());
        buf.put_u8(self.opcode);
        buf.put_u16_le(self.exchange_id.as_u16());
        buf.put_u16_le(self.protocol.as_u16());
        if let Some(vendor) = self.vendor {
            buf.put_u16_le(vendor);
        }
        if let Some(ack) = self.ack_counter {
            buf.put_u32_le(ack);
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, MessageDecodeError> {
        if buf.remaining() < 6 {
            return Err(MessageDecodeError::Truncated {
                context: "payload header",
            });
        }
        let flags = ExchangeFlags::from_byte(buf.get_u8());
        let opcode = buf.get_u8();
        let exchange_id = trellis_types::ExchangeId::new(buf.get_u16_le());
        let protocol = ProtocolId::new(buf.get_u16_le());
        let vendor = if flags.has_vendor() {
            if buf.remaining() < 2 {
                return Err(MessageDecodeError::Truncated { context: "vendor id" });
            }
            Some(buf.get_u16_le())
        } else {
            None
        };
        let ack_counter = if flags.has_ack() {
            if buf.remaining() < 4 {
                return Err(MessageDecodeError::Truncated {
                    context: "ack counter",
                });
            }
            Some(buf.get_u32_le())
        } else {
            None
        };
        Ok(Self {
            flags,
            opcode,
            exchange_id,
            protocol,
            vendor,
            ack_counter,
        })
    }
}

/// A complete (decrypted) message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload_header: PayloadHeader,
    pub payload: Bytes,
}

impl Message {
    /// Encodes the full frame (header + payload header + payload).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(26 + self.payload.len());
        self.header.encode_into(&mut buf);
        self.payload_header.encode_into(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Encodes only the part a secure session encrypts (payload header +
    /// payload).
    pub fn encode_protected(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(10 + self.payload.len());
        self.payload_header.encode_into(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes a full plaintext frame.
    pub fn decode(mut bytes: Bytes) -> Result<Self, MessageDecodeError> {
        let header = MessageHeader::decode(&mut bytes)?;
        let payload_header = PayloadHeader::decode(&mut bytes)?;
        Ok(Self {
            header,
            payload_header,
            payload: bytes,
        })
    }

    /// Reassembles a message from a decrypted protected part.
    pub fn from_protected(
        header: MessageHeader,
        mut protected: Bytes,
    ) -> Result<Self, MessageDecodeError> {
        let payload_header = PayloadHeader::decode(&mut protected)?;
        Ok(Self {
            header,
            payload_header,
            payload: protected,
        })
    }
}
