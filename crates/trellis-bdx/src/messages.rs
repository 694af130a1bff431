//! BDX message codec.
//!
//! BDX messages are flat little-endian structures (not TLV):
//!
//! ```text
//! TransferInit:  [control:u8][range:u8][max_block:u16]
//!                [start_offset:u64?][length:u64?]
//!                [designator_len:u16][designator]
//! Accept:        [control:u8][range:u8][max_block:u16][length:u64?]
//! Block*:        [counter:u32][data...]
//! BlockQuery/Ack:[counter:u32]
//! StatusReport:  [status:u16]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{BdxError, BdxStatusCode};

/// BDX opcodes.
pub mod opcodes {
    pub const SEND_INIT: u8 = 0x01;
    pub const SEND_ACCEPT: u8 = 0x02;
    pub const RECEIVE_INIT: u8 = 0x04;
    pub const RECEIVE_ACCEPT: u8 = 0x05;
    pub const BLOCK_QUERY: u8 = 0x10;
    pub const BLOCK: u8 = 0x11;
    pub const BLOCK_EOF: u8 = 0x12;
    pub const BLOCK_ACK: u8 = 0x13;
    pub const BLOCK_ACK_EOF: u8 = 0x14;
    pub const STATUS_REPORT: u8 = 0x40;
}

/// Transfer-control byte: low nibble protocol version, drive-mode bits
/// above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferControl(u8);

impl TransferControl {
    pub const VERSION: u8 = 0x01;
    pub const SENDER_DRIVE: u8 = 0x10;
    pub const RECEIVER_DRIVE: u8 = 0x20;
    pub const ASYNC: u8 = 0x40;

    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    pub fn offers_sender_drive(self) -> bool {
        self.0 & Self::SENDER_DRIVE != 0
    }

    pub fn offers_receiver_drive(self) -> bool {
        self.0 & Self::RECEIVER_DRIVE != 0
    }

    pub fn offers_async(self) -> bool {
        self.0 & Self::ASYNC != 0
    }
}

const RANGE_DEFINITE_LENGTH: u8 = 0x01;
const RANGE_START_OFFSET: u8 = 0x02;

/// `SendInit` / `ReceiveInit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInit {
    pub control: TransferControl,
    pub max_block_size: u16,
    pub start_offset: Option<u64>,
    pub length: Option<u64>,
    pub file_designator: Bytes,
}

impl TransferInit {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(24 + self.file_designator.len());
        buf.put_u8(self.control.as_byte());
        let mut range = 0u8;
        if self.length.is_some() {
            range |= RANGE_DEFINITE_LENGTH;
        }
        if self.start_offset.is_some() {
            range |= RANGE_START_OFFSET;
        }
        buf.put_u8(range);
        buf.put_u16_le(self.max_block_size);
        if let Some(offset) = self.start_offset {
            buf.put_u64_le(offset);
        }
        if let Some(length) = self.length {
            buf.put_u64_le(length);
        }
        buf.put_u16_le(self.file_designator.len() as u16);
        buf.put_slice(&self.file_designator);
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, BdxError> {
        if bytes.remaining() < 4 {
            return Err(BdxError::Malformed("init too short"));
        }
        let control = TransferControl::new(bytes.get_u8());
        let range = bytes.get_u8();
        let max_block_size = bytes.get_u16_le();
        let start_offset = if range & RANGE_START_OFFSET != 0 {
            if bytes.remaining() < 8 {
                return Err(BdxError::Malformed("missing start offset"));
            }
            Some(bytes.get_u64_le())
        } else {
            None
        };
        let length = if range & RANGE_DEFINITE_LENGTH != 0 {
            if bytes.remaining() < 8 {
                return Err(BdxError::Malformed("missing length"));
            }
            Some(bytes.get_u64_le())
        } else {
            None
        };
        if bytes.remaining() < 2 {
            return Err(BdxError::Malformed("missing designator length"));
        }
        let designator_len = bytes.get_u16_le() as usize;
        if bytes.remaining() < designator_len {
            return Err(BdxError::Malformed("designator truncated"));
        }
        let file_designator = bytes.split_to(designator_len);
        Ok(Self {
            control,
            max_block_size,
            start_offset,
            length,
            file_designator,
        })
    }
}

/// `SendAccept` / `ReceiveAccept` with the chosen parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferAccept {
    pub control: TransferControl,
    pub max_block_size: u16,
    pub length: Option<u64>,
}

impl TransferAccept {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12);
        buf.put_u8(self.control.as_byte());
        buf.put_u8(if self.length.is_some() {
            RANGE_DEFINITE_LENGTH
        } else {
            0
        });
        buf.put_u16_le(self.max_block_size);
        if let Some(length) = self.length {
            buf.put_u64_le(length);
        }
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, BdxError> {
        if bytes.remaining() < 4 {
            return Err(BdxError::Malformed("accept too short"));
        }
        let control = TransferControl::new(bytes.get_u8());
        let range = bytes.get_u8();
        let max_block_size = bytes.get_u16_le();
        let length = if range & RANGE_DEFINITE_LENGTH != 0 {
            if bytes.remaining() < 8 {
                return Err(BdxError::Malformed("missing length"));
            }
            Some(bytes.get_u64_le())
        } else {
            None
        };
        Ok(Self {
            control,
            max_block_size,
            length,
        })
    }
}

/// A data-bearing block (`Block` / `BlockEof`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub counter: u32,
    pub data: Bytes,
}

impl BlockData {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.data.len());
        buf.put_u32_le(self.counter);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, BdxError> {
        if bytes.remaining() < 4 {
            return Err(BdxError::Malformed("block too short"));
        }
        let counter = bytes.get_u32_le();
        Ok(Self {
            counter,
            data: bytes,
        })
    }
}

/// A decoded BDX message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BdxMessage {
    SendInit(TransferInit),
    SendAccept(TransferAccept),
    ReceiveInit(TransferInit),
    ReceiveAccept(TransferAccept),
    BlockQuery { counter: u32 },
    Block(BlockData),
    BlockEof(BlockData),
    BlockAck { counter: u32 },
    BlockAckEof { counter: u32 },
    StatusReport(BdxStatusCode),
}

impl BdxMessage {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::SendInit(_) => opcodes::SEND_INIT,
            Self::SendAccept(_) => opcodes::SEND_ACCEPT,
            Self::ReceiveInit(_) => opcodes::RECEIVE_INIT,
            Self::ReceiveAccept(_) => opcodes::RECEIVE_ACCEPT,
            Self::BlockQuery { .. } => opcodes::BLOCK_QUERY,
            Self::Block(_) => opcodes::BLOCK,
            Self::BlockEof(_) => opcodes::BLOCK_EOF,
            Self::BlockAck { .. } => opcodes::BLOCK_ACK,
            Self::BlockAckEof { .. } => opcodes::BLOCK_ACK_EOF,
            Self::StatusReport(_) => opcodes::STATUS_REPORT,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Self::SendInit(init) | Self::ReceiveInit(init) => init.encode(),
            Self::SendAccept(accept) | Self::ReceiveAccept(accept) => accept.encode(),
            Self::Block(block) | Self::BlockEof(block) => block.encode(),
            Self::BlockQuery { counter }
            | Self::BlockAck { counter }
            | Self::BlockAckEof { counter } => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_u32_le(*counter);
                buf.freeze()
            }
            Self::StatusReport(code) => {
                let mut buf = BytesMut::with_capacity(2);
                buf.put_u16_le(code.as_u16());
                buf.freeze()
            }
        }
    }

    pub fn decode(opcode: u8, mut payload: Bytes) -> Result<Self, BdxError> {
        Ok(match opcode {
            opcodes::SEND_INIT => Self::SendInit(TransferInit::decode(payload)?),
            opcodes::SEND_ACCEPT => Self::SendAccept(TransferAccept::decode(payload)?),
            opcodes::RECEIVE_INIT => Self::ReceiveInit(TransferInit::decode(payload)?),
            opcodes::RECEIVE_ACCEPT => Self::ReceiveAccept(TransferAccept::decode(payload)?),
            opcodes::BLOCK => Self::Block(BlockData::decode(payload)?),
            opcodes::BLOCK_EOF => Self::BlockEof(BlockData::decode(payload)?),
            opcodes::BLOCK_QUERY | opcodes::BLOCK_ACK | opcodes::BLOCK_ACK_EOF => {
                if payload.remaining() < 4 {
                    return Err(BdxError::Malformed("counter too short"));
                }
                let counter = payload.get_u32_le();
                match opcode {
                    opcodes::BLOCK_QUERY => Self::BlockQuery { counter },
                    opcodes::BLOCK_ACK => Self::BlockAck { counter },
                    _ => Self::BlockAckEof { counter },
                }
            }
            opcodes::STATUS_REPORT => {
                if payload.remaining() < 2 {
                    return Err(BdxError::Malformed("status too short"));
                }
                Self::StatusReport(BdxStatusCode::from_u16(payload.get_u16_le()))
            }
            _ => return Err(BdxError::Malformed("unknown opcode")),
        })
    }
}
