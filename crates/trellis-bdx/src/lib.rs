//! # trellis-bdx: Bulk data transfer
//!
//! The BDX sub-protocol moves large payloads (OTA images, logs) in
//! acknowledged blocks over its own protocol id. Either peer proposes a
//! transfer with `SendInit`/`ReceiveInit`; the responder accepts with
//! chosen parameters or rejects with a status report. Two drive modes
//! survive negotiation:
//!
//! - *SenderDrive*: the sender emits `Block`, waits for `BlockAck`.
//! - *ReceiverDrive*: the receiver emits `BlockQuery`; the sender
//!   answers with `Block`.
//!
//! The asynchronous mode is reserved by the protocol and rejected here
//! at negotiation. Block counters run `1, 2, 3, …` modulo 2³²; any other
//! progression is a [`BdxError::BadBlockCounter`].

mod error;
mod messages;
mod transfer;

pub use error::{BdxError, BdxStatusCode};
pub use messages::{
    BdxMessage, BlockData, TransferAccept, TransferControl, TransferInit, opcodes,
};
pub use transfer::{
    DriveMode, ReceiverEvent, ReceiverTransfer, SenderEvent, SenderTransfer, TransferOptions,
};

/// Default transfer size ceiling (100 MB).
pub const DEFAULT_MAX_TRANSFER_SIZE: u64 = 100 * 1024 * 1024;

#[cfg(test)]
mod tests;
