//! Transfer flow state machines.
//!
//! Four flows, two structs: [`SenderTransfer`] covers driven-sender and
//! following-sender, [`ReceiverTransfer`] driven-receiver and
//! following-receiver. Which of the pair drives comes out of the
//! `Init`/`Accept` negotiation.

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::messages::{BdxMessage, BlockData, TransferAccept, TransferControl, TransferInit};
use crate::{BdxError, DEFAULT_MAX_TRANSFER_SIZE};

/// The negotiated drive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    SenderDrive,
    ReceiverDrive,
}

/// Parameters a side brings to negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Drive modes this side offers (sender-drive, receiver-drive).
    pub offer_sender_drive: bool,
    pub offer_receiver_drive: bool,
    pub max_block_size: u16,
    /// Per-transfer byte ceiling.
    pub max_transfer_size: u64,
    pub file_designator: Bytes,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            offer_sender_drive: true,
            offer_receiver_drive: true,
            max_block_size: 1024,
            max_transfer_size: DEFAULT_MAX_TRANSFER_SIZE,
            file_designator: Bytes::new(),
        }
    }
}

impl TransferOptions {
    fn control(&self) -> TransferControl {
        let mut bits = TransferControl::VERSION;
        if self.offer_sender_drive {
            bits |= TransferControl::SENDER_DRIVE;
        }
        if self.offer_receiver_drive {
            bits |= TransferControl::RECEIVER_DRIVE;
        }
        TransferControl::new(bits)
    }
}

/// Picks the drive mode from an offered control byte.
///
/// Async is reserved; offering *only* async is rejected outright.
fn negotiate(offered: TransferControl, local: &TransferOptions) -> Result<DriveMode, BdxError> {
    if offered.offers_async() && !offered.offers_sender_drive() && !offered.offers_receiver_drive()
    {
        return Err(BdxError::AsyncNotSupported);
    }
    // Receiver-drive preferred when both sides allow it.
    if offered.offers_receiver_drive() && local.offer_receiver_drive {
        Ok(DriveMode::ReceiverDrive)
    } else if offered.offers_sender_drive() && local.offer_sender_drive {
        Ok(DriveMode::SenderDrive)
    } else {
        Err(BdxError::NoCommonDriveMode)
    }
}

fn drive_control(mode: DriveMode) -> TransferControl {
    TransferControl::new(
        TransferControl::VERSION
            | match mode {
                DriveMode::SenderDrive => TransferControl::SENDER_DRIVE,
                DriveMode::ReceiverDrive => TransferControl::RECEIVER_DRIVE,
            },
    )
}

// ============================================================================
// Sender
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderState {
    AwaitingAccept,
    /// Sender-drive: a block is in flight, waiting for its ack.
    AwaitingAck,
    /// Ready to emit (sender-drive) or answer a query (receiver-drive).
    Ready,
    Complete,
}

/// What the sender hands back to its driver.
#[derive(Debug, PartialEq, Eq)]
pub enum SenderEvent {
    /// Send this message.
    Send(BdxMessage),
    /// Nothing to do until the peer speaks.
    Idle,
    /// Transfer finished; the final ack was observed.
    Complete,
}

/// The sending side of a transfer.
///
/// Holds the whole payload; blocks are sliced from it as the flow
/// advances.
#[derive(Debug)]
pub struct SenderTransfer {
    payload: Bytes,
    block_size: usize,
    mode: Option<DriveMode>,
    state: SenderState,
    /// Counter of the next block to emit; blocks run 1, 2, 3, …
    next_counter: u32,
    sent: usize,
    is_initiator: bool,
}

impl SenderTransfer {
    /// Starts an initiator-side send; emit the returned `SendInit`.
    pub fn initiate(
        payload: Bytes,
        options: &TransferOptions,
        start_offset: Option<u64>,
    ) -> Result<(Self, BdxMessage), BdxError> {
        if payload.len() as u64 > options.max_transfer_size {
            return Err(BdxError::TransferTooLarge {
                length: payload.len() as u64,
                limit: options.max_transfer_size,
            });
        }
        let init = TransferInit {
            control: options.control(),
            max_block_size: options.max_block_size,
            start_offset,
            length: Some(payload.len() as u64),
            file_designator: options.file_designator.clone(),
        };
        let payload = match start_offset {
            Some(offset) => payload.slice((offset as usize).min(payload.len())..),
            None => payload,
        };
        Ok((
            Self {
                payload,
                block_size: options.max_block_size as usize,
                mode: None,
                state: SenderState::AwaitingAccept,
                next_counter: 1,
                sent: 0,
                is_initiator: true,
            },
            BdxMessage::SendInit(init),
        ))
    }

    /// Accepts a `ReceiveInit` as the responding sender.
    ///
    /// Partial-transfer fields are only valid when the *initiator* is
    /// the sender, so an offset here is rejected.
    pub fn respond(
        payload: Bytes,
        init: &TransferInit,
        options: &TransferOptions,
    ) -> Result<(Self, BdxMessage), BdxError> {
        if init.start_offset.is_some() {
            return Err(BdxError::PartialTransferNotAllowed);
        }
        if payload.len() as u64 > options.max_transfer_size {
            return Err(BdxError::TransferTooLarge {
                length: payload.len() as u64,
                limit: options.max_transfer_size,
            });
        }
        let mode = negotiate(init.control, options)?;
        let block_size = init.max_block_size.min(options.max_block_size).max(1);
        let accept = TransferAccept {
            control: drive_control(mode),
            max_block_size: block_size,
            length: Some(payload.len() as u64),
        };
        debug!(?mode, block_size, "send transfer accepted");
        Ok((
            Self {
                payload,
                block_size: block_size as usize,
                mode: Some(mode),
                state: SenderState::Ready,
                next_counter: 1,
                sent: 0,
                is_initiator: false,
            },
            BdxMessage::ReceiveAccept(accept),
        ))
    }

    pub fn mode(&self) -> Option<DriveMode> {
        self.mode
    }

    pub fn is_complete(&self) -> bool {
        self.state == SenderState::Complete
    }

    /// Feeds one inbound BDX message.
    pub fn on_message(&mut self, message: &BdxMessage) -> Result<SenderEvent, BdxError> {
        match (self.state, message) {
            (SenderState::AwaitingAccept, BdxMessage::SendAccept(accept)) => {
                if !self.is_initiator {
                    return Err(BdxError::BadState {
                        opcode: message.opcode(),
                        state: "responder awaiting nothing",
                    });
                }
                let mode = if accept.control.offers_receiver_drive() {
                    DriveMode::ReceiverDrive
                } else if accept.control.offers_sender_drive() {
                    DriveMode::SenderDrive
                } else {
                    return Err(BdxError::NoCommonDriveMode);
                };
                if accept.control.offers_async() {
                    return Err(BdxError::AsyncNotSupported);
                }
                self.block_size = usize::from(accept.max_block_size.max(1)).min(self.block_size);
                self.mode = Some(mode);
                self.state = SenderState::Ready;
                match mode {
                    // Sender-drive starts pushing immediately.
                    DriveMode::SenderDrive => Ok(self.emit_next()),
                    // Receiver-drive waits for the first query.
                    DriveMode::ReceiverDrive => Ok(SenderEvent::Idle),
                }
            }
            (SenderState::Ready, BdxMessage::BlockQuery { counter }) => {
                if self.mode != Some(DriveMode::ReceiverDrive) {
                    return Err(BdxError::BadState {
                        opcode: message.opcode(),
                        state: "sender-driven",
                    });
                }
                if *counter != self.next_counter {
                    return Err(BdxError::BadBlockCounter {
                        expected: self.next_counter,
                        got: *counter,
                    });
                }
                Ok(self.emit_next())
            }
            (SenderState::AwaitingAck, BdxMessage::BlockAck { counter }) => {
                let expected = self.next_counter.wrapping_sub(1);
                if *counter != expected {
                    return Err(BdxError::BadBlockCounter {
                        expected,
                        got: *counter,
                    });
                }
                self.state = SenderState::Ready;
                Ok(self.emit_next())
            }
            (SenderState::AwaitingAck, BdxMessage::BlockAckEof { counter }) => {
                let expected = self.next_counter.wrapping_sub(1);
                if *counter != expected {
                    return Err(BdxError::BadBlockCounter {
                        expected,
                        got: *counter,
                    });
                }
                debug!("transfer complete (sender)");
                self.state = SenderState::Complete;
                Ok(SenderEvent::Complete)
            }
            (_, BdxMessage::StatusReport(code)) => {
                warn!(?code, "peer aborted transfer");
                Err(BdxError::PeerStatus(*code))
            }
            (_, other) => Err(BdxError::BadState {
                opcode: other.opcode(),
                state: self.state_name(),
            }),
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            SenderState::AwaitingAccept => "awaiting-accept",
            SenderState::AwaitingAck => "awaiting-ack",
            SenderState::Ready => "ready",
            SenderState::Complete => "complete",
        }
    }

    /// Emits the next block (or EOF) and advances the counter.
    fn emit_next(&mut self) -> SenderEvent {
        let remaining = self.payload.len() - self.sent;
        let take = remaining.min(self.block_size);
        let data = self.payload.slice(self.sent..self.sent + take);
        self.sent += take;
        let counter = self.next_counter;
        self.next_counter = self.next_counter.wrapping_add(1);

        let last = self.sent == self.payload.len();
        // Sender-drive awaits an explicit BlockAck per block. In
        // receiver-drive the next BlockQuery is the acknowledgement, so
        // only the EOF block waits for an ack message.
        self.state = if last || self.mode == Some(DriveMode::SenderDrive) {
            SenderState::AwaitingAck
        } else {
            SenderState::Ready
        };
        let block = BlockData { counter, data };
        if last {
            SenderEvent::Send(BdxMessage::BlockEof(block))
        } else {
            SenderEvent::Send(BdxMessage::Block(block))
        }
    }
}

// ============================================================================
// Receiver
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverState {
    AwaitingAccept,
    Receiving,
    Complete,
}

/// What the receiver hands back to its driver.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// Send this message.
    Send(BdxMessage),
    Idle,
    /// Transfer finished; `data` is the reassembled payload.
    Complete { data: Bytes },
}

/// The receiving side of a transfer.
#[derive(Debug)]
pub struct ReceiverTransfer {
    mode: Option<DriveMode>,
    state: ReceiverState,
    expected_counter: u32,
    expected_length: Option<u64>,
    max_transfer_size: u64,
    assembled: BytesMut,
    is_initiator: bool,
}

impl ReceiverTransfer {
    /// Starts an initiator-side receive; emit the returned `ReceiveInit`.
    pub fn initiate(options: &TransferOptions) -> (Self, BdxMessage) {
        let init = TransferInit {
            control: options.control(),
            max_block_size: options.max_block_size,
            start_offset: None,
            length: None,
            file_designator: options.file_designator.clone(),
        };
        (
            Self {
                mode: None,
                state: ReceiverState::AwaitingAccept,
                expected_counter: 1,
                expected_length: None,
                max_transfer_size: options.max_transfer_size,
                assembled: BytesMut::new(),
                is_initiator: true,
            },
            BdxMessage::ReceiveInit(init),
        )
    }

    /// Accepts a `SendInit` as the responding receiver.
    pub fn respond(
        init: &TransferInit,
        options: &TransferOptions,
    ) -> Result<(Self, BdxMessage), BdxError> {
        if let Some(length) = init.length {
            if length > options.max_transfer_size {
                return Err(BdxError::TransferTooLarge {
                    length,
                    limit: options.max_transfer_size,
                });
            }
        }
        let mode = negotiate(init.control, options)?;
        let block_size = init.max_block_size.min(options.max_block_size).max(1);
        let accept = TransferAccept {
            control: drive_control(mode),
            max_block_size: block_size,
            length: init.length,
        };
        debug!(?mode, block_size, "receive transfer accepted");
        let transfer = Self {
            mode: Some(mode),
            state: ReceiverState::Receiving,
            expected_counter: 1,
            expected_length: init.length,
            max_transfer_size: options.max_transfer_size,
            assembled: BytesMut::new(),
            is_initiator: false,
        };
        // Receiver-drive: the caller sends the accept, then polls for
        // the first query.
        Ok((transfer, BdxMessage::SendAccept(accept)))
    }

    pub fn mode(&self) -> Option<DriveMode> {
        self.mode
    }

    pub fn is_complete(&self) -> bool {
        self.state == ReceiverState::Complete
    }

    /// Receiver-drive: the next `BlockQuery`, when it is our turn.
    pub fn poll_query(&mut self) -> Option<BdxMessage> {
        if self.state == ReceiverState::Receiving && self.mode == Some(DriveMode::ReceiverDrive) {
            Some(BdxMessage::BlockQuery {
                counter: self.expected_counter,
            })
        } else {
            None
        }
    }

    /// Feeds one inbound BDX message.
    pub fn on_message(&mut self, message: &BdxMessage) -> Result<ReceiverEvent, BdxError> {
        match (self.state, message) {
            (ReceiverState::AwaitingAccept, BdxMessage::ReceiveAccept(accept)) => {
                if !self.is_initiator {
                    return Err(BdxError::BadState {
                        opcode: message.opcode(),
                        state: "responder awaiting nothing",
                    });
                }
                if accept.control.offers_async() {
                    return Err(BdxError::AsyncNotSupported);
                }
                let mode = if accept.control.offers_receiver_drive() {
                    DriveMode::ReceiverDrive
                } else if accept.control.offers_sender_drive() {
                    DriveMode::SenderDrive
                } else {
                    return Err(BdxError::NoCommonDriveMode);
                };
                self.mode = Some(mode);
                self.expected_length = accept.length;
                self.state = ReceiverState::Receiving;
                match mode {
                    DriveMode::ReceiverDrive => Ok(ReceiverEvent::Send(
                        self.poll_query().expect("receiving state"),
                    )),
                    DriveMode::SenderDrive => Ok(ReceiverEvent::Idle),
                }
            }
            (ReceiverState::Receiving, BdxMessage::Block(block)) => {
                self.accept_block(block, false)
            }
            (ReceiverState::Receiving, BdxMessage::BlockEof(block)) => {
                self.accept_block(block, true)
            }
            (_, BdxMessage::StatusReport(code)) => {
                warn!(?code, "peer aborted transfer");
                Err(BdxError::PeerStatus(*code))
            }
            (_, other) => Err(BdxError::BadState {
                opcode: other.opcode(),
                state: self.state_name(),
            }),
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            ReceiverState::AwaitingAccept => "awaiting-accept",
            ReceiverState::Receiving => "receiving",
            ReceiverState::Complete => "complete",
        }
    }

    fn accept_block(&mut self, block: &BlockData, eof: bool) -> Result<ReceiverEvent, BdxError> {
        if block.counter != self.expected_counter {
            return Err(BdxError::BadBlockCounter {
                expected: self.expected_counter,
                got: block.counter,
            });
        }
        if (self.assembled.len() + block.data.len()) as u64 > self.max_transfer_size {
            return Err(BdxError::TransferTooLarge {
                length: (self.assembled.len() + block.data.len()) as u64,
                limit: self.max_transfer_size,
            });
        }
        self.assembled.extend_from_slice(&block.data);
        self.expected_counter = self.expected_counter.wrapping_add(1);

        if eof {
            if let Some(expected) = self.expected_length {
                if self.assembled.len() as u64 != expected {
                    return Err(BdxError::Malformed("length mismatch at EOF"));
                }
            }
            debug!(bytes = self.assembled.len(), "transfer complete (receiver)");
            self.state = ReceiverState::Complete;
            // Ack first; the caller observes Complete with the data and
            // still sends the returned BlockAckEof.
            Ok(ReceiverEvent::Complete {
                data: self.assembled.split().freeze(),
            })
        } else {
            let response = match self.mode {
                Some(DriveMode::ReceiverDrive) => BdxMessage::BlockQuery {
                    counter: self.expected_counter,
                },
                _ => BdxMessage::BlockAck {
                    counter: block.counter,
                },
            };
            Ok(ReceiverEvent::Send(response))
        }
    }

    /// The final `BlockAckEof` to send once `Complete` is observed.
    pub fn final_ack(&self) -> BdxMessage {
        BdxMessage::BlockAckEof {
            counter: self.expected_counter.wrapping_sub(1),
        }
    }
}
