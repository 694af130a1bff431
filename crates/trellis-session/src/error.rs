//! Session-layer errors.

use trellis_crypto::CryptoError;
use trellis_tlv::TlvError;

use crate::secure_channel::StatusReport;

/// Errors surfaced by session establishment and the secure channel.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The session was destroyed; exchanges over it fail fast.
    #[error("session closed: {reason}")]
    SessionClosed { reason: &'static str },

    /// A handshake message arrived out of order.
    #[error("unexpected {protocol} message 0x{opcode:02X} in state {state}")]
    UnexpectedMessage {
        protocol: &'static str,
        opcode: u8,
        state: &'static str,
    },

    /// A handshake payload failed to parse.
    #[error("malformed handshake payload: {0}")]
    MalformedPayload(#[from] TlvError),

    /// A required handshake field is missing.
    #[error("handshake payload missing field {field}")]
    MissingField { field: u8 },

    /// The peer reported an error status.
    #[error("peer status report: {0:?}")]
    PeerStatus(StatusReport),

    /// Crypto failure (key confirmation, AEAD, signature).
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Peer certificate did not validate against any fabric.
    #[error("peer operational certificate rejected")]
    CertificateRejected,

    /// The outbound message counter space is exhausted.
    #[error("outbound message counter exhausted")]
    CounterExhausted,

    /// No session with the given wire id.
    #[error("unknown session id {0}")]
    UnknownSession(u16),

    /// Frame failed AEAD open or framing checks.
    #[error("frame rejected: {reason}")]
    FrameRejected { reason: &'static str },
}
