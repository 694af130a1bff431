//! Interaction-model errors.

use trellis_store::StoreError;
use trellis_supervisor::ValidationError;
use trellis_tlv::TlvError;
use trellis_types::StatusCode;

/// Errors surfaced by the interaction engines.
#[derive(thiserror::Error, Debug)]
pub enum InteractionError {
    /// The peer (or this node, acting as server) produced an explicit
    /// interaction-model status. Propagated unchanged.
    #[error("interaction status {0}")]
    Status(StatusCode),

    /// A message payload failed to parse.
    #[error("malformed interaction payload: {0}")]
    Malformed(#[from] TlvError),

    /// A message arrived that the current engine state cannot accept.
    #[error("unexpected interaction message 0x{opcode:02X}")]
    Unexpected { opcode: u8 },

    /// Group write constraints violated (timed, unsuppressed response,
    /// or endpoint-scoped path on a group address).
    #[error("invalid group operation: {reason}")]
    InvalidGroupOperation { reason: &'static str },

    /// The operation's response deadline passed.
    #[error("interaction timed out")]
    Timeout,

    /// Store-level failure while applying writes.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InteractionError {
    /// The status code this error maps to at the wire boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Status(status) => *status,
            Self::Malformed(_) | Self::Unexpected { .. } => StatusCode::InvalidAction,
            Self::InvalidGroupOperation { .. } => StatusCode::InvalidAction,
            Self::Timeout => StatusCode::Timeout,
            Self::Store(StoreError::Validation(e)) => validation_status(e),
            Self::Store(StoreError::UnknownAttribute { .. }) => StatusCode::UnsupportedAttribute,
            Self::Store(StoreError::NotWritable { .. }) => StatusCode::UnsupportedWrite,
            Self::Store(_) => StatusCode::Failure,
        }
    }
}

/// Maps a validation failure to its interaction-model status.
pub(crate) fn validation_status(error: &ValidationError) -> StatusCode {
    match error {
        ValidationError::Datatype { .. } | ValidationError::Tlv { .. } => {
            StatusCode::InvalidDataType
        }
        ValidationError::IntegerRange { .. }
        | ValidationError::Constraint { .. }
        | ValidationError::NotNullable { .. }
        | ValidationError::MissingField { .. } => StatusCode::ConstraintError,
    }
}
