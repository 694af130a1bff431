//! BDX errors and wire status codes.

/// Status codes carried in a BDX StatusReport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BdxStatusCode {
    LengthTooLarge,
    LengthTooShort,
    LengthMismatch,
    LengthRequired,
    BadMessageContents,
    BadState,
    TransferFailedUnknownError,
    TransferMethodNotSupported,
    FileDesignatorUnknown,
    StartOffsetNotSupported,
    VersionNotSupported,
    Unknown,
}

impl BdxStatusCode {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::LengthTooLarge => 0x0011,
            Self::LengthTooShort => 0x0012,
            Self::LengthMismatch => 0x0013,
            Self::LengthRequired => 0x0014,
            Self::BadMessageContents => 0x0015,
            Self::BadState => 0x0016,
            Self::TransferFailedUnknownError => 0x0018,
            Self::TransferMethodNotSupported => 0x0019,
            Self::FileDesignatorUnknown => 0x001A,
            Self::StartOffsetNotSupported => 0x001B,
            Self::VersionNotSupported => 0x001C,
            Self::Unknown => 0x001F,
        }
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0011 => Self::LengthTooLarge,
            0x0012 => Self::LengthTooShort,
            0x0013 => Self::LengthMismatch,
            0x0014 => Self::LengthRequired,
            0x0015 => Self::BadMessageContents,
            0x0016 => Self::BadState,
            0x0018 => Self::TransferFailedUnknownError,
            0x0019 => Self::TransferMethodNotSupported,
            0x001A => Self::FileDesignatorUnknown,
            0x001B => Self::StartOffsetNotSupported,
            0x001C => Self::VersionNotSupported,
            _ => Self::Unknown,
        }
    }
}

/// Errors terminating a transfer.
///
/// Each carries the status code the peer is told; the flow emits a BDX
/// StatusReport and tears down.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BdxError {
    #[error("block counter {got} broke the expected sequence (expected {expected})")]
    BadBlockCounter { expected: u32, got: u32 },

    #[error("transfer length {length} exceeds the {limit}-byte limit")]
    TransferTooLarge { length: u64, limit: u64 },

    #[error("asynchronous transfer is not supported")]
    AsyncNotSupported,

    #[error("no common drive mode")]
    NoCommonDriveMode,

    #[error("partial transfer is only valid when the initiator sends")]
    PartialTransferNotAllowed,

    #[error("message malformed: {0}")]
    Malformed(&'static str),

    #[error("message 0x{opcode:02X} not valid in state {state}")]
    BadState { opcode: u8, state: &'static str },

    #[error("peer reported {0:?}")]
    PeerStatus(BdxStatusCode),
}

impl BdxError {
    /// The status code sent to the peer when this error ends a transfer.
    pub fn status_code(&self) -> BdxStatusCode {
        match self {
            Self::BadBlockCounter { .. } => BdxStatusCode::BadMessageContents,
            Self::TransferTooLarge { .. } => BdxStatusCode::LengthTooLarge,
            Self::AsyncNotSupported | Self::NoCommonDriveMode => {
                BdxStatusCode::TransferMethodNotSupported
            }
            Self::PartialTransferNotAllowed => BdxStatusCode::StartOffsetNotSupported,
            Self::Malformed(_) => BdxStatusCode::BadMessageContents,
            Self::BadState { .. } => BdxStatusCode::BadState,
            Self::PeerStatus(code) => *code,
        }
    }
}
