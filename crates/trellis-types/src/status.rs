//! Interaction-model status codes.
//!
//! A single status byte crosses the wire in `StatusResponse` messages and
//! per-path status entries. The set below is the interaction-model status
//! table; unknown bytes decode to [`StatusCode::Failure`] rather than
//! failing the parse, so a newer peer never wedges an older node.

use serde::{Deserialize, Serialize};

/// One-byte interaction-model status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0x00,
    Failure = 0x01,
    InvalidSubscription = 0x7D,
    UnsupportedAccess = 0x7E,
    UnsupportedEndpoint = 0x7F,
    InvalidAction = 0x80,
    UnsupportedCommand = 0x81,
    InvalidCommand = 0x85,
    UnsupportedAttribute = 0x86,
    ConstraintError = 0x87,
    UnsupportedWrite = 0x88,
    ResourceExhausted = 0x89,
    NotFound = 0x8B,
    UnreportableAttribute = 0x8C,
    InvalidDataType = 0x8D,
    UnsupportedRead = 0x8F,
    DataVersionMismatch = 0x92,
    Timeout = 0x94,
    Busy = 0x9C,
    UnsupportedCluster = 0xC3,
    NoUpstreamSubscription = 0xC5,
    NeedsTimedInteraction = 0xC6,
    UnsupportedEvent = 0xC7,
    PathsExhausted = 0xC8,
    TimedRequestMismatch = 0xC9,
    FailsafeRequired = 0xCA,
}

impl StatusCode {
    /// Decodes a wire byte; unknown values map to [`StatusCode::Failure`].
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Success,
            0x7D => Self::InvalidSubscription,
            0x7E => Self::UnsupportedAccess,
            0x7F => Self::UnsupportedEndpoint,
            0x80 => Self::InvalidAction,
            0x81 => Self::UnsupportedCommand,
            0x85 => Self::InvalidCommand,
            0x86 => Self::UnsupportedAttribute,
            0x87 => Self::ConstraintError,
            0x88 => Self::UnsupportedWrite,
            0x89 => Self::ResourceExhausted,
            0x8B => Self::NotFound,
            0x8C => Self::UnreportableAttribute,
            0x8D => Self::InvalidDataType,
            0x8F => Self::UnsupportedRead,
            0x92 => Self::DataVersionMismatch,
            0x94 => Self::Timeout,
            0x9C => Self::Busy,
            0xC3 => Self::UnsupportedCluster,
            0xC5 => Self::NoUpstreamSubscription,
            0xC6 => Self::NeedsTimedInteraction,
            0xC7 => Self::UnsupportedEvent,
            0xC8 => Self::PathsExhausted,
            0xC9 => Self::TimedRequestMismatch,
            0xCA => Self::FailsafeRequired,
            _ => Self::Failure,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}(0x{:02X})", self.as_byte())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(StatusCode::Success)]
    #[test_case(StatusCode::ConstraintError)]
    #[test_case(StatusCode::Busy)]
    #[test_case(StatusCode::NeedsTimedInteraction)]
    #[test_case(StatusCode::DataVersionMismatch)]
    fn byte_roundtrip(code: StatusCode) {
        assert_eq!(StatusCode::from_byte(code.as_byte()), code);
    }

    #[test]
    fn unknown_byte_maps_to_failure() {
        assert_eq!(StatusCode::from_byte(0x42), StatusCode::Failure);
        assert_eq!(StatusCode::from_byte(0xFF), StatusCode::Failure);
    }
}
