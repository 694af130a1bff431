//! Secure-channel protocol constants and the StatusReport message.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::SessionError;

/// Secure-channel opcodes.
pub mod opcodes {
    pub const STANDALONE_ACK: u8 = 0x10;
    pub const PBKDF_PARAM_REQUEST: u8 = 0x20;
    pub const PBKDF_PARAM_RESPONSE: u8 = 0x21;
    pub const PASE_PAKE1: u8 = 0x22;
    pub const PASE_PAKE2: u8 = 0x23;
    pub const PASE_PAKE3: u8 = 0x24;
    pub const CASE_SIGMA1: u8 = 0x30;
    pub const CASE_SIGMA2: u8 = 0x31;
    pub const CASE_SIGMA3: u8 = 0x32;
    pub const STATUS_REPORT: u8 = 0x40;
}

/// General status codes of a StatusReport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralStatusCode {
    Success,
    Failure,
    BadPrecondition,
    OutOfRange,
    Other(u16),
}

impl GeneralStatusCode {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Success,
            1 => Self::Failure,
            2 => Self::BadPrecondition,
            3 => Self::OutOfRange,
            other => Self::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::BadPrecondition => 2,
            Self::OutOfRange => 3,
            Self::Other(v) => v,
        }
    }
}

/// Secure-channel protocol status codes carried in a StatusReport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureChannelStatus {
    SessionEstablishmentSuccess,
    NoSharedTrustRoots,
    InvalidParameter,
    CloseSession,
    Busy,
    Other(u16),
}

impl SecureChannelStatus {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => Self::SessionEstablishmentSuccess,
            0x0001 => Self::NoSharedTrustRoots,
            0x0002 => Self::InvalidParameter,
            0x0003 => Self::CloseSession,
            0x0004 => Self::Busy,
            other => Self::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::SessionEstablishmentSuccess => 0x0000,
            Self::NoSharedTrustRoots => 0x0001,
            Self::InvalidParameter => 0x0002,
            Self::CloseSession => 0x0003,
            Self::Busy => 0x0004,
            Self::Other(v) => v,
        }
    }
}

/// The secure-channel StatusReport message.
///
/// Wire form: `[general:u16][protocol_id:u32][protocol_code:u16]`,
/// little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub general: GeneralStatusCode,
    pub protocol_id: u32,
    pub code: SecureChannelStatus,
}

impl StatusReport {
    /// Secure-channel protocol id as carried inside status reports.
    pub const SECURE_CHANNEL_PROTOCOL: u32 = 0x0000;

    pub fn session_establishment_success() -> Self {
        Self {
            general: GeneralStatusCode::Success,
            protocol_id: Self::SECURE_CHANNEL_PROTOCOL,
            code: SecureChannelStatus::SessionEstablishmentSuccess,
        }
    }

    pub fn close_session() -> Self {
        Self {
            general: GeneralStatusCode::Success,
            protocol_id: Self::SECURE_CHANNEL_PROTOCOL,
            code: SecureChannelStatus::CloseSession,
        }
    }

    pub fn failure(code: SecureChannelStatus) -> Self {
        Self {
            general: GeneralStatusCode::Failure,
            protocol_id: Self::SECURE_CHANNEL_PROTOCOL,
            code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.general == GeneralStatusCode::Success
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u16_le(self.general.as_u16());
        buf.put_u32_le(self.protocol_id);
        buf.put_u16_le(self.code.as_u16());
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, SessionError> {
        if bytes.remaining() < 8 {
            return Err(SessionError::FrameRejected {
                reason: "status report too short",
            });
        }
        Ok(Self {
            general: GeneralStatusCode::from_u16(bytes.get_u16_le()),
            protocol_id: bytes.get_u32_le(),
            code: SecureChannelStatus::from_u16(bytes.get_u16_le()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_report_roundtrip() {
        let report = StatusReport::failure(SecureChannelStatus::Busy);
        let decoded = StatusReport::decode(report.encode()).unwrap();
        assert_eq!(decoded, report);
        assert!(!decoded.is_success());
    }

    #[test]
    fn short_report_rejected() {
        assert!(StatusReport::decode(Bytes::from_static(&[0, 0, 0])).is_err());
    }
}
