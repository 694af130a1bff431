//! # trellis-session: The session layer
//!
//! Sessions carry the secure channel: PASE (passcode) and CASE
//! (certificate) establishment over the unsecured session, AES key
//! derivation, per-session message counters with replay protection, and
//! the session registry with capacity eviction.
//!
//! Like the exchange layer, everything is a deterministic state machine:
//! handshake messages go in, response frames and established sessions
//! come out. Crypto primitives arrive through
//! [`trellis_crypto::CryptoProvider`].

mod case;
mod counters;
mod error;
mod manager;
mod pase;
mod secure_channel;
mod session;

pub use case::{
    CaseCredentials, CaseInitiator, CaseOutput, CaseResponder, CertificateValidator, PeerIdentity,
    destination_id,
};
pub use counters::{CounterVerdict, MessageCounter, ReplayWindow};
pub use error::SessionError;
pub use manager::{
    InboundVerdict, SessionCloseReason, SessionClosed, SessionManager, UNSECURED_HANDLE,
};
pub use pase::{PaseInitiator, PaseOutput, PaseResponder, PbkdfParameters};
pub use secure_channel::{
    GeneralStatusCode, SecureChannelStatus, StatusReport, opcodes as secure_channel_opcodes,
};
pub use session::{
    EstablishedSession, SecureSession, SessionKeys, SessionKind, SessionParameters, SessionRole,
};

/// SPAKE2+ context literal for PASE.
pub const PASE_CONTEXT: &[u8] = b"CHIP PAKE V1 Commissioning";

#[cfg(test)]
mod tests;
