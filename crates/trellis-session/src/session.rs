//! Secure session state and frame protection.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use trellis_crypto::{AEAD_KEY_LEN, AEAD_NONCE_LEN, CryptoProvider};
use trellis_exchange::{Message, MessageHeader};
use trellis_types::{FabricIndex, NodeId, SessionId, Timestamp};
use zeroize::Zeroize;

use crate::counters::{CounterVerdict, MessageCounter, ReplayWindow};
use crate::SessionError;

/// How the session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Pase,
    Case,
}

/// Parameters both peers announce during establishment.
///
/// The resulting session runs MRP with the *peer's* announced intervals
/// and bounds report chunks by the payload budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParameters {
    /// Peer MRP retransmit base when idle.
    pub idle_interval: Duration,
    /// Peer MRP retransmit base when active.
    pub active_interval: Duration,
    /// Worst-case peer processing latency added to response deadlines.
    pub max_peer_response_time: Duration,
    /// Largest protected payload one frame may carry.
    pub max_payload: usize,
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(500),
            active_interval: Duration::from_millis(300),
            max_peer_response_time: Duration::from_secs(10),
            max_payload: 1200,
        }
    }
}

impl SessionParameters {
    /// TLV form carried inside handshake messages.
    pub fn to_tlv(&self) -> trellis_tlv::TlvValue {
        use trellis_tlv::{TlvTag, TlvValue};
        TlvValue::Struct(vec![
            (
                TlvTag::context(1),
                TlvValue::UnsignedInt(self.idle_interval.as_millis() as u64),
            ),
            (
                TlvTag::context(2),
                TlvValue::UnsignedInt(self.active_interval.as_millis() as u64),
            ),
            (
                TlvTag::context(3),
                TlvValue::UnsignedInt(self.max_peer_response_time.as_millis() as u64),
            ),
            (
                TlvTag::context(4),
                TlvValue::UnsignedInt(self.max_payload as u64),
            ),
        ])
    }

    /// Parses the TLV form; absent fields keep their defaults.
    pub fn from_tlv(value: &trellis_tlv::TlvValue) -> Self {
        let mut params = Self::default();
        let field = |n: u8| value.member(n).and_then(trellis_tlv::TlvValue::as_u64);
        if let Some(ms) = field(1) {
            params.idle_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = field(2) {
            params.active_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = field(3) {
            params.max_peer_response_time = Duration::from_millis(ms);
        }
        if let Some(bytes) = field(4) {
            params.max_payload = bytes as usize;
        }
        params
    }
}

/// The symmetric key set of one secure session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub i2r: [u8; AEAD_KEY_LEN],
    pub r2i: [u8; AEAD_KEY_LEN],
    pub attestation_challenge: [u8; AEAD_KEY_LEN],
}

impl SessionKeys {
    /// Derives the key set from a shared secret.
    ///
    /// HKDF-SHA-256 expand to 48 bytes: I2R, R2I, attestation challenge.
    pub fn derive(
        crypto: &dyn CryptoProvider,
        shared_secret: &[u8],
        salt: &[u8],
        info: &[u8],
    ) -> Self {
        let mut okm = [0u8; AEAD_KEY_LEN * 3];
        crypto.hkdf_sha256(salt, shared_secret, info, &mut okm);
        let mut keys = Self {
            i2r: [0; AEAD_KEY_LEN],
            r2i: [0; AEAD_KEY_LEN],
            attestation_challenge: [0; AEAD_KEY_LEN],
        };
        keys.i2r.copy_from_slice(&okm[..16]);
        keys.r2i.copy_from_slice(&okm[16..32]);
        keys.attestation_challenge.copy_from_slice(&okm[32..]);
        okm.zeroize();
        keys
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.write_str("SessionKeys{..}")
    }
}

/// Which role this node played during establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Initiator,
    Responder,
}

/// The result of a completed PASE or CASE handshake.
#[derive(Debug, Clone)]
pub struct EstablishedSession {
    pub kind: SessionKind,
    pub role: SessionRole,
    pub local_id: SessionId,
    pub peer_id: SessionId,
    pub keys: SessionKeys,
    pub local_node_id: NodeId,
    pub peer_node_id: NodeId,
    /// CASE sessions bind to a fabric; PASE sessions do not.
    pub fabric_index: Option<FabricIndex>,
    pub parameters: SessionParameters,
}

/// One live secure session.
#[derive(Debug)]
pub struct SecureSession {
    pub kind: SessionKind,
    pub role: SessionRole,
    pub local_id: SessionId,
    pub peer_id: SessionId,
    keys: SessionKeys,
    pub local_node_id: NodeId,
    pub peer_node_id: NodeId,
    pub fabric_index: Option<FabricIndex>,
    pub parameters: SessionParameters,
    counter: MessageCounter,
    replay: ReplayWindow,
    pub last_activity: Timestamp,
}

impl SecureSession {
    pub fn new(established: EstablishedSession, now: Timestamp) -> Self {
        Self {
            kind: established.kind,
            role: established.role,
            local_id: established.local_id,
            peer_id: established.peer_id,
            keys: established.keys,
            local_node_id: established.local_node_id,
            peer_node_id: established.peer_node_id,
            fabric_index: established.fabric_index,
            parameters: established.parameters,
            counter: MessageCounter::new(1),
            replay: ReplayWindow::new(),
            last_activity: now,
        }
    }

    /// The attestation challenge bound to this session.
    pub fn attestation_challenge(&self) -> &[u8; AEAD_KEY_LEN] {
        &self.keys.attestation_challenge
    }

    /// Allocates the next outbound message counter.
    pub fn allocate_counter(&mut self) -> Result<u32, SessionError> {
        self.counter.allocate()
    }

    /// Replay-checks an inbound counter.
    pub fn check_counter(&mut self, counter: u32) -> CounterVerdict {
        self.replay.check(counter)
    }

    fn encrypt_key(&self) -> &[u8; AEAD_KEY_LEN] {
        match self.role {
            SessionRole::Initiator => &self.keys.i2r,
            SessionRole::Responder => &self.keys.r2i,
        }
    }

    fn decrypt_key(&self) -> &[u8; AEAD_KEY_LEN] {
        match self.role {
            SessionRole::Initiator => &self.keys.r2i,
            SessionRole::Responder => &self.keys.i2r,
        }
    }

    /// Builds and seals a wire frame around a protected part.
    ///
    /// The header addresses the peer's session id; the nonce binds the
    /// security flags, counter and our node id.
    pub fn seal(
        &self,
        crypto: &dyn CryptoProvider,
        counter: u32,
        protected: &[u8],
    ) -> Bytes {
        let header = MessageHeader::unicast(self.peer_id, counter);
        let mut header_bytes = BytesMut::with_capacity(16);
        header.encode_into(&mut header_bytes);

        let nonce = build_nonce(header.security.as_byte(), counter, self.local_node_id);
        let ciphertext = crypto.aead_encrypt(self.encrypt_key(), &nonce, &header_bytes, protected);

        let mut frame = header_bytes;
        frame.extend_from_slice(&ciphertext);
        frame.freeze()
    }

    /// Opens a sealed frame whose header already parsed.
    pub fn open(
        &self,
        crypto: &dyn CryptoProvider,
        header: &MessageHeader,
        header_len: usize,
        frame: &Bytes,
    ) -> Result<Message, SessionError> {
        let aad = frame.slice(..header_len);
        let ciphertext = frame.slice(header_len..);
        let source = header.source.unwrap_or(self.peer_node_id);
        let nonce = build_nonce(header.security.as_byte(), header.counter, source);

        let protected = crypto
            .aead_decrypt(self.decrypt_key(), &nonce, &aad, &ciphertext)
            .map_err(SessionError::Crypto)?;
        Message::from_protected(*header, Bytes::from(protected)).map_err(|_| {
            SessionError::FrameRejected {
                reason: "protected part malformed",
            }
        })
    }

    pub fn touch(&mut self, now: Timestamp) {
        self.last_activity = now;
    }
}

/// AEAD nonce: security flags, counter, source node id (little-endian).
fn build_nonce(security: u8, counter: u32, source: NodeId) -> [u8; AEAD_NONCE_LEN] {
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    nonce[0] = security;
    nonce[1..5].copy_from_slice(&counter.to_le_bytes());
    nonce[5..].copy_from_slice(&source.as_u64().to_le_bytes());
    nonce
}
