//! The fabric record.

use bytes::Bytes;
use trellis_tlv::{TlvTag, TlvValue, TlvWriter};
use trellis_types::{FabricId, FabricIndex, NodeId, VendorId};

use crate::FabricError;

/// One commissioned fabric membership, immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Fabric {
    pub fabric_index: FabricIndex,
    pub fabric_id: FabricId,
    /// The CA root public key; (root key, fabric id) is the global
    /// identity of the fabric.
    pub root_public_key: [u8; 32],
    /// Our operational node id on this fabric.
    pub node_id: NodeId,
    pub vendor_id: VendorId,
    pub label: String,
    /// Identity protection key shared fabric-wide.
    pub ipk: [u8; 16],
    /// Our node operational certificate.
    pub operational_cert: Bytes,
    /// The signing key matching the NOC subject key.
    pub operational_key: [u8; 32],
    /// Node ids of peers commissioned onto this fabric that we track.
    pub peers: Vec<NodeId>,
}

impl Fabric {
    /// Global identity: (root public key, fabric id).
    pub fn identity(&self) -> ([u8; 32], FabricId) {
        (self.root_public_key, self.fabric_id)
    }

    /// Persisted TLV form.
    pub fn encode(&self) -> Bytes {
        let mut writer = TlvWriter::new();
        writer.start_struct(TlvTag::Anonymous);
        writer.unsigned(TlvTag::context(0), u64::from(self.fabric_index.as_u8()));
        writer.unsigned(TlvTag::context(1), self.fabric_id.as_u64());
        writer.bytes(TlvTag::context(2), &self.root_public_key);
        writer.unsigned(TlvTag::context(3), self.node_id.as_u64());
        writer.unsigned(TlvTag::context(4), u64::from(self.vendor_id.as_u16()));
        writer.utf8(TlvTag::context(5), &self.label);
        writer.bytes(TlvTag::context(6), &self.ipk);
        writer.bytes(TlvTag::context(7), &self.operational_cert);
        writer.bytes(TlvTag::context(8), &self.operational_key);
        writer.start_array(TlvTag::context(9));
        for peer in &self.peers {
            writer.unsigned(TlvTag::Anonymous, peer.as_u64());
        }
        writer.end_container();
        writer.end_container();
        writer.finish()
    }

    /// Restores a record from its persisted TLV form.
    pub fn decode(bytes: &[u8]) -> Result<Self, FabricError> {
        let value = trellis_tlv::decode(bytes)
            .map_err(|_| FabricError::Certificate("fabric record malformed"))?;
        Self::from_tlv(&value)
    }

    fn from_tlv(value: &TlvValue) -> Result<Self, FabricError> {
        fn unsigned(value: &TlvValue, tag: u8) -> Result<u64, FabricError> {
            value
                .member(tag)
                .and_then(TlvValue::as_u64)
                .ok_or(FabricError::Certificate("fabric record field missing"))
        }
        fn bytes_n<const N: usize>(value: &TlvValue, tag: u8) -> Result<[u8; N], FabricError> {
            value
                .member(tag)
                .and_then(TlvValue::as_bytes)
                .and_then(|b| <[u8; N]>::try_from(b.as_ref()).ok())
                .ok_or(FabricError::Certificate("fabric record field missing"))
        }

        Ok(Self {
            fabric_index: FabricIndex::new(unsigned(value, 0)? as u8),
            fabric_id: FabricId::new(unsigned(value, 1)?),
            root_public_key: bytes_n(value, 2)?,
            node_id: NodeId::new(unsigned(value, 3)?),
            vendor_id: VendorId::new(unsigned(value, 4)? as u16),
            label: value
                .member(5)
                .and_then(TlvValue::as_utf8)
                .unwrap_or_default()
                .to_string(),
            ipk: bytes_n(value, 6)?,
            operational_cert: value
                .member(7)
                .and_then(TlvValue::as_bytes)
                .cloned()
                .ok_or(FabricError::Certificate("fabric record field missing"))?,
            operational_key: bytes_n(value, 8)?,
            peers: value
                .member(9)
                .and_then(TlvValue::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(TlvValue::as_u64)
                        .map(NodeId::new)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keys stay out of debug output.
        f.debug_struct("Fabric")
            .field("fabric_index", &self.fabric_index)
            .field("fabric_id", &self.fabric_id)
            .field("node_id", &self.node_id)
            .field("label", &self.label)
            .field("peers", &self.peers.len())
            .finish()
    }
}

/// The only construction path for a [`Fabric`].
#[derive(Debug, Default)]
pub struct FabricBuilder {
    fabric_id: Option<FabricId>,
    root_public_key: Option<[u8; 32]>,
    node_id: Option<NodeId>,
    vendor_id: VendorId,
    label: String,
    ipk: Option<[u8; 16]>,
    operational_cert: Option<Bytes>,
    operational_key: Option<[u8; 32]>,
}

impl FabricBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fabric_id(mut self, id: FabricId) -> Self {
        self.fabric_id = Some(id);
        self
    }

    pub fn root_public_key(mut self, key: [u8; 32]) -> Self {
        self.root_public_key = Some(key);
        self
    }

    pub fn node_id(mut self, id: NodeId) -> Self {
        self.node_id = Some(id);
        self
    }

    pub fn vendor_id(mut self, id: VendorId) -> Self {
        self.vendor_id = id;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn ipk(mut self, ipk: [u8; 16]) -> Self {
        self.ipk = Some(ipk);
        self
    }

    pub fn operational_cert(mut self, cert: Bytes) -> Self {
        self.operational_cert = Some(cert);
        self
    }

    pub fn operational_key(mut self, key: [u8; 32]) -> Self {
        self.operational_key = Some(key);
        self
    }

    /// Finalizes the record. The index is assigned by the manager at
    /// registration.
    pub fn build(self, fabric_index: FabricIndex) -> Result<Fabric, FabricError> {
        Ok(Fabric {
            fabric_index,
            fabric_id: self
                .fabric_id
                .ok_or(FabricError::BuilderIncomplete("fabric id"))?,
            root_public_key: self
                .root_public_key
                .ok_or(FabricError::BuilderIncomplete("root public key"))?,
            node_id: self
                .node_id
                .ok_or(FabricError::BuilderIncomplete("node id"))?,
            vendor_id: self.vendor_id,
            label: self.label,
            ipk: self.ipk.ok_or(FabricError::BuilderIncomplete("IPK"))?,
            operational_cert: self
                .operational_cert
                .ok_or(FabricError::BuilderIncomplete("operational certificate"))?,
            operational_key: self
                .operational_key
                .ok_or(FabricError::BuilderIncomplete("operational key"))?,
            peers: Vec::new(),
        })
    }
}
