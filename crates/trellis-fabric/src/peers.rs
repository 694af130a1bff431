//! Peer address allocation and operational discovery data.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;
use trellis_storage::StorageContext;
use trellis_tlv::{TlvTag, TlvValue, TlvWriter};
use trellis_types::{FabricIndex, NodeId, PeerAddress};

use crate::FabricError;

/// What operational discovery learned about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationalPeer {
    pub address: PeerAddress,
    /// Resolved host names (or literal addresses) for the peer.
    pub hostnames: Vec<String>,
    pub port: u16,
    /// Session idle interval the peer advertises.
    pub idle_interval: Option<Duration>,
    /// Session active interval the peer advertises.
    pub active_interval: Option<Duration>,
}

impl OperationalPeer {
    fn encode(&self) -> bytes::Bytes {
        let mut writer = TlvWriter::new();
        writer.start_struct(TlvTag::Anonymous);
        writer.unsigned(
            TlvTag::context(0),
            u64::from(self.address.fabric_index.as_u8()),
        );
        writer.unsigned(TlvTag::context(1), self.address.node_id.as_u64());
        writer.start_array(TlvTag::context(2));
        for host in &self.hostnames {
            writer.utf8(TlvTag::Anonymous, host);
        }
        writer.end_container();
        writer.unsigned(TlvTag::context(3), u64::from(self.port));
        if let Some(idle) = self.idle_interval {
            writer.unsigned(TlvTag::context(4), idle.as_millis() as u64);
        }
        if let Some(active) = self.active_interval {
            writer.unsigned(TlvTag::context(5), active.as_millis() as u64);
        }
        writer.end_container();
        writer.finish()
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let value = trellis_tlv::decode(bytes).ok()?;
        Some(Self {
            address: PeerAddress::new(
                FabricIndex::new(value.member(0)?.as_u64()? as u8),
                NodeId::new(value.member(1)?.as_u64()?),
            ),
            hostnames: value
                .member(2)
                .and_then(TlvValue::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(TlvValue::as_utf8)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            port: value.member(3)?.as_u64()? as u16,
            idle_interval: value
                .member(4)
                .and_then(TlvValue::as_u64)
                .map(Duration::from_millis),
            active_interval: value
                .member(5)
                .and_then(TlvValue::as_u64)
                .map(Duration::from_millis),
        })
    }
}

/// Allocates unique peer addresses and indexes discovery data.
pub struct PeerAddressStore {
    peers: BTreeMap<PeerAddress, OperationalPeer>,
    persistence: Option<StorageContext>,
}

impl PeerAddressStore {
    /// Opens the store, repopulating from persisted commissioning state.
    pub fn new(persistence: Option<StorageContext>) -> Self {
        let mut store = Self {
            peers: BTreeMap::new(),
            persistence,
        };
        store.load();
        store
    }

    fn load(&mut self) {
        let Some(ctx) = &self.persistence else {
            return;
        };
        let keys = match ctx.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "peer table unreadable; starting empty");
                return;
            }
        };
        for key in keys {
            if let Ok(Some(bytes)) = ctx.get_raw(&key) {
                match OperationalPeer::decode(&bytes) {
                    Some(peer) => {
                        self.peers.insert(peer.address, peer);
                    }
                    None => warn!(key, "peer record skipped"),
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Claims an address for a client node; collisions are rejected.
    pub fn allocate(
        &mut self,
        fabric_index: FabricIndex,
        node_id: NodeId,
    ) -> Result<PeerAddress, FabricError> {
        let address = PeerAddress::new(fabric_index, node_id);
        if self.peers.contains_key(&address) {
            return Err(FabricError::AddressCollision(address));
        }
        let peer = OperationalPeer {
            address,
            hostnames: Vec::new(),
            port: 0,
            idle_interval: None,
            active_interval: None,
        };
        self.persist(&peer);
        self.peers.insert(address, peer);
        Ok(address)
    }

    /// Updates a peer's discovery data.
    pub fn update(&mut self, peer: OperationalPeer) -> Result<(), FabricError> {
        if !self.peers.contains_key(&peer.address) {
            return Err(FabricError::AddressCollision(peer.address));
        }
        self.persist(&peer);
        self.peers.insert(peer.address, peer);
        Ok(())
    }

    pub fn get(&self, address: PeerAddress) -> Option<&OperationalPeer> {
        self.peers.get(&address)
    }

    /// Peers on one fabric, in address order.
    pub fn peers_of_fabric(
        &self,
        fabric_index: FabricIndex,
    ) -> impl Iterator<Item = &OperationalPeer> {
        self.peers
            .values()
            .filter(move |p| p.address.fabric_index == fabric_index)
    }

    /// Drops every peer of a removed fabric.
    pub fn remove_fabric(&mut self, fabric_index: FabricIndex) {
        let doomed: Vec<PeerAddress> = self
            .peers
            .keys()
            .filter(|a| a.fabric_index == fabric_index)
            .copied()
            .collect();
        for address in doomed {
            self.peers.remove(&address);
            if let Some(ctx) = &self.persistence {
                if let Err(e) = ctx.remove(&storage_key(address)) {
                    warn!(error = %e, "peer record removal not persisted");
                }
            }
        }
    }

    fn persist(&self, peer: &OperationalPeer) {
        if let Some(ctx) = &self.persistence {
            if let Err(e) = ctx.set_raw(&storage_key(peer.address), peer.encode()) {
                warn!(error = %e, "peer record not persisted");
            }
        }
    }
}

fn storage_key(address: PeerAddress) -> String {
    format!(
        "{}-{:016X}",
        address.fabric_index.as_u8(),
        address.node_id.as_u64()
    )
}

impl std::fmt::Debug for PeerAddressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerAddressStore")
            .field("peers", &self.peers.len())
            .finish()
    }
}
