//! The fabric registry.
//!
//! Holds every commissioned fabric, assigns local indices, persists
//! records, and runs the removal cascade: `deleting` handlers scrub
//! fabric-scoped data (ACL rows, peer records, sessions), then
//! `fabric_scoped_data_sanitized` fires exactly once.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{info, warn};
use trellis_crypto::CryptoProvider;
use trellis_session::{
    CaseCredentials, CertificateValidator, PeerIdentity, SessionError, destination_id,
};
use trellis_storage::StorageContext;
use trellis_types::{EventBus, EventHandle, FabricId, FabricIndex};

use crate::fabric::{Fabric, FabricBuilder};
use crate::FabricError;

/// Highest number of concurrently commissioned fabrics.
const MAX_FABRICS: usize = 16;

/// The registry of commissioned fabrics.
pub struct FabricManager {
    fabrics: Vec<Fabric>,
    next_index: FabricIndex,
    /// Fires before a fabric's records are dropped; handlers scrub
    /// their fabric-scoped data.
    deleting: EventBus<FabricIndex>,
    /// Fires exactly once per removal, after every handler ran.
    sanitized: EventBus<FabricIndex>,
    persistence: Option<StorageContext>,
}

impl FabricManager {
    pub fn new(persistence: Option<StorageContext>) -> Self {
        let mut manager = Self {
            fabrics: Vec::new(),
            next_index: FabricIndex::MIN,
            deleting: EventBus::new(),
            sanitized: EventBus::new(),
            persistence,
        };
        manager.load();
        manager
    }

    fn load(&mut self) {
        let Some(ctx) = &self.persistence else {
            return;
        };
        let keys = match ctx.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "fabric table unreadable; starting empty");
                return;
            }
        };
        for key in keys {
            match ctx.get_raw(&key) {
                Ok(Some(bytes)) => match Fabric::decode(&bytes) {
                    Ok(fabric) => {
                        if fabric.fabric_index >= self.next_index {
                            self.next_index = fabric.fabric_index.next();
                        }
                        self.fabrics.push(fabric);
                    }
                    Err(e) => warn!(key, error = %e, "fabric record skipped"),
                },
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "fabric record unreadable"),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.fabrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fabrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fabric> {
        self.fabrics.iter()
    }

    pub fn find(&self, index: FabricIndex) -> Option<&Fabric> {
        self.fabrics.iter().find(|f| f.fabric_index == index)
    }

    /// Looks a fabric up by its global identity.
    pub fn find_by_identity(
        &self,
        root_public_key: &[u8; 32],
        fabric_id: FabricId,
    ) -> Option<&Fabric> {
        self.fabrics
            .iter()
            .find(|f| &f.root_public_key == root_public_key && f.fabric_id == fabric_id)
    }

    /// Registers a built fabric, assigning its local index.
    pub fn add(&mut self, builder: FabricBuilder) -> Result<Fabric, FabricError> {
        if self.fabrics.len() >= MAX_FABRICS {
            return Err(FabricError::TableFull);
        }
        let index = self.allocate_index();
        let fabric = builder.build(index)?;
        if self
            .find_by_identity(&fabric.root_public_key, fabric.fabric_id)
            .is_some()
        {
            return Err(FabricError::AlreadyCommissioned(
                fabric.fabric_id,
                fabric.node_id,
            ));
        }
        self.persist(&fabric);
        info!(fabric = %index, "fabric added");
        self.fabrics.push(fabric.clone());
        Ok(fabric)
    }

    fn allocate_index(&mut self) -> FabricIndex {
        // Skip indices still occupied (removal leaves holes).
        loop {
            let candidate = self.next_index;
            self.next_index = self.next_index.next();
            if self.find(candidate).is_none() {
                return candidate;
            }
        }
    }

    fn persist(&self, fabric: &Fabric) {
        if let Some(ctx) = &self.persistence {
            if let Err(e) = ctx.set_raw(&fabric.fabric_index.as_u8().to_string(), fabric.encode())
            {
                warn!(error = %e, "fabric record not persisted");
            }
        }
    }

    /// Records a commissioned peer on a fabric.
    pub fn add_peer(
        &mut self,
        index: FabricIndex,
        peer: trellis_types::NodeId,
    ) -> Result<(), FabricError> {
        let fabric = self
            .fabrics
            .iter_mut()
            .find(|f| f.fabric_index == index)
            .ok_or(FabricError::NotFound(index))?;
        if !fabric.peers.contains(&peer) {
            fabric.peers.push(peer);
        }
        let fabric = fabric.clone();
        self.persist(&fabric);
        Ok(())
    }

    /// Removes a fabric with the full sanitisation cascade.
    pub fn remove(&mut self, index: FabricIndex) -> Result<(), FabricError> {
        let position = self
            .fabrics
            .iter()
            .position(|f| f.fabric_index == index)
            .ok_or(FabricError::NotFound(index))?;

        // Handlers scrub ACL rows, peer records and sessions first.
        self.deleting.emit(&index);
        self.fabrics.remove(position);
        if let Some(ctx) = &self.persistence {
            if let Err(e) = ctx.remove(&index.as_u8().to_string()) {
                warn!(error = %e, "fabric record removal not persisted");
            }
        }
        info!(fabric = %index, "fabric removed");
        self.sanitized.emit(&index);
        Ok(())
    }

    /// Registers a scrubber for fabric-scoped data.
    pub fn on_deleting(&self, handler: impl Fn(&FabricIndex) + 'static) -> EventHandle {
        self.deleting.register(handler)
    }

    /// Registers an observer for the end-of-cascade signal.
    pub fn on_sanitized(&self, handler: impl Fn(&FabricIndex) + 'static) -> EventHandle {
        self.sanitized.register(handler)
    }
}

impl std::fmt::Debug for FabricManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FabricManager")
            .field("fabrics", &self.fabrics.len())
            .finish()
    }
}

/// Bridges the fabric table into CASE establishment.
///
/// Implements the session layer's [`CertificateValidator`]: destination
/// ids resolve against every local fabric's IPK, and peer NOCs verify
/// against the owning fabric's root key.
pub struct FabricValidator {
    pub manager: Rc<RefCell<FabricManager>>,
    pub crypto: Rc<dyn CryptoProvider>,
}

impl CertificateValidator for FabricValidator {
    fn resolve_destination(
        &self,
        initiator_random: &[u8],
        destination: &[u8],
    ) -> Option<CaseCredentials> {
        let initiator_random: [u8; 32] = initiator_random.try_into().ok()?;
        let manager = self.manager.borrow();
        for fabric in manager.iter() {
            let expected = destination_id(
                self.crypto.as_ref(),
                &fabric.ipk,
                &initiator_random,
                &fabric.root_public_key,
                fabric.fabric_id.as_u64(),
                fabric.node_id,
            );
            if expected.as_slice() == destination {
                return Some(CaseCredentials {
                    fabric_index: fabric.fabric_index,
                    local_node_id: fabric.node_id,
                    noc: fabric.operational_cert.clone(),
                    signing_key: fabric.operational_key,
                    ipk: fabric.ipk,
                    root_public_key: fabric.root_public_key,
                    fabric_id: fabric.fabric_id.as_u64(),
                });
            }
        }
        None
    }

    fn validate_peer_noc(
        &self,
        fabric_index: FabricIndex,
        noc: &[u8],
    ) -> Result<PeerIdentity, SessionError> {
        let manager = self.manager.borrow();
        let fabric = manager
            .find(fabric_index)
            .ok_or(SessionError::CertificateRejected)?;
        let contents = crate::cert::verify(self.crypto.as_ref(), &fabric.root_public_key, noc)
            .map_err(|_| SessionError::CertificateRejected)?;
        if contents.fabric_id != fabric.fabric_id {
            return Err(SessionError::CertificateRejected);
        }
        Ok(PeerIdentity {
            node_id: contents.node_id,
            fabric_index,
        })
    }
}
