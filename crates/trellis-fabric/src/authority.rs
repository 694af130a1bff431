//! The fabric certificate authority.
//!
//! One process-wide authority per CA: owns the root keypair, allocates
//! fabric ids, issues node operational certificates and assembles
//! fabrics for registration with the manager.

use tracing::info;
use trellis_crypto::CryptoProvider;
use trellis_types::{FabricId, NodeId, VendorId};

use crate::cert::{self, NocContents};
use crate::fabric::FabricBuilder;
use crate::manager::FabricManager;
use crate::{Fabric, FabricError};

/// A certificate authority and fabric factory.
pub struct FabricAuthority {
    ca_secret: [u8; 32],
    ca_public: [u8; 32],
    next_fabric_id: u64,
}

impl FabricAuthority {
    /// Creates an authority with a fresh root keypair.
    pub fn new(crypto: &dyn CryptoProvider) -> Self {
        let ca_secret = crypto.generate_signing_key();
        let ca_public = crypto.signing_public_key(&ca_secret);
        Self {
            ca_secret,
            ca_public,
            next_fabric_id: 1,
        }
    }

    /// Restores an authority from its persisted root key.
    pub fn from_root_key(
        crypto: &dyn CryptoProvider,
        ca_secret: [u8; 32],
        next_fabric_id: u64,
    ) -> Self {
        let ca_public = crypto.signing_public_key(&ca_secret);
        Self {
            ca_secret,
            ca_public,
            next_fabric_id: next_fabric_id.max(1),
        }
    }

    pub fn root_public_key(&self) -> [u8; 32] {
        self.ca_public
    }

    /// Allocates a fresh fabric id under this CA.
    pub fn allocate_fabric_id(&mut self) -> FabricId {
        let id = FabricId::new(self.next_fabric_id);
        self.next_fabric_id += 1;
        id
    }

    /// Issues a NOC and its matching operational key.
    pub fn issue_noc(
        &self,
        crypto: &dyn CryptoProvider,
        fabric_id: FabricId,
        node_id: NodeId,
    ) -> (bytes::Bytes, [u8; 32]) {
        let operational_key = crypto.generate_signing_key();
        let noc = cert::issue(
            crypto,
            &self.ca_secret,
            &NocContents {
                node_id,
                fabric_id,
                public_key: crypto.signing_public_key(&operational_key),
            },
        );
        (noc, operational_key)
    }

    /// Assembles a complete fabric and registers it.
    pub fn commission(
        &mut self,
        crypto: &dyn CryptoProvider,
        manager: &mut FabricManager,
        node_id: NodeId,
        vendor_id: VendorId,
        label: &str,
    ) -> Result<Fabric, FabricError> {
        let fabric_id = self.allocate_fabric_id();
        let (noc, operational_key) = self.issue_noc(crypto, fabric_id, node_id);
        let mut ipk = [0u8; 16];
        crypto.fill_random(&mut ipk);

        let builder = FabricBuilder::new()
            .fabric_id(fabric_id)
            .root_public_key(self.ca_public)
            .node_id(node_id)
            .vendor_id(vendor_id)
            .label(label)
            .ipk(ipk)
            .operational_cert(noc)
            .operational_key(operational_key);
        let fabric = manager.add(builder)?;
        info!(fabric = %fabric.fabric_index, id = %fabric_id, "fabric commissioned");
        Ok(fabric)
    }
}

impl std::fmt::Debug for FabricAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FabricAuthority")
            .field("next_fabric_id", &self.next_fabric_id)
            .finish()
    }
}
