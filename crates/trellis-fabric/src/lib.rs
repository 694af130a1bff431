//! # trellis-fabric: Fabrics, certificates and peers
//!
//! A fabric is the set of nodes commissioned under one certificate
//! authority, sharing an identity protection key. This crate owns:
//!
//! - operational certificates ([`cert`]) and their issuance by a
//!   [`FabricAuthority`]
//! - the immutable [`Fabric`] record, built only through
//!   [`FabricBuilder`]
//! - the [`FabricManager`] registry with removal cascades
//! - the [`PeerAddressStore`] mapping `(fabric, node)` to operational
//!   discovery data

pub mod cert;

mod authority;
mod fabric;
mod manager;
mod peers;

pub use authority::FabricAuthority;
pub use fabric::{Fabric, FabricBuilder};
pub use manager::{FabricManager, FabricValidator};
pub use peers::{OperationalPeer, PeerAddressStore};

use trellis_types::{FabricId, FabricIndex, NodeId, PeerAddress};

/// Errors surfaced by fabric management.
#[derive(thiserror::Error, Debug)]
pub enum FabricError {
    #[error("fabric builder missing {0}")]
    BuilderIncomplete(&'static str),

    #[error("no fabric at index {0}")]
    NotFound(FabricIndex),

    #[error("fabric table is full")]
    TableFull,

    #[error("fabric ({0}, {1}) is already commissioned")]
    AlreadyCommissioned(FabricId, NodeId),

    #[error("peer address {0} is already allocated")]
    AddressCollision(PeerAddress),

    #[error("certificate rejected: {0}")]
    Certificate(&'static str),

    #[error(transparent)]
    Storage(#[from] trellis_storage::StorageError),
}
