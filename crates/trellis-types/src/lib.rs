//! # trellis-types: Core types for Trellis
//!
//! This crate contains shared types used across the Trellis node runtime:
//! - Addressing ([`NodeId`], [`FabricId`], [`FabricIndex`], [`PeerAddress`], [`GroupId`])
//! - Data model ids ([`EndpointNumber`], [`ClusterId`], [`AttributeId`], [`CommandId`], [`EventId`])
//! - Versioning ([`DataVersion`], [`EventNumber`])
//! - Protocol ids ([`SubscriptionId`], [`ExchangeId`], [`SessionId`])
//! - Temporal types ([`Timestamp`])
//! - Interaction-model status ([`StatusCode`])
//! - Event priority ([`EventPriority`])

mod events;
mod status;
mod time;

pub use events::{EventBus, EventHandle};
pub use status::StatusCode;
pub use time::Timestamp;

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

// ============================================================================
// Addressing - All Copy (cheap 8-byte values or smaller)
// ============================================================================

/// Operational node identifier, unique within a fabric.
///
/// The operational id space reserves sub-ranges for group and temporary
/// ids; [`NodeId::is_operational`] tells the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Start of the group node id range (`0xFFFF_FFFF_FFFF_0000`).
    pub const GROUP_RANGE_START: u64 = 0xFFFF_FFFF_FFFF_0000;

    /// Start of the temporary-local range used by unsecured sessions.
    pub const TEMPORARY_RANGE_START: u64 = 0xFFFF_FFFE_0000_0000;

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Builds the node id that addresses a multicast group.
    pub fn from_group(group: GroupId) -> Self {
        Self(Self::GROUP_RANGE_START | u64::from(group.as_u16()))
    }

    /// Returns true if this id addresses a group rather than a single node.
    pub fn is_group(self) -> bool {
        self.0 >= Self::GROUP_RANGE_START
    }

    /// Returns the group id when this is a group node id.
    pub fn group(self) -> Option<GroupId> {
        self.is_group()
            .then(|| GroupId::new((self.0 & 0xFFFF) as u16))
    }

    /// Returns true if the id falls in the operational unicast range.
    pub fn is_operational(self) -> bool {
        self.0 >= 1 && self.0 < Self::TEMPORARY_RANGE_START
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Multicast group identifier (16-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(u16);

impl GroupId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// Globally unique fabric identifier, scoped by the root CA public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FabricId(u64);

impl FabricId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for FabricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl From<u64> for FabricId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Local index of a commissioned fabric (1..=254; 0 means "no fabric").
///
/// Fabric-scoped attribute rows carry the index of the fabric that wrote
/// them, and reads filter rows through the active session's index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct FabricIndex(u8);

impl FabricIndex {
    /// The "not fabric associated" sentinel.
    pub const NONE: FabricIndex = FabricIndex(0);

    /// Smallest assignable index.
    pub const MIN: FabricIndex = FabricIndex(1);

    /// Largest assignable index.
    pub const MAX: FabricIndex = FabricIndex(254);

    pub fn new(index: u8) -> Self {
        Self(index)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns the next index in the assignable range, wrapping from MAX to MIN.
    pub fn next(self) -> Self {
        if self.0 >= Self::MAX.0 {
            Self::MIN
        } else {
            Self(self.0 + 1)
        }
    }
}

impl Display for FabricIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fabric#{}", self.0)
    }
}

impl From<u8> for FabricIndex {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// Vendor identifier assigned by the CSA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct VendorId(u16);

impl VendorId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// The (fabric, node) pair a controller uses to address a peer.
///
/// Globally unique within one controller; used as the key of peer address
/// maps and the operational discovery index.
///
/// # Examples
///
/// ```
/// # use trellis_types::{PeerAddress, FabricIndex, NodeId};
/// let addr = PeerAddress::new(FabricIndex::new(1), NodeId::new(0x42));
/// assert_eq!(addr.fabric_index, FabricIndex::new(1));
/// assert_eq!(addr.node_id, NodeId::new(0x42));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub fabric_index: FabricIndex,
    pub node_id: NodeId,
}

impl PeerAddress {
    pub fn new(fabric_index: FabricIndex, node_id: NodeId) -> Self {
        Self {
            fabric_index,
            node_id,
        }
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fabric_index, self.node_id)
    }
}

// ============================================================================
// Data model ids
// ============================================================================

/// Addressable component of a node; 0 is the root endpoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EndpointNumber(u16);

impl EndpointNumber {
    /// The root (node) endpoint.
    pub const ROOT: EndpointNumber = EndpointNumber(0);

    /// Largest number assignable to a non-root endpoint.
    pub const MAX: EndpointNumber = EndpointNumber(0xFFFE);

    pub fn new(number: u16) -> Self {
        Self(number)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl Display for EndpointNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

impl From<u16> for EndpointNumber {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

macro_rules! model_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            Serialize, Deserialize, Default,
        )]
        pub struct $name(u32);

        impl $name {
            pub const fn new(id: u32) -> Self {
                Self(id)
            }

            pub fn as_u32(self) -> u32 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "0x{:08X}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

model_id!(
    /// Cluster identifier (32-bit; vendor clusters set the MS bits).
    ClusterId,
    "cluster:"
);
model_id!(
    /// Attribute identifier within a cluster.
    AttributeId,
    "attr:"
);
model_id!(
    /// Command identifier within a cluster.
    CommandId,
    "cmd:"
);
model_id!(
    /// Event identifier within a cluster.
    EventId,
    "event:"
);
model_id!(
    /// Device type identifier carried by the descriptor cluster.
    DeviceTypeId,
    "devtype:"
);

/// Per-cluster monotonic version counter.
///
/// Bumped exactly once per committed transaction that changed any
/// attribute of the cluster; clients use it to skip unchanged data.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct DataVersion(u32);

impl DataVersion {
    pub fn new(version: u32) -> Self {
        Self(version)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the successor version (wrapping at `u32::MAX`).
    pub fn bumped(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u32> for DataVersion {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Monotonic per-node event sequence number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventNumber(u64);

impl EventNumber {
    pub fn new(number: u64) -> Self {
        Self(number)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for EventNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Importance of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventPriority {
    Debug = 0,
    Info = 1,
    Critical = 2,
}

impl EventPriority {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Debug),
            1 => Some(Self::Info),
            2 => Some(Self::Critical),
            _ => None,
        }
    }
}

// ============================================================================
// Protocol-layer ids
// ============================================================================

/// Identifier of a standing subscription, allocated by the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u32);

impl SubscriptionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Identifier of one exchange on a session; initiator-allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExchangeId(u16);

impl ExchangeId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exch#{}", self.0)
    }
}

/// Local secure-session identifier; 0 is the unsecured session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SessionId(u16);

impl SessionId {
    /// The well-known unsecured session id.
    pub const UNSECURED: SessionId = SessionId(0);

    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_unsecured(self) -> bool {
        self.0 == 0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess#{}", self.0)
    }
}

impl From<u16> for SessionId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_node_id_roundtrip() {
        let group = GroupId::new(0x1234);
        let node = NodeId::from_group(group);
        assert!(node.is_group());
        assert!(!node.is_operational());
        assert_eq!(node.group(), Some(group));
    }

    #[test]
    fn operational_node_id_is_not_group() {
        let node = NodeId::new(0x0000_0000_0001_B669);
        assert!(node.is_operational());
        assert!(!node.is_group());
        assert_eq!(node.group(), None);
    }

    #[test]
    fn fabric_index_wraps_within_assignable_range() {
        assert_eq!(FabricIndex::new(1).next(), FabricIndex::new(2));
        assert_eq!(FabricIndex::MAX.next(), FabricIndex::MIN);
        assert_ne!(FabricIndex::MAX.next(), FabricIndex::NONE);
    }

    #[test]
    fn data_version_bump_wraps() {
        assert_eq!(DataVersion::new(7).bumped(), DataVersion::new(8));
        assert_eq!(DataVersion::new(u32::MAX).bumped(), DataVersion::new(0));
    }

    #[test]
    fn peer_address_orders_by_fabric_then_node() {
        let a = PeerAddress::new(FabricIndex::new(1), NodeId::new(9));
        let b = PeerAddress::new(FabricIndex::new(2), NodeId::new(1));
        assert!(a < b);
    }

    #[test]
    fn event_priority_from_byte() {
        assert_eq!(EventPriority::from_u8(0), Some(EventPriority::Debug));
        assert_eq!(EventPriority::from_u8(2), Some(EventPriority::Critical));
        assert_eq!(EventPriority::from_u8(3), None);
    }
}
