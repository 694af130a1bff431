//! Interaction paths.
//!
//! Attribute and event paths support wildcards (`None` components);
//! command paths may wildcard the endpoint for group invokes. TLV field
//! tags follow the interaction-model path layout: 3 endpoint, 4 cluster,
//! 5 attribute/event/command.

use trellis_tlv::{TlvTag, TlvValue};
use trellis_types::{
    AttributeId, ClusterId, CommandId, DataVersion, EndpointNumber, EventId,
};

const TAG_ENDPOINT: u8 = 3;
const TAG_CLUSTER: u8 = 4;
const TAG_LEAF: u8 = 5;

/// A possibly-wildcarded attribute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributePath {
    pub endpoint: Option<EndpointNumber>,
    pub cluster: Option<ClusterId>,
    pub attribute: Option<AttributeId>,
}

impl AttributePath {
    /// The full wildcard `*/*/*`.
    pub const WILDCARD: AttributePath = AttributePath {
        endpoint: None,
        cluster: None,
        attribute: None,
    };

    pub fn concrete(
        endpoint: EndpointNumber,
        cluster: ClusterId,
        attribute: AttributeId,
    ) -> Self {
        Self {
            endpoint: Some(endpoint),
            cluster: Some(cluster),
            attribute: Some(attribute),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.endpoint.is_none() || self.cluster.is_none() || self.attribute.is_none()
    }

    /// Whether a concrete path falls under this (possibly wildcard) path.
    pub fn matches(&self, concrete: &ConcretePath) -> bool {
        self.endpoint.is_none_or(|e| e == concrete.endpoint)
            && self.cluster.is_none_or(|c| c == concrete.cluster)
            && self.attribute.is_none_or(|a| a == concrete.attribute)
    }

    pub fn to_tlv(&self) -> TlvValue {
        let mut members = Vec::new();
        if let Some(endpoint) = self.endpoint {
            members.push((
                TlvTag::context(TAG_ENDPOINT),
                TlvValue::UnsignedInt(u64::from(endpoint.as_u16())),
            ));
        }
        if let Some(cluster) = self.cluster {
            members.push((
                TlvTag::context(TAG_CLUSTER),
                TlvValue::UnsignedInt(u64::from(cluster.as_u32())),
            ));
        }
        if let Some(attribute) = self.attribute {
            members.push((
                TlvTag::context(TAG_LEAF),
                TlvValue::UnsignedInt(u64::from(attribute.as_u32())),
            ));
        }
        TlvValue::List(members)
    }

    pub fn from_tlv(value: &TlvValue) -> Option<Self> {
        let field = |n: u8| value.member(n).and_then(TlvValue::as_u64);
        Some(Self {
            endpoint: field(TAG_ENDPOINT).map(|v| EndpointNumber::new(v as u16)),
            cluster: field(TAG_CLUSTER).map(|v| ClusterId::new(v as u32)),
            attribute: field(TAG_LEAF).map(|v| AttributeId::new(v as u32)),
        })
    }
}

impl std::fmt::Display for AttributePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn part<T: std::fmt::Display>(v: Option<T>) -> String {
            v.map_or_else(|| "*".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "{}/{}/{}",
            part(self.endpoint),
            part(self.cluster),
            part(self.attribute)
        )
    }
}

/// A fully resolved attribute location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConcretePath {
    pub endpoint: EndpointNumber,
    pub cluster: ClusterId,
    pub attribute: AttributeId,
}

impl ConcretePath {
    pub fn new(endpoint: EndpointNumber, cluster: ClusterId, attribute: AttributeId) -> Self {
        Self {
            endpoint,
            cluster,
            attribute,
        }
    }

    pub fn as_attribute_path(&self) -> AttributePath {
        AttributePath::concrete(self.endpoint, self.cluster, self.attribute)
    }
}

impl std::fmt::Display for ConcretePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.endpoint, self.cluster, self.attribute)
    }
}

/// A possibly-wildcarded event path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventPath {
    pub endpoint: Option<EndpointNumber>,
    pub cluster: Option<ClusterId>,
    pub event: Option<EventId>,
}

impl EventPath {
    pub fn to_tlv(&self) -> TlvValue {
        let mut members = Vec::new();
        if let Some(endpoint) = self.endpoint {
            members.push((
                TlvTag::context(TAG_ENDPOINT),
                TlvValue::UnsignedInt(u64::from(endpoint.as_u16())),
            ));
        }
        if let Some(cluster) = self.cluster {
            members.push((
                TlvTag::context(TAG_CLUSTER),
                TlvValue::UnsignedInt(u64::from(cluster.as_u32())),
            ));
        }
        if let Some(event) = self.event {
            members.push((
                TlvTag::context(TAG_LEAF),
                TlvValue::UnsignedInt(u64::from(event.as_u32())),
            ));
        }
        TlvValue::List(members)
    }

    pub fn from_tlv(value: &TlvValue) -> Option<Self> {
        let field = |n: u8| value.member(n).and_then(TlvValue::as_u64);
        Some(Self {
            endpoint: field(TAG_ENDPOINT).map(|v| EndpointNumber::new(v as u16)),
            cluster: field(TAG_CLUSTER).map(|v| ClusterId::new(v as u32)),
            event: field(TAG_LEAF).map(|v| EventId::new(v as u32)),
        })
    }
}

/// A command path; endpoint may wildcard for group invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandPath {
    pub endpoint: Option<EndpointNumber>,
    pub cluster: ClusterId,
    pub command: CommandId,
}

impl CommandPath {
    pub fn concrete(endpoint: EndpointNumber, cluster: ClusterId, command: CommandId) -> Self {
        Self {
            endpoint: Some(endpoint),
            cluster,
            command,
        }
    }

    pub fn to_tlv(&self) -> TlvValue {
        let mut members = Vec::new();
        if let Some(endpoint) = self.endpoint {
            members.push((
                TlvTag::context(TAG_ENDPOINT),
                TlvValue::UnsignedInt(u64::from(endpoint.as_u16())),
            ));
        }
        members.push((
            TlvTag::context(TAG_CLUSTER),
            TlvValue::UnsignedInt(u64::from(self.cluster.as_u32())),
        ));
        members.push((
            TlvTag::context(TAG_LEAF),
            TlvValue::UnsignedInt(u64::from(self.command.as_u32())),
        ));
        TlvValue::List(members)
    }

    pub fn from_tlv(value: &TlvValue) -> Option<Self> {
        let field = |n: u8| value.member(n).and_then(TlvValue::as_u64);
        Some(Self {
            endpoint: field(TAG_ENDPOINT).map(|v| EndpointNumber::new(v as u16)),
            cluster: ClusterId::new(field(TAG_CLUSTER)? as u32),
            command: CommandId::new(field(TAG_LEAF)? as u32),
        })
    }
}

/// A client-held data version for one cluster instance.
///
/// Paths whose cluster still carries this version are omitted from the
/// report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataVersionFilter {
    pub endpoint: EndpointNumber,
    pub cluster: ClusterId,
    pub version: DataVersion,
}

impl DataVersionFilter {
    pub fn to_tlv(&self) -> TlvValue {
        TlvValue::List(vec![
            (
                TlvTag::context(TAG_ENDPOINT),
                TlvValue::UnsignedInt(u64::from(self.endpoint.as_u16())),
            ),
            (
                TlvTag::context(TAG_CLUSTER),
                TlvValue::UnsignedInt(u64::from(self.cluster.as_u32())),
            ),
            (
                TlvTag::context(6),
                TlvValue::UnsignedInt(u64::from(self.version.as_u32())),
            ),
        ])
    }

    pub fn from_tlv(value: &TlvValue) -> Option<Self> {
        let field = |n: u8| value.member(n).and_then(TlvValue::as_u64);
        Some(Self {
            endpoint: EndpointNumber::new(field(TAG_ENDPOINT)? as u16),
            cluster: ClusterId::new(field(TAG_CLUSTER)? as u32),
            version: DataVersion::new(field(6)? as u32),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_everything_under_it() {
        let path = AttributePath {
            endpoint: Some(EndpointNumber::new(1)),
            cluster: None,
            attribute: None,
        };
        assert!(path.is_wildcard());
        assert!(path.matches(&ConcretePath::new(
            EndpointNumber::new(1),
            ClusterId::new(6),
            AttributeId::new(0)
        )));
        assert!(!path.matches(&ConcretePath::new(
            EndpointNumber::new(2),
            ClusterId::new(6),
            AttributeId::new(0)
        )));
    }

    #[test]
    fn attribute_path_tlv_roundtrip() {
        for path in [
            AttributePath::WILDCARD,
            AttributePath::concrete(
                EndpointNumber::new(1),
                ClusterId::new(0x0006),
                AttributeId::new(0),
            ),
            AttributePath {
                endpoint: None,
                cluster: Some(ClusterId::new(0x001D)),
                attribute: Some(AttributeId::new(3)),
            },
        ] {
            assert_eq!(AttributePath::from_tlv(&path.to_tlv()), Some(path));
        }
    }

    #[test]
    fn command_path_requires_cluster_and_command() {
        let missing = TlvValue::List(vec![]);
        assert_eq!(CommandPath::from_tlv(&missing), None);
    }
}
