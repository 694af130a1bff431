//! Schema node types.
//!
//! The tree is plain data: a [`ClusterSchema`] owns its attribute,
//! command, event, feature and datatype declarations. Nothing here is
//! mutable after construction; [`crate::ClusterBuilder`] is the only way
//! to assemble one.

use trellis_tlv::TlvValue;
use trellis_types::{AttributeId, ClusterId, CommandId, EventId, EventPriority};

use crate::Conformance;

/// Width in bits of an integer attribute type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W24,
    W32,
    W40,
    W48,
    W56,
    W64,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W24 => 24,
            Self::W32 => 32,
            Self::W40 => 40,
            Self::W48 => 48,
            Self::W56 => 56,
            Self::W64 => 64,
        }
    }

    /// Largest representable unsigned value at this width.
    pub fn unsigned_max(self) -> u64 {
        if self.bits() == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits()) - 1
        }
    }

    /// Largest representable signed value at this width.
    pub fn signed_max(self) -> i64 {
        if self.bits() == 64 {
            i64::MAX
        } else {
            (1i64 << (self.bits() - 1)) - 1
        }
    }

    /// Smallest representable signed value at this width.
    pub fn signed_min(self) -> i64 {
        if self.bits() == 64 {
            i64::MIN
        } else {
            -(1i64 << (self.bits() - 1))
        }
    }
}

/// The type of an attribute or field value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    Bool,
    UInt(IntWidth),
    Int(IntWidth),
    Float,
    Double,
    Utf8,
    Bytes,
    /// Enumeration over a declared datatype; wire form is an unsigned int.
    Enum(String),
    /// Bitmap over a declared datatype; wire form is an unsigned int.
    Bitmap(String),
    /// Struct with fields declared in a [`DatatypeSchema`].
    Struct(String),
    List(Box<ValueType>),
}

impl ValueType {
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::UInt(_) | Self::Int(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }
}

/// Value qualities carried by an attribute declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quality {
    /// Null is a valid value; the type's sentinel is reserved for it.
    pub nullable: bool,
    /// Persisted across restarts.
    pub nonvolatile: bool,
    /// Never changes after initialisation.
    pub fixed: bool,
    /// Participates in scenes.
    pub scene: bool,
    /// List rows are tagged with, and filtered by, a fabric index.
    pub fabric_scoped: bool,
    /// Readable only by the owning fabric.
    pub fabric_sensitive: bool,
    /// Reported at a reduced cadence (quieter reporting).
    pub changes_omitted: bool,
}

impl Quality {
    pub fn nullable() -> Self {
        Self {
            nullable: true,
            ..Self::default()
        }
    }

    pub fn nonvolatile() -> Self {
        Self {
            nonvolatile: true,
            ..Self::default()
        }
    }

    pub fn fabric_scoped() -> Self {
        Self {
            fabric_scoped: true,
            ..Self::default()
        }
    }
}

/// Privilege required for an access kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Privilege {
    View,
    Operate,
    Manage,
    Administer,
}

/// Access metadata for attributes and commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub read: Option<Privilege>,
    pub write: Option<Privilege>,
    /// Writes/invokes must ride a timed interaction.
    pub timed: bool,
}

impl Access {
    pub const READ_VIEW: Access = Access {
        read: Some(Privilege::View),
        write: None,
        timed: false,
    };

    pub const RW_VIEW_OPERATE: Access = Access {
        read: Some(Privilege::View),
        write: Some(Privilege::Operate),
        timed: false,
    };

    pub const RW_VIEW_ADMIN: Access = Access {
        read: Some(Privilege::View),
        write: Some(Privilege::Administer),
        timed: false,
    };

    pub fn timed(mut self) -> Self {
        self.timed = true;
        self
    }
}

impl Default for Access {
    fn default() -> Self {
        Self::READ_VIEW
    }
}

/// Value constraint (inclusive bounds; lengths for strings and lists).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Constraint {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

impl Constraint {
    pub fn range(min: i64, max: i64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Self::default()
        }
    }

    pub fn max_length(max: usize) -> Self {
        Self {
            max_length: Some(max),
            ..Self::default()
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.min.is_none()
            && self.max.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
    }

    /// Intersects two constraints, keeping the tighter bound on each side.
    pub fn tightened(self, other: Constraint) -> Constraint {
        fn tighter_min<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            }
        }
        fn tighter_max<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        }
        Constraint {
            min: tighter_min(self.min, other.min),
            max: tighter_max(self.max, other.max),
            min_length: tighter_min(self.min_length, other.min_length),
            max_length: tighter_max(self.max_length, other.max_length),
        }
    }
}

/// One attribute declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSchema {
    pub id: AttributeId,
    pub name: String,
    pub ty: ValueType,
    pub default: Option<TlvValue>,
    pub quality: Quality,
    pub conformance: Conformance,
    pub access: Access,
    pub constraint: Constraint,
}

/// Direction of a command declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDirection {
    Request,
    Response,
}

/// One command declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSchema {
    pub id: CommandId,
    pub name: String,
    pub direction: CommandDirection,
    /// The response command this request is answered with, when any.
    pub response: Option<CommandId>,
    /// Struct datatype naming the command fields; `None` for empty payloads.
    pub fields: Option<String>,
    pub conformance: Conformance,
    pub access: Access,
}

/// One event declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSchema {
    pub id: EventId,
    pub name: String,
    pub priority: EventPriority,
    /// Struct datatype naming the event fields; `None` for empty payloads.
    pub fields: Option<String>,
    pub conformance: Conformance,
}

/// One named feature bit of the cluster's feature map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    pub bit: u8,
    /// Short conformance code, e.g. "LT".
    pub code: String,
    pub name: String,
}

/// One field of a struct datatype; the id doubles as the context tag.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub id: u8,
    pub name: String,
    pub ty: ValueType,
    pub nullable: bool,
    pub optional: bool,
    pub constraint: Constraint,
}

/// A nested datatype declaration: struct fields, enum values or bitmap bits.
#[derive(Debug, Clone, PartialEq)]
pub enum DatatypeSchema {
    Struct {
        name: String,
        fields: Vec<FieldSchema>,
        /// Field id carrying the writer's fabric index in scoped lists.
        fabric_index_field: Option<u8>,
    },
    Enum {
        name: String,
        values: Vec<(String, u64)>,
    },
    Bitmap {
        name: String,
        bits: Vec<(String, u8)>,
    },
}

impl DatatypeSchema {
    pub fn name(&self) -> &str {
        match self {
            Self::Struct { name, .. } | Self::Enum { name, .. } | Self::Bitmap { name, .. } => {
                name
            }
        }
    }
}

/// An immutable cluster schema.
///
/// Shared behind `Arc`; [`crate::ClusterModifier::extend`] layers device
/// type patches by producing a derived instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSchema {
    pub id: ClusterId,
    /// Canonical camel-case name, e.g. `onOff`.
    pub name: String,
    pub revision: u16,
    pub features: Vec<FeatureSchema>,
    pub attributes: Vec<AttributeSchema>,
    pub commands: Vec<CommandSchema>,
    pub events: Vec<EventSchema>,
    pub datatypes: Vec<DatatypeSchema>,
}

impl ClusterSchema {
    pub fn attribute(&self, id: AttributeId) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.id == id)
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn command(&self, id: CommandId) -> Option<&CommandSchema> {
        self.commands.iter().find(|c| c.id == id)
    }

    pub fn event(&self, id: EventId) -> Option<&EventSchema> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn datatype(&self, name: &str) -> Option<&DatatypeSchema> {
        self.datatypes.iter().find(|d| d.name() == name)
    }

    pub fn feature_by_code(&self, code: &str) -> Option<&FeatureSchema> {
        self.features.iter().find(|f| f.code == code)
    }
}

/// Canonicalizes a declared name to camel case.
///
/// `"On Off"` and `"on-off"` both canonicalize to `"onOff"`; the index
/// keys all name lookups through this.
pub fn canonical_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else if out.is_empty() {
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("On Off", "onOff"; "space separated")]
    #[test_case("on-off", "onOff"; "hyphen separated")]
    #[test_case("level_control", "levelControl")]
    #[test_case("OnOff", "onOff")]
    #[test_case("ACL", "aCL"; "leading acronym lowers first char only")]
    fn camelization(input: &str, expected: &str) {
        assert_eq!(canonical_camel(input), expected);
    }

    #[test]
    fn int_width_bounds() {
        assert_eq!(IntWidth::W8.unsigned_max(), 255);
        assert_eq!(IntWidth::W24.unsigned_max(), 0xFF_FFFF);
        assert_eq!(IntWidth::W64.unsigned_max(), u64::MAX);
        assert_eq!(IntWidth::W8.signed_min(), -128);
        assert_eq!(IntWidth::W8.signed_max(), 127);
        assert_eq!(IntWidth::W56.signed_max(), (1i64 << 55) - 1);
    }

    #[test]
    fn constraint_tightening_keeps_narrow_side() {
        let base = Constraint::range(0, 100);
        let patch = Constraint {
            min: Some(10),
            max: None,
            ..Constraint::default()
        };
        let tightened = base.tightened(patch);
        assert_eq!(tightened.min, Some(10));
        assert_eq!(tightened.max, Some(100));
    }
}
