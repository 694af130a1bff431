//! The decoded TLV tree.

use bytes::Bytes;

use crate::TlvTag;

/// A decoded TLV value.
///
/// Integers are normalized to 64-bit on decode; the writer re-selects the
/// smallest width on encode, so the tree round-trips bit-exactly through
/// the codec even when the original widths differ.
#[derive(Debug, Clone, PartialEq)]
pub enum TlvValue {
    UnsignedInt(u64),
    SignedInt(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    Utf8(String),
    Bytes(Bytes),
    Null,
    /// Ordered members with tags; duplicate tags are preserved as read.
    Struct(Vec<(TlvTag, TlvValue)>),
    /// Anonymous-tagged members.
    Array(Vec<TlvValue>),
    /// Ordered members, possibly tagged.
    List(Vec<(TlvTag, TlvValue)>),
}

impl TlvValue {
    /// Shorthand for a UTF-8 string value.
    pub fn utf8(s: impl Into<String>) -> Self {
        Self::Utf8(s.into())
    }

    /// Shorthand for an octet string value.
    pub fn bytes(b: impl Into<Bytes>) -> Self {
        Self::Bytes(b.into())
    }

    /// Looks up a struct member by context tag number.
    pub fn member(&self, context: u8) -> Option<&TlvValue> {
        match self {
            Self::Struct(members) | Self::List(members) => members
                .iter()
                .find(|(tag, _)| tag.context_number() == Some(context))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Returns the contained unsigned integer, widening smaller writes.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UnsignedInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the contained signed integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SignedInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_utf8(&self) -> Option<&str> {
        match self {
            Self::Utf8(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[TlvValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Human-readable name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::UnsignedInt(_) => "unsigned integer",
            Self::SignedInt(_) => "signed integer",
            Self::Bool(_) => "boolean",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Utf8(_) => "string",
            Self::Bytes(_) => "octet string",
            Self::Null => "null",
            Self::Struct(_) => "struct",
            Self::Array(_) => "array",
            Self::List(_) => "list",
        }
    }
}

impl From<bool> for TlvValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u8> for TlvValue {
    fn from(v: u8) -> Self {
        Self::UnsignedInt(u64::from(v))
    }
}

impl From<u16> for TlvValue {
    fn from(v: u16) -> Self {
        Self::UnsignedInt(u64::from(v))
    }
}

impl From<u32> for TlvValue {
    fn from(v: u32) -> Self {
        Self::UnsignedInt(u64::from(v))
    }
}

impl From<u64> for TlvValue {
    fn from(v: u64) -> Self {
        Self::UnsignedInt(v)
    }
}

impl From<i64> for TlvValue {
    fn from(v: i64) -> Self {
        Self::SignedInt(v)
    }
}

impl From<&str> for TlvValue {
    fn from(v: &str) -> Self {
        Self::Utf8(v.to_string())
    }
}
