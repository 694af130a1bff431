//! Validation errors, each carrying the path that failed.

use trellis_tlv::TlvError;

/// A value failed schema validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Wrong TLV type for the declared schema type.
    #[error("{path}: expected {expected}, got {actual}")]
    Datatype {
        path: String,
        expected: String,
        actual: &'static str,
    },

    /// Integer outside the representable (or constrained) range.
    #[error("{path}: {value} outside [{min}, {max}]")]
    IntegerRange {
        path: String,
        value: i128,
        min: i128,
        max: i128,
    },

    /// Length or enumeration constraint violated.
    #[error("{path}: constraint violated: {detail}")]
    Constraint { path: String, detail: String },

    /// Null written to a non-nullable element.
    #[error("{path}: null is not allowed here")]
    NotNullable { path: String },

    /// A mandatory struct field is missing.
    #[error("{path}: missing field '{field}'")]
    MissingField { path: String, field: String },

    /// The attribute's TLV payload failed to parse.
    #[error("{path}: TLV decode failed: {source}")]
    Tlv {
        path: String,
        #[source]
        source: TlvError,
    },
}

impl ValidationError {
    /// The path of the failing element.
    pub fn path(&self) -> &str {
        match self {
            Self::Datatype { path, .. }
            | Self::IntegerRange { path, .. }
            | Self::Constraint { path, .. }
            | Self::NotNullable { path }
            | Self::MissingField { path, .. }
            | Self::Tlv { path, .. } => path,
        }
    }
}
