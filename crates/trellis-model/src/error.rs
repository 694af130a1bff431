//! Schema construction errors. Both kinds are fatal at initialisation.

use trellis_types::{AttributeId, ClusterId, CommandId};

/// Schema misuse detected while building or patching a model.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralModelError {
    #[error("cluster {0} has no attribute {1}")]
    AttributeNotFound(ClusterId, AttributeId),

    #[error("cluster {0} has no command {1}")]
    CommandNotFound(ClusterId, CommandId),

    #[error("cluster {cluster} declares feature '{feature}' twice")]
    DuplicateFeature { cluster: ClusterId, feature: String },

    #[error("cluster {cluster} declares {kind} id {id} twice")]
    DuplicateId {
        cluster: ClusterId,
        kind: &'static str,
        id: u32,
    },

    #[error("conformance for '{element}' references unknown feature '{feature}'")]
    UnknownFeature { element: String, feature: String },

    #[error("datatype '{0}' referenced but never declared")]
    UnknownDatatype(String),

    #[error("range patch on '{element}' which is not an integer attribute")]
    RangePatchOnNonInteger { element: String },
}

/// Two declarations disagree about the same element.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("conflicting metadata for '{element}': {detail}")]
pub struct MetadataConflictError {
    pub element: String,
    pub detail: String,
}
