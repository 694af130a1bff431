//! # trellis-store: The attribute datasource
//!
//! One [`Datasource`] holds the attribute state of one cluster on one
//! endpoint: committed values, the 32-bit data version, per-attribute
//! change streams and the nonvolatile write-through hook.
//!
//! All mutation flows through a [`Transaction`]: writes land in a
//! participant-local overlay, validation failures roll the whole
//! transaction back with no externally observable effect, and a commit
//! bumps the data version exactly once per changed cluster, persists the
//! nonvolatile subset and fires change events in attribute declaration
//! order.
//!
//! Emitted events live beside the attribute state in a bounded
//! per-endpoint [`EventLog`].

mod datasource;
mod events;
mod transaction;

pub use datasource::{AttributeChange, Datasource};
pub use events::{EventLog, StoredEvent};
pub use transaction::{CommitReport, IsolationLevel, Transaction, TransactionOutcome};

use trellis_supervisor::ValidationError;
use trellis_types::{AttributeId, ClusterId};

/// Errors surfaced by datasource operations.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("write rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("cluster {cluster} has no attribute {attribute} in this view")]
    UnknownAttribute {
        cluster: ClusterId,
        attribute: AttributeId,
    },

    #[error("attribute {attribute} of cluster {cluster} is not writable")]
    NotWritable {
        cluster: ClusterId,
        attribute: AttributeId,
    },

    #[error("transaction is read-only")]
    ReadOnly,

    #[error(transparent)]
    Storage(#[from] trellis_storage::StorageError),
}

#[cfg(test)]
mod tests;
