//! # trellis-supervisor: The value supervisor
//!
//! For a cluster schema, produces the machinery the datasource and the
//! interaction engines rely on:
//!
//! - [`ValueSupervisor::validate`] — type, range, nullability and
//!   constraint checks with the failing path in every error
//! - [`ValueSupervisor::encode_attribute`] / `decode_attribute` — TLV
//!   round-trip through `trellis-tlv`
//! - [`ValueSupervisor::patch`] — structural merge of partial writes
//! - [`ValueSupervisor::default_of`] — schema defaults (declared value,
//!   null for nullable, type zero)
//! - [`ValueSupervisor::scope_for`] — fabric-scoped list filtering
//!
//! Nullable integers reserve a sentinel (the highest unsigned value, the
//! lowest signed value). A write of the sentinel is read as an explicit
//! null and normalized to [`TlvValue::Null`] before storage.

mod error;
mod patch;
mod supervisor;

pub use error::ValidationError;
pub use supervisor::ValueSupervisor;

#[cfg(test)]
mod tests;
