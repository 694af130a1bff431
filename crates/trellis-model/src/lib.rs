//! # trellis-model: The cluster schema engine
//!
//! An immutable tree of typed schema nodes describing clusters, their
//! attributes, commands, events and datatypes, together with:
//!
//! - a conformance engine reducing conformance expressions to decisions
//!   ([`Conformance`], [`Decision`])
//! - a lookup index by id or canonical camel-case name ([`ModelIndex`])
//! - a declarative patch layer for device-type requirements
//!   ([`ClusterModifier`])
//! - the conformance-evaluated element view ([`Scope`]) used by
//!   validation, wildcard expansion and report construction
//!
//! Schemas are built once through [`ClusterBuilder`]; after `build()` the
//! tree is frozen behind an `Arc` and shared. There is no runtime
//! metaprogramming: device behaviors are plain data declarations.

mod builder;
mod conformance;
mod error;
mod index;
mod modifier;
mod schema;
mod scope;

pub use builder::ClusterBuilder;
pub use conformance::{ActiveFeatures, Conformance, Decision, Predicate};
pub use error::{MetadataConflictError, StructuralModelError};
pub use index::{ModelIndex, ModelTag};
pub use modifier::{ClusterModifier, ClusterPatch};
pub use schema::{
    Access, AttributeSchema, ClusterSchema, CommandDirection, CommandSchema, Constraint,
    DatatypeSchema, EventSchema, FeatureSchema, FieldSchema, IntWidth, Privilege, Quality,
    ValueType, canonical_camel,
};
pub use scope::Scope;
