//! Conformance evaluation.
//!
//! Conformance is a boolean expression over feature flags and attribute
//! presence. The engine reduces an expression against a concrete feature
//! map and supported-element set into a [`Decision`]. Deprecated elements
//! evaluate as absent.

use std::collections::BTreeSet;

use trellis_types::AttributeId;

use crate::schema::ClusterSchema;

/// The reduced conformance verdict for one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Mandatory,
    Optional,
    Disallowed,
    Provisional,
}

impl Decision {
    /// Whether the element may be present under this decision.
    pub fn allows_presence(self) -> bool {
        matches!(self, Self::Mandatory | Self::Optional)
    }
}

/// A boolean predicate over features and attribute presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// True when the named feature is active in the feature map.
    Feature(String),
    /// True when the attribute is supported by the concrete view.
    Attribute(AttributeId),
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn feature(code: impl Into<String>) -> Self {
        Self::Feature(code.into())
    }

    fn evaluate(&self, features: &ActiveFeatures, present: &BTreeSet<AttributeId>) -> bool {
        match self {
            Self::Feature(code) => features.has(code),
            Self::Attribute(id) => present.contains(id),
            Self::Not(inner) => !inner.evaluate(features, present),
            Self::All(items) => items.iter().all(|p| p.evaluate(features, present)),
            Self::Any(items) => items.iter().any(|p| p.evaluate(features, present)),
        }
    }
}

/// A conformance expression as declared on a schema element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conformance {
    /// `M` — always required.
    Mandatory,
    /// `O` — may be supported.
    Optional,
    /// `P` — provisional; not yet ratified.
    Provisional,
    /// `D` — deprecated; evaluated as absent.
    Deprecated,
    /// `X` — disallowed.
    Disallowed,
    /// `expr` — mandatory when the predicate holds, otherwise disallowed.
    MandatoryIf(Predicate),
    /// `[expr]` — optional when the predicate holds, otherwise disallowed.
    OptionalIf(Predicate),
}

impl Conformance {
    /// Reduces this expression against a concrete view.
    pub fn evaluate(
        &self,
        features: &ActiveFeatures,
        present: &BTreeSet<AttributeId>,
    ) -> Decision {
        match self {
            Self::Mandatory => Decision::Mandatory,
            Self::Optional => Decision::Optional,
            Self::Provisional => Decision::Provisional,
            // Deprecated features and elements are treated as absent.
            Self::Deprecated | Self::Disallowed => Decision::Disallowed,
            Self::MandatoryIf(p) => {
                if p.evaluate(features, present) {
                    Decision::Mandatory
                } else {
                    Decision::Disallowed
                }
            }
            Self::OptionalIf(p) => {
                if p.evaluate(features, present) {
                    Decision::Optional
                } else {
                    Decision::Disallowed
                }
            }
        }
    }

    /// Names of features this expression references, for validation.
    pub fn referenced_features(&self) -> Vec<&str> {
        fn walk<'a>(p: &'a Predicate, out: &mut Vec<&'a str>) {
            match p {
                Predicate::Feature(code) => out.push(code),
                Predicate::Attribute(_) => {}
                Predicate::Not(inner) => walk(inner, out),
                Predicate::All(items) | Predicate::Any(items) => {
                    for item in items {
                        walk(item, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        match self {
            Self::MandatoryIf(p) | Self::OptionalIf(p) => walk(p, &mut out),
            _ => {}
        }
        out
    }
}

/// A concrete feature map bound to a cluster's feature declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveFeatures {
    map: u32,
    /// (code, bit) pairs from the cluster declaration.
    codes: Vec<(String, u8)>,
}

impl ActiveFeatures {
    /// Binds a raw feature-map value to the cluster's declared features.
    pub fn from_map(cluster: &ClusterSchema, map: u32) -> Self {
        Self {
            map,
            codes: cluster
                .features
                .iter()
                .map(|f| (f.code.clone(), f.bit))
                .collect(),
        }
    }

    /// A view with no features active.
    pub fn none() -> Self {
        Self {
            map: 0,
            codes: Vec::new(),
        }
    }

    pub fn map(&self) -> u32 {
        self.map
    }

    /// Whether the feature with the given code is active.
    ///
    /// Unknown codes are inactive; conformance over a feature the cluster
    /// never declared simply evaluates false.
    pub fn has(&self, code: &str) -> bool {
        self.codes
            .iter()
            .find(|(c, _)| c == code)
            .is_some_and(|(_, bit)| self.map & (1 << bit) != 0)
    }
}
