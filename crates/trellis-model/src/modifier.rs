//! Device-type patches over a base cluster.
//!
//! A device type may require an optional element, override a default or
//! tighten a numeric range. [`ClusterModifier::extend`] applies such a
//! patch set, producing a derived schema layered over the base. A patch
//! set that changes nothing returns the base `Arc` untouched.

use std::sync::Arc;

use trellis_tlv::TlvValue;
use trellis_types::AttributeId;

use crate::error::StructuralModelError;
use crate::schema::{ClusterSchema, Constraint};
use crate::Conformance;

/// One declarative change to a cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterPatch {
    /// Replace the conformance of an attribute (optional ↔ mandatory).
    SetConformance {
        attribute: AttributeId,
        conformance: Conformance,
    },
    /// Override the default value of an attribute.
    SetDefault {
        attribute: AttributeId,
        default: TlvValue,
    },
    /// Tighten the numeric range of an integer attribute.
    TightenRange {
        attribute: AttributeId,
        min: Option<i64>,
        max: Option<i64>,
    },
}

impl ClusterPatch {
    fn attribute(&self) -> AttributeId {
        match self {
            Self::SetConformance { attribute, .. }
            | Self::SetDefault { attribute, .. }
            | Self::TightenRange { attribute, .. } => *attribute,
        }
    }

    /// Whether applying this patch to `cluster` would change anything.
    fn is_noop(&self, cluster: &ClusterSchema) -> bool {
        let Some(schema) = cluster.attribute(self.attribute()) else {
            return false;
        };
        match self {
            Self::SetConformance { conformance, .. } => schema.conformance == *conformance,
            Self::SetDefault { default, .. } => schema.default.as_ref() == Some(default),
            Self::TightenRange { min, max, .. } => {
                let tightened = schema.constraint.tightened(Constraint {
                    min: *min,
                    max: *max,
                    ..Constraint::default()
                });
                tightened == schema.constraint
            }
        }
    }
}

/// Applies declarative patch sets to clusters.
#[derive(Debug, Default)]
pub struct ClusterModifier {
    patches: Vec<ClusterPatch>,
}

impl ClusterModifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patch(mut self, patch: ClusterPatch) -> Self {
        self.patches.push(patch);
        self
    }

    pub fn require(self, attribute: AttributeId) -> Self {
        self.patch(ClusterPatch::SetConformance {
            attribute,
            conformance: Conformance::Mandatory,
        })
    }

    pub fn default_value(self, attribute: AttributeId, default: TlvValue) -> Self {
        self.patch(ClusterPatch::SetDefault { attribute, default })
    }

    /// Layers the patch set over `base`.
    ///
    /// Returns the same `Arc` when every patch is a no-op; otherwise a
    /// derived clone with the patches applied. A patch naming an absent
    /// attribute is a structural error.
    pub fn extend(
        &self,
        base: &Arc<ClusterSchema>,
    ) -> Result<Arc<ClusterSchema>, StructuralModelError> {
        // Validate all targets first so a bad patch never half-applies.
        for patch in &self.patches {
            let id = patch.attribute();
            let Some(schema) = base.attribute(id) else {
                return Err(StructuralModelError::AttributeNotFound(base.id, id));
            };
            if matches!(patch, ClusterPatch::TightenRange { .. }) && !schema.ty.is_integer() {
                return Err(StructuralModelError::RangePatchOnNonInteger {
                    element: schema.name.clone(),
                });
            }
        }

        if self.patches.iter().all(|p| p.is_noop(base)) {
            return Ok(Arc::clone(base));
        }

        let mut derived = ClusterSchema::clone(base);
        for patch in &self.patches {
            let attribute = derived
                .attributes
                .iter_mut()
                .find(|a| a.id == patch.attribute())
                .expect("validated above");
            match patch {
                ClusterPatch::SetConformance { conformance, .. } => {
                    attribute.conformance = conformance.clone();
                }
                ClusterPatch::SetDefault { default, .. } => {
                    attribute.default = Some(default.clone());
                }
                ClusterPatch::TightenRange { min, max, .. } => {
                    attribute.constraint = attribute.constraint.tightened(Constraint {
                        min: *min,
                        max: *max,
                        ..Constraint::default()
                    });
                }
            }
        }
        Ok(Arc::new(derived))
    }
}
