//! The conformance-evaluated view of a cluster.
//!
//! A [`Scope`] binds a cluster schema to a concrete feature map and
//! supported-element set, and answers "which children exist here".
//! Validation, wildcard expansion and report construction all go through
//! it so they can never disagree about what a cluster contains.

use std::collections::BTreeSet;
use std::sync::Arc;

use trellis_types::{AttributeId, CommandId, EventId};

use crate::conformance::{ActiveFeatures, Decision};
use crate::schema::{AttributeSchema, ClusterSchema, CommandSchema, EventSchema};

/// A cluster viewed under a feature map and supported-element set.
#[derive(Debug, Clone)]
pub struct Scope {
    cluster: Arc<ClusterSchema>,
    features: ActiveFeatures,
    /// Optional elements the concrete implementation declares support for.
    supported: BTreeSet<AttributeId>,
}

impl Scope {
    pub fn new(
        cluster: Arc<ClusterSchema>,
        feature_map: u32,
        supported: impl IntoIterator<Item = AttributeId>,
    ) -> Self {
        let features = ActiveFeatures::from_map(&cluster, feature_map);
        Self {
            cluster,
            features,
            supported: supported.into_iter().collect(),
        }
    }

    pub fn cluster(&self) -> &Arc<ClusterSchema> {
        &self.cluster
    }

    pub fn features(&self) -> &ActiveFeatures {
        &self.features
    }

    /// The conformance decision for an attribute in this view.
    pub fn attribute_decision(&self, id: AttributeId) -> Option<Decision> {
        let schema = self.cluster.attribute(id)?;
        Some(schema.conformance.evaluate(&self.features, &self.supported))
    }

    /// Whether the attribute is present in this view: mandatory, or
    /// optional and declared supported.
    pub fn has_attribute(&self, id: AttributeId) -> bool {
        match self.attribute_decision(id) {
            Some(Decision::Mandatory) => true,
            Some(Decision::Optional) => self.supported.contains(&id),
            _ => false,
        }
    }

    /// The attributes present in this view, in declaration order.
    pub fn conformant_attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.cluster
            .attributes
            .iter()
            .filter(|a| self.has_attribute(a.id))
    }

    /// Whether the command is invocable in this view.
    pub fn has_command(&self, id: CommandId) -> bool {
        self.cluster.command(id).is_some_and(|c| {
            c.conformance
                .evaluate(&self.features, &self.supported)
                .allows_presence()
        })
    }

    pub fn conformant_commands(&self) -> impl Iterator<Item = &CommandSchema> {
        self.cluster
            .commands
            .iter()
            .filter(|c| self.has_command(c.id))
    }

    pub fn has_event(&self, id: EventId) -> bool {
        self.cluster.event(id).is_some_and(|e| {
            e.conformance
                .evaluate(&self.features, &self.supported)
                .allows_presence()
        })
    }

    pub fn conformant_events(&self) -> impl Iterator<Item = &EventSchema> {
        self.cluster.events.iter().filter(|e| self.has_event(e.id))
    }
}
