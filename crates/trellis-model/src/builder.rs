//! Cluster construction.
//!
//! [`ClusterBuilder`] is the single finalisation point for a schema:
//! declarations accumulate, `build()` validates and freezes. Supports both
//! seed construction (generated tables) and runtime assembly (behaviors
//! declaring their elements), which merge through
//! [`ClusterBuilder::merge_attribute`].

use std::collections::BTreeSet;
use std::sync::Arc;

use trellis_tlv::TlvValue;
use trellis_types::{AttributeId, ClusterId, CommandId, EventId, EventPriority};

use crate::error::{MetadataConflictError, StructuralModelError};
use crate::schema::{
    Access, AttributeSchema, ClusterSchema, CommandDirection, CommandSchema, Constraint,
    DatatypeSchema, EventSchema, FeatureSchema, FieldSchema, Quality, ValueType, canonical_camel,
};
use crate::Conformance;

/// Builder for an immutable [`ClusterSchema`].
#[derive(Debug)]
pub struct ClusterBuilder {
    id: ClusterId,
    name: String,
    revision: u16,
    features: Vec<FeatureSchema>,
    attributes: Vec<AttributeSchema>,
    commands: Vec<CommandSchema>,
    events: Vec<EventSchema>,
    datatypes: Vec<DatatypeSchema>,
}

impl ClusterBuilder {
    pub fn new(name: &str, id: impl Into<ClusterId>) -> Self {
        Self {
            id: id.into(),
            name: canonical_camel(name),
            revision: 1,
            features: Vec::new(),
            attributes: Vec::new(),
            commands: Vec::new(),
            events: Vec::new(),
            datatypes: Vec::new(),
        }
    }

    pub fn revision(mut self, revision: u16) -> Self {
        self.revision = revision;
        self
    }

    pub fn feature(mut self, bit: u8, code: &str, name: &str) -> Self {
        self.features.push(FeatureSchema {
            bit,
            code: code.to_string(),
            name: canonical_camel(name),
        });
        self
    }

    /// Declares an attribute with explicit metadata.
    pub fn attribute(mut self, attribute: AttributeSchema) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Shorthand for a plain readable attribute.
    pub fn attr(
        self,
        id: u32,
        name: &str,
        ty: ValueType,
        default: Option<TlvValue>,
    ) -> Self {
        self.attribute(AttributeSchema {
            id: AttributeId::new(id),
            name: canonical_camel(name),
            ty,
            default,
            quality: Quality::default(),
            conformance: Conformance::Mandatory,
            access: Access::default(),
            constraint: Constraint::default(),
        })
    }

    pub fn command(mut self, command: CommandSchema) -> Self {
        self.commands.push(command);
        self
    }

    /// Shorthand for a request command with no fields.
    pub fn request(self, id: u32, name: &str, response: Option<u32>) -> Self {
        self.command(CommandSchema {
            id: CommandId::new(id),
            name: canonical_camel(name),
            direction: CommandDirection::Request,
            response: response.map(CommandId::new),
            fields: None,
            conformance: Conformance::Mandatory,
            access: Access::RW_VIEW_OPERATE,
        })
    }

    pub fn event(mut self, id: u32, name: &str, priority: EventPriority) -> Self {
        self.events.push(EventSchema {
            id: EventId::new(id),
            name: canonical_camel(name),
            priority,
            fields: None,
            conformance: Conformance::Optional,
        });
        self
    }

    pub fn datatype(mut self, datatype: DatatypeSchema) -> Self {
        self.datatypes.push(datatype);
        self
    }

    /// Shorthand for a struct datatype.
    pub fn struct_type(self, name: &str, fields: Vec<FieldSchema>) -> Self {
        let fabric_index_field = fields
            .iter()
            .find(|f| f.name == "fabricIndex")
            .map(|f| f.id);
        self.datatype(DatatypeSchema::Struct {
            name: name.to_string(),
            fields,
            fabric_index_field,
        })
    }

    /// Merges a second declaration of an existing attribute.
    ///
    /// Decorated assembly lets a behavior re-declare a seed attribute to
    /// add a default or narrow access; any disagreement on type or
    /// quality is a conflict.
    pub fn merge_attribute(
        mut self,
        incoming: AttributeSchema,
    ) -> Result<Self, MetadataConflictError> {
        let Some(existing) = self.attributes.iter_mut().find(|a| a.id == incoming.id) else {
            self.attributes.push(incoming);
            return Ok(self);
        };

        if existing.ty != incoming.ty {
            return Err(MetadataConflictError {
                element: incoming.name,
                detail: format!("type {:?} vs {:?}", existing.ty, incoming.ty),
            });
        }
        if existing.quality != incoming.quality {
            return Err(MetadataConflictError {
                element: incoming.name,
                detail: "quality flags disagree".to_string(),
            });
        }
        if incoming.default.is_some() {
            existing.default = incoming.default;
        }
        existing.constraint = existing.constraint.tightened(incoming.constraint);
        Ok(self)
    }

    /// Validates and freezes the schema.
    pub fn build(self) -> Result<Arc<ClusterSchema>, StructuralModelError> {
        let mut feature_codes = BTreeSet::new();
        for feature in &self.features {
            if !feature_codes.insert(feature.code.as_str()) {
                return Err(StructuralModelError::DuplicateFeature {
                    cluster: self.id,
                    feature: feature.code.clone(),
                });
            }
        }

        Self::check_unique(self.id, "attribute", self.attributes.iter().map(|a| a.id.as_u32()))?;
        Self::check_unique(self.id, "command", self.commands.iter().map(|c| c.id.as_u32()))?;
        Self::check_unique(self.id, "event", self.events.iter().map(|e| e.id.as_u32()))?;

        for attribute in &self.attributes {
            self.check_conformance_features(&attribute.name, &attribute.conformance, &feature_codes)?;
            self.check_datatype_refs(&attribute.ty)?;
        }
        for command in &self.commands {
            self.check_conformance_features(&command.name, &command.conformance, &feature_codes)?;
            if let Some(fields) = &command.fields {
                if self.datatypes.iter().all(|d| d.name() != fields) {
                    return Err(StructuralModelError::UnknownDatatype(fields.clone()));
                }
            }
        }

        Ok(Arc::new(ClusterSchema {
            id: self.id,
            name: self.name,
            revision: self.revision,
            features: self.features,
            attributes: self.attributes,
            commands: self.commands,
            events: self.events,
            datatypes: self.datatypes,
        }))
    }

    fn check_unique(
        cluster: ClusterId,
        kind: &'static str,
        ids: impl Iterator<Item = u32>,
    ) -> Result<(), StructuralModelError> {
        let mut seen = BTreeSet::new();
        for id in ids {
            if !seen.insert(id) {
                return Err(StructuralModelError::DuplicateId { cluster, kind, id });
            }
        }
        Ok(())
    }

    fn check_conformance_features(
        &self,
        element: &str,
        conformance: &Conformance,
        declared: &BTreeSet<&str>,
    ) -> Result<(), StructuralModelError> {
        for code in conformance.referenced_features() {
            if !declared.contains(code) {
                return Err(StructuralModelError::UnknownFeature {
                    element: element.to_string(),
                    feature: code.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_datatype_refs(&self, ty: &ValueType) -> Result<(), StructuralModelError> {
        match ty {
            ValueType::Enum(name) | ValueType::Bitmap(name) | ValueType::Struct(name) => {
                if self.datatypes.iter().all(|d| d.name() != name) {
                    return Err(StructuralModelError::UnknownDatatype(name.clone()));
                }
                Ok(())
            }
            ValueType::List(inner) => self.check_datatype_refs(inner),
            _ => Ok(()),
        }
    }
}
