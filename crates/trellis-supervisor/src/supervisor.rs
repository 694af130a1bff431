//! The supervisor proper.

use std::sync::Arc;

use bytes::Bytes;
use trellis_model::{
    AttributeSchema, ClusterSchema, Constraint, DatatypeSchema, FieldSchema, IntWidth, ValueType,
};
use trellis_tlv::{TlvTag, TlvValue};
use trellis_types::FabricIndex;

use crate::ValidationError;
use crate::patch::merge;

/// Per-cluster value supervisor.
///
/// Cheap to clone; holds only the shared schema.
#[derive(Debug, Clone)]
pub struct ValueSupervisor {
    cluster: Arc<ClusterSchema>,
}

impl ValueSupervisor {
    pub fn new(cluster: Arc<ClusterSchema>) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &Arc<ClusterSchema> {
        &self.cluster
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Validates a value against an attribute declaration.
    pub fn validate_attribute(
        &self,
        attribute: &AttributeSchema,
        value: &TlvValue,
    ) -> Result<(), ValidationError> {
        self.validate(
            &attribute.ty,
            attribute.quality.nullable,
            &attribute.constraint,
            value,
            &attribute.name,
        )
    }

    /// Validates a value against a type, nullability and constraint.
    pub fn validate(
        &self,
        ty: &ValueType,
        nullable: bool,
        constraint: &Constraint,
        value: &TlvValue,
        path: &str,
    ) -> Result<(), ValidationError> {
        if value.is_null() {
            return if nullable {
                Ok(())
            } else {
                Err(ValidationError::NotNullable {
                    path: path.to_string(),
                })
            };
        }

        match ty {
            ValueType::Bool => expect_type(value, matches!(value, TlvValue::Bool(_)), "boolean", path),
            ValueType::UInt(width) => self.validate_unsigned(*width, nullable, constraint, value, path),
            ValueType::Int(width) => self.validate_signed(*width, nullable, constraint, value, path),
            ValueType::Float => {
                expect_type(value, matches!(value, TlvValue::Float(_)), "float", path)
            }
            ValueType::Double => {
                expect_type(value, matches!(value, TlvValue::Double(_)), "double", path)
            }
            ValueType::Utf8 => {
                let TlvValue::Utf8(s) = value else {
                    return type_error(value, "string", path);
                };
                check_length(s.chars().count(), constraint, path)
            }
            ValueType::Bytes => {
                let TlvValue::Bytes(b) = value else {
                    return type_error(value, "octet string", path);
                };
                check_length(b.len(), constraint, path)
            }
            ValueType::Enum(name) => self.validate_enum(name, value, path),
            ValueType::Bitmap(name) => self.validate_bitmap(name, value, path),
            ValueType::Struct(name) => self.validate_struct(name, value, path),
            ValueType::List(inner) => {
                let items: &[TlvValue] = match value {
                    TlvValue::Array(items) => items,
                    _ => return type_error(value, "list", path),
                };
                check_length(items.len(), constraint, path)?;
                for (i, item) in items.iter().enumerate() {
                    self.validate(
                        inner,
                        false,
                        &Constraint::default(),
                        item,
                        &format!("{path}[{i}]"),
                    )?;
                }
                Ok(())
            }
        }
    }

    fn validate_unsigned(
        &self,
        width: IntWidth,
        nullable: bool,
        constraint: &Constraint,
        value: &TlvValue,
        path: &str,
    ) -> Result<(), ValidationError> {
        let Some(v) = value.as_u64() else {
            return type_error(value, "unsigned integer", path);
        };
        // The nullable sentinel is a legal write; it reads as null.
        if nullable && v == width.unsigned_max() {
            return Ok(());
        }
        let max = if nullable {
            width.unsigned_max() - 1
        } else {
            width.unsigned_max()
        };
        let min = constraint.min.map_or(0, |m| m.max(0) as u64);
        let max = constraint
            .max
            .map_or(max, |m| (m.max(0) as u64).min(max));
        if v < min || v > max {
            return Err(ValidationError::IntegerRange {
                path: path.to_string(),
                value: i128::from(v),
                min: i128::from(min),
                max: i128::from(max),
            });
        }
        Ok(())
    }

    fn validate_signed(
        &self,
        width: IntWidth,
        nullable: bool,
        constraint: &Constraint,
        value: &TlvValue,
        path: &str,
    ) -> Result<(), ValidationError> {
        let Some(v) = value.as_i64() else {
            return type_error(value, "signed integer", path);
        };
        // The nullable sentinel is a legal write; it reads as null.
        if nullable && v == width.signed_min() {
            return Ok(());
        }
        let min = if nullable {
            width.signed_min() + 1
        } else {
            width.signed_min()
        };
        let min = constraint.min.map_or(min, |m| m.max(min));
        let max = constraint.max.map_or(width.signed_max(), |m| m.min(width.signed_max()));
        if v < min || v > max {
            return Err(ValidationError::IntegerRange {
                path: path.to_string(),
                value: i128::from(v),
                min: i128::from(min),
                max: i128::from(max),
            });
        }
        Ok(())
    }

    fn validate_enum(
        &self,
        name: &str,
        value: &TlvValue,
        path: &str,
    ) -> Result<(), ValidationError> {
        let Some(v) = value.as_u64() else {
            return type_error(value, "enumeration", path);
        };
        let Some(DatatypeSchema::Enum { values, .. }) = self.cluster.datatype(name) else {
            return Err(ValidationError::Constraint {
                path: path.to_string(),
                detail: format!("unknown enum datatype '{name}'"),
            });
        };
        if values.iter().any(|(_, ev)| *ev == v) {
            Ok(())
        } else {
            Err(ValidationError::Constraint {
                path: path.to_string(),
                detail: format!("{v} is not a value of enum '{name}'"),
            })
        }
    }

    fn validate_bitmap(
        &self,
        name: &str,
        value: &TlvValue,
        path: &str,
    ) -> Result<(), ValidationError> {
        let Some(v) = value.as_u64() else {
            return type_error(value, "bitmap", path);
        };
        let Some(DatatypeSchema::Bitmap { bits, .. }) = self.cluster.datatype(name) else {
            return Err(ValidationError::Constraint {
                path: path.to_string(),
                detail: format!("unknown bitmap datatype '{name}'"),
            });
        };
        let mask: u64 = bits.iter().map(|(_, bit)| 1u64 << bit).sum();
        if v & !mask != 0 {
            return Err(ValidationError::Constraint {
                path: path.to_string(),
                detail: format!("0x{v:X} sets bits outside bitmap '{name}'"),
            });
        }
        Ok(())
    }

    fn validate_struct(
        &self,
        name: &str,
        value: &TlvValue,
        path: &str,
    ) -> Result<(), ValidationError> {
        let members = match value {
            TlvValue::Struct(members) => members,
            _ => return type_error(value, "struct", path),
        };
        let Some(DatatypeSchema::Struct { fields, .. }) = self.cluster.datatype(name) else {
            return Err(ValidationError::Constraint {
                path: path.to_string(),
                detail: format!("unknown struct datatype '{name}'"),
            });
        };
        for field in fields {
            let member = members
                .iter()
                .find(|(tag, _)| tag.context_number() == Some(field.id))
                .map(|(_, v)| v);
            match member {
                Some(v) => self.validate(
                    &field.ty,
                    field.nullable,
                    &field.constraint,
                    v,
                    &format!("{path}.{}", field.name),
                )?,
                None if field.optional => {}
                None => {
                    return Err(ValidationError::MissingField {
                        path: path.to_string(),
                        field: field.name.clone(),
                    });
                }
            }
        }
        // Members with tags no field declares are vendor extensions;
        // they pass through untouched.
        Ok(())
    }

    // ========================================================================
    // Codec
    // ========================================================================

    /// Validates then encodes an attribute value.
    pub fn encode_attribute(
        &self,
        attribute: &AttributeSchema,
        value: &TlvValue,
    ) -> Result<Bytes, ValidationError> {
        self.validate_attribute(attribute, value)?;
        Ok(trellis_tlv::encode(value))
    }

    /// Decodes then validates an attribute value.
    pub fn decode_attribute(
        &self,
        attribute: &AttributeSchema,
        bytes: &[u8],
    ) -> Result<TlvValue, ValidationError> {
        let value = trellis_tlv::decode(bytes).map_err(|source| ValidationError::Tlv {
            path: attribute.name.clone(),
            source,
        })?;
        let value = self.normalized(attribute, value);
        self.validate_attribute(attribute, &value)?;
        Ok(value)
    }

    /// Maps the nullable sentinel to an explicit null.
    pub fn normalized(&self, attribute: &AttributeSchema, value: TlvValue) -> TlvValue {
        if !attribute.quality.nullable {
            return value;
        }
        match (&attribute.ty, &value) {
            (ValueType::UInt(w), TlvValue::UnsignedInt(v)) if *v == w.unsigned_max() => {
                TlvValue::Null
            }
            (ValueType::Int(w), TlvValue::SignedInt(v)) if *v == w.signed_min() => TlvValue::Null,
            _ => value,
        }
    }

    // ========================================================================
    // Patching
    // ========================================================================

    /// Structurally merges `patch` into `target`, validating the result.
    ///
    /// Structs merge by field; lists are replaced whole unless the patch
    /// is a keyed update (context tags as indices).
    pub fn patch(
        &self,
        attribute: &AttributeSchema,
        target: &TlvValue,
        patch: TlvValue,
    ) -> Result<TlvValue, ValidationError> {
        let patched = merge(target, patch);
        let patched = self.normalized(attribute, patched);
        self.validate_attribute(attribute, &patched)?;
        Ok(patched)
    }

    // ========================================================================
    // Defaults
    // ========================================================================

    /// The default value of an attribute.
    ///
    /// Declared default first; null for nullable-without-default; else
    /// the type's zero value.
    pub fn default_of(&self, attribute: &AttributeSchema) -> TlvValue {
        if let Some(default) = &attribute.default {
            return default.clone();
        }
        if attribute.quality.nullable {
            return TlvValue::Null;
        }
        self.zero_of(&attribute.ty)
    }

    fn zero_of(&self, ty: &ValueType) -> TlvValue {
        match ty {
            ValueType::Bool => TlvValue::Bool(false),
            ValueType::UInt(_) | ValueType::Enum(_) | ValueType::Bitmap(_) => {
                TlvValue::UnsignedInt(0)
            }
            ValueType::Int(_) => TlvValue::SignedInt(0),
            ValueType::Float => TlvValue::Float(0.0),
            ValueType::Double => TlvValue::Double(0.0),
            ValueType::Utf8 => TlvValue::Utf8(String::new()),
            ValueType::Bytes => TlvValue::Bytes(Bytes::new()),
            ValueType::List(_) => TlvValue::Array(Vec::new()),
            ValueType::Struct(name) => {
                let fields: &[FieldSchema] = match self.cluster.datatype(name) {
                    Some(DatatypeSchema::Struct { fields, .. }) => fields,
                    _ => &[],
                };
                TlvValue::Struct(
                    fields
                        .iter()
                        .filter(|f| !f.optional)
                        .map(|f| {
                            let v = if f.nullable {
                                TlvValue::Null
                            } else {
                                self.zero_of(&f.ty)
                            };
                            (TlvTag::context(f.id), v)
                        })
                        .collect(),
                )
            }
        }
    }

    // ========================================================================
    // Fabric scoping
    // ========================================================================

    /// Filters a fabric-scoped value down to one fabric's view.
    ///
    /// For a fabric-scoped list attribute, rows whose fabric-index field
    /// names another fabric are dropped. Non-scoped attributes pass
    /// through unchanged.
    pub fn scope_for(
        &self,
        attribute: &AttributeSchema,
        value: &TlvValue,
        fabric_index: FabricIndex,
    ) -> TlvValue {
        if !attribute.quality.fabric_scoped {
            return value.clone();
        }
        let ValueType::List(inner) = &attribute.ty else {
            return value.clone();
        };
        let ValueType::Struct(name) = inner.as_ref() else {
            return value.clone();
        };
        let Some(DatatypeSchema::Struct {
            fabric_index_field: Some(fi_field),
            ..
        }) = self.cluster.datatype(name)
        else {
            return value.clone();
        };
        let TlvValue::Array(rows) = value else {
            return value.clone();
        };

        let visible = rows
            .iter()
            .filter(|row| {
                row.member(*fi_field)
                    .and_then(TlvValue::as_u64)
                    .is_none_or(|fi| fi == u64::from(fabric_index.as_u8()))
            })
            .cloned()
            .collect();
        TlvValue::Array(visible)
    }
}

fn expect_type(
    value: &TlvValue,
    ok: bool,
    expected: &str,
    path: &str,
) -> Result<(), ValidationError> {
    if ok {
        Ok(())
    } else {
        type_error(value, expected, path)
    }
}

fn type_error(value: &TlvValue, expected: &str, path: &str) -> Result<(), ValidationError> {
    Err(ValidationError::Datatype {
        path: path.to_string(),
        expected: expected.to_string(),
        actual: value.type_name(),
    })
}

fn check_length(len: usize, constraint: &Constraint, path: &str) -> Result<(), ValidationError> {
    if let Some(min) = constraint.min_length {
        if len < min {
            return Err(ValidationError::Constraint {
                path: path.to_string(),
                detail: format!("length {len} below minimum {min}"),
            });
        }
    }
    if let Some(max) = constraint.max_length {
        if len > max {
            return Err(ValidationError::Constraint {
                path: path.to_string(),
                detail: format!("length {len} above maximum {max}"),
            });
        }
    }
    Ok(())
}
