//! Integration tests for trellis-supervisor.

use std::sync::Arc;

use bytes::Bytes;
use test_case::test_case;
use trellis_model::{
    Access, AttributeSchema, ClusterBuilder, ClusterSchema, Conformance, Constraint, FieldSchema,
    IntWidth, Quality, ValueType,
};
use trellis_tlv::{TlvTag, TlvValue};
use trellis_types::{AttributeId, FabricIndex};

use crate::{ValidationError, ValueSupervisor};

fn attr(id: u32, name: &str, ty: ValueType, nullable: bool) -> AttributeSchema {
    AttributeSchema {
        id: AttributeId::new(id),
        name: name.into(),
        ty,
        default: None,
        quality: Quality {
            nullable,
            ..Quality::default()
        },
        conformance: Conformance::Mandatory,
        access: Access::RW_VIEW_OPERATE,
        constraint: Constraint::default(),
    }
}

/// A cluster exercising integers, strings, structs and fabric scoping.
fn fixture() -> Arc<ClusterSchema> {
    ClusterBuilder::new("Sample", 0x1000u32)
        .struct_type(
            "Entry",
            vec![
                FieldSchema {
                    id: 1,
                    name: "subjects".into(),
                    ty: ValueType::List(Box::new(ValueType::UInt(IntWidth::W64))),
                    nullable: false,
                    optional: false,
                    constraint: Constraint::default(),
                },
                FieldSchema {
                    id: 254,
                    name: "fabricIndex".into(),
                    ty: ValueType::UInt(IntWidth::W8),
                    nullable: false,
                    optional: false,
                    constraint: Constraint::default(),
                },
            ],
        )
        .attribute(attr(0, "level", ValueType::UInt(IntWidth::W8), false))
        .attribute(attr(1, "setpoint", ValueType::UInt(IntWidth::W8), true))
        .attribute(attr(2, "offset", ValueType::Int(IntWidth::W16), true))
        .attribute(AttributeSchema {
            constraint: Constraint::max_length(16),
            ..attr(3, "label", ValueType::Utf8, false)
        })
        .attribute(AttributeSchema {
            quality: Quality::fabric_scoped(),
            ..attr(4, "acl", ValueType::List(Box::new(ValueType::Struct("Entry".into()))), false)
        })
        .attribute(AttributeSchema {
            constraint: Constraint::range(10, 90),
            ..attr(5, "bounded", ValueType::UInt(IntWidth::W8), false)
        })
        .build()
        .unwrap()
}

fn supervisor() -> ValueSupervisor {
    ValueSupervisor::new(fixture())
}

fn attribute(name: &str) -> AttributeSchema {
    fixture().attribute_by_name(name).unwrap().clone()
}

// ============================================================================
// Integer ranges
// ============================================================================

#[test]
fn uint8_write_of_256_is_out_of_range() {
    let err = supervisor()
        .validate_attribute(&attribute("level"), &TlvValue::UnsignedInt(256))
        .unwrap_err();
    assert!(matches!(err, ValidationError::IntegerRange { value: 256, .. }));
}

#[test]
fn uint8_accepts_255_when_not_nullable() {
    supervisor()
        .validate_attribute(&attribute("level"), &TlvValue::UnsignedInt(255))
        .unwrap();
}

#[test]
fn nullable_uint8_write_of_255_succeeds_as_null() {
    let sup = supervisor();
    let schema = attribute("setpoint");
    // The sentinel is legal on the wire...
    sup.validate_attribute(&schema, &TlvValue::UnsignedInt(255)).unwrap();
    // ...and normalizes to an explicit null.
    assert_eq!(
        sup.normalized(&schema, TlvValue::UnsignedInt(255)),
        TlvValue::Null
    );
    assert_eq!(
        sup.normalized(&schema, TlvValue::UnsignedInt(254)),
        TlvValue::UnsignedInt(254)
    );
}

#[test]
fn nullable_int16_reserves_signed_min() {
    let sup = supervisor();
    let schema = attribute("offset");
    assert_eq!(
        sup.normalized(&schema, TlvValue::SignedInt(-32768)),
        TlvValue::Null
    );
    sup.validate_attribute(&schema, &TlvValue::SignedInt(-32767)).unwrap();
    let err = sup
        .validate_attribute(&schema, &TlvValue::SignedInt(40_000))
        .unwrap_err();
    assert!(matches!(err, ValidationError::IntegerRange { .. }));
}

#[test_case(9; "below min")]
#[test_case(91; "above max")]
fn constraint_narrows_range(value: u64) {
    let err = supervisor()
        .validate_attribute(&attribute("bounded"), &TlvValue::UnsignedInt(value))
        .unwrap_err();
    assert!(matches!(err, ValidationError::IntegerRange { .. }));
}

#[test]
fn null_rejected_on_non_nullable() {
    let err = supervisor()
        .validate_attribute(&attribute("level"), &TlvValue::Null)
        .unwrap_err();
    assert!(matches!(err, ValidationError::NotNullable { .. }));
}

#[test]
fn wrong_type_reports_both_types() {
    let err = supervisor()
        .validate_attribute(&attribute("level"), &TlvValue::utf8("five"))
        .unwrap_err();
    match err {
        ValidationError::Datatype { expected, actual, .. } => {
            assert_eq!(expected, "unsigned integer");
            assert_eq!(actual, "string");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

// ============================================================================
// Strings and structs
// ============================================================================

#[test]
fn string_length_constraint() {
    let sup = supervisor();
    sup.validate_attribute(&attribute("label"), &TlvValue::utf8("kitchen"))
        .unwrap();
    let err = sup
        .validate_attribute(&attribute("label"), &TlvValue::utf8("a very long label indeed"))
        .unwrap_err();
    assert!(matches!(err, ValidationError::Constraint { .. }));
}

#[test]
fn struct_missing_mandatory_field() {
    let sup = supervisor();
    let row = TlvValue::Struct(vec![(TlvTag::context(1), TlvValue::Array(vec![]))]);
    let err = sup
        .validate_attribute(&attribute("acl"), &TlvValue::Array(vec![row]))
        .unwrap_err();
    match err {
        ValidationError::MissingField { field, .. } => assert_eq!(field, "fabricIndex"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn struct_vendor_extension_members_pass() {
    let sup = supervisor();
    let row = TlvValue::Struct(vec![
        (TlvTag::context(1), TlvValue::Array(vec![])),
        (TlvTag::context(254), TlvValue::UnsignedInt(1)),
        // No field 77 exists; vendor extensions are preserved, not rejected.
        (TlvTag::context(77), TlvValue::utf8("extra")),
    ]);
    sup.validate_attribute(&attribute("acl"), &TlvValue::Array(vec![row]))
        .unwrap();
}

// ============================================================================
// Codec, defaults, patch
// ============================================================================

#[test]
fn encode_decode_roundtrip() {
    let sup = supervisor();
    let schema = attribute("label");
    let bytes = sup.encode_attribute(&schema, &TlvValue::utf8("hall")).unwrap();
    assert_eq!(sup.decode_attribute(&schema, &bytes).unwrap(), TlvValue::utf8("hall"));
}

#[test]
fn decode_surfaces_tlv_error() {
    let sup = supervisor();
    let err = sup
        .decode_attribute(&attribute("label"), &Bytes::from_static(&[0x0C]))
        .unwrap_err();
    assert!(matches!(err, ValidationError::Tlv { .. }));
}

#[test]
fn default_prefers_declared_then_null_then_zero() {
    let sup = supervisor();
    assert_eq!(sup.default_of(&attribute("setpoint")), TlvValue::Null);
    assert_eq!(sup.default_of(&attribute("level")), TlvValue::UnsignedInt(0));
    assert_eq!(sup.default_of(&attribute("label")), TlvValue::Utf8(String::new()));
    assert_eq!(sup.default_of(&attribute("acl")), TlvValue::Array(vec![]));
}

#[test]
fn patch_validates_result() {
    let sup = supervisor();
    let schema = attribute("bounded");
    let patched = sup
        .patch(&schema, &TlvValue::UnsignedInt(50), TlvValue::UnsignedInt(60))
        .unwrap();
    assert_eq!(patched, TlvValue::UnsignedInt(60));

    let err = sup
        .patch(&schema, &TlvValue::UnsignedInt(50), TlvValue::UnsignedInt(200))
        .unwrap_err();
    assert!(matches!(err, ValidationError::IntegerRange { .. }));
}

// ============================================================================
// Fabric scoping
// ============================================================================

fn acl_row(fabric: u8, subject: u64) -> TlvValue {
    TlvValue::Struct(vec![
        (
            TlvTag::context(1),
            TlvValue::Array(vec![TlvValue::UnsignedInt(subject)]),
        ),
        (TlvTag::context(254), TlvValue::UnsignedInt(u64::from(fabric))),
    ])
}

#[test]
fn scope_for_drops_other_fabrics_rows() {
    let sup = supervisor();
    let schema = attribute("acl");
    let value = TlvValue::Array(vec![acl_row(1, 100), acl_row(2, 200), acl_row(1, 101)]);

    let scoped = sup.scope_for(&schema, &value, FabricIndex::new(1));
    let rows = scoped.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row.member(254).and_then(TlvValue::as_u64), Some(1));
    }
}

#[test]
fn scope_for_passes_unscoped_attributes_through() {
    let sup = supervisor();
    let schema = attribute("level");
    let value = TlvValue::UnsignedInt(7);
    assert_eq!(sup.scope_for(&schema, &value, FabricIndex::new(2)), value);
}
