//! Integration tests for trellis-tlv.

use bytes::Bytes;
use proptest::prelude::*;
use test_case::test_case;

use crate::{TlvError, TlvReader, TlvTag, TlvValue, TlvWriter, decode, encode};

// ============================================================================
// Wire vectors
// ============================================================================

#[test]
fn u8_with_context_tag() {
    let mut w = TlvWriter::new();
    w.unsigned(TlvTag::context(1), 42);
    // control 0x20|0x04, tag 0x01, value 0x2A
    assert_eq!(w.finish().as_ref(), &[0x24, 0x01, 0x2A]);
}

#[test]
fn booleans_encode_in_the_type_code() {
    let mut w = TlvWriter::new();
    w.boolean(TlvTag::Anonymous, false);
    w.boolean(TlvTag::Anonymous, true);
    assert_eq!(w.finish().as_ref(), &[0x08, 0x09]);
}

#[test]
fn empty_struct() {
    let mut w = TlvWriter::new();
    w.start_struct(TlvTag::Anonymous);
    w.end_container();
    assert_eq!(w.finish().as_ref(), &[0x15, 0x18]);
}

#[test]
fn utf8_string_with_one_byte_length() {
    let mut w = TlvWriter::new();
    w.utf8(TlvTag::context(0), "on");
    assert_eq!(w.finish().as_ref(), &[0x2C, 0x00, 0x02, b'o', b'n']);
}

#[test]
fn negative_int_uses_signed_type() {
    let mut w = TlvWriter::new();
    w.signed(TlvTag::Anonymous, -2);
    assert_eq!(w.finish().as_ref(), &[0x00, 0xFE]);
}

#[test_case(0, 1; "one byte")]
#[test_case(255, 1; "u8 max stays one byte")]
#[test_case(256, 2; "first two byte value")]
#[test_case(65_536, 4; "first four byte value")]
#[test_case(u64::from(u32::MAX) + 1, 8; "first eight byte value")]
fn unsigned_width_selection(value: u64, expected_width: usize) {
    let mut w = TlvWriter::new();
    w.unsigned(TlvTag::Anonymous, value);
    assert_eq!(w.finish().len(), 1 + expected_width);
}

#[test]
fn fully_qualified_tag_roundtrip() {
    let tag = TlvTag::FullyQualified32 {
        vendor: 0xFFF1,
        profile: 0xDEED,
        tag: 0x1234_5678,
    };
    let mut w = TlvWriter::new();
    w.unsigned(tag, 7);
    let bytes = w.finish();

    let mut r = TlvReader::new(&bytes);
    let element = r.read_element().unwrap();
    assert_eq!(element.tag, tag);
    assert_eq!(element.value, TlvValue::UnsignedInt(7));
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn struct_roundtrip_preserves_member_order() {
    let value = TlvValue::Struct(vec![
        (TlvTag::context(2), TlvValue::Bool(true)),
        (TlvTag::context(0), TlvValue::UnsignedInt(300)),
        (TlvTag::context(1), TlvValue::utf8("kitchen")),
    ]);
    assert_eq!(decode(&encode(&value)).unwrap(), value);
}

#[test]
fn nested_containers_roundtrip() {
    let value = TlvValue::Struct(vec![
        (
            TlvTag::context(0),
            TlvValue::Array(vec![
                TlvValue::SignedInt(-1),
                TlvValue::Null,
                TlvValue::Struct(vec![(TlvTag::context(5), TlvValue::bytes(vec![1, 2, 3]))]),
            ]),
        ),
        (
            TlvTag::context(1),
            TlvValue::List(vec![(TlvTag::Anonymous, TlvValue::Double(1.5))]),
        ),
    ]);
    assert_eq!(decode(&encode(&value)).unwrap(), value);
}

#[test]
fn integer_width_is_normalized_not_lost() {
    // A u32-width write of a small number decodes equal to a u8 write.
    let mut w = TlvWriter::new();
    w.unsigned(TlvTag::Anonymous, 7);
    let narrow = w.finish();

    let wide = Bytes::from_static(&[0x06, 0x07, 0x00, 0x00, 0x00]);
    assert_eq!(decode(&narrow).unwrap(), decode(&wide).unwrap());
}

#[test]
fn unknown_members_survive_roundtrip() {
    // A struct with a member tag no schema knows still round-trips; the
    // codec never drops vendor extensions.
    let value = TlvValue::Struct(vec![
        (TlvTag::context(0), TlvValue::Bool(false)),
        (
            TlvTag::FullyQualified16 {
                vendor: 0xFFF1,
                profile: 2,
                tag: 99,
            },
            TlvValue::bytes(vec![0xAA; 16]),
        ),
    ]);
    assert_eq!(decode(&encode(&value)).unwrap(), value);
}

// ============================================================================
// Truncation and malformed input
// ============================================================================

#[test]
fn truncated_input_is_resumable() {
    let value = TlvValue::Struct(vec![
        (TlvTag::context(0), TlvValue::utf8("subscription")),
        (TlvTag::context(1), TlvValue::UnsignedInt(0xDEAD_BEEF)),
    ]);
    let full = encode(&value);

    for cut in 1..full.len() {
        let mut reader = TlvReader::new(&full[..cut]);
        let err = reader.read_element().unwrap_err();
        assert!(
            matches!(err, TlvError::UnexpectedEnd { .. }),
            "cut at {cut} gave {err:?}"
        );
        assert_eq!(reader.position(), 0, "cursor must not advance on cut {cut}");
    }

    // And the complete buffer still parses.
    assert_eq!(decode(&full).unwrap(), value);
}

#[test]
fn stray_end_of_container_rejected() {
    let mut reader = TlvReader::new(&[0x18]);
    assert!(matches!(
        reader.read_element(),
        Err(TlvError::UnbalancedContainerEnd { offset: 0 })
    ));
}

#[test]
fn invalid_element_type_rejected() {
    // 0x1F is not an assigned element type.
    let mut reader = TlvReader::new(&[0x1F, 0x00]);
    assert!(matches!(
        reader.read_element(),
        Err(TlvError::InvalidControl { .. })
    ));
}

#[test]
fn invalid_utf8_rejected() {
    // utf8-1 length 1, payload 0xFF
    let mut reader = TlvReader::new(&[0x0C, 0x01, 0xFF]);
    assert!(matches!(
        reader.read_element(),
        Err(TlvError::InvalidUtf8 { .. })
    ));
}

#[test]
fn oversized_length_rejected() {
    // bytes-8 with an absurd length must fail before allocating.
    let mut buf = vec![0x13];
    buf.extend_from_slice(&u64::MAX.to_le_bytes());
    let mut reader = TlvReader::new(&buf);
    assert!(matches!(
        reader.read_element(),
        Err(TlvError::LengthTooLarge { .. })
    ));
}

#[test]
fn depth_bomb_rejected() {
    let mut buf = Vec::new();
    for _ in 0..64 {
        buf.push(0x15);
    }
    let mut reader = TlvReader::new(&buf);
    assert!(matches!(
        reader.read_element(),
        Err(TlvError::DepthExceeded { .. })
    ));
}

// ============================================================================
// Property tests
// ============================================================================

fn leaf_value() -> impl Strategy<Value = TlvValue> {
    prop_oneof![
        any::<u64>().prop_map(TlvValue::UnsignedInt),
        any::<i64>().prop_map(TlvValue::SignedInt),
        any::<bool>().prop_map(TlvValue::Bool),
        "[a-zA-Z0-9 ]{0,48}".prop_map(TlvValue::Utf8),
        proptest::collection::vec(any::<u8>(), 0..64)
            .prop_map(|v| TlvValue::Bytes(Bytes::from(v))),
        Just(TlvValue::Null),
    ]
}

fn any_value() -> impl Strategy<Value = TlvValue> {
    leaf_value().prop_recursive(3, 32, 8, |inner| {
        prop_oneof![
            proptest::collection::vec((any::<u8>(), inner.clone()), 0..6).prop_map(|members| {
                TlvValue::Struct(
                    members
                        .into_iter()
                        .map(|(n, v)| (TlvTag::context(n), v))
                        .collect(),
                )
            }),
            proptest::collection::vec(inner.clone(), 0..6).prop_map(TlvValue::Array),
            proptest::collection::vec(inner, 0..6).prop_map(|items| {
                TlvValue::List(items.into_iter().map(|v| (TlvTag::Anonymous, v)).collect())
            }),
        ]
    })
}

proptest! {
    #[test]
    fn roundtrip_is_identity(value in any_value()) {
        prop_assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn truncation_never_panics(value in any_value(), cut in 0usize..256) {
        let bytes = encode(&value);
        let cut = cut.min(bytes.len());
        let mut reader = TlvReader::new(&bytes[..cut]);
        // Either a clean parse of a prefix value or a clean error.
        let _ = reader.read_element();
    }

    #[test]
    fn unsigned_widening(value in any::<u64>()) {
        let mut w = TlvWriter::new();
        w.unsigned(TlvTag::Anonymous, value);
        prop_assert_eq!(decode(&w.finish()).unwrap(), TlvValue::UnsignedInt(value));
    }

    #[test]
    fn signed_widening(value in any::<i64>()) {
        let mut w = TlvWriter::new();
        w.signed(TlvTag::Anonymous, value);
        prop_assert_eq!(decode(&w.finish()).unwrap(), TlvValue::SignedInt(value));
    }
}
