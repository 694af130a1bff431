//! Structural merge.
//!
//! Merge rules:
//! - struct into struct: member-wise by tag, recursing where both sides
//!   are containers
//! - keyed list into array: context tag numbers are element indices
//! - anything else: the patch replaces the target wholesale

use trellis_tlv::TlvValue;

/// Merges `patch` into `target`, returning the patched value.
pub fn merge(target: &TlvValue, patch: TlvValue) -> TlvValue {
    match (target, patch) {
        (TlvValue::Struct(existing), TlvValue::Struct(incoming)) => {
            let mut merged = existing.clone();
            for (tag, patch_member) in incoming {
                match merged.iter_mut().find(|(t, _)| *t == tag) {
                    Some((_, slot)) => *slot = merge(slot, patch_member),
                    None => merged.push((tag, patch_member)),
                }
            }
            TlvValue::Struct(merged)
        }
        // A keyed update: list members tagged with indices into the array.
        (TlvValue::Array(items), TlvValue::List(keyed))
            if keyed.iter().all(|(t, _)| t.context_number().is_some()) =>
        {
            let mut merged = items.clone();
            for (tag, patch_item) in keyed {
                let index = usize::from(tag.context_number().expect("guarded above"));
                if index < merged.len() {
                    merged[index] = merge(&merged[index], patch_item);
                } else if index == merged.len() {
                    merged.push(patch_item);
                }
                // Beyond-end indices are dropped; the follow-up validate
                // decides whether the result is still acceptable.
            }
            TlvValue::Array(merged)
        }
        (_, patch) => patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_tlv::TlvTag;

    fn s(members: Vec<(u8, TlvValue)>) -> TlvValue {
        TlvValue::Struct(
            members
                .into_iter()
                .map(|(n, v)| (TlvTag::context(n), v))
                .collect(),
        )
    }

    #[test]
    fn struct_merge_recurses_by_field() {
        let target = s(vec![
            (0, TlvValue::UnsignedInt(1)),
            (1, s(vec![(0, TlvValue::Bool(false)), (1, TlvValue::UnsignedInt(5))])),
        ]);
        let patch = s(vec![(1, s(vec![(0, TlvValue::Bool(true))]))]);

        let merged = merge(&target, patch);
        assert_eq!(merged.member(0), Some(&TlvValue::UnsignedInt(1)));
        let inner = merged.member(1).unwrap();
        assert_eq!(inner.member(0), Some(&TlvValue::Bool(true)));
        assert_eq!(inner.member(1), Some(&TlvValue::UnsignedInt(5)));
    }

    #[test]
    fn unknown_patch_field_is_appended() {
        let target = s(vec![(0, TlvValue::Bool(false))]);
        let merged = merge(&target, s(vec![(7, TlvValue::UnsignedInt(9))]));
        assert_eq!(merged.member(7), Some(&TlvValue::UnsignedInt(9)));
    }

    #[test]
    fn plain_list_replaces_whole() {
        let target = TlvValue::Array(vec![TlvValue::UnsignedInt(1), TlvValue::UnsignedInt(2)]);
        let patch = TlvValue::Array(vec![TlvValue::UnsignedInt(9)]);
        assert_eq!(merge(&target, patch.clone()), patch);
    }

    #[test]
    fn keyed_list_updates_by_index() {
        let target = TlvValue::Array(vec![TlvValue::UnsignedInt(1), TlvValue::UnsignedInt(2)]);
        let patch = TlvValue::List(vec![(TlvTag::context(1), TlvValue::UnsignedInt(20))]);
        assert_eq!(
            merge(&target, patch),
            TlvValue::Array(vec![TlvValue::UnsignedInt(1), TlvValue::UnsignedInt(20)])
        );
    }

    #[test]
    fn keyed_list_appends_at_end_index() {
        let target = TlvValue::Array(vec![TlvValue::UnsignedInt(1)]);
        let patch = TlvValue::List(vec![(TlvTag::context(1), TlvValue::UnsignedInt(2))]);
        assert_eq!(
            merge(&target, patch),
            TlvValue::Array(vec![TlvValue::UnsignedInt(1), TlvValue::UnsignedInt(2)])
        );
    }

    #[test]
    fn scalar_patch_replaces() {
        assert_eq!(
            merge(&TlvValue::UnsignedInt(1), TlvValue::Null),
            TlvValue::Null
        );
    }
}
