//! Patch Emitter
//!
//! Computes the RFC 6902 JSON Patch between an object as received and the
//! object after mutation. Both sides go through the same typed serialization,
//! so fields the typed model does not know about never show up in the diff.
//! An array element the diff replaces is written back in its typed form, which
//! drops those fields; insertions at the front of an array are therefore
//! expressed as an append followed by [`move_tail_to_front`].

use json_patch::Patch;
use serde::Serialize;
use serde_json::{json, Value};

use crate::{Error, Result};

/// Diff `original` against `mutated`; `None` when they serialize identically
pub fn compute_patch<T: Serialize>(original: &T, mutated: &T) -> Result<Option<Patch>> {
    let before = serde_json::to_value(original)
        .map_err(|e| Error::patch_computation(format!("serializing original object: {e}")))?;
    let after = serde_json::to_value(mutated)
        .map_err(|e| Error::patch_computation(format!("serializing mutated object: {e}")))?;

    let patch = json_patch::diff(&before, &after);
    Ok((!patch.0.is_empty()).then_some(patch))
}

/// `move` operations bringing the last `count` elements of the array at
/// `path` to its front, in order. `len` is the array length before the
/// `count` elements were appended.
pub fn move_tail_to_front(path: &str, len: usize, count: usize) -> Result<Patch> {
    let ops: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "op": "move",
                "from": format!("{path}/{}", len + i),
                "path": format!("{path}/{i}"),
            })
        })
        .collect();

    serde_json::from_value(Value::Array(ops))
        .map_err(|e| Error::patch_computation(format!("building move operations: {e}")))
}

/// Serialize a patch to the bytes sent back to the API server
///
/// No patch is encoded as an empty buffer.
pub fn patch_bytes(patch: Option<&Patch>) -> Result<Vec<u8>> {
    match patch {
        None => Ok(Vec::new()),
        Some(p) => serde_json::to_vec(p)
            .map_err(|e| Error::patch_computation(format!("serializing patch: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_objects_produce_no_patch() {
        let obj = json!({"metadata": {"name": "web"}});
        assert!(compute_patch(&obj, &obj.clone()).unwrap().is_none());
    }

    #[test]
    fn added_annotation_produces_add_operation() {
        let before = json!({"metadata": {"annotations": {"a": "1"}}});
        let after = json!({"metadata": {"annotations": {"a": "1", "b": "2"}}});

        let patch = compute_patch(&before, &after).unwrap().unwrap();
        let ops = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            ops,
            json!([{"op": "add", "path": "/metadata/annotations/b", "value": "2"}])
        );
    }

    #[test]
    fn applying_patch_reproduces_mutated_object() {
        let before = json!({"spec": {"initContainers": [], "volumes": [{"name": "x"}]}});
        let after = json!({"spec": {"initContainers": [{"name": "beam-aws"}], "volumes": [{"name": "x"}, {"name": "y"}]}});

        let patch = compute_patch(&before, &after).unwrap().unwrap();
        let mut applied = before.clone();
        json_patch::patch(&mut applied, &patch).unwrap();
        assert_eq!(applied, after);
    }

    #[test]
    fn appended_tail_moves_to_front_untouched() {
        let mut doc = json!({"items": [{"name": "migrate", "extra": true}, {"name": "seed"}, "a", "b"]});

        let moves = move_tail_to_front("/items", 2, 2).unwrap();
        json_patch::patch(&mut doc, &moves).unwrap();

        assert_eq!(
            doc,
            json!({"items": ["a", "b", {"name": "migrate", "extra": true}, {"name": "seed"}]})
        );
    }

    #[test]
    fn no_moves_for_empty_tail() {
        assert!(move_tail_to_front("/items", 3, 0).unwrap().0.is_empty());
    }

    #[test]
    fn patch_bytes_empty_for_no_change() {
        assert!(patch_bytes(None).unwrap().is_empty());

        let patch = compute_patch(&json!({}), &json!({"a": 1})).unwrap().unwrap();
        let bytes = patch_bytes(Some(&patch)).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(parsed.is_array());
    }
}
