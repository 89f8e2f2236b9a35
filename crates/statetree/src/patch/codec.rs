//! JSON codec for patches.
//!
//! Converts patches to/from `serde_json::Value` in the
//! `{op, path, value?, oldValue?}` wire shape. Encoding is hand-written so
//! the wire format stays explicit: `value` is emitted for `add`/`replace`
//! only, `oldValue` only when the patch carries one.

use serde_json::{json, Map, Value};

use crate::error::TreeError;
use crate::patch::{Patch, PatchOp};

/// Serialize a patch to its wire value.
pub fn encode_patch(patch: &Patch) -> Value {
    let mut m = Map::new();
    m.insert("op".into(), json!(patch.op.as_str()));
    m.insert("path".into(), json!(patch.path));
    if patch.op != PatchOp::Remove {
        if let Some(v) = &patch.value {
            m.insert("value".into(), v.clone());
        }
    }
    if let Some(old) = &patch.old_value {
        m.insert("oldValue".into(), old.clone());
    }
    Value::Object(m)
}

/// Serialize a slice of patches to a wire array.
pub fn encode_patches(patches: &[Patch]) -> Value {
    Value::Array(patches.iter().map(encode_patch).collect())
}

/// Deserialize a patch from its wire value.
pub fn decode_patch(value: &Value) -> Result<Patch, TreeError> {
    let obj = value
        .as_object()
        .ok_or_else(|| TreeError::InvalidPath("patch must be an object".into()))?;
    let op = match obj.get("op").and_then(Value::as_str) {
        Some("add") => PatchOp::Add,
        Some("remove") => PatchOp::Remove,
        Some("replace") => PatchOp::Replace,
        other => {
            return Err(TreeError::InvalidPath(format!(
                "unknown patch op: {other:?}"
            )))
        }
    };
    let path = obj
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| TreeError::InvalidPath("patch path must be a string".into()))?
        .to_string();
    let value = obj.get("value").cloned();
    if value.is_none() && op != PatchOp::Remove {
        return Err(TreeError::InvalidPath(format!(
            "{} patch at {path} is missing a value",
            op.as_str()
        )));
    }
    Ok(Patch {
        op,
        path,
        value,
        old_value: obj.get("oldValue").cloned(),
    })
}

/// Deserialize a wire array of patches.
pub fn decode_patches(value: &Value) -> Result<Vec<Patch>, TreeError> {
    let arr = value
        .as_array()
        .ok_or_else(|| TreeError::InvalidPath("patch list must be an array".into()))?;
    arr.iter().map(decode_patch).collect()
}
