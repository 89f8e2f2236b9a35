//! Patch types: the single structural edit and its reversible form.
//!
//! A patch is `{op, path, value?}`; a reversible patch additionally carries
//! `oldValue`. This JSON shape (see [`codec`]) is the wire format and the
//! undo/redo unit, and is the only surface requiring bit-exact compatibility.

pub mod codec;

use serde_json::Value;

use statetree_json_pointer::{format_pointer, parse_pointer, Path};

/// The structural edit kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

impl PatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOp::Add => "add",
            PatchOp::Remove => "remove",
            PatchOp::Replace => "replace",
        }
    }
}

/// A single structural edit addressed by path.
///
/// `value` is absent for `remove`; `old_value` is present only on patches
/// produced by the engine (the reversible form) and is what makes an inverse
/// patch derivable.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,
    pub value: Option<Value>,
    pub old_value: Option<Value>,
}

impl Patch {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
            old_value: None,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
            old_value: None,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
            old_value: None,
        }
    }

    pub fn with_old_value(mut self, old: Value) -> Self {
        self.old_value = Some(old);
        self
    }

    /// The parsed path segments.
    pub fn segments(&self) -> Path {
        parse_pointer(&self.path)
    }

    /// Re-root the patch so its path is relative to `base` segments.
    ///
    /// The caller guarantees `base` is a prefix of the patch path; the engine
    /// uses this to deliver listener-relative paths while bubbling.
    pub(crate) fn rebased(&self, base_len: usize) -> Patch {
        let segments = self.segments();
        let split = base_len.min(segments.len());
        Patch {
            op: self.op,
            path: format_pointer(&segments[split..]),
            value: self.value.clone(),
            old_value: self.old_value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors() {
        let p = Patch::replace("/count", json!(5)).with_old_value(json!(0));
        assert_eq!(p.op, PatchOp::Replace);
        assert_eq!(p.path, "/count");
        assert_eq!(p.value, Some(json!(5)));
        assert_eq!(p.old_value, Some(json!(0)));
        assert!(Patch::remove("/a").value.is_none());
    }

    #[test]
    fn rebase_strips_prefix() {
        let p = Patch::replace("/todos/0/title", json!("x"));
        assert_eq!(p.rebased(1).path, "/0/title");
        assert_eq!(p.rebased(3).path, "");
    }

    #[test]
    fn segments_unescape() {
        let p = Patch::add("/a~1b/-", json!(1));
        assert_eq!(p.segments(), vec!["a/b".to_string(), "-".to_string()]);
    }
}
