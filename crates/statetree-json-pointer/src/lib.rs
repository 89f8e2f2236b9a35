//! Escaped path-segment utilities for node paths.
//!
//! Node paths are `/`-joined sequences of child keys, escaped per RFC 6901:
//! `~` becomes `~0` and `/` becomes `~1`. Numeric segments address list
//! indices and the literal segment `-` addresses list append.
//!
//! # Example
//!
//! ```
//! use statetree_json_pointer::{parse_pointer, format_pointer, escape_segment};
//!
//! let path = parse_pointer("/todos/0/title");
//! assert_eq!(path, vec!["todos".to_string(), "0".to_string(), "title".to_string()]);
//! assert_eq!(format_pointer(&path), "/todos/0/title");
//! assert_eq!(escape_segment("a/b"), "a~1b");
//! ```

use serde_json::Value;
use thiserror::Error;

/// A single path segment (child key or list index token).
pub type PathSegment = String;

/// A parsed node path: the unescaped segments from a root to a node.
pub type Path = Vec<PathSegment>;

/// The list-append sentinel segment.
pub const APPEND: &str = "-";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PointerError {
    #[error("NO_PARENT")]
    NoParent,
    #[error("INVALID_INDEX")]
    InvalidIndex,
}

/// Unescapes a path segment.
///
/// `~1` is replaced with `/` and `~0` is replaced with `~`.
pub fn unescape_segment(segment: &str) -> String {
    if !segment.contains('~') {
        return segment.to_string();
    }
    // Order matters: ~1 must be replaced before ~0
    segment.replace("~1", "/").replace("~0", "~")
}

/// Escapes a path segment.
///
/// `/` is replaced with `~1` and `~` is replaced with `~0`.
pub fn escape_segment(segment: &str) -> String {
    if !segment.contains('/') && !segment.contains('~') {
        return segment.to_string();
    }
    segment.replace('~', "~0").replace('/', "~1")
}

/// Parse a pointer string into unescaped path segments.
///
/// The empty string is the root path. A leading `/` is required for
/// non-empty pointers.
pub fn parse_pointer(pointer: &str) -> Path {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer[1..].split('/').map(unescape_segment).collect()
}

/// Parse a pointer string that may be missing its leading `/`.
pub fn parse_pointer_relaxed(pointer: &str) -> Path {
    if pointer.starts_with('/') || pointer.is_empty() {
        return parse_pointer(pointer);
    }
    let mut absolute = String::with_capacity(pointer.len() + 1);
    absolute.push('/');
    absolute.push_str(pointer);
    parse_pointer(&absolute)
}

/// Format path segments into a pointer string.
pub fn format_pointer(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return String::new();
    }
    let mut out = String::with_capacity(path.len() * 8);
    for segment in path {
        out.push('/');
        out.push_str(&escape_segment(segment));
    }
    out
}

/// Check if a path points to a root node.
pub fn is_root(path: &[PathSegment]) -> bool {
    path.is_empty()
}

/// Check if `ancestor` is a strict prefix of `descendant`.
pub fn is_ancestor(ancestor: &[PathSegment], descendant: &[PathSegment]) -> bool {
    if ancestor.len() >= descendant.len() {
        return false;
    }
    ancestor.iter().zip(descendant).all(|(a, d)| a == d)
}

/// Check if `prefix` is a (possibly equal) prefix of `path`.
pub fn is_prefix(prefix: &[PathSegment], path: &[PathSegment]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path).all(|(a, d)| a == d)
}

/// Get the parent path of a given path.
pub fn parent(path: &[PathSegment]) -> Result<Path, PointerError> {
    if path.is_empty() {
        return Err(PointerError::NoParent);
    }
    Ok(path[..path.len() - 1].to_vec())
}

/// Check if a segment is a valid non-negative list index.
///
/// Leading zeros are rejected (`"0"` is valid, `"01"` is not).
pub fn is_valid_index(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    let bytes = segment.as_bytes();
    if bytes.len() > 1 && bytes[0] == b'0' {
        return false;
    }
    bytes.iter().all(|b| b.is_ascii_digit())
}

/// Parse a segment as a list index, treating [`APPEND`] as `len`.
pub fn parse_index(segment: &str, len: usize) -> Result<usize, PointerError> {
    if segment == APPEND {
        return Ok(len);
    }
    if !is_valid_index(segment) {
        return Err(PointerError::InvalidIndex);
    }
    segment.parse().map_err(|_| PointerError::InvalidIndex)
}

/// Walk a plain value by path segments: objects by key, arrays by index.
///
/// ```
/// use statetree_json_pointer::{get, parse_pointer};
///
/// let doc = serde_json::json!({"foo": {"bar": 42}});
/// assert_eq!(get(&doc, &parse_pointer("/foo/bar")), Some(&serde_json::json!(42)));
/// ```
pub fn get<'a>(doc: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(arr) => {
                if !is_valid_index(segment) {
                    return None;
                }
                arr.get(segment.parse::<usize>().ok()?)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Mutable counterpart of [`get`].
pub fn get_mut<'a>(doc: &'a mut Value, path: &[PathSegment]) -> Option<&'a mut Value> {
    let mut current = doc;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(arr) => {
                if !is_valid_index(segment) {
                    return None;
                }
                arr.get_mut(segment.parse::<usize>().ok()?)?
            }
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trip() {
        for raw in ["plain", "a/b", "a~b", "~1", "~0", "a~1b/c~0"] {
            assert_eq!(unescape_segment(&escape_segment(raw)), raw);
        }
    }

    #[test]
    fn unescape_order_matters() {
        // "~01" must unescape to "~1", not "/"
        assert_eq!(unescape_segment("~01"), "~1");
    }

    #[test]
    fn parse_empty_is_root() {
        assert!(parse_pointer("").is_empty());
        assert!(is_root(&parse_pointer("")));
    }

    #[test]
    fn parse_and_format() {
        let path = parse_pointer("/a/b~1c/0");
        assert_eq!(path, vec!["a", "b/c", "0"]);
        assert_eq!(format_pointer(&path), "/a/b~1c/0");
    }

    #[test]
    fn relaxed_accepts_missing_slash() {
        assert_eq!(parse_pointer_relaxed("a/b"), parse_pointer("/a/b"));
        assert_eq!(parse_pointer_relaxed("/a/b"), parse_pointer("/a/b"));
    }

    #[test]
    fn ancestor_and_prefix() {
        let root: Path = vec![];
        let a = parse_pointer("/a");
        let ab = parse_pointer("/a/b");
        assert!(is_ancestor(&root, &a));
        assert!(is_ancestor(&a, &ab));
        assert!(!is_ancestor(&ab, &a));
        assert!(!is_ancestor(&a, &a));
        assert!(is_prefix(&a, &a));
        assert!(is_prefix(&a, &ab));
        assert!(!is_prefix(&ab, &a));
    }

    #[test]
    fn parent_of_root_fails() {
        assert_eq!(parent(&[]), Err(PointerError::NoParent));
        assert_eq!(parent(&parse_pointer("/a/b")), Ok(parse_pointer("/a")));
    }

    #[test]
    fn index_validation() {
        assert!(is_valid_index("0"));
        assert!(is_valid_index("12"));
        assert!(!is_valid_index("01"));
        assert!(!is_valid_index(""));
        assert!(!is_valid_index("-"));
        assert!(!is_valid_index("1a"));
    }

    #[test]
    fn parse_index_append() {
        assert_eq!(parse_index("-", 3), Ok(3));
        assert_eq!(parse_index("2", 3), Ok(2));
        assert_eq!(parse_index("x", 3), Err(PointerError::InvalidIndex));
    }

    #[test]
    fn get_walks_objects_and_arrays() {
        let doc = serde_json::json!({"items": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(
            get(&doc, &parse_pointer("/items/1/name")),
            Some(&serde_json::json!("b"))
        );
        assert_eq!(get(&doc, &parse_pointer("/items/2")), None);
        assert_eq!(get(&doc, &parse_pointer("/items/01")), None);
        assert_eq!(get(&doc, &[]), Some(&doc));
    }

    #[test]
    fn get_mut_allows_in_place_edits() {
        let mut doc = serde_json::json!({"a": [1, 2]});
        if let Some(v) = get_mut(&mut doc, &parse_pointer("/a/0")) {
            *v = serde_json::json!(9);
        }
        assert_eq!(doc, serde_json::json!({"a": [9, 2]}));
    }
}
