//! # Dotted Paths
//!
//! Every location in a form's data tree is addressed by a dotted path such as
//! `"user.addresses.0.city"`.  Segments made only of ASCII digits address sequence
//! indices; every other segment addresses a map key.
//!
//! The functions here never fail.  A path that cannot be followed yields `None` from
//! [`get`] and leaves the tree untouched in [`set`] and [`unset`].
//!
//! ```rust
//! use formwright::path;
//! use serde_json::json;
//!
//! let mut tree = json!({});
//! path::set(&mut tree, "user.addresses.0.city", json!("Lisbon"));
//! assert_eq!(tree, json!({"user": {"addresses": [{"city": "Lisbon"}]}}));
//! assert_eq!(path::get(&tree, "user.addresses.0.city"), Some(&json!("Lisbon")));
//!
//! path::unset(&mut tree, "user.addresses.0");
//! assert_eq!(tree, json!({"user": {"addresses": [null]}}));
//! ```
//!
//! Segments that name object-model internals (`__proto__`, `constructor`,
//! `prototype`) are refused wherever they appear in a path.  Form data frequently
//! round-trips through environments where such keys are dangerous, so the store
//! never creates, reads, or removes them.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

/// Segments that are never traversed, created, or removed.
pub const UNSAFE_SEGMENTS: &[&str] = &["__proto__", "constructor", "prototype"];

/// How far past its current end a single write may grow a sequence.
pub const MAX_SEQUENCE_GROWTH: usize = 1024;

////////////////////////////////////////////// PathSegment /////////////////////////////////////////////

/// One step of a path, as reported by a schema issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A sequence index.
    Index(usize),
    /// A map key.
    Key(String),
}

impl Display for PathSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PathSegment::Index(index) => write!(f, "{}", index),
            PathSegment::Key(key) => write!(f, "{}", key),
        }
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

/// Joins segments into the dotted form.
pub fn from_segments(segments: &[PathSegment]) -> String {
    segments
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

//////////////////////////////////////////////// Helpers ///////////////////////////////////////////////

/// Splits a dotted path into its non-empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Returns true when `segment` addresses a sequence index.
pub fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Returns true when any segment of `path` is refused by the store.
pub fn is_unsafe(path: &str) -> bool {
    segments(path)
        .iter()
        .any(|segment| UNSAFE_SEGMENTS.contains(segment))
}

/// Returns true when `path` equals `scope` or lies beneath it.
///
/// ```rust
/// use formwright::path::is_within;
///
/// assert!(is_within("items.0.name", "items"));
/// assert!(is_within("items", "items"));
/// assert!(!is_within("itemsCount", "items"));
/// ```
pub fn is_within(path: &str, scope: &str) -> bool {
    path == scope
        || (path.len() > scope.len()
            && path.starts_with(scope)
            && path.as_bytes()[scope.len()] == b'.')
}

/// Appends one segment to a path.
pub fn join(base: &str, segment: impl Display) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", base, segment)
    }
}

fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) if is_index(segment) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index)),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) if is_index(segment) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |index| items.get_mut(index)),
        _ => None,
    }
}

fn empty_container(next: &str) -> Value {
    if is_index(next) {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Pads `items` with nulls so that `index` is addressable.  Returns false, leaving
/// `items` untouched, when that would grow it by more than [`MAX_SEQUENCE_GROWTH`].
fn grow(items: &mut Vec<Value>, index: usize) -> bool {
    if index < items.len() {
        return true;
    }
    let limit = items.len().saturating_add(MAX_SEQUENCE_GROWTH);
    match index.checked_add(1) {
        Some(len) if index < limit => {
            items.resize(len, Value::Null);
            true
        }
        _ => {
            trace!(index, len = items.len(), "refusing to grow a sequence that far");
            false
        }
    }
}

/// Descends one level, creating the slot (and converting non-containers) as needed.
/// `next` decides what a freshly created slot holds.
fn slot<'a>(value: &'a mut Value, segment: &str, next: &str) -> Option<&'a mut Value> {
    if !is_container(value) {
        *value = empty_container(segment);
    }
    let entry = match value {
        Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
        Value::Array(items) => {
            let index = segment.parse::<usize>().ok()?;
            if !grow(items, index) {
                return None;
            }
            &mut items[index]
        }
        _ => return None,
    };
    if !is_container(entry) {
        *entry = empty_container(next);
    }
    Some(entry)
}

/// Walks `parts` without mutating and reports whether [`set`] could follow them.
fn can_write(tree: &Value, parts: &[&str]) -> bool {
    let mut current = Some(tree);
    for segment in parts {
        let node = current.filter(|value| is_container(value));
        let fits = match node {
            Some(Value::Array(items)) => segment
                .parse::<usize>()
                .is_ok_and(|index| index < items.len().saturating_add(MAX_SEQUENCE_GROWTH)),
            Some(_) => true,
            None => {
                !is_index(segment)
                    || segment
                        .parse::<usize>()
                        .is_ok_and(|index| index < MAX_SEQUENCE_GROWTH)
            }
        };
        if !fits {
            return false;
        }
        current = node.and_then(|value| child(value, segment));
    }
    true
}

///////////////////////////////////////////////// Store ////////////////////////////////////////////////

/// Reads the value at `path`.  The empty path addresses the whole tree.
pub fn get<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    if is_unsafe(path) {
        trace!(path, "refusing to read through an unsafe segment");
        return None;
    }
    segments(path)
        .into_iter()
        .try_fold(tree, |current, segment| child(current, segment))
}

/// Mutable variant of [`get`].
pub fn get_mut<'a>(tree: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    if is_unsafe(path) {
        return None;
    }
    segments(path)
        .into_iter()
        .try_fold(tree, |current, segment| child_mut(current, segment))
}

/// Returns true when `path` resolves to a value, including an explicit `null`.
pub fn has(tree: &Value, path: &str) -> bool {
    !segments(path).is_empty() && get(tree, path).is_some()
}

/// Writes `value` at `path`, creating intermediate maps and sequences.
///
/// A missing intermediate becomes a sequence when the segment after it is numeric and
/// a map otherwise.  Writing to the empty path is a no-op, as is a write whose index
/// lies more than [`MAX_SEQUENCE_GROWTH`] past the end of its sequence.
pub fn set(tree: &mut Value, path: &str, value: Value) {
    let parts = segments(path);
    let Some((last, parents)) = parts.split_last() else {
        return;
    };
    if is_unsafe(path) {
        trace!(path, "refusing to write through an unsafe segment");
        return;
    }
    if !can_write(tree, &parts) {
        trace!(path, "refusing a write that cannot be addressed");
        return;
    }

    let mut current = tree;
    for (position, segment) in parents.iter().enumerate() {
        let next = parts[position + 1];
        current = match slot(current, segment, next) {
            Some(entry) => entry,
            None => return,
        };
    }

    if !is_container(current) {
        *current = empty_container(last);
    }
    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
        }
        Value::Array(items) => {
            let Ok(index) = last.parse::<usize>() else {
                trace!(path, "cannot address a sequence with a key");
                return;
            };
            if grow(items, index) {
                items[index] = value;
            }
        }
        _ => {}
    }
}

/// Removes the value at `path`.
///
/// Removing a sequence element leaves a `null` hole so that the positions of later
/// elements do not shift.  Absent paths are a no-op.
pub fn unset(tree: &mut Value, path: &str) {
    let parts = segments(path);
    let Some((last, parents)) = parts.split_last() else {
        return;
    };
    if is_unsafe(path) {
        trace!(path, "refusing to remove through an unsafe segment");
        return;
    }
    let parent = match get_mut(tree, &parents.join(".")) {
        Some(parent) => parent,
        None => return,
    };
    match parent {
        Value::Object(map) => {
            map.remove(*last);
        }
        Value::Array(items) => {
            if let Some(item) = last
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get_mut(index))
            {
                *item = Value::Null;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_nested_object_and_array() {
        let tree = json!({"user": {"tags": ["a", "b"], "name": "Ada"}});
        assert_eq!(get(&tree, "user.name"), Some(&json!("Ada")));
        assert_eq!(get(&tree, "user.tags.1"), Some(&json!("b")));
        assert_eq!(get(&tree, "user.tags.2"), None);
        assert_eq!(get(&tree, "user.name.first"), None);
    }

    #[test]
    fn empty_path_is_whole_tree() {
        let mut tree = json!({"a": 1});
        assert_eq!(get(&tree, ""), Some(&tree.clone()));
        set(&mut tree, "", json!(5));
        unset(&mut tree, "");
        assert_eq!(tree, json!({"a": 1}));
        assert!(!has(&tree, ""));
    }

    #[test]
    fn set_creates_sequences_for_numeric_segments() {
        let mut tree = json!({});
        set(&mut tree, "items.2.name", json!("c"));
        assert_eq!(tree, json!({"items": [null, null, {"name": "c"}]}));
    }

    #[test]
    fn set_creates_maps_for_key_segments() {
        let mut tree = json!(null);
        set(&mut tree, "a.b", json!(true));
        assert_eq!(tree, json!({"a": {"b": true}}));
    }

    #[test]
    fn set_replaces_primitive_intermediates() {
        let mut tree = json!({"a": "text"});
        set(&mut tree, "a.b", json!(1));
        assert_eq!(tree, json!({"a": {"b": 1}}));
    }

    #[test]
    fn numeric_key_on_existing_object() {
        let mut tree = json!({"codes": {}});
        set(&mut tree, "codes.7", json!("x"));
        assert_eq!(tree, json!({"codes": {"7": "x"}}));
        assert_eq!(get(&tree, "codes.7"), Some(&json!("x")));
    }

    #[test]
    fn unset_leaves_hole_in_sequence() {
        let mut tree = json!({"items": [1, 2, 3]});
        unset(&mut tree, "items.1");
        assert_eq!(tree, json!({"items": [1, null, 3]}));
    }

    #[test]
    fn unset_missing_is_noop() {
        let mut tree = json!({"a": {"b": 1}});
        unset(&mut tree, "a.c.d");
        unset(&mut tree, "x");
        unset(&mut tree, "a.b.c");
        assert_eq!(tree, json!({"a": {"b": 1}}));
    }

    #[test]
    fn has_distinguishes_null_from_absent() {
        let tree = json!({"a": null});
        assert!(has(&tree, "a"));
        assert!(!has(&tree, "b"));
    }

    #[test]
    fn unsafe_segments_are_refused() {
        let mut tree = json!({});
        set(&mut tree, "__proto__.polluted", json!(true));
        set(&mut tree, "a.constructor.prototype", json!(true));
        assert_eq!(tree, json!({}));

        let mut tree = json!({"__proto__": {"x": 1}});
        assert_eq!(get(&tree, "__proto__.x"), None);
        unset(&mut tree, "__proto__");
        assert_eq!(tree, json!({"__proto__": {"x": 1}}));
    }

    #[test]
    fn huge_indices_leave_the_tree_alone() {
        let mut tree = json!({});
        set(&mut tree, "items.18446744073709551615", json!(1));
        set(&mut tree, "items.4000000000", json!(1));
        set(&mut tree, "items.99999999999999999999999.name", json!(1));
        assert_eq!(tree, json!({}));

        let mut tree = json!({"items": [1, 2]});
        set(&mut tree, "items.4000000000.name", json!(3));
        assert_eq!(tree, json!({"items": [1, 2]}));

        set(&mut tree, "items.5", json!(6));
        assert_eq!(tree, json!({"items": [1, 2, null, null, null, 6]}));
    }

    #[test]
    fn growth_is_bounded_past_the_current_end() {
        let mut tree = json!({"items": []});
        set(&mut tree, &format!("items.{}", MAX_SEQUENCE_GROWTH), json!(true));
        assert_eq!(tree, json!({"items": []}));
        set(&mut tree, &format!("items.{}", MAX_SEQUENCE_GROWTH - 1), json!(true));
        let len = get(&tree, "items").and_then(Value::as_array).map(Vec::len);
        assert_eq!(len, Some(MAX_SEQUENCE_GROWTH));
    }

    #[test]
    fn within_matches_prefix_on_boundary() {
        assert!(is_within("a.b.c", "a.b"));
        assert!(!is_within("a.bc", "a.b"));
        assert!(!is_within("a", "a.b"));
    }

    #[test]
    fn segments_render_dotted() {
        let segments = vec![PathSegment::from("items"), 0.into(), "name".into()];
        assert_eq!(from_segments(&segments), "items.0.name");
        assert_eq!(join("items", 3), "items.3");
        assert_eq!(join("", "root"), "root");
    }
}
