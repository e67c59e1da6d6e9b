//! Per-path dirty, touched, and error bookkeeping.
//!
//! Presence in a set means the flag is raised; there is no "false" entry.  Nothing
//! here validates anything; the validation engine and the field registry both write
//! through these operations.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::FieldError;
use crate::path;

/// Dirty, touched, and error state for every path of one form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldStateTracker {
    dirty: BTreeSet<String>,
    touched: BTreeSet<String>,
    errors: BTreeMap<String, FieldError>,
}

impl FieldStateTracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags `path` as dirty.
    pub fn mark_dirty(&mut self, path: &str) {
        self.dirty.insert(path.to_string());
    }

    /// Flags `path` as touched.
    pub fn mark_touched(&mut self, path: &str) {
        self.touched.insert(path.to_string());
    }

    /// Lowers the dirty flag of exactly `path`.
    pub fn clear_dirty(&mut self, path: &str) {
        self.dirty.remove(path);
    }

    /// Lowers the touched flag of exactly `path`.
    pub fn clear_touched(&mut self, path: &str) {
        self.touched.remove(path);
    }

    /// Removes the error at `path` and every error nested beneath it.
    pub fn clear_errors(&mut self, path: &str) {
        self.errors.retain(|key, _| !path::is_within(key, path));
    }

    /// Removes the error at exactly `path`.
    pub fn remove_error(&mut self, path: &str) -> Option<FieldError> {
        self.errors.remove(path)
    }

    /// Attaches `error` to `path`, replacing any previous one.
    pub fn set_error(&mut self, path: &str, error: FieldError) {
        self.errors.insert(path.to_string(), error);
    }

    /// The error at exactly `path`.
    pub fn error(&self, path: &str) -> Option<&FieldError> {
        self.errors.get(path)
    }

    /// Whether `path` is dirty.
    pub fn is_dirty(&self, path: &str) -> bool {
        self.dirty.contains(path)
    }

    /// Whether `path` is touched.
    pub fn is_touched(&self, path: &str) -> bool {
        self.touched.contains(path)
    }

    /// Every dirty path.
    pub fn dirty(&self) -> &BTreeSet<String> {
        &self.dirty
    }

    /// Every touched path.
    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    /// Every error.
    pub fn errors(&self) -> &BTreeMap<String, FieldError> {
        &self.errors
    }

    /// Drops every error.
    pub fn clear_all_errors(&mut self) {
        self.errors.clear();
    }

    /// Drops every dirty flag.
    pub fn clear_all_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Drops every touched flag.
    pub fn clear_all_touched(&mut self) {
        self.touched.clear();
    }

    /// Rewrites paths nested under the sequence at `array_path` after its elements
    /// moved.  `relocate` maps an old element index to its new index, or `None` when
    /// the element is gone.
    pub fn relocate(&mut self, array_path: &str, relocate: impl Fn(usize) -> Option<usize>) {
        self.dirty = relocate_keys(std::mem::take(&mut self.dirty), array_path, &relocate)
            .into_iter()
            .map(|(key, ())| key)
            .collect();
        self.touched = relocate_keys(std::mem::take(&mut self.touched), array_path, &relocate)
            .into_iter()
            .map(|(key, ())| key)
            .collect();
        self.errors = relocate_keys(std::mem::take(&mut self.errors), array_path, &relocate)
            .into_iter()
            .collect();
    }
}

trait Entries {
    type Item;
    fn into_entries(self) -> Vec<(String, Self::Item)>;
}

impl Entries for BTreeSet<String> {
    type Item = ();
    fn into_entries(self) -> Vec<(String, ())> {
        self.into_iter().map(|key| (key, ())).collect()
    }
}

impl Entries for BTreeMap<String, FieldError> {
    type Item = FieldError;
    fn into_entries(self) -> Vec<(String, FieldError)> {
        self.into_iter().collect()
    }
}

fn relocate_keys<E: Entries>(
    entries: E,
    array_path: &str,
    relocate: &impl Fn(usize) -> Option<usize>,
) -> Vec<(String, E::Item)> {
    let prefix = format!("{}.", array_path);
    entries
        .into_entries()
        .into_iter()
        .filter_map(|(key, item)| {
            let Some(rest) = key.strip_prefix(&prefix) else {
                return Some((key, item));
            };
            let (head, tail) = match rest.split_once('.') {
                Some((head, tail)) => (head, Some(tail)),
                None => (rest, None),
            };
            let Ok(index) = head.parse::<usize>() else {
                return Some((key, item));
            };
            let moved = relocate(index)?;
            let key = match tail {
                Some(tail) => format!("{}{}.{}", prefix, moved, tail),
                None => format!("{}{}", prefix, moved),
            };
            Some((key, item))
        })
        .collect()
}
