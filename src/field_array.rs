//! # Field Arrays
//!
//! A field array is a path whose value is a sequence, managed with a stable
//! [`ItemKey`] per element.  Insertions mint keys; swaps, moves and updates only
//! relocate them.  A position cache per array answers [`FieldArrayItem::index`] in
//! constant time and is rebuilt after every structural change.
//!
//! Rule violations and out-of-range indices leave the array untouched; each
//! operation returns whether it took effect.
//!
//! Focus requested by an insertion is applied on the next runtime tick, after the
//! change has been published.  Outside a runtime it is applied before returning.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use serde_json::Value;
use tracing::{trace, warn};

use crate::context::{FormContext, FormState};
use crate::item_key::{ItemKey, KeyMinter};
use crate::mode::FieldEvent;
use crate::options::{FieldArrayFocus, FieldArrayRules, FocusOptions};
use crate::path;
use crate::registry;

/////////////////////////////////////////////// ArrayTrack /////////////////////////////////////////////

#[derive(Debug, Default)]
struct ArrayTrack {
    keys: Vec<ItemKey>,
    positions: HashMap<ItemKey, usize>,
}

impl ArrayTrack {
    fn with_keys(keys: Vec<ItemKey>) -> Self {
        let positions = keys
            .iter()
            .enumerate()
            .map(|(index, key)| (*key, index))
            .collect();
        ArrayTrack { keys, positions }
    }
}

/// Item keys of every array in one session.
#[derive(Debug)]
pub(crate) struct FieldArrayManager {
    minter: KeyMinter,
    tracks: BTreeMap<String, ArrayTrack>,
}

impl FieldArrayManager {
    pub(crate) fn new() -> Self {
        FieldArrayManager {
            minter: KeyMinter::new(),
            tracks: BTreeMap::new(),
        }
    }

    /// Forgets every array; they rebuild with fresh keys on next use.
    pub(crate) fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Forgets arrays at or beneath `scope`.
    pub(crate) fn forget(&mut self, scope: &str) {
        self.tracks.retain(|path, _| !path::is_within(path, scope));
    }

    pub(crate) fn keys(&self) -> BTreeMap<String, Vec<ItemKey>> {
        self.tracks
            .iter()
            .map(|(path, track)| (path.clone(), track.keys.clone()))
            .collect()
    }

    /// The keys of `path`, reconciled with a value sequence of length `len`.
    fn reconcile(&mut self, path: &str, len: usize) -> Vec<ItemKey> {
        let minter = &mut self.minter;
        let track = self.tracks.entry(path.to_string()).or_default();
        if track.keys.len() != len {
            let mut keys = std::mem::take(&mut track.keys);
            keys.truncate(len);
            while keys.len() < len {
                keys.push(minter.mint());
            }
            *track = ArrayTrack::with_keys(keys);
        }
        track.keys.clone()
    }

    fn position(&self, path: &str, key: &ItemKey) -> Option<usize> {
        self.tracks.get(path)?.positions.get(key).copied()
    }
}

////////////////////////////////////////////////// Batch ///////////////////////////////////////////////

/// One value or several, as accepted by insertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    /// A single element.
    One(Value),
    /// Several elements, inserted in order.
    Many(Vec<Value>),
}

impl Batch {
    fn into_vec(self) -> Vec<Value> {
        match self {
            Batch::One(value) => vec![value],
            Batch::Many(values) => values,
        }
    }
}

impl From<Value> for Batch {
    fn from(value: Value) -> Self {
        Batch::One(value)
    }
}

impl From<Vec<Value>> for Batch {
    fn from(values: Vec<Value>) -> Self {
        Batch::Many(values)
    }
}

////////////////////////////////////////////////// Edit ////////////////////////////////////////////////

struct Edit<'a> {
    items: Vec<Value>,
    keys: Vec<ItemKey>,
    minter: &'a mut KeyMinter,
    rules: FieldArrayRules,
}

impl Edit<'_> {
    fn fits(&self, len: usize) -> bool {
        self.rules.max_length.is_none_or(|max| len <= max)
            && self.rules.min_length.is_none_or(|min| len >= min)
    }

    fn insert(&mut self, at: usize, values: Vec<Value>) -> Option<usize> {
        if values.is_empty() {
            return None;
        }
        let len = self.items.len() + values.len();
        if self.rules.max_length.is_some_and(|max| len > max) {
            return None;
        }
        let at = at.min(self.items.len());
        let fresh: Vec<ItemKey> = values.iter().map(|_| self.minter.mint()).collect();
        self.items.splice(at..at, values);
        self.keys.splice(at..at, fresh);
        Some(at)
    }

    fn remove(&mut self, indices: &[usize]) -> Option<usize> {
        let mut doomed: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|index| *index < self.items.len())
            .collect();
        doomed.sort_unstable();
        doomed.dedup();
        if doomed.is_empty() {
            return None;
        }
        let len = self.items.len() - doomed.len();
        if self.rules.min_length.is_some_and(|min| len < min) {
            return None;
        }
        for index in doomed.iter().rev() {
            self.items.remove(*index);
            self.keys.remove(*index);
        }
        Some(doomed[0])
    }
}

/////////////////////////////////////////////// FieldArray /////////////////////////////////////////////

/// The manager of one array path, returned by
/// [`FormSession::fields`](crate::FormSession::fields).
#[derive(Clone)]
pub struct FieldArray {
    path: String,
    rules: FieldArrayRules,
    ctx: Arc<FormContext>,
}

impl Debug for FieldArray {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FieldArray")
            .field("path", &self.path)
            .field("rules", &self.rules)
            .finish()
    }
}

impl FieldArray {
    pub(crate) fn new(path: String, rules: FieldArrayRules, ctx: Arc<FormContext>) -> Self {
        FieldArray { path, rules, ctx }
    }

    /// The array's path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The elements, in order.
    pub fn items(&self) -> Vec<FieldArrayItem> {
        let (values, keys) = self.ctx.update(|state| {
            let values = current_items(state, &self.path);
            let keys = state.arrays.reconcile(&self.path, values.len());
            (values, keys)
        });
        keys.into_iter()
            .zip(values)
            .map(|(key, value)| FieldArrayItem {
                key,
                value,
                array: self.clone(),
            })
            .collect()
    }

    /// The current keys, in order.
    pub fn keys(&self) -> Vec<ItemKey> {
        self.ctx.update(|state| {
            let len = current_items(state, &self.path).len();
            state.arrays.reconcile(&self.path, len)
        })
    }

    /// The number of elements.
    pub fn len(&self) -> usize {
        self.ctx.read(|state| current_items(state, &self.path).len())
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends one value or a batch.
    pub fn append(&self, items: impl Into<Batch>) -> bool {
        self.append_with(items, FieldArrayFocus::default())
    }

    /// Appends, then focuses per `focus` on the next runtime tick.
    pub fn append_with(&self, items: impl Into<Batch>, focus: FieldArrayFocus) -> bool {
        let values = items.into().into_vec();
        self.apply("append", Some(focus), |edit| {
            let at = edit.items.len();
            edit.insert(at, values)
        })
    }

    /// Prepends one value or a batch.
    pub fn prepend(&self, items: impl Into<Batch>) -> bool {
        self.prepend_with(items, FieldArrayFocus::default())
    }

    /// Prepends, then focuses per `focus` on the next runtime tick.
    pub fn prepend_with(&self, items: impl Into<Batch>, focus: FieldArrayFocus) -> bool {
        let values = items.into().into_vec();
        self.apply("prepend", Some(focus), |edit| edit.insert(0, values))
    }

    /// Inserts before `index`.  An index past the end appends.
    pub fn insert(&self, index: usize, items: impl Into<Batch>) -> bool {
        self.insert_with(index, items, FieldArrayFocus::default())
    }

    /// Inserts, then focuses per `focus` on the next runtime tick.
    pub fn insert_with(&self, index: usize, items: impl Into<Batch>, focus: FieldArrayFocus) -> bool {
        let values = items.into().into_vec();
        self.apply("insert", Some(focus), |edit| edit.insert(index, values))
    }

    /// Removes the element at `index`.
    pub fn remove(&self, index: usize) -> bool {
        self.apply("remove", None, |edit| edit.remove(&[index]))
    }

    /// Removes the elements at `indices`; out-of-range indices are ignored.
    pub fn remove_many(&self, indices: &[usize]) -> bool {
        self.apply("remove_many", None, |edit| edit.remove(indices))
    }

    /// Removes every element.
    pub fn remove_all(&self) -> bool {
        self.apply("remove_all", None, |edit| {
            let all: Vec<usize> = (0..edit.items.len()).collect();
            edit.remove(&all)
        })
    }

    /// Exchanges two elements.
    pub fn swap(&self, a: usize, b: usize) -> bool {
        self.apply("swap", None, |edit| {
            if a >= edit.items.len() || b >= edit.items.len() {
                return None;
            }
            edit.items.swap(a, b);
            edit.keys.swap(a, b);
            Some(a.min(b))
        })
    }

    /// Moves the element at `from` so it ends up at `to`.
    pub fn move_item(&self, from: usize, to: usize) -> bool {
        self.apply("move", None, |edit| {
            if from >= edit.items.len() || to >= edit.items.len() {
                return None;
            }
            let item = edit.items.remove(from);
            let key = edit.keys.remove(from);
            edit.items.insert(to, item);
            edit.keys.insert(to, key);
            Some(to)
        })
    }

    /// Replaces the element at `index`, keeping its key.
    pub fn update(&self, index: usize, value: Value) -> bool {
        self.apply("update", None, |edit| {
            let slot = edit.items.get_mut(index)?;
            *slot = value;
            Some(index)
        })
    }

    /// Replaces every element.  All keys are fresh.
    pub fn replace(&self, values: Vec<Value>) -> bool {
        self.apply("replace", None, |edit| {
            if !edit.fits(values.len()) {
                return None;
            }
            edit.keys = values.iter().map(|_| edit.minter.mint()).collect();
            edit.items = values;
            Some(0)
        })
    }

    fn position(&self, key: &ItemKey) -> Option<usize> {
        self.ctx.read(|state| state.arrays.position(&self.path, key))
    }

    fn apply<F>(&self, op: &str, focus: Option<FieldArrayFocus>, change: F) -> bool
    where
        F: FnOnce(&mut Edit<'_>) -> Option<usize>,
    {
        let applied = self.ctx.update(|state| {
            let items = current_items(state, &self.path);
            let before = state.arrays.reconcile(&self.path, items.len());
            let mut edit = Edit {
                items,
                keys: before.clone(),
                minter: &mut state.arrays.minter,
                rules: self.rules,
            };
            let Some(anchor) = change(&mut edit) else {
                warn!(path = %self.path, op, "field array operation refused");
                return None;
            };
            let Edit { items, keys, .. } = edit;
            let track = ArrayTrack::with_keys(keys);
            state.fields.relocate(&self.path, |old| {
                before
                    .get(old)
                    .and_then(|key| track.positions.get(key).copied())
            });
            state.arrays.tracks.insert(self.path.clone(), track);
            state.engine.cancel_pending_within(Some(&self.path));
            path::set(&mut state.values, &self.path, Value::Array(items));
            state.fields.mark_dirty(&self.path);
            trace!(path = %self.path, op, "field array changed");
            Some((anchor, state.fires(FieldEvent::Input, &self.path)))
        });
        let Some((anchor, validate)) = applied else {
            return false;
        };
        if validate {
            self.ctx.spawn_validation(Some(self.path.clone()));
        }
        if let Some(focus) = focus.filter(|focus| focus.should_focus) {
            let index = focus.focus_index.unwrap_or(anchor);
            let mut target = path::join(&self.path, index);
            if let Some(name) = &focus.focus_name {
                target = path::join(&target, name);
            }
            focus_after_tick(&self.ctx, target);
        }
        true
    }
}

/// Focuses `target` once the runtime has had a turn, so that observers of the change
/// bind the new element first.  Without a runtime the focus happens now.
fn focus_after_tick(ctx: &Arc<FormContext>, target: String) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        registry::focus_field(ctx, &target, FocusOptions::default());
        return;
    };
    let weak = Arc::downgrade(ctx);
    runtime.spawn(async move {
        tokio::task::yield_now().await;
        if let Some(ctx) = weak.upgrade() {
            registry::focus_field(&ctx, &target, FocusOptions::default());
        }
    });
}

fn current_items(state: &FormState, path: &str) -> Vec<Value> {
    path::get(&state.values, path)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

////////////////////////////////////////////// FieldArrayItem //////////////////////////////////////////

/// One element of a field array.
#[derive(Clone)]
pub struct FieldArrayItem {
    key: ItemKey,
    value: Value,
    array: FieldArray,
}

impl Debug for FieldArrayItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FieldArrayItem")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}

impl FieldArrayItem {
    /// The element's stable key.
    pub fn key(&self) -> ItemKey {
        self.key
    }

    /// The element's value when it was read.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The element's current position, or `None` once it was removed.
    pub fn index(&self) -> Option<usize> {
        self.array.position(&self.key)
    }

    /// Removes this element wherever it currently is.
    pub fn remove(&self) -> bool {
        match self.index() {
            Some(index) => self.array.remove(index),
            None => false,
        }
    }
}
