//! Observable Values
//!
//! Application state is a tree of dynamic [`Value`]s. Mutable aggregates
//! (keyed maps and sequences) are always held behind an [`Observable`]
//! wrapper, which intercepts every member read and write:
//!
//! 1. A read registers `(observable, member)` as a dependency of the
//!    observers on the effect stack.
//!
//! 2. A write compares the new value with the old one (primitives by value,
//!    aggregates by wrapper identity) and notifies the runtime only when
//!    something actually changed. Adding or removing a member is a *shape
//!    change* and also notifies the observers of the aggregate's own shape.
//!
//! # Lazy Wrapping
//!
//! Raw JSON handed to [`Runtime::wrap_json`] or [`Observable::set_json`] is
//! stored as-is. Nested objects and arrays are wrapped the first time they are
//! read, and the wrapper is written back so every later read returns the same
//! wrapper. Opaque host values ([`Opaque`]) are never wrapped.
//!
//! [`Runtime::wrap_json`]: super::Runtime::wrap_json

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use smallvec::{smallvec, SmallVec};

use super::context::EffectStack;
use super::runtime::{Runtime, RuntimeInner};

/// Identity of an observable aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservableId(u64);

impl ObservableId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObservableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs#{}", self.0)
    }
}

/// A member key: a position in a sequence or a name in a map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Index(usize),
    Name(Arc<str>),
}

impl Key {
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Name(name) => name.parse().ok(),
        }
    }

    fn into_name(self) -> Arc<str> {
        match self {
            Key::Index(i) => Arc::from(i.to_string()),
            Key::Name(name) => name,
        }
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(Arc::from(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(Arc::from(name))
    }
}

impl From<Arc<str>> for Key {
    fn from(name: Arc<str>) -> Self {
        Key::Name(name)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{i}"),
            Key::Name(name) => f.write_str(name),
        }
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Index(i) => Value::Number(i as f64),
            Key::Name(name) => Value::String(name),
        }
    }
}

/// What a dependency edge points at inside an observable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberKey {
    /// The aggregate's own shape: its set of members.
    Default,
    /// The length pseudo-member of a sequence.
    Length,
    Member(Key),
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKey::Default => f.write_str("<self>"),
            MemberKey::Length => f.write_str("length"),
            MemberKey::Member(key) => write!(f, "{key}"),
        }
    }
}

/// A host value that is passed through untouched: timestamps, callbacks,
/// pending asynchronous results, output-medium handles. Compared by identity.
#[derive(Clone)]
pub struct Opaque(Arc<dyn Any + Send + Sync>);

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared allocation. Stable while any clone is alive.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({:p})", Arc::as_ptr(&self.0))
    }
}

/// A dynamic value.
///
/// Equality (`==`) is the change-detection equality used by writes:
/// primitives compare by value, observables and opaque values by identity.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// An absent member, or an explicit null.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Observable(Observable),
    Opaque(Opaque),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_observable(&self) -> Option<&Observable> {
        match self {
            Value::Observable(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Value::Opaque(o) => Some(o),
            _ => None,
        }
    }

    /// Mutable aggregates are observables; everything else is a leaf.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Value::Observable(_))
    }

    /// Script-style truthiness, used for conditional guards.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Observable(_) | Value::Opaque(_) => true,
        }
    }

    /// Whether an observer whose previous result was `previous` should treat
    /// `self` as a new result. Aggregates always count as changed since they
    /// may have been mutated in place.
    pub fn differs_from(&self, previous: &Value) -> bool {
        self.is_aggregate() || self != previous
    }

    /// A short human readable rendering, for text bindings and logs.
    pub fn display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.to_string(),
            Value::Observable(o) => o.id().to_string(),
            Value::Opaque(o) => format!("{o:?}"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Observable(a), Value::Observable(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Observable> for Value {
    fn from(o: Observable) -> Self {
        Value::Observable(o)
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Value::Opaque(o)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null | Value::Opaque(_) => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serializer.serialize_i64(*n as i64)
            }
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Observable(o) => o.serialize(serializer),
        }
    }
}

/// Whether an observable is a keyed map or a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Map,
    Sequence,
}

/// A stored member: either an already-wrapped value or raw data that has
/// not been read yet.
#[derive(Debug, Clone)]
enum Slot {
    Value(Value),
    Raw(Arc<serde_json::Value>),
}

/// Convert a JSON primitive. Aggregates are handed back untouched.
fn json_primitive(json: serde_json::Value) -> Result<Value, serde_json::Value> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => Ok(Value::Number(n.as_f64().unwrap_or(f64::NAN))),
        serde_json::Value::String(s) => Ok(Value::from(s)),
        raw => Err(raw),
    }
}

impl Slot {
    fn from_json(json: serde_json::Value) -> Self {
        match json_primitive(json) {
            Ok(value) => Slot::Value(value),
            Err(raw) => Slot::Raw(Arc::new(raw)),
        }
    }

    /// Change-detection equality. Raw slots only ever hold aggregates and
    /// compare by identity, like wrapped ones.
    fn same_as(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Value(a), Slot::Value(b)) => a == b,
            (Slot::Raw(a), Slot::Raw(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

enum Aggregate {
    Map(IndexMap<Arc<str>, Slot>),
    Sequence(Vec<Slot>),
}

pub(crate) struct ObservableInner {
    id: ObservableId,
    runtime: Weak<RuntimeInner>,
    data: Mutex<Aggregate>,
}

/// A mutable aggregate instrumented for dependency tracking.
///
/// Cloning yields another handle to the same aggregate. Wrapping is
/// idempotent: an aggregate is wrapped once, on first read, and storing an
/// `Observable` in a member keeps that wrapper as is. Raw data enters through
/// [`Runtime::wrap_json`](super::Runtime::wrap_json) or
/// [`Observable::set_json`].
#[derive(Clone)]
pub struct Observable(Arc<ObservableInner>);

/// A non-owning handle kept by the dependency registry.
#[derive(Clone)]
pub(crate) struct WeakObservable(Weak<ObservableInner>);

impl WeakObservable {
    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// Notifications collected under the data lock and fired after it is released.
type Changes = SmallVec<[(MemberKey, bool); 2]>;

impl Observable {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, kind: AggregateKind) -> Self {
        let data = match kind {
            AggregateKind::Map => Aggregate::Map(IndexMap::new()),
            AggregateKind::Sequence => Aggregate::Sequence(Vec::new()),
        };
        Self(Arc::new(ObservableInner {
            id: ObservableId::next(),
            runtime,
            data: Mutex::new(data),
        }))
    }

    /// Wrap raw JSON. Nested aggregates stay raw until first read.
    pub(crate) fn from_json(runtime: Weak<RuntimeInner>, json: serde_json::Value) -> Value {
        let data = match json {
            serde_json::Value::Object(map) => Aggregate::Map(
                map.into_iter()
                    .map(|(k, v)| (Arc::from(k), Slot::from_json(v)))
                    .collect(),
            ),
            serde_json::Value::Array(items) => {
                Aggregate::Sequence(items.into_iter().map(Slot::from_json).collect())
            }
            primitive => return json_primitive(primitive).unwrap_or_default(),
        };
        Value::Observable(Self(Arc::new(ObservableInner {
            id: ObservableId::next(),
            runtime,
            data: Mutex::new(data),
        })))
    }

    pub fn id(&self) -> ObservableId {
        self.0.id
    }

    pub fn kind(&self) -> AggregateKind {
        match &*self.0.data.lock() {
            Aggregate::Map(_) => AggregateKind::Map,
            Aggregate::Sequence(_) => AggregateKind::Sequence,
        }
    }

    pub fn is_sequence(&self) -> bool {
        self.kind() == AggregateKind::Sequence
    }

    pub fn ptr_eq(&self, other: &Observable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakObservable {
        WeakObservable(Arc::downgrade(&self.0))
    }

    fn runtime(&self) -> Option<Runtime> {
        Runtime::from_weak(&self.0.runtime)
    }

    fn track(&self, member: MemberKey) {
        if !EffectStack::is_active() {
            return;
        }
        if let Some(runtime) = self.runtime() {
            runtime.observe_member(self, member);
        }
    }

    fn fire(&self, changes: Changes) {
        if changes.is_empty() {
            return;
        }
        if let Some(runtime) = self.runtime() {
            for (member, shape_changed) in changes {
                runtime.notify(self.id(), member, shape_changed);
            }
        }
    }

    /// Map keys are names; sequence keys are positions. `None` means the key
    /// cannot address a member of this aggregate.
    fn normalize(&self, key: Key) -> Option<Key> {
        match &*self.0.data.lock() {
            Aggregate::Map(_) => Some(Key::Name(key.into_name())),
            Aggregate::Sequence(_) => key.as_index().map(Key::Index),
        }
    }

    /// Read a slot, wrapping raw aggregates on the way out.
    fn read(&self, key: &Key) -> Value {
        let mut data = self.0.data.lock();
        let slot = match (&mut *data, key) {
            (Aggregate::Map(map), Key::Name(name)) => map.get_mut(name),
            (Aggregate::Sequence(items), Key::Index(i)) => items.get_mut(*i),
            _ => None,
        };
        let Some(slot) = slot else {
            return Value::Null;
        };
        if let Slot::Raw(raw) = slot {
            let raw = Arc::unwrap_or_clone(std::mem::take(raw));
            let wrapped = Observable::from_json(self.0.runtime.clone(), raw);
            *slot = Slot::Value(wrapped);
        }
        match slot {
            Slot::Value(value) => value.clone(),
            Slot::Raw(_) => Value::Null,
        }
    }

    /// Tracked read of one member. Absent members read as [`Value::Null`].
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let Some(key) = self.normalize(key.into()) else {
            return Value::Null;
        };
        let value = self.read(&key);
        self.track(MemberKey::Member(key));
        value
    }

    /// Read one member without registering a dependency.
    pub fn get_untracked(&self, key: impl Into<Key>) -> Value {
        match self.normalize(key.into()) {
            Some(key) => self.read(&key),
            None => Value::Null,
        }
    }

    /// Tracked membership test.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let Some(key) = self.normalize(key.into()) else {
            return false;
        };
        let present = match (&*self.0.data.lock(), &key) {
            (Aggregate::Map(map), Key::Name(name)) => map.contains_key(name),
            (Aggregate::Sequence(items), Key::Index(i)) => *i < items.len(),
            _ => false,
        };
        self.track(MemberKey::Member(key));
        present
    }

    fn keys_untracked(&self) -> Vec<Key> {
        match &*self.0.data.lock() {
            Aggregate::Map(map) => map.keys().cloned().map(Key::Name).collect(),
            Aggregate::Sequence(items) => (0..items.len()).map(Key::Index).collect(),
        }
    }

    /// Enumerate member keys in iteration order. Tracks the aggregate's shape.
    pub fn keys(&self) -> Vec<Key> {
        let keys = self.keys_untracked();
        self.track(MemberKey::Default);
        keys
    }

    /// Enumerate members. Tracks the shape and every member read.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        let entries = self.entries_untracked();
        self.track(MemberKey::Default);
        for (key, _) in &entries {
            self.track(MemberKey::Member(key.clone()));
        }
        entries
    }

    pub fn entries_untracked(&self) -> Vec<(Key, Value)> {
        self.keys_untracked()
            .into_iter()
            .map(|key| {
                let value = self.read(&key);
                (key, value)
            })
            .collect()
    }

    /// Number of members. Sequences track their length, maps their shape.
    pub fn len(&self) -> usize {
        let (len, member) = match &*self.0.data.lock() {
            Aggregate::Map(map) => (map.len(), MemberKey::Default),
            Aggregate::Sequence(items) => (items.len(), MemberKey::Length),
        };
        self.track(member);
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a member, notifying only if the value or the shape changed.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) {
        self.write(key.into(), Slot::Value(value.into()));
    }

    /// Write raw JSON into a member. Aggregates are wrapped on first read.
    pub fn set_json(&self, key: impl Into<Key>, json: serde_json::Value) {
        self.write(key.into(), Slot::from_json(json));
    }

    fn write(&self, key: Key, slot: Slot) {
        let Some(key) = self.normalize(key) else {
            tracing::warn!(observable = %self.id(), "ignoring write through a non-index key on a sequence");
            return;
        };
        let changes = {
            let mut data = self.0.data.lock();
            match (&mut *data, key) {
                (Aggregate::Map(map), Key::Name(name)) => {
                    let mut changes = Changes::new();
                    match map.get_mut(&name) {
                        Some(existing) => {
                            if !existing.same_as(&slot) {
                                *existing = slot;
                                changes.push((MemberKey::Member(Key::Name(name)), false));
                            }
                        }
                        None => {
                            map.insert(name.clone(), slot);
                            changes.push((MemberKey::Member(Key::Name(name)), true));
                        }
                    }
                    changes
                }
                (Aggregate::Sequence(items), Key::Index(index)) => {
                    let mut changes = Changes::new();
                    match items.get_mut(index) {
                        Some(existing) => {
                            if !existing.same_as(&slot) {
                                *existing = slot;
                                changes.push((MemberKey::Member(Key::Index(index)), false));
                            }
                        }
                        None => {
                            let added = items.len()..=index;
                            items.resize(index, Slot::Value(Value::Null));
                            items.push(slot);
                            changes.extend(added.map(|i| (MemberKey::Member(Key::Index(i)), true)));
                            changes.push((MemberKey::Length, true));
                        }
                    }
                    changes
                }
                _ => Changes::new(),
            }
        };
        self.fire(changes);
    }

    /// Remove a member. Always notifies as a shape change.
    ///
    /// On a sequence this leaves a hole (null) without shifting later items;
    /// use [`Observable::remove`] to shift.
    pub fn delete(&self, key: impl Into<Key>) {
        let Some(key) = self.normalize(key.into()) else {
            return;
        };
        {
            let mut data = self.0.data.lock();
            match (&mut *data, &key) {
                (Aggregate::Map(map), Key::Name(name)) => {
                    map.shift_remove(name);
                }
                (Aggregate::Sequence(items), Key::Index(i)) => {
                    if let Some(slot) = items.get_mut(*i) {
                        *slot = Slot::Value(Value::Null);
                    }
                }
                _ => {}
            }
        }
        self.fire(smallvec![(MemberKey::Member(key), true)]);
    }

    /// Apply a structural edit to a sequence and notify every position whose
    /// value moved, plus the length when it changed.
    ///
    /// `from` maps the current length to the first position the edit can
    /// touch; only positions from there on are compared.
    fn splice<R>(
        &self,
        from: impl FnOnce(usize) -> usize,
        edit: impl FnOnce(&mut Vec<Slot>) -> R,
    ) -> Option<R> {
        let (result, changes) = {
            let mut data = self.0.data.lock();
            let Aggregate::Sequence(items) = &mut *data else {
                return None;
            };
            let start = from(items.len()).min(items.len());
            let old_tail = items[start..].to_vec();
            let result = edit(items);
            let new_tail = items.get(start..).unwrap_or_default();
            (result, sequence_changes(start, &old_tail, new_tail))
        };
        self.fire(changes);
        Some(result)
    }

    /// Append to a sequence.
    pub fn push(&self, value: impl Into<Value>) {
        let slot = Slot::Value(value.into());
        self.splice(|len| len, |items| items.push(slot));
    }

    /// Append raw JSON to a sequence.
    pub fn push_json(&self, json: serde_json::Value) {
        let slot = Slot::from_json(json);
        self.splice(|len| len, |items| items.push(slot));
    }

    /// Remove and return the last item of a sequence.
    pub fn pop(&self) -> Option<Value> {
        let slot = self
            .splice(|len| len.saturating_sub(1), |items| items.pop())
            .flatten()?;
        Some(self.materialize(slot))
    }

    /// Insert into a sequence, shifting later items. Indices past the end append.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let slot = Slot::Value(value.into());
        self.splice(|_| index, |items| {
            let index = index.min(items.len());
            items.insert(index, slot);
        });
    }

    /// Remove an item from a sequence, shifting later items.
    pub fn remove(&self, index: usize) -> Option<Value> {
        let slot = self
            .splice(|_| index, |items| (index < items.len()).then(|| items.remove(index)))
            .flatten()?;
        Some(self.materialize(slot))
    }

    /// Shorten a sequence to `len` items.
    pub fn truncate(&self, len: usize) {
        self.splice(|_| len, |items| items.truncate(len));
    }

    /// Replace the whole contents of a sequence.
    pub fn replace_all(&self, values: impl IntoIterator<Item = Value>) {
        let slots: Vec<Slot> = values.into_iter().map(Slot::Value).collect();
        self.splice(|_| 0, |items| *items = slots);
    }

    fn materialize(&self, slot: Slot) -> Value {
        match slot {
            Slot::Value(value) => value,
            Slot::Raw(raw) => {
                Observable::from_json(self.0.runtime.clone(), Arc::unwrap_or_clone(raw))
            }
        }
    }

    /// Untracked JSON snapshot of the aggregate and everything below it.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Diff two tails of a sequence that both begin at position `start`.
fn sequence_changes(start: usize, old: &[Slot], new: &[Slot]) -> Changes {
    let mut changes = Changes::new();
    for offset in 0..old.len().max(new.len()) {
        let index = start + offset;
        match (old.get(offset), new.get(offset)) {
            (Some(a), Some(b)) if !a.same_as(b) => {
                changes.push((MemberKey::Member(Key::Index(index)), false));
            }
            (Some(_), None) | (None, Some(_)) => {
                changes.push((MemberKey::Member(Key::Index(index)), true));
            }
            _ => {}
        }
    }
    if old.len() != new.len() {
        changes.push((MemberKey::Length, true));
    }
    changes
}

impl PartialEq for Observable {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Observable {}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, len) = match &*self.0.data.lock() {
            Aggregate::Map(map) => (AggregateKind::Map, map.len()),
            Aggregate::Sequence(items) => (AggregateKind::Sequence, items.len()),
        };
        f.debug_struct("Observable")
            .field("id", &self.0.id)
            .field("kind", &kind)
            .field("len", &len)
            .finish()
    }
}

/// Serializes a snapshot without tracking. Cyclic aggregates are not supported.
impl Serialize for Observable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        enum Snapshot {
            Map(Vec<(Arc<str>, Slot)>),
            Sequence(Vec<Slot>),
        }

        struct SlotRef<'a>(&'a Slot);

        impl Serialize for SlotRef<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                match self.0 {
                    Slot::Value(value) => value.serialize(serializer),
                    Slot::Raw(raw) => raw.as_ref().serialize(serializer),
                }
            }
        }

        let snapshot = match &*self.0.data.lock() {
            Aggregate::Map(map) => {
                Snapshot::Map(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            Aggregate::Sequence(items) => Snapshot::Sequence(items.clone()),
        };

        match snapshot {
            Snapshot::Map(members) => {
                let mut map = serializer.serialize_map(Some(members.len()))?;
                for (key, slot) in &members {
                    map.serialize_entry(&**key, &SlotRef(slot))?;
                }
                map.end()
            }
            Snapshot::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for slot in &items {
                    seq.serialize_element(&SlotRef(slot))?;
                }
                seq.end()
            }
        }
    }
}
