//! Keyed-List Reconciler
//!
//! Renders one piece of content per member of a source collection and keeps
//! it in step with the collection using two levels of observers.
//!
//! # How It Works
//!
//! 1. An outer observer evaluates the source expression and tracks the
//!    collection's shape (its key set and length). Any shape change
//!    reconciles the whole list.
//!
//! 2. For every key, a watcher observer tracks that key's value. When the
//!    value is replaced by one with the same correlation id, the watcher
//!    writes it into the item's local scope in place; bindings inside the
//!    item pick it up reactively and no content is rebuilt. When the id
//!    changes, the watcher triggers a full reconcile.
//!
//! 3. A reconcile walks the collection in iteration order:
//!    - each item is matched to an entry by correlation id, by default the
//!      item's key
//!    - unmatched items get fresh content synthesized against a new local
//!      scope holding `{index, key, value}`
//!    - matched items only have their local scope updated
//!    - entries whose id vanished are destroyed: their observers are torn
//!      down and their content removed
//!    - surviving content is moved, never recreated, into the new order by
//!      inserting it after the nearest connected predecessor
//!
//! A same-id value change therefore never removes and reinserts content.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::eval::Frames;
use super::medium::{OutputMedium, RenderCx, WeakRenderCx};
use crate::error::{EvalError, Result, StructuralError};
use crate::reactive::{DestroyTrigger, Key, Observable, ObservableId, ObserverId, Value};

/// Stable identity used to match items across reconciles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationId {
    Key(Key),
    Null,
    Bool(bool),
    Int(i64),
    /// Non-integral numbers, by bit pattern.
    Float(u64),
    Str(Arc<str>),
    /// Aggregates correlate by wrapper identity.
    Identity(ObservableId),
    Opaque(usize),
}

impl CorrelationId {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => CorrelationId::Null,
            Value::Bool(b) => CorrelationId::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => CorrelationId::Int(*n as i64),
            Value::Number(n) => CorrelationId::Float(n.to_bits()),
            Value::String(s) => CorrelationId::Str(s.clone()),
            Value::Observable(o) => CorrelationId::Identity(o.id()),
            Value::Opaque(o) => CorrelationId::Opaque(o.addr()),
        }
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationId::Key(key) => write!(f, "key {key}"),
            CorrelationId::Null => f.write_str("null"),
            CorrelationId::Bool(b) => write!(f, "{b}"),
            CorrelationId::Int(n) => write!(f, "{n}"),
            CorrelationId::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            CorrelationId::Str(s) => write!(f, "'{s}'"),
            CorrelationId::Identity(id) => write!(f, "{id}"),
            CorrelationId::Opaque(p) => write!(f, "opaque@{p:x}"),
        }
    }
}

/// Maps `(value, key)` to a correlation value.
pub type IdFn = Arc<dyn Fn(&Value, &Key) -> Value + Send + Sync>;

/// Names under which each item's local scope is exposed, and how items are
/// correlated.
#[derive(Clone)]
pub struct KeyedListOptions {
    pub index_name: Arc<str>,
    pub key_name: Arc<str>,
    pub value_name: Arc<str>,
    pub id_fn: Option<IdFn>,
}

impl Default for KeyedListOptions {
    fn default() -> Self {
        Self {
            index_name: Arc::from("index"),
            key_name: Arc::from("key"),
            value_name: Arc::from("value"),
            id_fn: None,
        }
    }
}

impl KeyedListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rename the local value and key variables.
    pub fn names(mut self, value: &str, key: &str, index: &str) -> Self {
        self.value_name = Arc::from(value);
        self.key_name = Arc::from(key);
        self.index_name = Arc::from(index);
        self
    }

    /// Correlate items with `f` instead of their keys.
    pub fn id_by(mut self, f: impl Fn(&Value, &Key) -> Value + Send + Sync + 'static) -> Self {
        self.id_fn = Some(Arc::new(f));
        self
    }

    fn correlation_id(&self, value: &Value, key: &Key) -> CorrelationId {
        match &self.id_fn {
            Some(f) => CorrelationId::from_value(&f(value, key)),
            None => CorrelationId::Key(key.clone()),
        }
    }
}

impl fmt::Debug for KeyedListOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedListOptions")
            .field("index_name", &self.index_name)
            .field("key_name", &self.key_name)
            .field("value_name", &self.value_name)
            .field("id_fn", &self.id_fn.is_some())
            .finish()
    }
}

/// Structural work done by a list since it was mounted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListStats {
    pub synthesized: usize,
    pub destroyed: usize,
    pub moved: usize,
    /// Local scope values replaced in place.
    pub scope_updates: usize,
}

struct Entry<H> {
    scope: Observable,
    content: H,
    trigger: DestroyTrigger,
}

struct ListState<H> {
    entries: HashMap<CorrelationId, Entry<H>>,
    /// Placement of entries in the medium, first to last.
    order: Vec<CorrelationId>,
    key_ids: HashMap<Key, CorrelationId>,
    watchers: HashMap<Key, ObserverId>,
    source: Option<Observable>,
    stats: ListStats,
}

struct ListInner<M: OutputMedium> {
    medium: Arc<M>,
    anchor: M::Handle,
    template: M::Template,
    options: KeyedListOptions,
    cx: WeakRenderCx,
    /// Parent of every item trigger; also owns the list's own observers.
    trigger: DestroyTrigger,
    state: Mutex<ListState<M::Handle>>,
}

impl<M: OutputMedium> ListInner<M> {
    fn context(&self) -> Result<RenderCx> {
        let cx = self.cx.upgrade().ok_or(StructuralError::Detached)?;
        Ok(cx.child(self.trigger.clone(), cx.frames().clone()))
    }

    /// The outer observer produced a new source collection.
    fn on_source(self: &Arc<Self>, value: &Value) -> Result<()> {
        let source = match value {
            Value::Observable(o) => Some(o.clone()),
            Value::Null => None,
            other => return Err(StructuralError::NotACollection(other.display()).into()),
        };
        let cx = self.context()?;

        let stale: Vec<ObserverId> = {
            let mut state = self.state.lock();
            let same = match (&state.source, &source) {
                (Some(a), Some(b)) => a.ptr_eq(b),
                (None, None) => true,
                _ => false,
            };
            if same {
                Vec::new()
            } else {
                state.source = source;
                state.key_ids.clear();
                state.watchers.drain().map(|(_, id)| id).collect()
            }
        };
        if !stale.is_empty() {
            debug!(watchers = stale.len(), "keyed list source replaced");
        }
        for id in stale {
            cx.runtime().destroy_observer(id);
        }

        self.reconcile(&cx)
    }

    /// A watcher saw the value under `key` change.
    fn on_item(self: &Arc<Self>, key: &Key, value: &Value) -> Result<()> {
        {
            let mut state = self.state.lock();
            let Some(current) = state.key_ids.get(key).cloned() else {
                return Ok(());
            };
            if self.options.correlation_id(value, key) == current {
                let state = &mut *state;
                if let Some(entry) = state.entries.get(&current) {
                    let name = self.options.value_name.as_ref();
                    if entry.scope.get_untracked(name) != *value {
                        entry.scope.set(name, value.clone());
                        state.stats.scope_updates += 1;
                        trace!(%key, id = %current, "keyed list item updated in place");
                    }
                }
                return Ok(());
            }
        }
        let cx = self.context()?;
        self.reconcile(&cx)
    }

    fn reconcile(self: &Arc<Self>, cx: &RenderCx) -> Result<()> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let items = state
            .source
            .as_ref()
            .map(Observable::entries_untracked)
            .unwrap_or_default();

        let mut seen = HashSet::with_capacity(items.len());
        let mut plan = Vec::with_capacity(items.len());
        for (index, (key, value)) in items.into_iter().enumerate() {
            let id = self.options.correlation_id(&value, &key);
            if !seen.insert(id.clone()) {
                return Err(StructuralError::DuplicateCorrelationId(id.to_string()).into());
            }
            plan.push((index, key, value, id));
        }

        let orphans: Vec<CorrelationId> = state
            .entries
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in &orphans {
            if let Some(entry) = state.entries.remove(id) {
                cx.runtime().destroy_by_destroy_trigger(&entry.trigger);
                if self.medium.is_connected(&entry.content) {
                    self.medium.remove(&entry.content)?;
                }
                state.stats.destroyed += 1;
            }
        }
        state.order.retain(|id| seen.contains(id));

        let keys: HashSet<&Key> = plan.iter().map(|(_, key, _, _)| key).collect();
        let vanished: Vec<Key> = state
            .watchers
            .keys()
            .filter(|key| !keys.contains(key))
            .cloned()
            .collect();
        for key in vanished {
            if let Some(id) = state.watchers.remove(&key) {
                cx.runtime().destroy_observer(id);
            }
        }

        let mut key_ids = HashMap::with_capacity(plan.len());
        for (index, key, value, id) in &plan {
            match state.entries.get(id) {
                Some(entry) => self.update_scope(entry, *index, key, value, &mut state.stats),
                None => {
                    let entry = self.synthesize(cx, *index, key, value)?;
                    state.entries.insert(id.clone(), entry);
                    state.stats.synthesized += 1;
                }
            }
            key_ids.insert(key.clone(), id.clone());

            if !state.watchers.contains_key(key) {
                if let Some(source) = &state.source {
                    let watcher = self.watch(cx, source.clone(), key.clone())?;
                    state.watchers.insert(key.clone(), watcher);
                }
            }
        }
        state.key_ids = key_ids;

        self.reposition(state, &plan)?;
        debug!(
            items = plan.len(),
            destroyed = orphans.len(),
            synthesized = state.stats.synthesized,
            "keyed list reconciled"
        );
        Ok(())
    }

    fn update_scope(&self, entry: &Entry<M::Handle>, index: usize, key: &Key, value: &Value, stats: &mut ListStats) {
        entry.scope.set(self.options.index_name.as_ref(), index);
        entry.scope.set(self.options.key_name.as_ref(), key.clone());
        let name = self.options.value_name.as_ref();
        if entry.scope.get_untracked(name) != *value {
            entry.scope.set(name, value.clone());
            stats.scope_updates += 1;
        }
    }

    fn synthesize(&self, cx: &RenderCx, index: usize, key: &Key, value: &Value) -> Result<Entry<M::Handle>> {
        let scope = cx.runtime().object();
        scope.set(self.options.index_name.as_ref(), index);
        scope.set(self.options.key_name.as_ref(), key.clone());
        scope.set(self.options.value_name.as_ref(), value.clone());

        let trigger = self.trigger.child();
        let item_cx = cx.child(trigger.clone(), cx.frames().push(Value::Observable(scope.clone())));
        match self.medium.synthesize(&self.template, &item_cx) {
            Ok(content) => Ok(Entry {
                scope,
                content,
                trigger,
            }),
            Err(err) => {
                cx.runtime().destroy_by_destroy_trigger(&trigger);
                Err(err)
            }
        }
    }

    fn watch(self: &Arc<Self>, cx: &RenderCx, source: Observable, key: Key) -> Result<ObserverId> {
        let label = format!("keyed list item {key}");
        let list = Arc::clone(self);
        let watched = key.clone();
        cx.observe(
            Some(&label),
            move || Ok(source.get(watched.clone())),
            move |value, first, _| {
                if first {
                    return Ok(());
                }
                list.on_item(&key, value)
            },
        )
    }

    /// Move content into plan order. `state.order` holds the current
    /// placement of surviving entries.
    fn reposition(&self, state: &mut ListState<M::Handle>, plan: &[(usize, Key, Value, CorrelationId)]) -> Result<()> {
        let mut placed = std::mem::take(&mut state.order);
        for (i, (_, _, _, id)) in plan.iter().enumerate() {
            if placed.get(i) == Some(id) {
                continue;
            }
            let Some(entry) = state.entries.get(id) else {
                continue;
            };

            let predecessor = plan[..i]
                .iter()
                .rev()
                .filter_map(|(_, _, _, prev)| state.entries.get(prev))
                .map(|prev| &prev.content)
                .find(|content| self.medium.is_connected(content))
                .unwrap_or(&self.anchor);
            self.medium.insert_after(predecessor, &entry.content)?;

            if let Some(from) = placed.iter().position(|p| p == id) {
                placed.remove(from);
                state.stats.moved += 1;
            }
            placed.insert(i.min(placed.len()), id.clone());
        }
        state.order = placed;
        Ok(())
    }
}

/// A mounted keyed list.
pub struct KeyedList<M: OutputMedium> {
    inner: Arc<ListInner<M>>,
    observer: ObserverId,
}

impl<M: OutputMedium> KeyedList<M> {
    /// Mount a list after `anchor`. `source` is evaluated against the
    /// context's frames and must yield a collection or null.
    pub fn mount<S>(
        cx: &RenderCx,
        medium: Arc<M>,
        anchor: M::Handle,
        template: M::Template,
        mut source: S,
        options: KeyedListOptions,
    ) -> Result<Self>
    where
        S: FnMut(&Frames) -> std::result::Result<Value, EvalError> + Send + 'static,
    {
        let trigger = cx.trigger().child();
        let inner = Arc::new(ListInner {
            medium,
            anchor,
            template,
            options,
            cx: cx.downgrade(),
            trigger: trigger.clone(),
            state: Mutex::new(ListState {
                entries: HashMap::new(),
                order: Vec::new(),
                key_ids: HashMap::new(),
                watchers: HashMap::new(),
                source: None,
                stats: ListStats::default(),
            }),
        });

        let frames = cx.frames().clone();
        let list = Arc::clone(&inner);
        let observer = cx.child(trigger, frames.clone()).observe(
            Some("keyed list source"),
            move || {
                let value = source(&frames)?;
                if let Value::Observable(collection) = &value {
                    collection.keys();
                    collection.len();
                }
                Ok(value)
            },
            move |value, _, _| list.on_source(value),
        )?;

        Ok(Self { inner, observer })
    }

    pub fn stats(&self) -> ListStats {
        self.inner.state.lock().stats
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content handles in rendered order.
    pub fn contents(&self) -> Vec<M::Handle> {
        let state = self.inner.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id))
            .map(|entry| entry.content.clone())
            .collect()
    }

    pub fn content_for(&self, id: &CorrelationId) -> Option<M::Handle> {
        self.inner
            .state
            .lock()
            .entries
            .get(id)
            .map(|entry| entry.content.clone())
    }

    /// The local scope of the item correlated by `id`.
    pub fn scope_for(&self, id: &CorrelationId) -> Option<Observable> {
        self.inner
            .state
            .lock()
            .entries
            .get(id)
            .map(|entry| entry.scope.clone())
    }

    pub fn observer(&self) -> ObserverId {
        self.observer
    }

    /// Tear the list down: its observers, every item and the item content.
    pub fn unmount(self) -> Result<()> {
        let (entries, watchers) = {
            let mut state = self.inner.state.lock();
            state.order.clear();
            state.key_ids.clear();
            state.source = None;
            let entries: Vec<Entry<M::Handle>> = state.entries.drain().map(|(_, e)| e).collect();
            let watchers: Vec<ObserverId> = state.watchers.drain().map(|(_, id)| id).collect();
            (entries, watchers)
        };

        let cx = self.inner.cx.upgrade();
        if let Some(cx) = &cx {
            cx.runtime().destroy_observer(self.observer);
            for id in watchers {
                cx.runtime().destroy_observer(id);
            }
        }
        for entry in entries {
            match &cx {
                Some(cx) => {
                    cx.runtime().destroy_by_destroy_trigger(&entry.trigger);
                }
                None => {
                    entry.trigger.fire();
                }
            }
            if self.inner.medium.is_connected(&entry.content) {
                self.inner.medium.remove(&entry.content)?;
            }
        }
        self.inner.trigger.fire();
        Ok(())
    }
}
