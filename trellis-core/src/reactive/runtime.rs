//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects observables,
//! observers and owning scopes. It owns the dependency registry and the
//! scheduler queues.
//!
//! # How It Works
//!
//! 1. When an observable member is read while observers are running, the
//!    runtime records a `(observable, member) -> observer` edge.
//!
//! 2. When a member is written, the runtime:
//!    a. Looks up the member's subscribers (plus the shape subscribers for
//!       shape changes)
//!    b. Drops subscribers that are paused, destroyed or suppressed by their
//!       scope or destroy trigger
//!    c. Queues the rest in creation order, tagged with the write as cause
//!
//! 3. [`Runtime::tick`] drains the queue and reruns each observer.
//!
//! # Ownership
//!
//! Observers live in an arena keyed by [`ObserverId`]. Their edges, owning
//! scope and destroy trigger are plain IDs, so destroying an observer is an
//! index removal and never depends on reference counts to break cycles.
//!
//! # Thread Safety
//!
//! All bookkeeping sits behind a single mutex, which serializes registry and
//! queue access when a host drives the runtime from several threads. The lock
//! is never held while user code (tracked functions, apply callbacks) runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::context::EffectStack;
use super::observer::{Cause, Change, ObserverBody, ObserverId, ObserverOptions, ObserverStatus};
use super::scope::{DestroyTrigger, ScopeId, ScopeStatus};
use super::value::{AggregateKind, MemberKey, Observable, ObservableId, Value};
use crate::config::RuntimeConfig;
use crate::error::{EvalError, Result, StructuralError};
use crate::graph::{Edge, Registry, TickReport, UpdateQueue};

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    state: Mutex<RuntimeState>,
}

/// Bookkeeping for one observer. The callable part lives in `body`.
pub(crate) struct ObserverSlot {
    pub(crate) status: ObserverStatus,
    pub(crate) owner: Option<ScopeId>,
    pub(crate) trigger: Option<DestroyTrigger>,
    pub(crate) label: Option<Arc<str>>,
    pub(crate) edges: HashSet<Edge>,
    pub(crate) body: Arc<Mutex<ObserverBody>>,
}

struct ScopeState {
    parent: Option<ScopeId>,
    status: ScopeStatus,
    children: Vec<ScopeId>,
    observers: Vec<ObserverId>,
}

#[derive(Default)]
pub(crate) struct RuntimeState {
    pub(crate) registry: Registry,
    pub(crate) observers: BTreeMap<ObserverId, ObserverSlot>,
    scopes: HashMap<ScopeId, ScopeState>,
    triggers: HashMap<u64, Vec<ObserverId>>,
    pub(crate) queue: UpdateQueue,
    pub(crate) deferred: UpdateQueue,
    /// Set when a teardown left suppressed observers or dead scopes behind.
    pub(crate) prune_due: bool,
}

impl RuntimeState {
    /// A scope is active when it and every ancestor are active.
    fn scope_active(&self, scope: ScopeId) -> bool {
        let mut current = Some(scope);
        while let Some(id) = current {
            match self.scopes.get(&id) {
                Some(state) if state.status == ScopeStatus::Active => current = state.parent,
                _ => return false,
            }
        }
        true
    }

    /// A scope is gone for good when it or any ancestor is destroyed or pruned.
    fn scope_gone(&self, scope: ScopeId) -> bool {
        let mut current = Some(scope);
        while let Some(id) = current {
            match self.scopes.get(&id) {
                Some(state) if state.status != ScopeStatus::Destroyed => current = state.parent,
                _ => return true,
            }
        }
        false
    }

    /// The dequeue-time gate: own status, owning scope, destroy trigger.
    pub(crate) fn is_observer_active(&self, id: ObserverId) -> bool {
        self.observers.get(&id).is_some_and(|slot| {
            slot.status == ObserverStatus::Active
                && slot.owner.map_or(true, |scope| self.scope_active(scope))
                && slot.trigger.as_ref().map_or(true, |t| !t.is_torn_down())
        })
    }

    fn is_permanently_inactive(&self, slot: &ObserverSlot) -> bool {
        slot.status == ObserverStatus::Destroyed
            || slot.owner.is_some_and(|scope| self.scope_gone(scope))
            || slot.trigger.as_ref().is_some_and(DestroyTrigger::is_torn_down)
    }

    /// Queue an observer unless it is already pending in either queue.
    pub(crate) fn enqueue(&mut self, id: ObserverId, cause: Cause, defer: bool) -> bool {
        if self.queue.contains(id) || self.deferred.contains(id) {
            return false;
        }
        if defer {
            self.deferred.push(id, cause)
        } else {
            self.queue.push(id, cause)
        }
    }

    /// Remove an observer from the arena and from every index that names it.
    fn detach_observer(&mut self, id: ObserverId) -> Option<ObserverSlot> {
        let mut slot = self.observers.remove(&id)?;
        slot.status = ObserverStatus::Destroyed;
        for edge in slot.edges.drain() {
            self.registry.unsubscribe(&edge, id);
        }
        if let Some(scope) = slot.owner.and_then(|owner| self.scopes.get_mut(&owner)) {
            scope.observers.retain(|o| *o != id);
        }
        if let Some(trigger) = &slot.trigger {
            if let Some(ids) = self.triggers.get_mut(&trigger.id()) {
                ids.retain(|o| *o != id);
                if ids.is_empty() {
                    self.triggers.remove(&trigger.id());
                }
            }
        }
        Some(slot)
    }

    fn subtree(&self, root: ScopeId) -> Vec<ScopeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(scope) = self.scopes.get(&id) {
                out.push(id);
                stack.extend(scope.children.iter().copied());
            }
        }
        out
    }
}

/// What [`Runtime::prune`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub observers: usize,
    pub records: usize,
    pub scopes: usize,
}

/// An explicit reactive runtime instance.
///
/// Cloning yields another handle to the same runtime. Observables created by
/// a runtime keep only a weak reference to it.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

/// A non-owning runtime handle, for closures stored inside the runtime itself.
#[derive(Clone)]
pub struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        Runtime::from_weak(&self.0)
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                state: Mutex::new(RuntimeState::default()),
            }),
        }
    }

    pub(crate) fn from_weak(weak: &Weak<RuntimeInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Arc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.inner.state.lock()
    }

    // ------------------------------------------------------------------
    // Observables
    // ------------------------------------------------------------------

    /// A new empty keyed map.
    pub fn object(&self) -> Observable {
        Observable::new(Arc::downgrade(&self.inner), AggregateKind::Map)
    }

    /// A new empty sequence.
    pub fn sequence(&self) -> Observable {
        Observable::new(Arc::downgrade(&self.inner), AggregateKind::Sequence)
    }

    /// Wrap raw JSON. Objects and arrays become observables; primitives
    /// convert to plain values.
    pub fn wrap_json(&self, json: serde_json::Value) -> Value {
        Observable::from_json(Arc::downgrade(&self.inner), json)
    }

    // ------------------------------------------------------------------
    // Dependency registry
    // ------------------------------------------------------------------

    /// Subscribe the running observers to `(observable, member)`.
    ///
    /// A no-op outside any observer run.
    pub fn observe_member(&self, observable: &Observable, member: MemberKey) {
        let subscribers = EffectStack::subscribers(self.inner.config.tracking);
        if subscribers.is_empty() {
            return;
        }

        let mut state = self.state();
        let state = &mut *state;
        for observer in subscribers {
            let Some(slot) = state.observers.get_mut(&observer) else {
                continue;
            };
            if slot.status == ObserverStatus::Destroyed {
                continue;
            }
            let edge = Edge::new(observable.id(), member.clone());
            if slot.edges.insert(edge.clone()) {
                state.registry.subscribe(&edge, observable.downgrade(), observer);
                trace!(%observer, observable = %edge.observable, member = %edge.member, "subscribed");
            }
        }
    }

    /// Queue every active subscriber of `(observable, member)`, plus the
    /// shape subscribers when `shape_changed`.
    ///
    /// Invalidations raised while an observer is running are deferred to the
    /// next tick.
    pub fn notify(&self, observable: ObservableId, member: MemberKey, shape_changed: bool) {
        let mut state = self.state();
        let subscribers = state.registry.subscribers(observable, &member, shape_changed);
        if subscribers.is_empty() {
            return;
        }

        let defer = EffectStack::is_active();
        let change = Change {
            observable,
            member,
            shape_changed,
        };
        for id in subscribers {
            if !state.is_observer_active(id) {
                continue;
            }
            if state.enqueue(id, Cause::Changed(change.clone()), defer) {
                trace!(observer = %id, cause = %Cause::Changed(change.clone()), defer, "queued");
            }
        }
    }

    /// Drop every subscription `observer` holds.
    pub fn unsubscribe_all(&self, observer: ObserverId) {
        let mut state = self.state();
        let state = &mut *state;
        if let Some(slot) = state.observers.get_mut(&observer) {
            for edge in slot.edges.drain() {
                state.registry.unsubscribe(&edge, observer);
            }
        }
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Create an observer and run it once.
    ///
    /// `track` runs with the observer on the effect stack; `apply` receives
    /// `(result, is_first_run, cause)` whenever the result changed. An error
    /// from the first apply destroys the observer and is returned.
    pub fn create_observer<T, A>(
        &self,
        options: ObserverOptions,
        track: T,
        apply: A,
    ) -> Result<ObserverId>
    where
        T: FnMut() -> Result<Value, EvalError> + Send + 'static,
        A: FnMut(&Value, bool, &Cause) -> Result<()> + Send + 'static,
    {
        let id = ObserverId::next();
        let body = Arc::new(Mutex::new(ObserverBody::new(Box::new(track), Box::new(apply))));
        {
            let mut state = self.state();
            if let Some(owner) = options.owner {
                let scope = state
                    .scopes
                    .get_mut(&owner)
                    .ok_or(StructuralError::UnknownScope(owner))?;
                if scope.status == ScopeStatus::Destroyed {
                    return Err(StructuralError::ScopeDestroyed(owner).into());
                }
                scope.observers.push(id);
            }
            if let Some(trigger) = &options.destroy_trigger {
                state.triggers.entry(trigger.id()).or_default().push(id);
            }
            state.observers.insert(
                id,
                ObserverSlot {
                    status: ObserverStatus::Active,
                    owner: options.owner,
                    trigger: options.destroy_trigger.clone(),
                    label: options.label.clone(),
                    edges: HashSet::new(),
                    body: Arc::clone(&body),
                },
            );
        }
        trace!(observer = %id, label = options.label.as_deref().unwrap_or(""), "created");

        let outcome = body
            .lock()
            .run(self, id, options.label.as_deref(), &Cause::Initial);
        if let Err(error) = outcome {
            self.destroy_observer(id);
            return Err(error);
        }
        Ok(id)
    }

    /// Destroy one observer. Pending runs of it become no-ops.
    pub fn destroy_observer(&self, id: ObserverId) -> bool {
        let slot = self.state().detach_observer(id);
        slot.is_some()
    }

    pub fn observer_status(&self, id: ObserverId) -> Option<ObserverStatus> {
        self.state().observers.get(&id).map(|slot| slot.status)
    }

    /// Whether a queued run of `id` would execute right now.
    pub fn is_observer_active(&self, id: ObserverId) -> bool {
        self.state().is_observer_active(id)
    }

    /// Number of subscriptions `id` recorded during its latest run.
    pub fn dependency_count(&self, id: ObserverId) -> usize {
        self.state()
            .observers
            .get(&id)
            .map_or(0, |slot| slot.edges.len())
    }

    /// Number of times `id` has run its tracked computation.
    pub fn run_count(&self, id: ObserverId) -> u64 {
        let body = self.state().observers.get(&id).map(|slot| Arc::clone(&slot.body));
        body.map_or(0, |body| body.lock().runs())
    }

    pub fn observer_count(&self) -> usize {
        self.state().observers.len()
    }

    pub fn subscriber_count(&self, observable: ObservableId, member: &MemberKey) -> usize {
        self.state().registry.subscriber_count(observable, member)
    }

    /// Fire `trigger` and destroy every observer attached to it. Observers
    /// attached to descendant triggers are suppressed and pruned later.
    pub fn destroy_by_destroy_trigger(&self, trigger: &DestroyTrigger) -> usize {
        trigger.fire();
        let slots: Vec<ObserverSlot> = {
            let mut state = self.state();
            state.prune_due = true;
            let ids = state.triggers.remove(&trigger.id()).unwrap_or_default();
            ids.into_iter()
                .filter_map(|id| state.detach_observer(id))
                .collect()
        };
        if !slots.is_empty() {
            debug!(trigger = trigger.id(), destroyed = slots.len(), "destroy trigger fired");
        }
        slots.len()
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    /// Create an active scope, optionally nested in `parent`.
    pub fn create_scope(&self, parent: Option<ScopeId>) -> Result<ScopeId> {
        let id = ScopeId::next();
        let mut state = self.state();
        if let Some(parent) = parent {
            let parent_state = state
                .scopes
                .get_mut(&parent)
                .ok_or(StructuralError::UnknownScope(parent))?;
            if parent_state.status == ScopeStatus::Destroyed {
                return Err(StructuralError::ScopeDestroyed(parent).into());
            }
            parent_state.children.push(id);
        }
        state.scopes.insert(
            id,
            ScopeState {
                parent,
                status: ScopeStatus::Active,
                children: Vec::new(),
                observers: Vec::new(),
            },
        );
        Ok(id)
    }

    pub fn scope_status(&self, scope: ScopeId) -> Option<ScopeStatus> {
        self.state().scopes.get(&scope).map(|s| s.status)
    }

    /// Whether the scope and all of its ancestors are active.
    pub fn is_scope_active(&self, scope: ScopeId) -> bool {
        self.state().scope_active(scope)
    }

    /// Detach a scope. Its observers stop running until it is resumed.
    pub fn pause_scope(&self, scope: ScopeId) -> Result<()> {
        let mut state = self.state();
        let state = &mut *state;
        let scope_state = state
            .scopes
            .get_mut(&scope)
            .ok_or(StructuralError::UnknownScope(scope))?;
        match scope_state.status {
            ScopeStatus::Destroyed => return Err(StructuralError::ScopeDestroyed(scope).into()),
            ScopeStatus::Paused => return Err(StructuralError::NotMounted(scope).into()),
            ScopeStatus::Active => scope_state.status = ScopeStatus::Paused,
        }
        for id in &scope_state.observers {
            if let Some(slot) = state.observers.get_mut(id) {
                if slot.status == ObserverStatus::Active {
                    slot.status = ObserverStatus::Paused;
                }
            }
        }
        debug!(%scope, "scope paused");
        Ok(())
    }

    /// Reattach a paused scope and queue its subtree's observers so that
    /// writes missed while detached are applied.
    pub fn resume_scope(&self, scope: ScopeId) -> Result<()> {
        let mut state = self.state();
        let state = &mut *state;
        let scope_state = state
            .scopes
            .get_mut(&scope)
            .ok_or(StructuralError::UnknownScope(scope))?;
        match scope_state.status {
            ScopeStatus::Destroyed => return Err(StructuralError::ScopeDestroyed(scope).into()),
            ScopeStatus::Active => return Err(StructuralError::AlreadyMounted(scope).into()),
            ScopeStatus::Paused => scope_state.status = ScopeStatus::Active,
        }
        for id in &scope_state.observers {
            if let Some(slot) = state.observers.get_mut(id) {
                if slot.status == ObserverStatus::Paused {
                    slot.status = ObserverStatus::Active;
                }
            }
        }

        let defer = EffectStack::is_active();
        let mut queued = 0;
        for id in state.subtree(scope) {
            let observers = state.scopes[&id].observers.clone();
            for observer in observers {
                if state.is_observer_active(observer)
                    && state.enqueue(observer, Cause::Resumed(scope), defer)
                {
                    queued += 1;
                }
            }
        }
        debug!(%scope, queued, "scope resumed");
        Ok(())
    }

    /// Tear a scope down. Observers it owns directly are destroyed now;
    /// observers of nested scopes are suppressed and pruned later.
    /// Destroying an already destroyed scope is a no-op.
    pub fn destroy_scope(&self, scope: ScopeId) -> Result<()> {
        let slots: Vec<ObserverSlot> = {
            let mut state = self.state();
            let scope_state = state
                .scopes
                .get(&scope)
                .ok_or(StructuralError::UnknownScope(scope))?;
            if scope_state.status == ScopeStatus::Destroyed {
                return Ok(());
            }
            let parent = scope_state.parent;
            let owned = scope_state.observers.clone();

            for id in state.subtree(scope) {
                if let Some(s) = state.scopes.get_mut(&id) {
                    s.status = ScopeStatus::Destroyed;
                }
            }
            if let Some(parent) = parent.and_then(|p| state.scopes.get_mut(&p)) {
                parent.children.retain(|c| *c != scope);
            }
            state.prune_due = true;
            owned
                .into_iter()
                .filter_map(|id| state.detach_observer(id))
                .collect()
        };
        debug!(%scope, destroyed = slots.len(), "scope destroyed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Run one scheduler tick. See [`crate::graph`] for the tick contract.
    pub fn tick(&self) -> TickReport {
        crate::graph::scheduler::tick(self)
    }

    /// Tick until nothing is pending, up to `max_ticks` ticks.
    pub fn flush(&self, max_ticks: usize) -> TickReport {
        let mut total = TickReport::default();
        for _ in 0..max_ticks {
            if self.pending() == 0 {
                break;
            }
            total.absorb(self.tick());
        }
        total
    }

    /// Whether a teardown since the last prune may have left garbage.
    pub(crate) fn prune_due(&self) -> bool {
        self.state().prune_due
    }

    /// Entries waiting in the current and deferred queues.
    pub fn pending(&self) -> usize {
        let state = self.state();
        state.queue.len() + state.deferred.len()
    }

    /// Housekeeping: drop observers that can never run again, dependency
    /// records of dropped observables, empty buckets and dead scopes.
    pub fn prune(&self) -> PruneReport {
        let (report, slots) = {
            let mut state = self.state();
            state.prune_due = false;
            let dead: Vec<ObserverId> = state
                .observers
                .iter()
                .filter(|(_, slot)| state.is_permanently_inactive(slot))
                .map(|(id, _)| *id)
                .collect();
            let slots: Vec<ObserverSlot> = dead
                .iter()
                .filter_map(|id| state.detach_observer(*id))
                .collect();

            let RuntimeState {
                registry,
                observers,
                ..
            } = &mut *state;
            let records = registry.prune(|id| !observers.contains_key(&id));

            let dead_scopes: Vec<ScopeId> = state
                .scopes
                .iter()
                .filter(|(_, s)| s.status == ScopeStatus::Destroyed && s.observers.is_empty())
                .map(|(id, _)| *id)
                .collect();
            for id in &dead_scopes {
                state.scopes.remove(id);
            }

            let report = PruneReport {
                observers: slots.len(),
                records,
                scopes: dead_scopes.len(),
            };
            (report, slots)
        };
        drop(slots);
        if report != PruneReport::default() {
            debug!(?report, "pruned");
        }
        report
    }

    /// Discard every observer, scope, subscription and queued entry.
    /// Observables stay usable but lose all subscribers.
    pub fn reset(&self) {
        let old = std::mem::take(&mut *self.state());
        drop(old);
        debug!("runtime reset");
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Runtime")
            .field("observers", &state.observers.len())
            .field("scopes", &state.scopes.len())
            .field("records", &state.registry.record_count())
            .field("queued", &state.queue.len())
            .field("deferred", &state.deferred.len())
            .finish()
    }
}
