//! Owning scopes and destroy triggers.
//!
//! An observer can be suppressed by two independent owners:
//!
//! - its logical owner, a [`ScopeId`] whose lifecycle (mount, detach,
//!   teardown) is driven by the host through the runtime, and
//! - its physical owner, a [`DestroyTrigger`] tied to a piece of structural
//!   output. Tearing the output down fires the trigger.
//!
//! Both are checked lazily when a queued observer is dequeued, so tearing
//! down a large subtree does not require walking every observer under it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of an owning scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Lifecycle state of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeStatus {
    /// Mounted; observers it owns may run.
    Active,
    /// Detached; observers are suppressed until resumed.
    Paused,
    /// Torn down. Terminal.
    Destroyed,
}

/// A teardown flag attached to a piece of structural output.
///
/// Triggers form a tree: content synthesized inside other content gets a
/// child trigger, and a trigger counts as torn down once any ancestor is.
/// Clones share the same flag.
#[derive(Clone)]
pub struct DestroyTrigger(Arc<TriggerInner>);

struct TriggerInner {
    id: u64,
    torn_down: AtomicBool,
    parent: Option<DestroyTrigger>,
}

impl DestroyTrigger {
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    /// A trigger that also fires when `self` fires.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    fn with_parent(parent: Option<DestroyTrigger>) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(Arc::new(TriggerInner {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            torn_down: AtomicBool::new(false),
            parent,
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// True once this trigger or any of its ancestors has fired.
    pub fn is_torn_down(&self) -> bool {
        let mut current = Some(self);
        while let Some(trigger) = current {
            if trigger.0.torn_down.load(Ordering::Acquire) {
                return true;
            }
            current = trigger.0.parent.as_ref();
        }
        false
    }

    /// Fire the trigger. Returns false if it had already fired.
    pub(crate) fn fire(&self) -> bool {
        !self.0.torn_down.swap(true, Ordering::AcqRel)
    }
}

impl Default for DestroyTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for DestroyTrigger {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for DestroyTrigger {}

impl fmt::Debug for DestroyTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestroyTrigger")
            .field("id", &self.0.id)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
