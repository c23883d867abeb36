//! Observer Implementation
//!
//! An observer is a reactive computation unit: a tracked function whose
//! result is handed to an apply callback whenever it changes.
//!
//! # How Observers Work
//!
//! 1. When created, the observer runs immediately to establish its initial
//!    dependencies and apply its first result.
//!
//! 2. When any dependency changes, the runtime queues the observer and the
//!    scheduler reruns it on the next tick.
//!
//! 3. Before rerunning, the observer drops every subscription it holds and
//!    records fresh ones while the tracked function executes, so its
//!    dependency set always reflects the most recent run only.
//!
//! 4. The new result is compared with the cached one. Primitives compare by
//!    value, aggregates always count as changed. The apply callback only runs
//!    when the result changed or nothing has been applied yet.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::context::EffectStack;
use super::runtime::Runtime;
use super::scope::{DestroyTrigger, ScopeId};
use super::value::{MemberKey, ObservableId, Value};
use crate::error::{EvalError, Result};

/// Unique identifier for an observer.
///
/// IDs come from a process-wide monotonic counter, so ordering by ID is
/// ordering by creation sequence. Observers invalidated by the same
/// notification run in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Generate the next ID in creation sequence.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Lifecycle status of an observer.
///
/// `Active` and `Paused` toggle as the owning scope detaches and reattaches.
/// `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverStatus {
    Active,
    Paused,
    Destroyed,
}

/// A write that invalidated an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub observable: ObservableId,
    pub member: MemberKey,
    pub shape_changed: bool,
}

/// Why an observer is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause {
    /// The run performed when the observer was created.
    Initial,
    Changed(Change),
    /// The owning scope was reattached.
    Resumed(ScopeId),
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Initial => f.write_str("initial run"),
            Cause::Changed(change) => write!(
                f,
                "{}.{}{}",
                change.observable,
                change.member,
                if change.shape_changed { " (shape)" } else { "" }
            ),
            Cause::Resumed(scope) => write!(f, "{scope} resumed"),
        }
    }
}

/// Ownership and diagnostics for a new observer.
#[derive(Debug, Clone, Default)]
pub struct ObserverOptions {
    pub owner: Option<ScopeId>,
    pub destroy_trigger: Option<DestroyTrigger>,
    /// Shown in log lines, e.g. the expression a binding evaluates.
    pub label: Option<Arc<str>>,
}

impl ObserverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owned_by(mut self, scope: ScopeId) -> Self {
        self.owner = Some(scope);
        self
    }

    pub fn destroyed_with(mut self, trigger: DestroyTrigger) -> Self {
        self.destroy_trigger = Some(trigger);
        self
    }

    pub fn label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// What a single run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The apply callback ran with a new result.
    Applied,
    /// The result matched the cached one; nothing was applied.
    Unchanged,
    /// The tracked computation failed; the previous result was kept.
    EvaluationFailed,
}

pub(crate) type TrackFn = Box<dyn FnMut() -> Result<Value, EvalError> + Send>;
pub(crate) type ApplyFn = Box<dyn FnMut(&Value, bool, &Cause) -> Result<()> + Send>;

/// The callable half of an observer. The runtime keeps its bookkeeping
/// (status, owner, edges) separately so that a run never holds the runtime lock.
pub(crate) struct ObserverBody {
    track: TrackFn,
    apply: ApplyFn,
    cache: Option<Value>,
    applied: bool,
    runs: u64,
}

impl ObserverBody {
    pub(crate) fn new(track: TrackFn, apply: ApplyFn) -> Self {
        Self {
            track,
            apply,
            cache: None,
            applied: false,
            runs: 0,
        }
    }

    pub(crate) fn runs(&self) -> u64 {
        self.runs
    }

    /// Run the observer once.
    ///
    /// Evaluation failures are logged and reported as
    /// [`RunOutcome::EvaluationFailed`]; errors raised by the apply callback
    /// are returned to the caller.
    pub(crate) fn run(
        &mut self,
        runtime: &Runtime,
        id: ObserverId,
        label: Option<&str>,
        cause: &Cause,
    ) -> Result<RunOutcome> {
        runtime.unsubscribe_all(id);

        let result = {
            let _frame = EffectStack::enter(id);
            (self.track)()
        };
        self.runs += 1;

        let value = match result {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(
                    observer = %id,
                    label = label.unwrap_or(""),
                    %cause,
                    %error,
                    "tracked computation failed, keeping previous result"
                );
                return Ok(RunOutcome::EvaluationFailed);
            }
        };

        let first = !self.applied;
        let changed = self
            .cache
            .as_ref()
            .map_or(true, |previous| value.differs_from(previous));
        if !changed && !first {
            return Ok(RunOutcome::Unchanged);
        }

        (self.apply)(&value, first, cause)?;
        self.applied = true;
        self.cache = Some(value);
        Ok(RunOutcome::Applied)
    }
}
