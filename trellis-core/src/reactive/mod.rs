//! Reactive Primitives
//!
//! This module implements the tracking side of the engine: observable
//! values, observers, the effect stack and the runtime that ties them
//! together.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An [`Observable`] is a keyed map or sequence whose member reads and writes
//! are intercepted. Reading a member while an observer runs subscribes that
//! observer to the member. Writing a member that actually changed queues its
//! subscribers.
//!
//! ## Observers
//!
//! An observer pairs a tracked computation with an apply callback. It reruns
//! whenever something it read last time changes, and applies the result only
//! when the result changed.
//!
//! ## Scopes
//!
//! Observers can be owned by a scope (mount, detach, teardown) and by a
//! [`DestroyTrigger`] tied to structural output. Either owner can suppress
//! queued runs.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic: a thread-local effect stack records which
//! observers are running, and every intercepted read consults it.

mod context;
pub(crate) mod observer;
mod runtime;
mod scope;
pub(crate) mod value;

pub use context::{untracked, EffectStack};
pub use observer::{Cause, Change, ObserverId, ObserverOptions, ObserverStatus, RunOutcome};
pub use runtime::{PruneReport, Runtime, WeakRuntime};
pub use scope::{DestroyTrigger, ScopeId, ScopeStatus};
pub use value::{AggregateKind, Key, MemberKey, Observable, ObservableId, Opaque, Value};
