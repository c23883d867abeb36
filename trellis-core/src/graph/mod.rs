//! Dependency Graph
//!
//! The graph side of the reactive core: which observers depend on which
//! observable members, and when they rerun.
//!
//! # Overview
//!
//! - The [`registry`] maps `(observable, member)` pairs to the observers that
//!   read them during their latest run.
//! - The [`scheduler`] queues invalidated observers and drains the queue in
//!   ticks, checking each entry's owners at dequeue time.
//! - The [`driver`] ticks a runtime from a tokio timer.
//!
//! Edges are recorded from both sides: the registry holds
//! `observable -> member -> observers` and every observer holds its own edge
//! set, so an observer can drop all of its subscriptions before it reruns.

pub(crate) mod registry;
pub(crate) mod scheduler;
pub mod driver;

pub use driver::TickDriver;
pub use registry::Edge;
pub use scheduler::TickReport;

pub(crate) use registry::Registry;
pub(crate) use scheduler::UpdateQueue;
