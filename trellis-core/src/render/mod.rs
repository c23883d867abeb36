//! Structural Reconcilers
//!
//! Reconcilers turn reactive state into structural output through an
//! [`OutputMedium`]:
//!
//! - [`Conditional`] keeps a region present while a guard is truthy.
//! - [`KeyedList`] keeps one piece of content per collection member, matched
//!   across changes by a correlation id.
//!
//! Content created by a reconciler is owned by a [`DestroyTrigger`] derived
//! from the enclosing [`RenderCx`], so tearing content down also suppresses
//! every observer created while building it.
//!
//! [`DestroyTrigger`]: crate::reactive::DestroyTrigger

mod conditional;
mod eval;
mod keyed_list;
mod medium;
mod memory;

pub use conditional::Conditional;
pub use eval::{binding, Evaluator, Frames, PathEvaluator};
pub use keyed_list::{CorrelationId, IdFn, KeyedList, KeyedListOptions, ListStats};
pub use medium::{OutputMedium, RenderCx, WeakRenderCx};
pub use memory::{Fragment, MediumStats, MemoryMedium, MemoryTemplate, NodeId};
