//! Trellis Core
//!
//! This crate provides the reactive core of the Trellis rendering engine.
//! It implements:
//!
//! - Observable values with per-member dependency tracking
//! - Observers that rerun when what they read changes
//! - A batching scheduler with per-observer failure isolation
//! - Conditional and keyed-list reconcilers over a pluggable output medium
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: observables, observers, scopes and the runtime
//! - `graph`: dependency registry, update queue and tick driver
//! - `render`: output medium contract, evaluators and reconcilers
//! - `config`: runtime configuration
//! - `error`: error types
//!
//! # Example
//!
//! ```rust
//! use trellis_core::reactive::{ObserverOptions, Runtime, Value};
//!
//! let runtime = Runtime::new();
//! let state = runtime.object();
//! state.set("count", 0);
//!
//! let source = state.clone();
//! runtime
//!     .create_observer(
//!         ObserverOptions::new(),
//!         move || Ok(Value::from(source.get("count").as_f64().unwrap_or(0.0) * 2.0)),
//!         |doubled, _, _| {
//!             println!("doubled: {}", doubled.display());
//!             Ok(())
//!         },
//!     )
//!     .unwrap();
//!
//! state.set("count", 5);
//! runtime.tick(); // prints "doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod render;

pub use config::{RuntimeConfig, TrackingMode};
pub use error::{EvalError, ReactiveError, Result, StructuralError};
pub use reactive::{Observable, Runtime, Value};
