//! Update Scheduler
//!
//! Notifications do not run observers directly. They append to a FIFO queue
//! that is drained in batches ("ticks").
//!
//! # Algorithm
//!
//! 1. Entries deferred during the previous tick are promoted to the queue.
//! 2. Entries are popped in order. Each is checked against the observer's
//!    current status, its owning scope chain and its destroy trigger at
//!    dequeue time; suppressed entries are skipped silently.
//! 3. Each surviving observer reruns. Failures are isolated: an evaluation
//!    error keeps the previous output, and an apply error or panic is logged
//!    and recorded in the [`TickReport`] before the loop moves on.
//! 4. Writes made by a tracked computation are deferred to the next tick.
//!    Writes made by apply callbacks land in the current queue and run in
//!    the same tick, up to `max_runs_per_tick`.
//!
//! An observer is never queued twice: a repeat notification while an entry is
//! pending is dropped and the pending entry keeps its position and cause.

use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::error::ReactiveError;
use crate::reactive::observer::RunOutcome;
use crate::reactive::{Cause, ObserverId, Runtime};

/// FIFO of pending observer runs with at most one entry per observer.
#[derive(Debug, Default)]
pub(crate) struct UpdateQueue {
    entries: VecDeque<(ObserverId, Cause)>,
    pending: HashSet<ObserverId>,
}

impl UpdateQueue {
    /// Append an entry. Returns false if the observer is already pending.
    pub(crate) fn push(&mut self, id: ObserverId, cause: Cause) -> bool {
        if !self.pending.insert(id) {
            return false;
        }
        self.entries.push_back((id, cause));
        true
    }

    pub(crate) fn pop(&mut self) -> Option<(ObserverId, Cause)> {
        let entry = self.entries.pop_front()?;
        self.pending.remove(&entry.0);
        Some(entry)
    }

    pub(crate) fn contains(&self, id: ObserverId) -> bool {
        self.pending.contains(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (ObserverId, Cause)> + '_ {
        self.pending.clear();
        self.entries.drain(..)
    }
}

/// Summary of one or more ticks.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Observers that ran.
    pub ran: usize,
    /// Runs whose result changed and was applied.
    pub applied: usize,
    /// Queued entries dropped at dequeue time.
    pub skipped: usize,
    /// Runs that failed to evaluate, apply or that panicked.
    pub failed: usize,
    /// Observers removed by idle housekeeping.
    pub pruned: usize,
    /// Apply errors and panics caught during the tick.
    pub errors: Vec<ReactiveError>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.ran == 0 && self.skipped == 0
    }

    pub(crate) fn absorb(&mut self, other: TickReport) {
        self.ran += other.ran;
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.pruned += other.pruned;
        self.errors.extend(other.errors);
    }
}

pub(crate) fn tick(runtime: &Runtime) -> TickReport {
    let started = Instant::now();
    let max_runs = runtime.config().max_runs_per_tick;
    let mut report = TickReport::default();

    {
        let mut state = runtime.state();
        if !state.deferred.is_empty() {
            let deferred: Vec<_> = state.deferred.drain().collect();
            for (id, cause) in deferred {
                state.queue.push(id, cause);
            }
        }
    }

    loop {
        if report.ran >= max_runs {
            warn!(
                max_runs,
                remaining = runtime.pending(),
                "tick run budget exhausted, continuing next tick"
            );
            break;
        }

        let next = {
            let mut state = runtime.state();
            let mut next = None;
            while let Some((id, cause)) = state.queue.pop() {
                if !state.is_observer_active(id) {
                    report.skipped += 1;
                    continue;
                }
                if let Some(slot) = state.observers.get(&id) {
                    next = Some((id, cause, Arc::clone(&slot.body), slot.label.clone()));
                    break;
                }
            }
            next
        };
        let Some((id, cause, body, label)) = next else {
            break;
        };

        report.ran += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            body.lock().run(runtime, id, label.as_deref(), &cause)
        }));
        match outcome {
            Ok(Ok(RunOutcome::Applied)) => report.applied += 1,
            Ok(Ok(RunOutcome::Unchanged)) => {}
            Ok(Ok(RunOutcome::EvaluationFailed)) => report.failed += 1,
            Ok(Err(err)) => {
                error!(observer = %id, label = label.as_deref().unwrap_or(""), %cause, error = %err, "observer apply failed");
                report.failed += 1;
                report.errors.push(err);
            }
            Err(payload) => {
                let err = ReactiveError::ObserverPanicked {
                    observer: id,
                    message: panic_message(payload.as_ref()),
                };
                error!(observer = %id, label = label.as_deref().unwrap_or(""), %cause, error = %err, "observer panicked");
                report.failed += 1;
                report.errors.push(err);
            }
        }
    }

    // Skipped entries belong to observers suppressed since the last prune.
    if runtime.config().prune_on_idle
        && runtime.pending() == 0
        && (report.skipped > 0 || runtime.prune_due())
    {
        report.pruned = runtime.prune().observers;
    }

    if !report.is_idle() {
        debug!(
            ran = report.ran,
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failed,
            pruned = report.pruned,
            elapsed_us = started.elapsed().as_micros() as u64,
            "tick"
        );
    }
    report
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::reactive::{DestroyTrigger, ObserverOptions, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn queue_drops_duplicates() {
        let mut queue = UpdateQueue::default();
        let a = ObserverId::next();
        let b = ObserverId::next();

        assert!(queue.push(a, Cause::Initial));
        assert!(queue.push(b, Cause::Initial));
        assert!(!queue.push(a, Cause::Initial));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop().map(|(id, _)| id), Some(a));
        assert!(!queue.contains(a));
        assert!(queue.push(a, Cause::Initial));
        assert_eq!(queue.drain().map(|(id, _)| id).collect::<Vec<_>>(), vec![b, a]);
        assert!(queue.is_empty());
    }

    #[test]
    fn observers_run_in_creation_order() {
        let runtime = Runtime::new();
        let obs = runtime.object();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let source = obs.clone();
            let order = Arc::clone(&order);
            runtime
                .create_observer(
                    ObserverOptions::new(),
                    move || Ok(source.get("x")),
                    move |_, first, _| {
                        if !first {
                            order.lock().unwrap().push(name);
                        }
                        Ok(())
                    },
                )
                .unwrap();
        }

        obs.set("x", 1);
        runtime.tick();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn writes_inside_tracked_runs_are_deferred() {
        let runtime = Runtime::new();
        let obs = runtime.object();
        obs.set("source", 1);

        let source = obs.clone();
        runtime
            .create_observer(
                ObserverOptions::new(),
                move || {
                    let n = source.get("source").as_f64().unwrap_or_default();
                    source.set("mirror", n);
                    Ok(Value::from(n))
                },
                |_, _, _| Ok(()),
            )
            .unwrap();

        let mirror_runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&mirror_runs);
        let reader = obs.clone();
        runtime
            .create_observer(
                ObserverOptions::new(),
                move || Ok(reader.get("mirror")),
                move |_, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(mirror_runs.load(Ordering::SeqCst), 1);

        obs.set("source", 2);
        let first = runtime.tick();
        assert_eq!(first.ran, 1);
        assert_eq!(runtime.pending(), 1);

        runtime.tick();
        assert_eq!(mirror_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn writes_from_apply_run_in_the_same_tick() {
        let runtime = Runtime::new();
        let obs = runtime.object();
        obs.set("x", 0);

        let (source, target) = (obs.clone(), obs.clone());
        runtime
            .create_observer(
                ObserverOptions::new(),
                move || Ok(source.get("x")),
                move |value, _, _| {
                    target.set("y", value.clone());
                    Ok(())
                },
            )
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reader = obs.clone();
        runtime
            .create_observer(
                ObserverOptions::new(),
                move || Ok(reader.get("y")),
                move |value, _, _| {
                    sink.lock().unwrap().push(value.clone());
                    Ok(())
                },
            )
            .unwrap();

        obs.set("x", 7);
        let report = runtime.tick();
        assert_eq!(report.ran, 2);
        assert_eq!(runtime.pending(), 0);
        assert_eq!(*seen.lock().unwrap(), vec![Value::from(0), Value::from(7)]);
    }

    #[test]
    fn idle_prune_waits_for_a_teardown() {
        let runtime = Runtime::new();
        let obs = runtime.object();
        let trigger = DestroyTrigger::new();

        let source = obs.clone();
        runtime
            .create_observer(
                ObserverOptions::new().destroyed_with(trigger.child()),
                move || Ok(source.get("a")),
                |_, _, _| Ok(()),
            )
            .unwrap();
        let source = obs.clone();
        runtime
            .create_observer(ObserverOptions::new(), move || Ok(source.get("b")), |_, _, _| Ok(()))
            .unwrap();

        trigger.fire();
        obs.set("b", 1);
        assert_eq!(runtime.tick().pruned, 0);
        assert_eq!(runtime.observer_count(), 2);

        runtime.destroy_by_destroy_trigger(&trigger);
        obs.set("b", 2);
        assert_eq!(runtime.tick().pruned, 1);
        assert_eq!(runtime.observer_count(), 1);
    }

    #[test]
    fn run_budget_carries_over() {
        let runtime = Runtime::with_config(RuntimeConfig {
            max_runs_per_tick: 1,
            ..RuntimeConfig::default()
        });
        let obs = runtime.object();
        for _ in 0..2 {
            let source = obs.clone();
            runtime
                .create_observer(ObserverOptions::new(), move || Ok(source.get("x")), |_, _, _| Ok(()))
                .unwrap();
        }

        obs.set("x", 1);
        assert_eq!(runtime.tick().ran, 1);
        assert_eq!(runtime.pending(), 1);
        assert_eq!(runtime.tick().ran, 1);
        assert_eq!(runtime.pending(), 0);
    }

    #[test]
    fn panics_are_isolated() {
        let runtime = Runtime::new();
        let obs = runtime.object();

        let source = obs.clone();
        runtime
            .create_observer(
                ObserverOptions::new().label("explodes"),
                move || Ok(source.get("x")),
                |_, first, _| {
                    if !first {
                        panic!("boom");
                    }
                    Ok(())
                },
            )
            .unwrap();

        let survivor = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&survivor);
        let source = obs.clone();
        runtime
            .create_observer(
                ObserverOptions::new(),
                move || Ok(source.get("x")),
                move |_, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap();

        obs.set("x", 1);
        let report = runtime.tick();
        assert_eq!(report.ran, 2);
        assert_eq!(report.failed, 1);
        assert!(matches!(
            report.errors.as_slice(),
            [ReactiveError::ObserverPanicked { message, .. }] if message == "boom"
        ));
        assert_eq!(survivor.load(Ordering::SeqCst), 2);
    }
}
