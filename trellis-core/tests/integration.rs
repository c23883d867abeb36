//! Integration Tests for the Reactive Core
//!
//! These tests drive observables, observers, the scheduler and both
//! reconcilers together through the in-memory output medium.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use trellis_core::reactive::{
    Key, MemberKey, ObserverOptions, ObserverStatus, Runtime, ScopeStatus, Value,
};
use trellis_core::render::{
    Conditional, CorrelationId, Evaluator, Frames, KeyedList, KeyedListOptions, MemoryMedium,
    MemoryTemplate, NodeId, PathEvaluator, RenderCx,
};
use trellis_core::{EvalError, ReactiveError, StructuralError};

fn path(expr: &str) -> impl FnMut(&Frames) -> Result<Value, EvalError> + Send + 'static {
    let expr = expr.to_string();
    move |frames: &Frames| PathEvaluator.evaluate(&expr, frames)
}

/// An `<li>` whose text is bound to `expr`.
fn text_item(expr: &'static str) -> MemoryTemplate {
    Arc::new(move |medium: &MemoryMedium, cx: &RenderCx| {
        let li = medium.element("li");
        medium.bind_text(cx, &Arc::new(PathEvaluator), expr.to_string(), li)?;
        Ok(medium.fragment(vec![li]))
    })
}

struct Fixture {
    runtime: Runtime,
    state: Value,
    medium: MemoryMedium,
    list: NodeId,
    cx: RenderCx,
}

impl Fixture {
    fn new(state: serde_json::Value) -> Self {
        let runtime = Runtime::new();
        let state = runtime.wrap_json(state);
        let medium = MemoryMedium::new();
        let list = medium.element("ul");
        medium.append_child(medium.root(), list);
        let cx = RenderCx::new(&runtime, state.clone());
        Self {
            runtime,
            state,
            medium,
            list,
            cx,
        }
    }

    fn root(&self) -> &trellis_core::Observable {
        self.state.as_observable().unwrap()
    }

    fn items(&self) -> trellis_core::Observable {
        self.root().get_untracked("items").as_observable().unwrap().clone()
    }

    fn mount_list(&self, template: MemoryTemplate, options: KeyedListOptions) -> trellis_core::Result<KeyedList<MemoryMedium>> {
        let anchor = self.medium.anchor(self.list, "items");
        KeyedList::mount(
            &self.cx,
            Arc::new(self.medium.clone()),
            anchor,
            template,
            path("items"),
            options,
        )
    }

    fn html(&self) -> String {
        self.medium.render(self.list)
    }
}

fn by_value() -> KeyedListOptions {
    KeyedListOptions::new().id_by(|value, _| value.clone())
}

fn by_id_member() -> KeyedListOptions {
    KeyedListOptions::new().id_by(|value, _| {
        value
            .as_observable()
            .map(|item| item.get_untracked("id"))
            .unwrap_or_default()
    })
}

// ---------------------------------------------------------------------------
// Tracking and scheduling
// ---------------------------------------------------------------------------

/// Repeated reads of one member inside a run register a single edge.
#[test]
fn repeated_reads_register_one_edge() {
    let runtime = Runtime::new();
    let state = runtime.object();
    state.set("a", 1);

    let source = state.clone();
    let id = runtime
        .create_observer(
            ObserverOptions::new(),
            move || {
                for _ in 0..5 {
                    source.get("a");
                }
                Ok(source.get("a"))
            },
            |_, _, _| Ok(()),
        )
        .unwrap();

    assert_eq!(runtime.dependency_count(id), 1);
    assert_eq!(
        runtime.subscriber_count(state.id(), &MemberKey::Member(Key::from("a"))),
        1
    );
}

/// Dependencies only reflect the latest run.
#[test]
fn dependencies_are_recomputed_per_run() {
    let runtime = Runtime::new();
    let state = runtime.wrap_json(json!({"a": 1, "b": 1, "use_b": true}));
    let state = state.as_observable().unwrap().clone();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let source = state.clone();
    let id = runtime
        .create_observer(
            ObserverOptions::new(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let a = source.get("a").as_f64().unwrap_or_default();
                if source.get("use_b").is_truthy() {
                    let b = source.get("b").as_f64().unwrap_or_default();
                    return Ok(Value::from(a + b));
                }
                Ok(Value::from(a))
            },
            |_, _, _| Ok(()),
        )
        .unwrap();
    assert_eq!(runtime.dependency_count(id), 3);

    state.set("use_b", false);
    runtime.tick();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(runtime.dependency_count(id), 2);

    state.set("b", 2);
    assert_eq!(runtime.pending(), 0);
    runtime.tick();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// `{count: 0}` observed as `count * 2`: writes apply on the next tick and a
/// same-value write is ignored.
#[test]
fn doubled_count_scenario() {
    let runtime = Runtime::new();
    let state = runtime.object();
    state.set("count", 0);

    let applied = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&applied);
    let source = state.clone();
    runtime
        .create_observer(
            ObserverOptions::new().label("count * 2"),
            move || Ok(Value::from(source.get("count").as_f64().unwrap_or_default() * 2.0)),
            move |value, _, _| {
                sink.lock().unwrap().push(value.as_f64().unwrap());
                Ok(())
            },
        )
        .unwrap();
    assert_eq!(*applied.lock().unwrap(), vec![0.0]);

    state.set("count", 5);
    runtime.tick();
    assert_eq!(*applied.lock().unwrap(), vec![0.0, 10.0]);

    state.set("count", 5);
    assert_eq!(runtime.pending(), 0);
    runtime.tick();
    assert_eq!(*applied.lock().unwrap(), vec![0.0, 10.0]);
}

/// Several writes before a tick queue the observer once.
#[test]
fn writes_coalesce_until_the_next_tick() {
    let runtime = Runtime::new();
    let state = runtime.object();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let source = state.clone();
    runtime
        .create_observer(
            ObserverOptions::new(),
            move || Ok(Value::from(source.get("x").display() + &source.get("y").display())),
            move |value, _, _| {
                sink.lock().unwrap().push(value.display());
                Ok(())
            },
        )
        .unwrap();

    state.set("x", "a");
    state.set("y", "b");
    state.set("x", "c");
    assert_eq!(runtime.pending(), 1);

    let report = runtime.tick();
    assert_eq!(report.ran, 1);
    assert_eq!(*seen.lock().unwrap(), vec!["".to_string(), "cb".to_string()]);
}

/// Destroying an owning scope turns an already queued run into a no-op.
#[test]
fn destroyed_scope_suppresses_queued_runs() {
    let fx = Fixture::new(json!({"count": 1}));
    let parent = fx.runtime.create_scope(None).unwrap();
    let child = fx.runtime.create_scope(Some(parent)).unwrap();
    let cx = fx.cx.clone().owned_by(child);

    let applied = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&applied);
    let id = cx
        .bind(&Arc::new(PathEvaluator), "count".to_string(), move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    fx.root().set("count", 2);
    assert_eq!(fx.runtime.pending(), 1);

    fx.runtime.destroy_scope(parent).unwrap();
    assert_eq!(fx.runtime.scope_status(child), Some(ScopeStatus::Destroyed));
    assert!(!fx.runtime.is_observer_active(id));

    let report = fx.runtime.tick();
    assert_eq!(report.ran, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert_eq!(fx.runtime.observer_status(id), Some(ObserverStatus::Active));

    fx.runtime.prune();
    assert_eq!(fx.runtime.observer_status(id), None);
}

/// Writes missed while a scope is paused are applied when it resumes.
#[test]
fn resumed_scope_catches_up() {
    let fx = Fixture::new(json!({"count": 1}));
    let scope = fx.runtime.create_scope(None).unwrap();
    let cx = fx.cx.clone().owned_by(scope);

    let latest = Arc::new(Mutex::new(Value::Null));
    let sink = Arc::clone(&latest);
    let id = cx
        .bind(&Arc::new(PathEvaluator), "count".to_string(), move |value, _, _| {
            *sink.lock().unwrap() = value.clone();
            Ok(())
        })
        .unwrap();

    fx.runtime.pause_scope(scope).unwrap();
    assert_eq!(fx.runtime.observer_status(id), Some(ObserverStatus::Paused));
    fx.root().set("count", 3);
    fx.runtime.tick();
    assert_eq!(*latest.lock().unwrap(), Value::from(1));

    fx.runtime.resume_scope(scope).unwrap();
    fx.runtime.tick();
    assert_eq!(*latest.lock().unwrap(), Value::from(3));
}

/// A failing expression keeps its previous output and recovers later;
/// other observers are unaffected.
#[test]
fn evaluation_errors_are_isolated() {
    let fx = Fixture::new(json!({"user": {"name": "ada"}, "title": "hello"}));
    let eval = Arc::new(PathEvaluator);
    let name = fx.medium.bind_text(&fx.cx, &eval, "user.name".to_string(), fx.list).unwrap();
    fx.medium.bind_text(&fx.cx, &eval, "title".to_string(), fx.list).unwrap();
    assert_eq!(fx.html(), "<ul>adahello</ul>");

    fx.root().set_json("user", json!(null));
    fx.root().set("title", "bye");
    let report = fx.runtime.tick();
    assert_eq!(report.failed, 1);
    assert!(report.errors.is_empty());
    assert_eq!(fx.html(), "<ul>adabye</ul>");
    assert_eq!(fx.runtime.observer_status(name), Some(ObserverStatus::Active));

    fx.root().set_json("user", json!({"name": "bob"}));
    fx.runtime.tick();
    assert_eq!(fx.html(), "<ul>bobbye</ul>");
}

/// A failing apply callback is reported without stopping the tick.
#[test]
fn apply_errors_are_reported() {
    let runtime = Runtime::new();
    let state = runtime.object();

    let source = state.clone();
    runtime
        .create_observer(
            ObserverOptions::new(),
            move || Ok(source.get("x")),
            |_, first, _| {
                if first {
                    Ok(())
                } else {
                    Err(StructuralError::UnknownContent.into())
                }
            },
        )
        .unwrap();

    state.set("x", 1);
    let report = runtime.tick();
    assert_eq!(report.failed, 1);
    assert!(matches!(
        report.errors.as_slice(),
        [ReactiveError::Structural(StructuralError::UnknownContent)]
    ));
}

// ---------------------------------------------------------------------------
// Conditional reconciler
// ---------------------------------------------------------------------------

/// Toggling a guard back and forth between ticks does no structural work.
#[test]
fn conditional_toggle_without_churn() {
    let fx = Fixture::new(json!({"show": true, "label": "hi"}));
    let anchor = fx.medium.anchor(fx.list, "if");
    let cond = Conditional::mount(
        &fx.cx,
        Arc::new(fx.medium.clone()),
        anchor,
        text_item("label"),
        path("show"),
    )
    .unwrap();
    assert!(cond.is_present());
    assert_eq!(fx.html(), "<ul><!--if--><li>hi</li></ul>");
    let first = cond.content().unwrap();
    let stats = fx.medium.stats();

    fx.root().set("show", false);
    fx.root().set("show", true);
    fx.runtime.flush(4);
    assert_eq!(fx.medium.stats(), stats);
    assert_eq!(cond.content(), Some(first.clone()));

    fx.root().set("show", false);
    fx.runtime.flush(4);
    assert!(!cond.is_present());
    assert_eq!(fx.html(), "<ul><!--if--></ul>");

    fx.root().set("show", 1);
    fx.runtime.flush(4);
    assert_eq!(fx.html(), "<ul><!--if--><li>hi</li></ul>");
    assert_ne!(cond.content(), Some(first));
    assert_eq!(fx.medium.stats().synthesized, 2);
}

/// Removing conditional content tears down the bindings inside it.
#[test]
fn conditional_content_bindings_are_torn_down() {
    let fx = Fixture::new(json!({"show": true, "label": "hi"}));
    let anchor = fx.medium.anchor(fx.list, "if");
    let cond = Conditional::mount(
        &fx.cx,
        Arc::new(fx.medium.clone()),
        anchor,
        text_item("label"),
        path("show"),
    )
    .unwrap();
    assert_eq!(fx.runtime.observer_count(), 2);

    fx.root().set("show", false);
    fx.runtime.flush(4);
    assert_eq!(fx.runtime.observer_count(), 1);

    fx.root().set("label", "changed");
    assert_eq!(fx.runtime.pending(), 0);

    cond.unmount().unwrap();
    assert_eq!(fx.runtime.observer_count(), 0);
}

// ---------------------------------------------------------------------------
// Keyed-list reconciler
// ---------------------------------------------------------------------------

/// `[1,2,3]` reordered to `[3,1,2]` moves content without rebuilding it.
#[test]
fn keyed_list_reorder_moves_content() {
    let fx = Fixture::new(json!({"items": [1, 2, 3]}));
    let list = fx.mount_list(text_item("value"), by_value()).unwrap();
    assert_eq!(fx.html(), "<ul><!--items--><li>1</li><li>2</li><li>3</li></ul>");
    let before = list.contents();

    fx.items().replace_all([3, 1, 2].map(Value::from));
    fx.runtime.flush(8);

    assert_eq!(fx.html(), "<ul><!--items--><li>3</li><li>1</li><li>2</li></ul>");
    let after = list.contents();
    assert_eq!(after, vec![before[2].clone(), before[0].clone(), before[1].clone()]);

    let stats = list.stats();
    assert_eq!(stats.synthesized, 3);
    assert_eq!(stats.destroyed, 0);
    assert!(stats.moved >= 1);
}

/// `[A,B] -> [A,C]` destroys B, keeps A and synthesizes C.
#[test]
fn keyed_list_replaces_changed_identity() {
    let fx = Fixture::new(json!({"items": ["A", "B"]}));
    let list = fx.mount_list(text_item("value"), by_value()).unwrap();
    let a = list.content_for(&CorrelationId::Str("A".into())).unwrap();

    fx.items().set(1usize, "C");
    fx.runtime.flush(8);

    assert_eq!(fx.html(), "<ul><!--items--><li>A</li><li>C</li></ul>");
    assert_eq!(list.content_for(&CorrelationId::Str("A".into())), Some(a));
    assert!(list.content_for(&CorrelationId::Str("B".into())).is_none());

    let stats = list.stats();
    assert_eq!(stats.synthesized, 3);
    assert_eq!(stats.destroyed, 1);
}

/// Items correlated by `v.id`. Mutating a member of an item reaches its
/// bindings directly and leaves the item scope alone; replacing the item with
/// a same-id value is one in-place scope update; removing an item destroys
/// exactly that item.
#[test]
fn keyed_list_id_function_scenario() {
    let fx = Fixture::new(json!({"items": [{"id": 1, "v": "a"}, {"id": 2, "v": "b"}]}));
    let list = fx
        .mount_list(text_item("item.v"), by_id_member().names("item", "key", "index"))
        .unwrap();
    assert_eq!(fx.html(), "<ul><!--items--><li>a</li><li>b</li></ul>");
    assert_eq!(list.stats().synthesized, 2);

    let first = fx.items().get_untracked(0usize);
    first.as_observable().unwrap().set("v", "z");
    fx.runtime.flush(8);
    assert_eq!(fx.html(), "<ul><!--items--><li>z</li><li>b</li></ul>");
    let stats = list.stats();
    assert_eq!(stats.synthesized, 2);
    assert_eq!(stats.scope_updates, 0);

    fx.items().set_json(0usize, json!({"id": 1, "v": "y"}));
    fx.runtime.flush(8);
    assert_eq!(fx.html(), "<ul><!--items--><li>y</li><li>b</li></ul>");
    let stats = list.stats();
    assert_eq!(stats.synthesized, 2);
    assert_eq!(stats.scope_updates, 1);

    fx.items().remove(1);
    fx.runtime.flush(8);
    assert_eq!(fx.html(), "<ul><!--items--><li>y</li></ul>");
    let stats = list.stats();
    assert_eq!(stats.synthesized, 2);
    assert_eq!(stats.destroyed, 1);
    assert_eq!(list.len(), 1);
}

/// Appending and inserting synthesize only the new items.
#[test]
fn keyed_list_grows_in_place() {
    let fx = Fixture::new(json!({"items": ["b"]}));
    let list = fx.mount_list(text_item("value"), by_value()).unwrap();

    fx.items().push("c");
    fx.items().insert(0, "a");
    fx.runtime.flush(8);

    assert_eq!(fx.html(), "<ul><!--items--><li>a</li><li>b</li><li>c</li></ul>");
    assert_eq!(list.stats().synthesized, 3);
    assert_eq!(list.stats().destroyed, 0);
}

/// Replacing the source collection rebuilds watchers but keeps content
/// matched by id.
#[test]
fn keyed_list_source_swap_keeps_matching_content() {
    let fx = Fixture::new(json!({"items": [{"id": 1}, {"id": 2}]}));
    let list = fx.mount_list(text_item("value.id"), by_id_member()).unwrap();
    let before = list.contents();

    fx.root().set_json("items", json!([{"id": 2}, {"id": 1}, {"id": 3}]));
    fx.runtime.flush(8);

    assert_eq!(fx.html(), "<ul><!--items--><li>2</li><li>1</li><li>3</li></ul>");
    let after = list.contents();
    assert_eq!(after[0], before[1]);
    assert_eq!(after[1], before[0]);
    assert_eq!(list.stats().synthesized, 3);

    fx.items().set_json(2usize, json!({"id": 4}));
    fx.runtime.flush(8);
    assert_eq!(fx.html(), "<ul><!--items--><li>2</li><li>1</li><li>4</li></ul>");
}

/// Map sources iterate in insertion order and expose keys to the template.
#[test]
fn keyed_list_over_a_map() {
    let fx = Fixture::new(json!({"items": {"x": 1, "y": 2}}));
    let list = fx.mount_list(text_item("key"), KeyedListOptions::new()).unwrap();
    assert_eq!(fx.html(), "<ul><!--items--><li>x</li><li>y</li></ul>");

    fx.items().delete("x");
    fx.items().set("z", 3);
    fx.runtime.flush(8);
    assert_eq!(fx.html(), "<ul><!--items--><li>y</li><li>z</li></ul>");
    assert_eq!(list.stats().destroyed, 1);
}

/// Removing items tears down nested conditionals and their bindings.
#[test]
fn keyed_list_items_own_nested_content() {
    let fx = Fixture::new(json!({"items": [{"done": true, "label": "x"}]}));
    let medium = fx.medium.clone();
    let template: MemoryTemplate = Arc::new(move |m: &MemoryMedium, cx: &RenderCx| {
        let li = m.element("li");
        let anchor = m.anchor(li, "done");
        Conditional::mount(
            cx,
            Arc::new(medium.clone()),
            anchor,
            text_item("value.label"),
            path("value.done"),
        )?;
        Ok(m.fragment(vec![li]))
    });
    let list = fx.mount_list(template, KeyedListOptions::new()).unwrap();
    assert_eq!(fx.html(), "<ul><!--items--><li><!--done--><li>x</li></li></ul>");
    assert_eq!(fx.runtime.observer_count(), 4);

    fx.items().pop();
    fx.runtime.flush(8);
    assert!(list.is_empty());
    assert_eq!(fx.html(), "<ul><!--items--></ul>");
    assert_eq!(fx.runtime.observer_count(), 1);
}

/// Duplicate correlation ids and non-collection sources are contract errors.
#[test]
fn keyed_list_contract_errors() {
    let fx = Fixture::new(json!({"items": [1, 1]}));
    let err = fx.mount_list(text_item("value"), by_value()).err().unwrap();
    assert!(matches!(
        err,
        ReactiveError::Structural(StructuralError::DuplicateCorrelationId(_))
    ));

    let fx = Fixture::new(json!({"items": "nope"}));
    let err = fx.mount_list(text_item("value"), KeyedListOptions::new()).err().unwrap();
    assert!(matches!(
        err,
        ReactiveError::Structural(StructuralError::NotACollection(_))
    ));

    let fx = Fixture::new(json!({"items": null}));
    let list = fx.mount_list(text_item("value"), KeyedListOptions::new()).unwrap();
    assert!(list.is_empty());
    fx.root().set_json("items", json!(["late"]));
    fx.runtime.flush(8);
    assert_eq!(fx.html(), "<ul><!--items--><li>late</li></ul>");
}

/// Unmounting removes every item and observer.
#[test]
fn keyed_list_unmount() {
    let fx = Fixture::new(json!({"items": ["a", "b"]}));
    let list = fx.mount_list(text_item("value"), KeyedListOptions::new()).unwrap();
    assert_eq!(fx.runtime.observer_count(), 5);

    list.unmount().unwrap();
    fx.runtime.prune();
    assert_eq!(fx.html(), "<ul><!--items--></ul>");
    assert_eq!(fx.runtime.observer_count(), 0);

    fx.items().push("c");
    assert_eq!(fx.runtime.pending(), 0);
}

/// `reset` drops every observer while observables stay usable.
#[test]
fn reset_clears_the_runtime() {
    let fx = Fixture::new(json!({"items": ["a"]}));
    let _list = fx.mount_list(text_item("value"), KeyedListOptions::new()).unwrap();
    assert!(fx.runtime.observer_count() > 0);

    fx.runtime.reset();
    assert_eq!(fx.runtime.observer_count(), 0);

    fx.items().push("b");
    assert_eq!(fx.runtime.pending(), 0);
    assert_eq!(fx.items().to_json(), json!(["a", "b"]));
}
