//! Dependency Registry
//!
//! Maps `observable -> member -> observers`. Edges are added by tracked reads
//! and removed whenever an observer reruns or is destroyed, so the registry
//! only ever reflects each observer's latest run.
//!
//! Subscriber sets are ordered by [`ObserverId`], which is creation order.
//! Notification walks them in that order.

use std::collections::{BTreeSet, HashMap};

use crate::reactive::value::WeakObservable;
use crate::reactive::{MemberKey, ObservableId, ObserverId};

/// One dependency: a member of an observable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub observable: ObservableId,
    pub member: MemberKey,
}

impl Edge {
    pub fn new(observable: ObservableId, member: MemberKey) -> Self {
        Self { observable, member }
    }
}

/// Subscriptions for one observable.
struct DependencyRecord {
    target: WeakObservable,
    members: HashMap<MemberKey, BTreeSet<ObserverId>>,
}

#[derive(Default)]
pub(crate) struct Registry {
    records: HashMap<ObservableId, DependencyRecord>,
}

impl Registry {
    /// Add `observer` to the bucket for `edge`. Returns false if it was
    /// already subscribed.
    pub(crate) fn subscribe(&mut self, edge: &Edge, target: WeakObservable, observer: ObserverId) -> bool {
        self.records
            .entry(edge.observable)
            .or_insert_with(|| DependencyRecord {
                target,
                members: HashMap::new(),
            })
            .members
            .entry(edge.member.clone())
            .or_default()
            .insert(observer)
    }

    /// Remove one subscription, dropping empty buckets and records.
    pub(crate) fn unsubscribe(&mut self, edge: &Edge, observer: ObserverId) {
        let Some(record) = self.records.get_mut(&edge.observable) else {
            return;
        };
        if let Some(bucket) = record.members.get_mut(&edge.member) {
            bucket.remove(&observer);
            if bucket.is_empty() {
                record.members.remove(&edge.member);
            }
        }
        if record.members.is_empty() {
            self.records.remove(&edge.observable);
        }
    }

    /// Subscribers of `member`, plus the subscribers of the observable's
    /// shape when `shape_changed`. Ascending creation order, no duplicates.
    pub(crate) fn subscribers(
        &self,
        observable: ObservableId,
        member: &MemberKey,
        shape_changed: bool,
    ) -> BTreeSet<ObserverId> {
        let Some(record) = self.records.get(&observable) else {
            return BTreeSet::new();
        };
        let mut out = record.members.get(member).cloned().unwrap_or_default();
        if shape_changed && *member != MemberKey::Default {
            if let Some(shape) = record.members.get(&MemberKey::Default) {
                out.extend(shape.iter().copied());
            }
        }
        out
    }

    /// Drop records whose observable is gone and subscriptions held by
    /// observers `is_dead` reports. Returns how many records were dropped.
    pub(crate) fn prune(&mut self, is_dead: impl Fn(ObserverId) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            if !record.target.is_alive() {
                return false;
            }
            record.members.retain(|_, bucket| {
                bucket.retain(|id| !is_dead(*id));
                !bucket.is_empty()
            });
            !record.members.is_empty()
        });
        before - self.records.len()
    }

    pub(crate) fn subscriber_count(&self, observable: ObservableId, member: &MemberKey) -> usize {
        self.records
            .get(&observable)
            .and_then(|record| record.members.get(member))
            .map_or(0, BTreeSet::len)
    }

    pub(crate) fn record_count(&self) -> usize {
        self.records.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;

    #[test]
    fn subscribe_is_idempotent() {
        let runtime = Runtime::new();
        let obs = runtime.object();
        let edge = Edge::new(obs.id(), MemberKey::Member("a".into()));
        let observer = ObserverId::next();

        let mut registry = Registry::default();
        assert!(registry.subscribe(&edge, obs.downgrade(), observer));
        assert!(!registry.subscribe(&edge, obs.downgrade(), observer));
        assert_eq!(registry.subscriber_count(obs.id(), &edge.member), 1);
    }

    #[test]
    fn unsubscribe_drops_empty_records() {
        let runtime = Runtime::new();
        let obs = runtime.object();
        let edge = Edge::new(obs.id(), MemberKey::Length);
        let observer = ObserverId::next();

        let mut registry = Registry::default();
        registry.subscribe(&edge, obs.downgrade(), observer);
        registry.unsubscribe(&edge, observer);
        assert_eq!(registry.record_count(), 0);
    }

    #[test]
    fn shape_changes_reach_shape_subscribers_in_order() {
        let runtime = Runtime::new();
        let obs = runtime.object();
        let first = ObserverId::next();
        let second = ObserverId::next();
        let third = ObserverId::next();

        let mut registry = Registry::default();
        let member = MemberKey::Member("x".into());
        registry.subscribe(&Edge::new(obs.id(), MemberKey::Default), obs.downgrade(), third);
        registry.subscribe(&Edge::new(obs.id(), member.clone()), obs.downgrade(), second);
        registry.subscribe(&Edge::new(obs.id(), MemberKey::Default), obs.downgrade(), first);

        let value_only: Vec<_> = registry.subscribers(obs.id(), &member, false).into_iter().collect();
        assert_eq!(value_only, vec![second]);

        let with_shape: Vec<_> = registry.subscribers(obs.id(), &member, true).into_iter().collect();
        assert_eq!(with_shape, vec![first, second, third]);
    }

    #[test]
    fn prune_drops_dead_targets_and_observers() {
        let runtime = Runtime::new();
        let kept = runtime.object();
        let dropped = runtime.object();
        let live = ObserverId::next();
        let dead = ObserverId::next();

        let mut registry = Registry::default();
        registry.subscribe(&Edge::new(kept.id(), MemberKey::Default), kept.downgrade(), live);
        registry.subscribe(&Edge::new(kept.id(), MemberKey::Length), kept.downgrade(), dead);
        registry.subscribe(&Edge::new(dropped.id(), MemberKey::Default), dropped.downgrade(), live);
        drop(dropped);

        assert_eq!(registry.prune(|id| id == dead), 1);
        assert_eq!(registry.record_count(), 1);
        assert_eq!(registry.subscriber_count(kept.id(), &MemberKey::Length), 0);
        assert_eq!(registry.subscriber_count(kept.id(), &MemberKey::Default), 1);
    }
}
