// SPDX-License-Identifier: AGPL-3.0-or-later
// Sift - In-Memory Caching Query Engine
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Per-root shared state.
//!
//! One [`SharedState`] exists per root source and is shared (via `Arc`) by
//! the root query handle and every scope descended from it. It bundles the
//! replayable source handle, the materialized item list (first-seen order,
//! duplicates retained), the distinct-item set, the completion flag, and the
//! ordered pool of filter caches.
//!
//! All mutable fields sit behind a single mutex. Iterators take it exactly
//! twice: once to snapshot the driver choice and residual cache list, and
//! once to publish collectors on source exhaustion. Per-element work runs on
//! the snapshot.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cache::FilterCache;
use crate::error::Result;
use crate::predicate::Predicate;

/// Whether duplicate item references in the source collapse in query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DedupPolicy {
    /// Duplicates collapse to a single result (the default).
    #[default]
    Collapse,
    /// Duplicates are yielded with their source multiplicity.
    Retain,
}

impl DedupPolicy {
    pub fn collapses(self) -> bool {
        matches!(self, DedupPolicy::Collapse)
    }
}

/// Factory producing a fresh enumeration of the client's item sequence.
/// Sources must be deterministic: every replay yields the same items in the
/// same order.
pub type SourceFn<T> = Box<dyn Fn() -> Box<dyn Iterator<Item = T> + Send> + Send + Sync>;

/// Handle on the client-supplied item sequence.
pub enum Source<T> {
    /// Fully materialized at construction; nothing left to enumerate.
    Materialized,
    /// Lazy; each call replays the sequence from the start.
    Lazy(SourceFn<T>),
}

/// Mutable state of one root, guarded by the [`SharedState`] mutex.
pub struct StateInner<T> {
    /// Materialized sequence in first-seen order, duplicates retained.
    pub items: Vec<Arc<T>>,
    /// Distinct items; the hot-path membership set.
    pub dedup_items: HashSet<Arc<T>>,
    /// True once the source has been fully enumerated at least once.
    pub items_complete: bool,
    /// Filter cache pool in evaluation order. Caches are never removed,
    /// only disabled.
    pub caches: Vec<Arc<FilterCache<T>>>,
    /// Cleared by any filter-set mutation or completion event; the next
    /// iterator construction re-sorts the pool.
    pub caches_ordered: bool,
}

impl<T> StateInner<T> {
    /// Stable ascending sort by the selectivity key, so the most restrictive
    /// caches come first and registration order breaks ties. Idempotent.
    pub fn reorder_caches(&mut self) {
        if self.caches_ordered {
            return;
        }
        self.caches.sort_by_key(|cache| cache.selectivity_key());
        self.caches_ordered = true;
        trace!(
            order = ?self.caches.iter().map(|c| c.name()).collect::<Vec<_>>(),
            "cache pool reordered"
        );
    }

    pub fn cache_by_name(&self, name: &str) -> Option<&Arc<FilterCache<T>>> {
        self.caches.iter().find(|cache| cache.name() == name)
    }
}

/// Process-private bundle shared by all query handles rooted at one source.
pub struct SharedState<T> {
    source: Source<T>,
    dedup: DedupPolicy,
    state: Mutex<StateInner<T>>,
}

impl<T: Eq + Hash + Send + Sync + 'static> SharedState<T> {
    /// Root over an already-materialized collection. Complete from the
    /// start; the dedup set is built eagerly.
    pub fn from_items(items: impl IntoIterator<Item = T>, dedup: DedupPolicy) -> Self {
        let items: Vec<Arc<T>> = items.into_iter().map(Arc::new).collect();
        let dedup_items: HashSet<Arc<T>> = items.iter().cloned().collect();
        Self {
            source: Source::Materialized,
            dedup,
            state: Mutex::new(StateInner {
                items,
                dedup_items,
                items_complete: true,
                caches: Vec::new(),
                caches_ordered: true,
            }),
        }
    }

    /// Root over a lazy, replayable sequence. Stays incomplete until the
    /// first full pass publishes its collectors.
    pub fn from_source<F, I>(source: F, dedup: DedupPolicy) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let factory: SourceFn<T> =
            Box::new(move || Box::new(source().into_iter()) as Box<dyn Iterator<Item = T> + Send>);
        Self {
            source: Source::Lazy(factory),
            dedup,
            state: Mutex::new(StateInner {
                items: Vec::new(),
                dedup_items: HashSet::new(),
                items_complete: false,
                caches: Vec::new(),
                caches_ordered: true,
            }),
        }
    }

    /// Fresh enumeration of the lazy source. Materialized roots are complete
    /// from construction and never reach the source-driven path; they replay
    /// as empty here.
    pub fn replay(&self) -> Box<dyn Iterator<Item = T> + Send> {
        match &self.source {
            Source::Lazy(factory) => factory(),
            Source::Materialized => Box::new(std::iter::empty()),
        }
    }

    /// Install the collectors of a finished source pass. The first publisher
    /// wins; later completers carry replay-equal data and become no-ops. The
    /// distinct count is pushed into every pooled cache, which recomputes
    /// its miss budget and may retire itself.
    pub fn publish(&self, items: Vec<Arc<T>>, dedup_items: HashSet<Arc<T>>) {
        let mut state = self.state.lock();
        if state.items_complete {
            return;
        }
        let distinct = dedup_items.len();
        let total = items.len();
        state.items = items;
        state.dedup_items = dedup_items;
        state.items_complete = true;
        for cache in &state.caches {
            cache.set_expected_item_count(distinct);
        }
        state.caches_ordered = false;
        debug!(total, distinct, "source enumeration complete");
    }

    /// Run the first full source pass if it has not happened yet.
    pub fn ensure_complete(&self) {
        if !self.is_complete() {
            self.enumerate_source(|_| {});
        }
    }

    /// Single source pass feeding `visit` every drawn item (duplicates
    /// included), then publishing the collectors. Lets aggregates fuse with
    /// the first-time enumeration instead of paying two passes.
    pub fn enumerate_source(&self, mut visit: impl FnMut(&Arc<T>)) {
        let mut items = Vec::new();
        let mut dedup_items = HashSet::new();
        for raw in self.replay() {
            let item = Arc::new(raw);
            visit(&item);
            dedup_items.insert(item.clone());
            items.push(item);
        }
        self.publish(items, dedup_items);
    }

    /// Find the pooled cache for `name`, or register a fresh one. Reuse
    /// keeps a still-populated cache warm across scope lifetimes.
    pub fn register_filter(
        &self,
        name: &str,
        predicate: Predicate<T>,
        utilization_threshold: f64,
    ) -> Result<Arc<FilterCache<T>>> {
        let mut state = self.state.lock();
        if let Some(existing) = state.cache_by_name(name) {
            let cache = existing.clone();
            state.caches_ordered = false;
            return Ok(cache);
        }
        let expected = state.items_complete.then(|| state.dedup_items.len());
        let cache = Arc::new(FilterCache::new(
            name,
            predicate,
            expected,
            utilization_threshold,
        )?);
        debug!(name, ?expected, "registered filter cache");
        state.caches.push(cache.clone());
        state.caches_ordered = false;
        Ok(cache)
    }

    pub fn contains(&self, item: &T) -> bool {
        self.state.lock().dedup_items.contains(item)
    }

    /// Distinct items copied out for lock-free folding.
    pub fn distinct_snapshot(&self) -> Vec<Arc<T>> {
        self.state.lock().dedup_items.iter().cloned().collect()
    }

    pub fn distinct_len(&self) -> usize {
        self.state.lock().dedup_items.len()
    }

    pub fn total_len(&self) -> usize {
        self.state.lock().items.len()
    }
}

impl<T> SharedState<T> {
    pub fn dedup_policy(&self) -> DedupPolicy {
        self.dedup
    }

    pub fn lock(&self) -> MutexGuard<'_, StateInner<T>> {
        self.state.lock()
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().items_complete
    }

    /// Force a pool re-sort before the next iteration.
    pub fn mark_unordered(&self) {
        self.state.lock().caches_ordered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy_state(values: Vec<u32>, dedup: DedupPolicy) -> SharedState<u32> {
        SharedState::from_source(move || values.clone(), dedup)
    }

    #[test]
    fn materialized_root_is_complete_from_construction() {
        let state = SharedState::from_items([1u32, 2, 2, 3], DedupPolicy::Collapse);
        assert!(state.is_complete());
        assert_eq!(state.total_len(), 4);
        assert_eq!(state.distinct_len(), 3);
        assert!(state.contains(&2));
        assert!(!state.contains(&9));
    }

    #[test]
    fn lazy_root_completes_on_first_pass() {
        let state = lazy_state(vec![5, 6, 6], DedupPolicy::Collapse);
        assert!(!state.is_complete());

        state.ensure_complete();
        assert!(state.is_complete());
        assert_eq!(state.total_len(), 3);
        assert_eq!(state.distinct_len(), 2);
    }

    #[test]
    fn enumerate_source_visits_every_occurrence() {
        let state = lazy_state(vec![1, 1, 2], DedupPolicy::Collapse);
        let mut seen = Vec::new();
        state.enumerate_source(|item| seen.push(**item));
        assert_eq!(seen, vec![1, 1, 2]);
    }

    #[test]
    fn first_publisher_wins() {
        let state = lazy_state(vec![1, 2, 3], DedupPolicy::Collapse);
        state.ensure_complete();
        assert_eq!(state.total_len(), 3);

        // A straggling pass publishing after completion changes nothing.
        state.publish(Vec::new(), HashSet::new());
        assert_eq!(state.total_len(), 3);
        assert!(state.is_complete());
    }

    #[test]
    fn publish_pushes_expected_count_into_every_cache() {
        let state = lazy_state(vec![1, 2, 2, 3], DedupPolicy::Collapse);
        let cache = state
            .register_filter("odd", Arc::new(|n: &u32| n % 2 == 1), 1.0)
            .unwrap();
        assert_eq!(cache.expected_item_count(), None);

        state.ensure_complete();
        assert_eq!(cache.expected_item_count(), Some(3));
    }

    #[test]
    fn register_filter_reuses_pool_entry_by_name() {
        let state = lazy_state(vec![1, 2], DedupPolicy::Collapse);
        let first = state
            .register_filter("odd", Arc::new(|n: &u32| n % 2 == 1), 0.5)
            .unwrap();
        first.record_hit(Arc::new(1));

        let second = state
            .register_filter("odd", Arc::new(|_: &u32| false), 0.5)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.num_hits(), 1);
        assert_eq!(state.lock().caches.len(), 1);
    }

    #[test]
    fn registration_after_completion_knows_the_expected_count() {
        let state = SharedState::from_items([1u32, 2, 3], DedupPolicy::Collapse);
        let cache = state
            .register_filter("odd", Arc::new(|n: &u32| n % 2 == 1), 0.5)
            .unwrap();
        assert_eq!(cache.expected_item_count(), Some(3));
    }

    #[test]
    fn reorder_is_stable_and_ascending_by_selectivity() {
        // Incomplete root: expected counts are unknown, counters still move.
        let state = lazy_state(vec![1, 2, 3], DedupPolicy::Collapse);
        let loose = state
            .register_filter("loose", Arc::new(|_: &u32| true), 0.5)
            .unwrap();
        let tight = state
            .register_filter("tight", Arc::new(|_: &u32| false), 0.5)
            .unwrap();
        let fresh = state
            .register_filter("fresh", Arc::new(|_: &u32| true), 0.5)
            .unwrap();

        // loose: many hits, no misses -> key 9. tight: key 0. fresh: key 0.
        for _ in 0..9 {
            loose.record_hit_cached();
        }
        for _ in 0..4 {
            tight.record_miss();
        }
        let _ = fresh;

        let mut state_guard = state.lock();
        state_guard.reorder_caches();
        let order: Vec<&str> = state_guard.caches.iter().map(|c| c.name()).collect();
        // tight and fresh tie on key 0 and keep registration order.
        assert_eq!(order, vec!["tight", "fresh", "loose"]);
    }
}
