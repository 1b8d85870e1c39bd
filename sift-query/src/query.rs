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

//! Query handles and scoped queries.
//!
//! A [`Query`] is a view over one shared root: it owns the filter map of its
//! scope and shares the source, the materialized collections, and the cache
//! pool with every other scope of the same root. `start_scoped_query` forks
//! the filter map into a child handle; filters the child adds exist only in
//! its own map, while the caches backing them live in the shared pool and
//! survive the scope. On disposal a scope asks each cache it introduced to
//! retire, which the cache honors only when its hit rate turned out to be
//! below its utilization threshold — a well-utilized cache stays warm for
//! the next scope that registers the same filter name.
//!
//! Domain wrappers are expected to hold a `Query` and delegate (composition,
//! not inheritance), exposing their own chainable filter methods and
//! forwarding disposal.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use sift_core::cache::{CacheStats, DEFAULT_UTILIZATION_THRESHOLD, validate_utilization_threshold};
use sift_core::error::Result;
use sift_core::predicate::{Predicate, validate_filter_name};
use sift_core::shared::{DedupPolicy, SharedState};

use crate::iter::FilteredIter;

/// Per-root construction options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Whether duplicate item references collapse in query results.
    pub dedup: DedupPolicy,
    /// Default miss budget for newly registered caches, as a fraction of
    /// the distinct item count. A cache over budget gives up memoization
    /// when asked to retire.
    pub utilization_threshold: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            dedup: DedupPolicy::Collapse,
            utilization_threshold: DEFAULT_UTILIZATION_THRESHOLD,
        }
    }
}

/// A query scope over one shared root.
///
/// Mutating operations return the handle for fluent chaining:
///
/// ```ignore
/// let mut people = Query::from_items(people);
/// people
///     .add_filter("active", |p: &Person| p.active)?
///     .add_filter("adult", |p: &Person| p.age >= 18)?;
/// for person in people.iter() { /* ... */ }
/// ```
pub struct Query<T> {
    shared: Arc<SharedState<T>>,
    /// Filters active in this scope. Owned by the handle; the shared mutex
    /// only guards the pool behind them.
    filters: HashMap<String, Predicate<T>>,
    /// Names that already existed when this scope was forked; everything
    /// else was introduced here and is offered for retirement on disposal.
    pre_existing: HashSet<String>,
    default_threshold: f64,
    /// First-use memo; deliberately never invalidated by filter mutation.
    filtered_count: Option<usize>,
    disposed: bool,
}

impl<T: Eq + Hash + Send + Sync + 'static> Query<T> {
    /// Root over an already-materialized collection, default configuration.
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        Self::root(
            SharedState::from_items(items, DedupPolicy::default()),
            DEFAULT_UTILIZATION_THRESHOLD,
        )
    }

    /// Root over an already-materialized collection.
    pub fn from_items_with(
        items: impl IntoIterator<Item = T>,
        config: QueryConfig,
    ) -> Result<Self> {
        validate_utilization_threshold(config.utilization_threshold)?;
        Ok(Self::root(
            SharedState::from_items(items, config.dedup),
            config.utilization_threshold,
        ))
    }

    /// Root over a lazy sequence, default configuration. The factory must
    /// replay the same items in the same order on every call.
    pub fn from_source<F, I>(source: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::root(
            SharedState::from_source(source, DedupPolicy::default()),
            DEFAULT_UTILIZATION_THRESHOLD,
        )
    }

    /// Root over a lazy sequence.
    pub fn from_source_with<F, I>(source: F, config: QueryConfig) -> Result<Self>
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        validate_utilization_threshold(config.utilization_threshold)?;
        Ok(Self::root(
            SharedState::from_source(source, config.dedup),
            config.utilization_threshold,
        ))
    }

    fn root(shared: SharedState<T>, default_threshold: f64) -> Self {
        Self {
            shared: Arc::new(shared),
            filters: HashMap::new(),
            pre_existing: HashSet::new(),
            default_threshold,
            filtered_count: None,
            disposed: false,
        }
    }

    /// Activate `predicate` under `name` in this scope.
    ///
    /// A name already active in this scope is a silent no-op. Otherwise the
    /// pool cache of that name is reused when present (possibly still
    /// populated from an earlier scope) and registered fresh when not.
    pub fn add_filter(
        &mut self,
        name: impl Into<String>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<&mut Self> {
        let threshold = self.default_threshold;
        self.add_filter_with(name, predicate, threshold)
    }

    /// [`add_filter`](Self::add_filter) with a per-cache utilization
    /// threshold override.
    pub fn add_filter_with(
        &mut self,
        name: impl Into<String>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
        utilization_threshold: f64,
    ) -> Result<&mut Self> {
        let name = name.into();
        validate_filter_name(&name)?;
        if self.filters.contains_key(&name) {
            return Ok(self);
        }
        let predicate: Predicate<T> = Arc::new(predicate);
        self.shared
            .register_filter(&name, predicate.clone(), utilization_threshold)?;
        self.filters.insert(name, predicate);
        Ok(self)
    }

    /// Deactivate `name` in this scope. The backing cache stays in the pool
    /// for reuse.
    pub fn remove_filter(&mut self, name: &str) -> &mut Self {
        if self.filters.remove(name).is_some() {
            self.shared.mark_unordered();
        }
        self
    }

    /// Iterate the items passing every filter of this scope.
    pub fn iter(&self) -> FilteredIter<T> {
        FilteredIter::new(self.shared.clone(), &self.filters)
    }

    /// Total item count, ignoring filters: distinct items when duplicates
    /// collapse, full multiplicity otherwise. Runs the first source pass if
    /// one is still pending; O(1) afterwards.
    pub fn count(&self) -> usize {
        self.shared.ensure_complete();
        if self.shared.dedup_policy().collapses() {
            self.shared.distinct_len()
        } else {
            self.shared.total_len()
        }
    }

    /// Count of items passing this scope's filters, memoized on first use.
    pub fn filtered_count(&mut self) -> usize {
        if let Some(count) = self.filtered_count {
            return count;
        }
        let count = self.iter().count();
        self.filtered_count = Some(count);
        count
    }

    /// Membership in the root source, ignoring filters. Runs the first
    /// source pass if one is still pending; O(1) afterwards.
    pub fn contains(&self, item: &T) -> bool {
        self.shared.ensure_complete();
        self.shared.contains(item)
    }

    /// The item with the greatest `key`, ignoring filters. Fused with the
    /// first source pass when one is still pending.
    pub fn item_with_max(&self, key: impl Fn(&T) -> i64) -> Option<Arc<T>> {
        self.extremum(key, Ordering::Greater)
    }

    /// The item with the least `key`, ignoring filters.
    pub fn item_with_min(&self, key: impl Fn(&T) -> i64) -> Option<Arc<T>> {
        self.extremum(key, Ordering::Less)
    }

    fn extremum(&self, key: impl Fn(&T) -> i64, winning: Ordering) -> Option<Arc<T>> {
        let mut best: Option<(i64, Arc<T>)> = None;
        let mut consider = |item: &Arc<T>| {
            let candidate = key(item);
            let wins = best
                .as_ref()
                .map_or(true, |(incumbent, _)| candidate.cmp(incumbent) == winning);
            if wins {
                best = Some((candidate, item.clone()));
            }
        };
        if self.shared.is_complete() {
            for item in self.shared.distinct_snapshot() {
                consider(&item);
            }
        } else {
            self.shared.enumerate_source(consider);
        }
        best.map(|(_, item)| item)
    }

    /// Fork this scope's filter map into a child scope sharing the same
    /// root. Filters added to the child stay invisible here.
    pub fn start_scoped_query(&self) -> Query<T> {
        self.shared.mark_unordered();
        trace!(inherited = self.filters.len(), "scoped query started");
        Query {
            shared: self.shared.clone(),
            filters: self.filters.clone(),
            pre_existing: self.filters.keys().cloned().collect(),
            default_threshold: self.default_threshold,
            filtered_count: None,
            disposed: false,
        }
    }
}

impl<T> Query<T> {
    /// Release this scope: every cache it introduced (active here, unknown
    /// to the parent at fork time) is asked to retire. Idempotent; also
    /// invoked on drop.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let state = self.shared.lock();
        for name in self.filters.keys() {
            if self.pre_existing.contains(name) {
                continue;
            }
            if let Some(cache) = state.cache_by_name(name) {
                cache.try_disable();
            }
        }
    }

    /// Counter and flag snapshots for every pooled cache, in pool order.
    pub fn cache_stats(&self) -> Vec<CacheStats> {
        self.shared
            .lock()
            .caches
            .iter()
            .map(|cache| cache.stats())
            .collect()
    }

    /// Names of the filters active in this scope, sorted.
    pub fn filter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.filters.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<T> Drop for Query<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::error::SiftError;

    #[test]
    fn empty_filter_name_is_rejected() {
        let mut query = Query::from_items([1u32, 2, 3]);
        let result = query.add_filter("", |_: &u32| true);
        assert!(matches!(result, Err(SiftError::EmptyFilterName)));
    }

    #[test]
    fn duplicate_filter_name_is_a_silent_no_op() {
        let mut query = Query::from_items([1u32, 2, 3, 4]);
        query.add_filter("even", |n: &u32| n % 2 == 0).unwrap();
        // Second registration under the same name changes nothing, even
        // with a contradictory predicate.
        query.add_filter("even", |_: &u32| false).unwrap();

        assert_eq!(query.filter_names(), vec!["even"]);
        assert_eq!(query.iter().count(), 2);
    }

    #[test]
    fn config_threshold_is_validated() {
        let result = Query::from_items_with(
            [1u32],
            QueryConfig {
                dedup: DedupPolicy::Collapse,
                utilization_threshold: 1.5,
            },
        );
        assert!(matches!(
            result,
            Err(SiftError::ThresholdOutOfRange { .. })
        ));
    }

    #[test]
    fn removed_filter_keeps_its_pool_cache() {
        let mut query = Query::from_items([1u32, 2, 3, 4]);
        query.add_filter("even", |n: &u32| n % 2 == 0).unwrap();
        assert_eq!(query.iter().count(), 2);

        query.remove_filter("even");
        assert_eq!(query.iter().count(), 4);
        // The cache survives removal for later reuse.
        assert_eq!(query.cache_stats().len(), 1);

        query.add_filter("even", |n: &u32| n % 2 == 0).unwrap();
        assert_eq!(query.cache_stats().len(), 1);
        assert_eq!(query.iter().count(), 2);
    }

    #[test]
    fn filtered_count_is_a_first_use_memo() {
        let mut query = Query::from_items([1u32, 2, 3, 4]);
        query.add_filter("even", |n: &u32| n % 2 == 0).unwrap();
        assert_eq!(query.filtered_count(), 2);

        // The memo deliberately survives filter mutation.
        query.add_filter("big", |n: &u32| *n > 3).unwrap();
        assert_eq!(query.filtered_count(), 2);
        assert_eq!(query.iter().count(), 1);
    }

    #[test]
    fn count_and_contains_ignore_filters() {
        let mut query = Query::from_items([1u32, 2, 3]);
        query.add_filter("none", |_: &u32| false).unwrap();
        assert_eq!(query.count(), 3);
        assert!(query.contains(&3));
        assert!(!query.contains(&7));
    }

    #[test]
    fn extrema_over_distinct_items() {
        let query = Query::from_items([5i64, 1, 9, 9, 3]);
        assert_eq!(*query.item_with_max(|n| *n).unwrap(), 9);
        assert_eq!(*query.item_with_min(|n| *n).unwrap(), 1);

        let empty = Query::from_items(Vec::<i64>::new());
        assert!(empty.item_with_max(|n| *n).is_none());
    }

    #[test]
    fn iterator_reset_is_unsupported() {
        let query = Query::from_items([1u32, 2]);
        let mut iter = query.iter();
        assert!(matches!(
            iter.reset(),
            Err(SiftError::Unsupported("iterator reset"))
        ));
        // The iterator itself is unaffected.
        assert_eq!(iter.count(), 2);
    }
}
