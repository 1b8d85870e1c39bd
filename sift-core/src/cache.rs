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

//! Per-predicate memoization: the filter cache.
//!
//! A [`FilterCache`] remembers which items have been observed to satisfy its
//! predicate, together with hit/miss tallies that double as the selectivity
//! signal for evaluation-order planning. A cache is **complete** once every
//! distinct item of the root source has been judged; from then on membership
//! in the hit set is the full verdict and the predicate never runs again.
//!
//! A cache that misses too often is not worth its memory: once the distinct
//! item count is known, the miss budget is `⌈expected × threshold⌉`, and a
//! cache over budget disables itself when asked to retire (`try_disable`).
//! A disabled cache stays in the pool with its counters, but its hit set is
//! dropped and evaluation falls back to the raw predicate.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use indexmap::IndexSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SiftError};
use crate::predicate::{Predicate, validate_filter_name};

/// Default miss budget, as a fraction of the distinct item count.
pub const DEFAULT_UTILIZATION_THRESHOLD: f64 = 0.5;

/// Stored in the expected-count atomic while the distinct item count of the
/// root source is still unknown.
const UNKNOWN_EXPECTED: i64 = -1;

/// Check a per-cache utilization threshold.
pub fn validate_utilization_threshold(value: f64) -> Result<()> {
    // NaN fails the range check as well.
    if !(0.0..=1.0).contains(&value) {
        return Err(SiftError::ThresholdOutOfRange { value });
    }
    Ok(())
}

/// Memoized hit set and usage counters for one named predicate.
///
/// Lives in the per-root cache pool for the lifetime of the root; scopes
/// refer to it by name only. Counters are relaxed atomics and the hit set
/// sits behind its own lock, so recording during iteration never touches the
/// pool mutex.
pub struct FilterCache<T> {
    name: String,
    predicate: Predicate<T>,
    /// Insertion-ordered so that a completed cache can drive an iteration
    /// and replay its hits in the order they were first observed.
    items: RwLock<IndexSet<Arc<T>>>,
    num_hits: AtomicU64,
    num_misses: AtomicU64,
    expected_item_count: AtomicI64,
    max_allowed_misses: AtomicU64,
    utilization_threshold: f64,
    disabled: AtomicBool,
}

impl<T> FilterCache<T> {
    /// Create a cache for `predicate` under `name`.
    ///
    /// `expected_item_count` is the distinct item count of the root source
    /// when already known (materialized roots, or registration after the
    /// first full pass), `None` otherwise.
    pub fn new(
        name: impl Into<String>,
        predicate: Predicate<T>,
        expected_item_count: Option<usize>,
        utilization_threshold: f64,
    ) -> Result<Self> {
        let name = name.into();
        validate_filter_name(&name)?;
        validate_utilization_threshold(utilization_threshold)?;

        let cache = Self {
            name,
            predicate,
            items: RwLock::new(IndexSet::new()),
            num_hits: AtomicU64::new(0),
            num_misses: AtomicU64::new(0),
            expected_item_count: AtomicI64::new(UNKNOWN_EXPECTED),
            max_allowed_misses: AtomicU64::new(u64::MAX),
            utilization_threshold,
            disabled: AtomicBool::new(false),
        };
        if let Some(count) = expected_item_count {
            cache.set_expected_item_count(count);
        }
        Ok(cache)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate the raw predicate, bypassing the hit set and counters.
    pub fn eval(&self, item: &T) -> bool {
        (self.predicate)(item)
    }

    /// Tally a cached hit for an item already present in the hit set.
    pub fn record_hit_cached(&self) {
        if self.is_complete() || self.is_disabled() {
            return;
        }
        self.num_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Tally a miss for an item the predicate rejected.
    pub fn record_miss(&self) {
        if self.is_complete() || self.is_disabled() {
            return;
        }
        self.num_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Install the distinct item count of the root source, recompute the
    /// miss budget, and retire the cache if it is already over budget.
    pub fn set_expected_item_count(&self, count: usize) {
        self.expected_item_count.store(count as i64, Ordering::Relaxed);
        let budget = (count as f64 * self.utilization_threshold).ceil() as u64;
        self.max_allowed_misses.store(budget, Ordering::Relaxed);
        self.try_disable();
    }

    /// Disable the cache if its misses exceed the budget. Returns whether
    /// the cache is over budget (and therefore disabled); disabling twice is
    /// harmless. Unknown expected counts never disable.
    pub fn try_disable(&self) -> bool {
        if self.expected_item_count.load(Ordering::Relaxed) == UNKNOWN_EXPECTED {
            return false;
        }
        let misses = self.num_misses.load(Ordering::Relaxed);
        if misses <= self.max_allowed_misses.load(Ordering::Relaxed) {
            return false;
        }
        let newly = !self.disabled.swap(true, Ordering::Relaxed);
        self.items.write().clear();
        if newly {
            debug!(
                name = %self.name,
                hits = self.num_hits.load(Ordering::Relaxed),
                misses,
                "filter cache disabled"
            );
        }
        true
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// Whether every distinct item of the root source has been judged.
    pub fn is_complete(&self) -> bool {
        let expected = self.expected_item_count.load(Ordering::Relaxed);
        if expected == UNKNOWN_EXPECTED {
            return false;
        }
        let judged =
            self.num_hits.load(Ordering::Relaxed) + self.num_misses.load(Ordering::Relaxed);
        judged == expected as u64
    }

    pub fn num_hits(&self) -> u64 {
        self.num_hits.load(Ordering::Relaxed)
    }

    pub fn num_misses(&self) -> u64 {
        self.num_misses.load(Ordering::Relaxed)
    }

    pub fn expected_item_count(&self) -> Option<usize> {
        match self.expected_item_count.load(Ordering::Relaxed) {
            UNKNOWN_EXPECTED => None,
            count => Some(count as usize),
        }
    }

    /// Number of memoized hits.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Evaluation-order key: ascending order puts the most restrictive
    /// caches (few hits, many misses) first. Integer division on purpose —
    /// every cache that misses at least as often as it hits collapses to
    /// key 0 and competes on registration order.
    pub fn selectivity_key(&self) -> u64 {
        let hits = self.num_hits.load(Ordering::Relaxed);
        let misses = self.num_misses.load(Ordering::Relaxed);
        if misses == 0 { hits } else { hits / misses }
    }

    /// Hit set copied out in insertion order, for lock-free replay.
    pub fn items_snapshot(&self) -> Vec<Arc<T>> {
        self.items.read().iter().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            num_hits: self.num_hits(),
            num_misses: self.num_misses(),
            cached_items: self.len(),
            expected_item_count: self.expected_item_count(),
            complete: self.is_complete(),
            disabled: self.is_disabled(),
        }
    }
}

impl<T: Eq + Hash> FilterCache<T> {
    /// Memoize a fresh hit and tally it.
    pub fn record_hit(&self, item: Arc<T>) {
        if self.is_complete() {
            return;
        }
        {
            // Re-checked under the write lock: `try_disable` raises the flag
            // before it takes the lock to clear, so an insert serialized
            // after the clear always sees it and backs off.
            let mut items = self.items.write();
            if self.disabled.load(Ordering::Relaxed) {
                return;
            }
            items.insert(item);
        }
        self.num_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Membership in the hit set.
    pub fn contains(&self, item: &T) -> bool {
        self.items.read().contains(item)
    }
}

impl<T> fmt::Debug for FilterCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCache")
            .field("name", &self.name)
            .field("num_hits", &self.num_hits())
            .field("num_misses", &self.num_misses())
            .field("cached_items", &self.len())
            .field("expected_item_count", &self.expected_item_count())
            .field("disabled", &self.is_disabled())
            .finish_non_exhaustive()
    }
}

/// Read-only snapshot of one cache's counters and flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub name: String,
    pub num_hits: u64,
    pub num_misses: u64,
    pub cached_items: usize,
    pub expected_item_count: Option<usize>,
    pub complete: bool,
    pub disabled: bool,
}
