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

//! The single-pass, cache-feeding iterator.
//!
//! One [`FilteredIter`] is built per iteration. Construction takes the root
//! mutex once: it re-sorts the cache pool if a mutation or completion event
//! left it unordered, snapshots the caches active in the calling scope (in
//! pool order), and picks a driver:
//!
//! 1. **Completed cache** — the root is complete, duplicates collapse, and
//!    the most restrictive active cache is enabled and complete: replay its
//!    hit set in insertion order. Membership already implies its predicate,
//!    so only the remaining caches are evaluated per element.
//! 2. **Materialized state** — the root is complete otherwise: replay the
//!    distinct set (collapsing) or the full list (retaining).
//! 3. **Source** — first pass: drain the lazy source while collecting the
//!    materialized list and distinct set for publication on exhaustion.
//!
//! Per element, the residual caches are evaluated in pool order. Before the
//! root completes every cache is evaluated regardless of earlier failures so
//! each hit set gets its chance to populate; afterwards the first failure
//! short-circuits. Dropping the iterator mid-pass discards the collectors
//! and leaves the root incomplete.
//!
//! Under the retaining dedup policy a duplicate occurrence is judged but
//! never recorded: counters track distinct judgments, so a cache's
//! hit/miss tally lines up with the distinct item count it completes
//! against, no matter how often the source repeats an item.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use sift_core::cache::FilterCache;
use sift_core::error::{Result, SiftError};
use sift_core::predicate::Predicate;
use sift_core::shared::SharedState;

/// Residual lists are nearly always a handful of caches; keep them inline.
type ResidualList<T> = SmallVec<[Arc<FilterCache<T>>; 4]>;

enum Driver<T> {
    /// First pass: drain the lazy source while collecting for publication.
    Source {
        source: Box<dyn Iterator<Item = T> + Send>,
        items: Vec<Arc<T>>,
        dedup_items: HashSet<Arc<T>>,
    },
    /// Replay of already-materialized items: the distinct set, the full
    /// list, or a completed cache's hit set.
    Snapshot {
        snapshot: std::vec::IntoIter<Arc<T>>,
        /// Tracks repeat occurrences when the snapshot can contain
        /// duplicates (the full list of a retaining root); `None` when the
        /// snapshot is already distinct.
        seen: Option<HashSet<Arc<T>>>,
    },
}

/// What to iterate, decided under the lock; the driver itself is assembled
/// after the lock is released so the client source never runs under it.
enum DriverPlan<T> {
    Snapshot(Vec<Arc<T>>),
    Source,
}

/// Iterator over the items passing every filter of one scope.
///
/// Yields `Arc<T>` handles. Created by `Query::iter`; restarting in place is
/// unsupported — build a fresh iterator instead.
pub struct FilteredIter<T> {
    shared: Arc<SharedState<T>>,
    driver: Driver<T>,
    residual: ResidualList<T>,
    /// Root completion as seen at construction; enables short-circuiting.
    complete: bool,
    collapse: bool,
}

impl<T: Eq + Hash + Send + Sync + 'static> FilteredIter<T> {
    pub(crate) fn new(
        shared: Arc<SharedState<T>>,
        filters: &HashMap<String, Predicate<T>>,
    ) -> Self {
        let collapse = shared.dedup_policy().collapses();

        let (plan, residual, complete) = {
            let mut state = shared.lock();
            state.reorder_caches();
            let mut active: Vec<Arc<FilterCache<T>>> = state
                .caches
                .iter()
                .filter(|cache| filters.contains_key(cache.name()))
                .cloned()
                .collect();
            let complete = state.items_complete;

            let lead_complete = active
                .first()
                .is_some_and(|lead| !lead.is_disabled() && lead.is_complete());
            if complete && collapse && lead_complete {
                // The tightest cache drives; its predicate is implied.
                let lead = active.remove(0);
                trace!(driver = lead.name(), "iteration driven by completed cache");
                (
                    DriverPlan::Snapshot(lead.items_snapshot()),
                    ResidualList::from_vec(active),
                    complete,
                )
            } else if complete {
                let snapshot: Vec<Arc<T>> = if collapse {
                    state.dedup_items.iter().cloned().collect()
                } else {
                    state.items.clone()
                };
                (
                    DriverPlan::Snapshot(snapshot),
                    ResidualList::from_vec(active),
                    complete,
                )
            } else {
                (DriverPlan::Source, ResidualList::from_vec(active), complete)
            }
        };

        let driver = match plan {
            DriverPlan::Snapshot(items) => Driver::Snapshot {
                snapshot: items.into_iter(),
                // Only the full list of a retaining root replays duplicates.
                seen: (!collapse).then(HashSet::new),
            },
            DriverPlan::Source => Driver::Source {
                source: shared.replay(),
                items: Vec::new(),
                dedup_items: HashSet::new(),
            },
        };

        Self {
            shared,
            driver,
            residual,
            complete,
            collapse,
        }
    }

    /// Restarting an iterator in place is not supported; build a fresh one
    /// via `Query::iter` instead.
    pub fn reset(&mut self) -> Result<()> {
        Err(SiftError::Unsupported("iterator reset"))
    }

    fn passes(&self, cache: &FilterCache<T>, item: &Arc<T>, first_seen: bool) -> bool {
        if cache.is_disabled() {
            // Bypassed: raw predicate, no bookkeeping.
            return cache.eval(item);
        }
        if cache.is_complete() {
            // Every distinct item has been judged; membership is the verdict.
            return cache.contains(item);
        }
        if !first_seen {
            // Repeat occurrence under the retaining policy: judge it, but
            // counters track distinct judgments only.
            return cache.contains(item) || cache.eval(item);
        }
        if cache.contains(item) {
            cache.record_hit_cached();
            true
        } else if cache.eval(item) {
            cache.record_hit(item.clone());
            true
        } else {
            cache.record_miss();
            false
        }
    }

    fn passes_all(&self, item: &Arc<T>, first_seen: bool) -> bool {
        let mut all = true;
        for cache in &self.residual {
            if !self.passes(cache, item, first_seen) {
                all = false;
                if self.complete {
                    return false;
                }
                // Until the source has been seen in full, keep going so the
                // remaining caches still populate.
            }
        }
        all
    }
}

impl<T: Eq + Hash + Send + Sync + 'static> Iterator for FilteredIter<T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Arc<T>> {
        loop {
            let (candidate, first_seen) = match &mut self.driver {
                Driver::Snapshot { snapshot, seen } => {
                    let item = snapshot.next()?;
                    let first_seen = match seen {
                        Some(seen) => seen.insert(item.clone()),
                        None => true,
                    };
                    (item, first_seen)
                }
                Driver::Source {
                    source,
                    items,
                    dedup_items,
                } => match source.next() {
                    Some(raw) => {
                        let item = Arc::new(raw);
                        items.push(item.clone());
                        let first_seen = dedup_items.insert(item.clone());
                        if !first_seen && self.collapse {
                            continue;
                        }
                        (item, first_seen)
                    }
                    None => {
                        let items = std::mem::take(items);
                        let dedup_items = std::mem::take(dedup_items);
                        self.shared.publish(items, dedup_items);
                        return None;
                    }
                },
            };
            if self.passes_all(&candidate, first_seen) {
                return Some(candidate);
            }
        }
    }
}
