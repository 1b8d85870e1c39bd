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

//! Sift Core
//!
//! Data model of the Sift caching query engine:
//!
//! - [`FilterCache`]: per-predicate memoized hit set with hit/miss counters,
//!   completion detection, and utilization-based self-disablement.
//! - [`SharedState`]: the per-root bundle shared by every query scope —
//!   source handle, materialized list, distinct-item set, completion flag,
//!   dedup policy, and the ordered cache pool, all behind one mutex.
//! - [`Predicate`]: shared boolean closures over borrowed items.
//!
//! Items are handled as `Arc<T>` throughout: one allocation per item on
//! first draw from the source, shared by the materialized list, the dedup
//! set, and every hit set. The engine never clones item payloads.
//!
//! The execution layer (iterators, query handles, scopes) lives in
//! `sift-query`.

pub mod cache;
pub mod error;
pub mod predicate;
pub mod shared;

pub use cache::{
    CacheStats, DEFAULT_UTILIZATION_THRESHOLD, FilterCache, validate_utilization_threshold,
};
pub use error::{Result, SiftError};
pub use predicate::{Predicate, validate_filter_name};
pub use shared::{DedupPolicy, SharedState, Source, SourceFn, StateInner};
