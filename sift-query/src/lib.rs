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

//! Sift Query Engine
//!
//! Cache-accelerated querying over in-memory, read-mostly collections.
//! Clients compose named boolean filters fluently; the engine enumerates the
//! source lazily and at most once, memoizes per-filter hit sets, reorders
//! filter evaluation by observed selectivity, and supports nested scoped
//! queries whose filters vanish on scope exit while the caches they fed
//! stay warm.
//!
//! ## Execution pipeline
//!
//! ```text
//! Query::iter() → reorder pool → pick driver → evaluate residual filters
//!                 (under lock)   (source /      (lock-free, cache-feeding)
//!                                 dedup set /
//!                                 completed cache)
//! ```
//!
//! The first iteration drains the client source, collecting the
//! materialized list and the distinct set as it goes; on exhaustion the
//! collectors are published into the shared root and every pooled cache
//! learns the distinct item count. Later iterations replay materialized
//! data — ideally the hit set of the most restrictive completed cache,
//! which shrinks the candidate stream before any predicate runs.
//!
//! ## Scopes
//!
//! ```ignore
//! let mut root = Query::from_items(people);
//! root.add_filter("active", |p: &Person| p.active)?;
//!
//! let mut audit = root.start_scoped_query();
//! audit.add_filter("flagged", |p: &Person| p.flagged)?;
//! let flagged: Vec<_> = audit.iter().collect();   // active ∧ flagged
//! audit.dispose();                                 // "flagged" retires if underused
//!
//! root.iter();                                     // still just "active"
//! ```
//!
//! Domain-specific wrappers are plain composition: hold a [`Query`],
//! delegate, forward disposal.

pub mod iter;
pub mod query;

pub use iter::FilteredIter;
pub use query::{Query, QueryConfig};

// Core data model, re-exported for one-stop consumption.
pub use sift_core::cache::{CacheStats, DEFAULT_UTILIZATION_THRESHOLD, FilterCache};
pub use sift_core::error::{Result, SiftError};
pub use sift_core::predicate::Predicate;
pub use sift_core::shared::{DedupPolicy, SharedState};
