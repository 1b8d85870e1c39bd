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

//! Predicate and filter-name primitives.
//!
//! Filters are plain boolean closures over borrowed items. Taking `&T`
//! rather than `&mut T` makes predicate-side item mutation unrepresentable,
//! which is the immutability contract the caches rely on.

use std::sync::Arc;

use crate::error::{Result, SiftError};

/// Shared boolean predicate over borrowed items.
///
/// Predicates registered under one root are expected to be pure, total, and
/// commutative with each other; the engine reorders their evaluation freely.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Check a filter name before it enters a scope map or the cache pool.
pub fn validate_filter_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SiftError::EmptyFilterName);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_rejected() {
        assert!(matches!(
            validate_filter_name(""),
            Err(SiftError::EmptyFilterName)
        ));
        assert!(validate_filter_name("active").is_ok());
    }
}
