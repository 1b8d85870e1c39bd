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

//! Query Engine Benchmarks
//!
//! Measures the cold source pass, cache-driven re-iteration, and scope fork
//! overhead at different collection sizes.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sift_query::Query;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Record {
    id: u64,
    score: u64,
    flagged: bool,
}

fn generate_records(count: usize) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|id| Record {
            id: id as u64,
            score: rng.gen_range(0..1_000),
            flagged: rng.gen_range(0..100) < 30,
        })
        .collect()
}

fn filtered(records: Vec<Record>) -> Query<Record> {
    let mut query = Query::from_source(move || records.clone());
    query
        .add_filter("flagged", |r: &Record| r.flagged)
        .unwrap()
        .add_filter("high_score", |r: &Record| r.score >= 500)
        .unwrap();
    query
}

/// First pass over a lazy source: enumeration, collection, cache feeding.
fn bench_cold_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("cold_pass");

    for size in [1_000, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let records = generate_records(size);

            b.iter(|| {
                let query = filtered(records.clone());
                black_box(query.iter().count());
            });
        });
    }

    group.finish();
}

/// Re-iteration once the caches are complete: driven by the tightest cache.
fn bench_cached_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_pass");

    for size in [1_000, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let query = filtered(generate_records(size));
            // Warm up: complete the source and the caches.
            query.iter().for_each(drop);
            query.iter().for_each(drop);

            b.iter(|| {
                black_box(query.iter().count());
            });
        });
    }

    group.finish();
}

/// Scope fork, one extra filter, iterate, dispose.
fn bench_scoped_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoped_query");

    for size in [1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let query = filtered(generate_records(size));
            query.iter().for_each(drop);

            b.iter(|| {
                let mut scope = query.start_scoped_query();
                scope
                    .add_filter("even", |r: &Record| r.id % 2 == 0)
                    .unwrap();
                black_box(scope.iter().count());
                scope.dispose();
            });
        });
    }

    group.finish();
}

/// Membership probes against the completed dedup set.
fn bench_contains(c: &mut Criterion) {
    let records = generate_records(10_000);
    let probe = records[7_777].clone();
    let query = Query::from_items(records);

    c.bench_function("contains_10k", |b| {
        b.iter(|| black_box(query.contains(&probe)));
    });
}

criterion_group!(
    benches,
    bench_cold_pass,
    bench_cached_pass,
    bench_scoped_query,
    bench_contains
);
criterion_main!(benches);
