// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
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

//! Benchmarks for the hold ledger.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single-threaded register / unregister / total
//! - Multi-threaded holds on one user versus many users
//! - Totals over records of growing size

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use hold_ledger::{HoldId, HoldLedger, InMemoryStore, LedgerConfig, UserId};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(600);

// =============================================================================
// Helper Functions
// =============================================================================

fn ledger() -> HoldLedger<InMemoryStore> {
    HoldLedger::new(InMemoryStore::new(), LedgerConfig::default())
}

fn hold(id: u64) -> HoldId {
    HoldId::new(id.to_string())
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_register(c: &mut Criterion) {
    c.bench_function("register", |b| {
        let ledger = ledger();
        let user = UserId::from("1");
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            ledger
                .register(&user, &hold(id), black_box(Decimal::ONE), TTL)
                .unwrap();
        })
    });
}

fn bench_register_unregister(c: &mut Criterion) {
    c.bench_function("register_unregister", |b| {
        let ledger = ledger();
        let user = UserId::from("1");
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            let hold_id = hold(id);
            ledger.register(&user, &hold_id, Decimal::ONE, TTL).unwrap();
            ledger.unregister(&user, black_box(&hold_id)).unwrap();
        })
    });
}

fn bench_total_by_record_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("current_total");

    for size in [10u64, 100, 1_000, 10_000].iter() {
        let ledger = ledger();
        let user = UserId::from("1");
        for id in 0..*size {
            ledger
                .register(&user, &hold(id), Decimal::from(id + 1), TTL)
                .unwrap();
        }
        group.throughput(Throughput::Elements(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(ledger.current_total(&user).unwrap()))
        });
    }
    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_parallel_same_user(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_same_user");

    for count in [100u64, 1_000].iter() {
        group.throughput(Throughput::Elements(*count));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let ledger = ledger();
                let user = UserId::from("1");
                (0..count).into_par_iter().for_each(|id| {
                    ledger.register(&user, &hold(id), Decimal::ONE, TTL).unwrap();
                    ledger.unregister(&user, &hold(id)).unwrap();
                });
                black_box(&ledger);
            })
        });
    }
    group.finish();
}

fn bench_parallel_many_users(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_many_users");

    for count in [100u64, 1_000].iter() {
        group.throughput(Throughput::Elements(*count));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let ledger = ledger();
                (0..count).into_par_iter().for_each(|id| {
                    let user = UserId::new((id % 64).to_string());
                    ledger.register(&user, &hold(id), Decimal::ONE, TTL).unwrap();
                    ledger.unregister(&user, &hold(id)).unwrap();
                });
                black_box(&ledger);
            })
        });
    }
    group.finish();
}

criterion_group!(
    single_threaded,
    bench_register,
    bench_register_unregister,
    bench_total_by_record_size,
);

criterion_group!(
    multi_threaded,
    bench_parallel_same_user,
    bench_parallel_many_users,
);

criterion_main!(single_threaded, multi_threaded);
