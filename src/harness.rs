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

//! Concurrent workload driver.
//!
//! Fans out many register/unregister pairs for one user with random jitter
//! around each call to widen the race window, tracks the highest total any
//! call reported, and checks the final total afterwards. With amounts
//! `1..=n` the total can never exceed `n * (n + 1) / 2` and must return to
//! zero once every hold is released or expired.

use crate::base::{HoldId, UserId};
use crate::error::LedgerError;
use crate::ledger::HoldLedger;
use crate::store::AtomicStore;
use crossbeam::channel;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Shared cancellation flag.
///
/// Once cancelled no new job starts. A job already running finishes both of
/// its calls, since each atomic unit is indivisible anyway.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shape of a workload run.
#[derive(Debug, Clone)]
pub struct Workload {
    pub user: UserId,
    /// Number of holds; hold `i` has amount `i`.
    pub holds: u32,
    /// Upper bound of the random delay before each call.
    pub max_jitter: Duration,
    pub ttl: Duration,
    /// Worker threads issuing calls. With one worker per hold every job is
    /// in flight at once.
    pub workers: usize,
}

impl Workload {
    /// Highest total the run can ever observe: `1 + 2 + ... + holds`.
    pub fn expected_peak(&self) -> Decimal {
        let n = u64::from(self.holds);
        Decimal::from(n * (n + 1) / 2)
    }
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            user: UserId::from("1"),
            holds: 1000,
            max_jitter: Duration::from_millis(100),
            ttl: Duration::from_secs(5),
            workers: 1000,
        }
    }
}

/// Summary of a workload run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadReport {
    pub user: UserId,
    /// Holds this run placed.
    pub placed: u64,
    /// Registrations that found the id already live.
    pub duplicates: u64,
    /// Holds this run released.
    pub released: u64,
    /// Releases that found the hold already gone (expired).
    pub already_gone: u64,
    /// Jobs never started because of cancellation.
    pub skipped: u64,
    pub peak_total: Decimal,
    pub final_total: Decimal,
    pub expected_peak: Decimal,
}

impl WorkloadReport {
    pub fn is_consistent(&self) -> bool {
        self.final_total.is_zero() && self.peak_total <= self.expected_peak
    }
}

#[derive(Default)]
struct Tally {
    placed: AtomicU64,
    duplicates: AtomicU64,
    released: AtomicU64,
    already_gone: AtomicU64,
    skipped: AtomicU64,
    peak: Mutex<Decimal>,
    failure: Mutex<Option<LedgerError>>,
}

impl Tally {
    fn observe(&self, total: Decimal) {
        let mut peak = self.peak.lock();
        if total > *peak {
            *peak = total;
        }
    }

    fn fail(&self, err: LedgerError, cancel: &CancelSignal) {
        self.failure.lock().get_or_insert(err);
        cancel.cancel();
    }
}

/// Runs `workload` against `ledger`.
///
/// The user's record is cleared first. Returns the first ledger error any
/// worker hit; a failure also cancels the remaining jobs.
pub fn run_workload<S: AtomicStore>(
    ledger: &HoldLedger<S>,
    workload: &Workload,
    cancel: &CancelSignal,
) -> Result<WorkloadReport, LedgerError> {
    ledger.clear(&workload.user)?;

    let (jobs, queue) = channel::unbounded::<u32>();
    for amount in 1..=workload.holds {
        let _ = jobs.send(amount);
    }
    drop(jobs);

    let tally = Tally::default();
    thread::scope(|scope| {
        for _ in 0..workload.workers.max(1) {
            let queue = queue.clone();
            let tally = &tally;
            scope.spawn(move || {
                for amount in queue.iter() {
                    if cancel.is_cancelled() {
                        tally.skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    if let Err(err) = run_job(ledger, workload, amount, tally) {
                        tally.fail(err, cancel);
                    }
                }
            });
        }
    });

    if let Some(err) = tally.failure.lock().take() {
        return Err(err);
    }

    let final_total = ledger.current_total(&workload.user)?;
    let report = WorkloadReport {
        user: workload.user.clone(),
        placed: tally.placed.into_inner(),
        duplicates: tally.duplicates.into_inner(),
        released: tally.released.into_inner(),
        already_gone: tally.already_gone.into_inner(),
        skipped: tally.skipped.into_inner(),
        peak_total: tally.peak.into_inner(),
        final_total,
        expected_peak: workload.expected_peak(),
    };

    tracing::info!(
        user = %report.user,
        placed = report.placed,
        released = report.released,
        already_gone = report.already_gone,
        skipped = report.skipped,
        peak = %report.peak_total,
        final_total = %report.final_total,
        "workload finished"
    );

    Ok(report)
}

fn run_job<S: AtomicStore>(
    ledger: &HoldLedger<S>,
    workload: &Workload,
    amount: u32,
    tally: &Tally,
) -> Result<(), LedgerError> {
    let hold_id = HoldId::generate();

    jitter(workload.max_jitter);
    let placed = ledger.register(&workload.user, &hold_id, Decimal::from(amount), workload.ttl)?;
    tally.observe(placed.total);
    if placed.registered {
        tally.placed.fetch_add(1, Ordering::Relaxed);
    } else {
        tally.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    jitter(workload.max_jitter);
    let released = ledger.unregister(&workload.user, &hold_id)?;
    tally.observe(released.total);
    if released.released {
        tally.released.fetch_add(1, Ordering::Relaxed);
    } else {
        tally.already_gone.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

fn jitter(max: Duration) {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return;
    }
    let delay = rand::thread_rng().gen_range(0..=max_ms);
    thread::sleep(Duration::from_millis(delay));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerConfig;
    use crate::store::memory::InMemoryStore;
    use rust_decimal_macros::dec;

    fn small(holds: u32) -> Workload {
        Workload {
            holds,
            max_jitter: Duration::from_millis(2),
            ttl: Duration::from_secs(60),
            workers: 8,
            ..Workload::default()
        }
    }

    #[test]
    fn default_runs_every_hold_concurrently() {
        let workload = Workload::default();
        assert_eq!(workload.workers, workload.holds as usize);
    }

    #[test]
    fn expected_peak_is_triangular() {
        assert_eq!(Workload::default().expected_peak(), dec!(500500));
        assert_eq!(small(4).expected_peak(), dec!(10));
    }

    #[test]
    fn small_run_returns_to_zero() {
        let ledger = HoldLedger::new(InMemoryStore::new(), LedgerConfig::default());
        let report = run_workload(&ledger, &small(50), &CancelSignal::new()).unwrap();
        assert_eq!(report.placed, 50);
        assert_eq!(report.released, 50);
        assert_eq!(report.skipped, 0);
        assert!(report.is_consistent(), "{report:?}");
    }

    #[test]
    fn cancelled_run_skips_every_job() {
        let ledger = HoldLedger::new(InMemoryStore::new(), LedgerConfig::default());
        let cancel = CancelSignal::new();
        cancel.cancel();
        let report = run_workload(&ledger, &small(20), &cancel).unwrap();
        assert_eq!(report.skipped, 20);
        assert_eq!(report.placed, 0);
        assert_eq!(report.final_total, Decimal::ZERO);
    }
}
