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

use clap::{Parser, ValueEnum};
use csv::Writer;
use hold_ledger::{
    AtomicStore, CancelSignal, HoldLedger, InMemoryStore, LedgerConfig, LedgerError, UserId,
    Workload, WorkloadReport, run_workload,
};
use std::io::Write;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Hold Ledger - concurrent balance hold workload
///
/// Places holds of amount 1..=N for one user from many threads with random
/// jitter, releases them again, and checks the total returns to zero.
/// Writes a one-row CSV report to stdout.
#[derive(Parser, Debug)]
#[command(name = "hold-ledger")]
#[command(about = "Drives concurrent balance holds against an atomic store", long_about = None)]
struct Args {
    /// Store backend
    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    /// Redis connection URL (redis backend only)
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379/0")]
    redis_url: String,

    /// Prefix of the per-user record key
    #[arg(long, default_value = "locked_balance")]
    key_prefix: String,

    /// User whose balance is held
    #[arg(long, default_value = "1")]
    user: String,

    /// Number of holds (amounts 1..=N)
    #[arg(long, default_value_t = 1000)]
    holds: u32,

    /// Maximum random delay before each call, in milliseconds
    #[arg(long, default_value_t = 100)]
    max_jitter_ms: u64,

    /// Hold time-to-live, in milliseconds
    #[arg(long, default_value_t = 5000)]
    ttl_ms: u64,

    /// Worker threads issuing calls [default: one per hold, all in flight at once]
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Memory,
    Redis,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = LedgerConfig {
        key_prefix: args.key_prefix.clone(),
        default_ttl: Duration::from_millis(args.ttl_ms),
    };
    let workload = Workload {
        user: UserId::new(args.user.clone()),
        holds: args.holds,
        max_jitter: Duration::from_millis(args.max_jitter_ms),
        ttl: Duration::from_millis(args.ttl_ms),
        workers: args.workers.unwrap_or(args.holds as usize),
    };

    let result = match args.backend {
        Backend::Memory => {
            let store = Arc::new(InMemoryStore::new());
            let _reaper = store.spawn_reaper(Duration::from_secs(1));
            run(store, config, &workload)
        }
        Backend::Redis => run_redis(&args.redis_url, config, &workload),
    };

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error running workload: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_report(&report, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }

    if !report.is_consistent() {
        eprintln!(
            "Inconsistent ledger: final total {} (expected 0), peak {} (bound {})",
            report.final_total, report.peak_total, report.expected_peak
        );
        process::exit(2);
    }
}

fn run<S: AtomicStore>(
    store: S,
    config: LedgerConfig,
    workload: &Workload,
) -> Result<WorkloadReport, LedgerError> {
    let ledger = HoldLedger::new(store, config);
    run_workload(&ledger, workload, &CancelSignal::new())
}

#[cfg(feature = "redis")]
fn run_redis(
    url: &str,
    config: LedgerConfig,
    workload: &Workload,
) -> Result<WorkloadReport, LedgerError> {
    let store = hold_ledger::RedisStore::open(url)?;
    store.ping()?;
    run(store, config, workload)
}

#[cfg(not(feature = "redis"))]
fn run_redis(
    _url: &str,
    _config: LedgerConfig,
    _workload: &Workload,
) -> Result<WorkloadReport, LedgerError> {
    eprintln!("The redis backend requires building with `--features redis`");
    process::exit(1);
}

/// Write the workload report as a single CSV row with a header.
///
/// # CSV Format
///
/// Columns: `user, placed, duplicates, released, already_gone, skipped,
/// peak_total, final_total, expected_peak`
pub fn write_report<W: Write>(report: &WorkloadReport, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    wtr.serialize(report)?;
    wtr.flush()?;
    Ok(())
}
