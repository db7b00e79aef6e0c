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

//! # Hold Ledger
//!
//! This library reserves ("holds") portions of a user's balance under heavy
//! concurrent access, backed by a shared key-value store, without ever losing
//! or double-counting a reservation.
//!
//! ## Core Components
//!
//! - [`HoldLedger`]: register, unregister and total holds per user
//! - [`AtomicStore`]: store that runs a mutation and the aggregate read as one
//!   indivisible unit
//! - [`InMemoryStore`]: in-process store with per-field expiry
//! - `RedisStore` (feature `redis`): networked store using Lua scripts
//! - [`run_workload`]: concurrent driver used by the CLI and the tests
//!
//! ## Example
//!
//! ```
//! use hold_ledger::{HoldId, HoldLedger, InMemoryStore, LedgerConfig, UserId};
//! use rust_decimal_macros::dec;
//! use std::time::Duration;
//!
//! let ledger = HoldLedger::new(InMemoryStore::new(), LedgerConfig::default());
//! let user = UserId::from("1");
//! let ttl = Duration::from_secs(5);
//!
//! let placed = ledger.register(&user, &HoldId::from("order-1"), dec!(100), ttl).unwrap();
//! assert!(placed.registered);
//! assert_eq!(placed.total, dec!(100));
//!
//! // Same id again: first write wins.
//! let again = ledger.register(&user, &HoldId::from("order-1"), dec!(999), ttl).unwrap();
//! assert!(!again.registered);
//! assert_eq!(again.total, dec!(100));
//!
//! let released = ledger.unregister(&user, &HoldId::from("order-1")).unwrap();
//! assert!(released.released);
//! assert_eq!(released.total, dec!(0));
//! ```
//!
//! ## Thread Safety
//!
//! The ledger holds no lock of its own. Each operation is one atomic unit on
//! the user's record, so concurrent callers never lose an update, and callers
//! for different users never contend.

pub mod base;
pub mod clock;
pub mod error;
pub mod harness;
pub mod hold;
mod ledger;
pub mod store;

pub use base::{HoldId, UserId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LedgerError, StoreError};
pub use harness::{CancelSignal, Workload, WorkloadReport, run_workload};
pub use hold::{Hold, RegisterOutcome, ReleaseOutcome};
pub use ledger::{HoldLedger, LedgerConfig};
pub use store::memory::{InMemoryStore, Reaper};
#[cfg(feature = "redis")]
pub use store::redis::RedisStore;
pub use store::{AtomicOp, AtomicOutcome, AtomicStore};
