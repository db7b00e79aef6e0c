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

//! Atomic key-value store abstraction.
//!
//! A store holds one hash record per key. Each record maps a field (hold id)
//! to a decimal value (hold amount) with its own expiry. Every [`AtomicOp`]
//! runs as one indivisible unit against a single record and reports the
//! record's aggregate as observed inside that same unit, so callers never
//! need a separate read after a write.
//!
//! Backends:
//! - [`memory::InMemoryStore`]: in-process, expiry tracked per field.
//! - `redis::RedisStore` (feature `redis`): server-side Lua scripts over
//!   native hash-field expiry.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use crate::error::StoreError;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// The fixed set of operations a store can run atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp<'a> {
    /// Writes `field = value` only if `field` is absent (or expired). The field
    /// expires on its own after `ttl`.
    InsertFieldIfAbsentWithExpiry {
        field: &'a str,
        value: Decimal,
        ttl: Duration,
    },
    /// Removes `field` if present.
    DeleteField { field: &'a str },
    /// Reads the aggregate without mutating.
    AggregateFields,
}

/// Result of one atomic unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicOutcome {
    /// Whether the insert or delete took effect. Always `false` for
    /// [`AtomicOp::AggregateFields`].
    pub changed: bool,
    /// Sum of all live field values after the operation.
    pub aggregate: Decimal,
}

/// A shared store that executes [`AtomicOp`]s indivisibly per record.
///
/// Implementations must guarantee that no two atomic units touching the same
/// record interleave, and that expired fields are never counted in an
/// aggregate nor block an insert.
pub trait AtomicStore: Send + Sync {
    /// Runs `op` against the record at `record_key`.
    fn run_atomic(&self, record_key: &str, op: AtomicOp<'_>) -> Result<AtomicOutcome, StoreError>;

    /// Drops the whole record. Returns whether a record existed.
    fn delete_record(&self, record_key: &str) -> Result<bool, StoreError>;
}

impl<S: AtomicStore + ?Sized> AtomicStore for Arc<S> {
    fn run_atomic(&self, record_key: &str, op: AtomicOp<'_>) -> Result<AtomicOutcome, StoreError> {
        (**self).run_atomic(record_key, op)
    }

    fn delete_record(&self, record_key: &str) -> Result<bool, StoreError> {
        (**self).delete_record(record_key)
    }
}

/// Sums field values exactly.
///
/// # Errors
///
/// [`StoreError::Operation`] if the sum leaves the `Decimal` range.
pub(crate) fn aggregate<'a>(
    values: impl IntoIterator<Item = &'a Decimal>,
) -> Result<Decimal, StoreError> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |total, value| checked_total(total, *value))
}

/// Adds `value` to `total`, rejecting overflow.
pub(crate) fn checked_total(total: Decimal, value: Decimal) -> Result<Decimal, StoreError> {
    total
        .checked_add(value)
        .ok_or_else(|| StoreError::Operation(format!("aggregate overflows adding {value}")))
}
