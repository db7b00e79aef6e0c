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

//! Error types for the store and the ledger.
//!
//! Duplicate registration and release of a missing hold are not errors; they
//! are reported through the `registered` / `released` flags of the outcomes.

use thiserror::Error;

/// Failures raised by an [`AtomicStore`](crate::store::AtomicStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached (connection refused, dropped, timed out).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the atomic operation.
    #[error("store operation failed: {0}")]
    Operation(String),
}

/// Errors returned by [`HoldLedger`](crate::HoldLedger) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// TTL is zero or does not fit in milliseconds
    #[error("invalid ttl (must be a positive number of milliseconds)")]
    InvalidTtl,

    /// User or hold identifier is empty
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(&'static str),

    /// Failure surfaced unchanged from the store
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Returns `true` when the store itself could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable(_)))
    }
}
