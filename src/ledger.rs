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

//! Hold ledger.
//!
//! The [`HoldLedger`] maps hold operations onto single atomic units of an
//! [`AtomicStore`]. Every user owns one hash record keyed
//! `<key_prefix>:<user_id>`; each live hold is one field of that record whose
//! value is the held amount and which expires on its own after the hold's
//! TTL.
//!
//! # Operations
//!
//! | Operation | Atomic unit | Result |
//! |-----------|-------------|--------|
//! | [`register`](HoldLedger::register) | insert field if absent, expiring | `registered` + total |
//! | [`unregister`](HoldLedger::unregister) | delete field | `released` + total |
//! | [`current_total`](HoldLedger::current_total) | aggregate | total |
//! | [`clear`](HoldLedger::clear) | delete record | - |
//!
//! # Thread Safety
//!
//! The ledger holds no lock of its own. All serialization is delegated to the
//! store at record granularity, so calls for different users never contend.

use crate::base::{HoldId, UserId};
use crate::error::LedgerError;
use crate::hold::{Hold, RegisterOutcome, ReleaseOutcome};
use crate::store::{AtomicOp, AtomicStore};
use rust_decimal::Decimal;
use std::time::Duration;

/// Ledger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Prefix of every per-user record key.
    pub key_prefix: String,
    /// TTL applied by [`HoldLedger::place`].
    pub default_ttl: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            key_prefix: "locked_balance".to_owned(),
            default_ttl: Duration::from_secs(5),
        }
    }
}

/// Reserves portions of user balances on an [`AtomicStore`].
///
/// # Invariants
///
/// - The total for a user is the sum of holds that were registered, not yet
///   released and not yet expired. No partial state is observable.
/// - Registering an id that is already live keeps the first amount.
/// - Releasing an id that is not live is a no-op, never an error.
/// - Holds expire without any caller action.
pub struct HoldLedger<S> {
    store: S,
    config: LedgerConfig,
}

impl<S: AtomicStore> HoldLedger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        HoldLedger { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Places a hold of `amount` for `ttl`.
    ///
    /// `registered == false` means a live hold with this id already existed;
    /// its amount is unchanged. `total` is authoritative either way.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount` is not positive.
    /// - [`LedgerError::InvalidTtl`] - `ttl` is zero or sub-millisecond.
    /// - [`LedgerError::InvalidIdentifier`] - empty user or hold id.
    /// - [`LedgerError::Store`] - the store failed, or the total would leave
    ///   the `Decimal` range (nothing is stored then); nothing is retried.
    pub fn register(
        &self,
        user_id: &UserId,
        hold_id: &HoldId,
        amount: Decimal,
        ttl: Duration,
    ) -> Result<RegisterOutcome, LedgerError> {
        validate_ids(user_id, Some(hold_id))?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        validate_ttl(ttl)?;

        let key = self.record_key(user_id);
        let outcome = self
            .store
            .run_atomic(
                &key,
                AtomicOp::InsertFieldIfAbsentWithExpiry {
                    field: hold_id.as_str(),
                    value: amount,
                    ttl,
                },
            )
            .inspect_err(|e| {
                tracing::warn!(user = %user_id, hold = %hold_id, error = %e, "register failed");
            })?;

        tracing::debug!(
            user = %user_id,
            hold = %hold_id,
            amount = %amount,
            registered = outcome.changed,
            total = %outcome.aggregate,
            "hold registered"
        );

        Ok(RegisterOutcome {
            registered: outcome.changed,
            total: outcome.aggregate,
        })
    }

    /// Places a hold with a freshly generated id and the configured default TTL.
    pub fn place(
        &self,
        user_id: &UserId,
        amount: Decimal,
    ) -> Result<(Hold, RegisterOutcome), LedgerError> {
        let hold = Hold::new(
            user_id.clone(),
            HoldId::generate(),
            amount,
            self.config.default_ttl,
        );
        let outcome = self.register(&hold.user_id, &hold.hold_id, hold.amount, hold.ttl)?;
        tracing::debug!(
            user = %hold.user_id,
            hold = %hold.hold_id,
            expires_at = ?hold.expires_at(),
            "hold placed"
        );
        Ok((hold, outcome))
    }

    /// Releases a hold.
    ///
    /// `released == false` means the hold was never placed, was already
    /// released, or has expired.
    pub fn unregister(
        &self,
        user_id: &UserId,
        hold_id: &HoldId,
    ) -> Result<ReleaseOutcome, LedgerError> {
        validate_ids(user_id, Some(hold_id))?;

        let key = self.record_key(user_id);
        let outcome = self
            .store
            .run_atomic(
                &key,
                AtomicOp::DeleteField {
                    field: hold_id.as_str(),
                },
            )
            .inspect_err(|e| {
                tracing::warn!(user = %user_id, hold = %hold_id, error = %e, "unregister failed");
            })?;

        tracing::debug!(
            user = %user_id,
            hold = %hold_id,
            released = outcome.changed,
            total = %outcome.aggregate,
            "hold unregistered"
        );

        Ok(ReleaseOutcome {
            released: outcome.changed,
            total: outcome.aggregate,
        })
    }

    /// Sum of all live holds for `user_id`; zero when the user has none.
    pub fn current_total(&self, user_id: &UserId) -> Result<Decimal, LedgerError> {
        validate_ids(user_id, None)?;
        let outcome = self
            .store
            .run_atomic(&self.record_key(user_id), AtomicOp::AggregateFields)?;
        Ok(outcome.aggregate)
    }

    /// Drops every hold of `user_id`.
    ///
    /// Administrative reset; not meant to race with live traffic.
    pub fn clear(&self, user_id: &UserId) -> Result<(), LedgerError> {
        validate_ids(user_id, None)?;
        let existed = self.store.delete_record(&self.record_key(user_id))?;
        tracing::debug!(user = %user_id, existed, "holds cleared");
        Ok(())
    }

    fn record_key(&self, user_id: &UserId) -> String {
        format!("{}:{}", self.config.key_prefix, user_id)
    }
}

fn validate_ids(user_id: &UserId, hold_id: Option<&HoldId>) -> Result<(), LedgerError> {
    if user_id.as_str().is_empty() {
        return Err(LedgerError::InvalidIdentifier("user id"));
    }
    if hold_id.is_some_and(|id| id.as_str().is_empty()) {
        return Err(LedgerError::InvalidIdentifier("hold id"));
    }
    Ok(())
}

fn validate_ttl(ttl: Duration) -> Result<(), LedgerError> {
    // Stores count expiry in whole milliseconds.
    if ttl.as_millis() == 0 || u64::try_from(ttl.as_millis()).is_err() {
        return Err(LedgerError::InvalidTtl);
    }
    Ok(())
}
