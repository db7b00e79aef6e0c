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

//! Holds and the outcomes of placing or releasing them.
//!
//! A hold is immutable once stored; only its presence in the user's record
//! changes:
//!
//! ```text
//!  register ──► live ──unregister──► gone
//!                 │
//!                 └────ttl elapses──► gone
//! ```

use crate::base::{HoldId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// A single balance reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub user_id: UserId,
    pub hold_id: HoldId,
    pub amount: Decimal,
    pub ttl: Duration,
    pub created_at: SystemTime,
}

impl Hold {
    pub fn new(user_id: UserId, hold_id: HoldId, amount: Decimal, ttl: Duration) -> Self {
        Self {
            user_id,
            hold_id,
            amount,
            ttl,
            created_at: SystemTime::now(),
        }
    }

    /// The instant after which the store no longer counts this hold.
    pub fn expires_at(&self) -> SystemTime {
        self.created_at + self.ttl
    }
}

/// Result of [`HoldLedger::register`](crate::HoldLedger::register).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOutcome {
    /// `false` when a live hold with the same id already existed.
    pub registered: bool,
    /// Aggregate of all live holds, read in the same atomic unit.
    pub total: Decimal,
}

/// Result of [`HoldLedger::unregister`](crate::HoldLedger::unregister).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    /// `false` when the hold was never placed, already released or expired.
    pub released: bool,
    /// Aggregate of all live holds, read in the same atomic unit.
    pub total: Decimal,
}
