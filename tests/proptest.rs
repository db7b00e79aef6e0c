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

//! Property-based tests for the hold ledger.
//!
//! Random sequences of register, unregister and clock advances are applied
//! both to the ledger and to a plain in-test model; every outcome and total
//! must agree.

use hold_ledger::{HoldId, HoldLedger, InMemoryStore, LedgerConfig, ManualClock, UserId};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Generate a positive amount (0.0001 to 1000 with 4 decimal places).
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000_000i64).prop_map(|units| Decimal::new(units, 4))
}

#[derive(Debug, Clone)]
enum Op {
    Register { hold: u8, amount: Decimal, ttl_ms: u64 },
    Unregister { hold: u8 },
    Advance { ms: u64 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..8, arb_amount(), 1u64..5_000)
            .prop_map(|(hold, amount, ttl_ms)| Op::Register { hold, amount, ttl_ms }),
        3 => (0u8..8).prop_map(|hold| Op::Unregister { hold }),
        1 => (0u64..3_000).prop_map(|ms| Op::Advance { ms }),
    ]
}

/// Live holds by id: amount and expiry in model milliseconds.
#[derive(Default)]
struct Model {
    now_ms: u64,
    holds: HashMap<u8, (Decimal, u64)>,
}

impl Model {
    fn expire(&mut self) {
        let now = self.now_ms;
        self.holds.retain(|_, (_, expires)| *expires > now);
    }

    fn total(&self) -> Decimal {
        self.holds.values().map(|(amount, _)| *amount).sum()
    }
}

fn hold_id(hold: u8) -> HoldId {
    HoldId::new(format!("h{hold}"))
}

// =============================================================================
// Ledger Model Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every outcome and total matches the model.
    #[test]
    fn ledger_matches_model(ops in prop::collection::vec(arb_op(), 1..60)) {
        let clock = Arc::new(ManualClock::new());
        let ledger = HoldLedger::new(
            InMemoryStore::with_clock(clock.clone()),
            LedgerConfig::default(),
        );
        let user = UserId::from("1");
        let mut model = Model::default();

        for op in ops {
            match op {
                Op::Register { hold, amount, ttl_ms } => {
                    model.expire();
                    let expected = !model.holds.contains_key(&hold);
                    if expected {
                        model.holds.insert(hold, (amount, model.now_ms + ttl_ms));
                    }
                    let outcome = ledger
                        .register(&user, &hold_id(hold), amount, Duration::from_millis(ttl_ms))
                        .unwrap();
                    prop_assert_eq!(outcome.registered, expected);
                    prop_assert_eq!(outcome.total, model.total());
                }
                Op::Unregister { hold } => {
                    model.expire();
                    let expected = model.holds.remove(&hold).is_some();
                    let outcome = ledger.unregister(&user, &hold_id(hold)).unwrap();
                    prop_assert_eq!(outcome.released, expected);
                    prop_assert_eq!(outcome.total, model.total());
                }
                Op::Advance { ms } => {
                    clock.advance(Duration::from_millis(ms));
                    model.now_ms += ms;
                }
            }
            model.expire();
            prop_assert_eq!(ledger.current_total(&user).unwrap(), model.total());
        }
    }

    /// Registering then releasing every hold always lands on zero.
    #[test]
    fn register_then_release_all_is_zero(
        amounts in prop::collection::vec(arb_amount(), 1..50),
    ) {
        let ledger = HoldLedger::new(InMemoryStore::new(), LedgerConfig::default());
        let user = UserId::from("1");
        let ttl = Duration::from_secs(600);

        let mut running = Decimal::ZERO;
        for (i, amount) in amounts.iter().enumerate() {
            running += *amount;
            let outcome = ledger
                .register(&user, &HoldId::new(i.to_string()), *amount, ttl)
                .unwrap();
            prop_assert!(outcome.registered);
            prop_assert_eq!(outcome.total, running);
        }

        for i in 0..amounts.len() {
            let outcome = ledger.unregister(&user, &HoldId::new(i.to_string())).unwrap();
            prop_assert!(outcome.released);
        }
        prop_assert_eq!(ledger.current_total(&user).unwrap(), Decimal::ZERO);
    }

    /// Totals are never negative.
    #[test]
    fn total_never_negative(ops in prop::collection::vec(arb_op(), 1..40)) {
        let clock = Arc::new(ManualClock::new());
        let ledger = HoldLedger::new(
            InMemoryStore::with_clock(clock.clone()),
            LedgerConfig::default(),
        );
        let user = UserId::from("1");
        for op in ops {
            let total = match op {
                Op::Register { hold, amount, ttl_ms } => ledger
                    .register(&user, &hold_id(hold), amount, Duration::from_millis(ttl_ms))
                    .unwrap()
                    .total,
                Op::Unregister { hold } => ledger.unregister(&user, &hold_id(hold)).unwrap().total,
                Op::Advance { ms } => {
                    clock.advance(Duration::from_millis(ms));
                    ledger.current_total(&user).unwrap()
                }
            };
            prop_assert!(total >= Decimal::ZERO);
        }
    }
}
