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

//! In-process [`AtomicStore`].
//!
//! Records live in a [`DashMap`]; an atomic unit runs while holding the
//! record's entry guard, which excludes every other unit on the same record.
//! Per-field expiry is simulated by storing an expiry instant next to each
//! value and dropping expired fields at the start of every unit, so an
//! expired hold is never counted and never blocks a re-insert.

use super::{AtomicOp, AtomicOutcome, AtomicStore, aggregate, checked_total};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crossbeam::channel::{self, Sender};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Field {
    value: Decimal,
    expires_at: Instant,
}

/// One hash record: field name to value with its own expiry.
#[derive(Debug, Default)]
struct HashRecord {
    fields: HashMap<String, Field>,
}

impl HashRecord {
    /// Drops expired fields, returning how many were removed.
    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.fields.len();
        self.fields.retain(|_, f| f.expires_at > now);
        before - self.fields.len()
    }

    fn live_aggregate(&self, now: Instant) -> Result<Decimal, StoreError> {
        aggregate(
            self.fields
                .values()
                .filter(|f| f.expires_at > now)
                .map(|f| &f.value),
        )
    }

    fn aggregate(&self) -> Result<Decimal, StoreError> {
        aggregate(self.fields.values().map(|f| &f.value))
    }
}

/// Thread-safe in-memory hash store with per-field expiry.
pub struct InMemoryStore {
    records: DashMap<String, HashRecord>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Number of records currently held, including ones whose fields have
    /// expired but not yet been purged.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Removes every expired field and every record left empty.
    ///
    /// Never changes an observable aggregate; it only reclaims memory.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.records.retain(|_, record| {
            removed += record.purge_expired(now);
            !record.fields.is_empty()
        });
        removed
    }

    /// Starts a background thread that calls [`purge_expired`](Self::purge_expired)
    /// every `interval`. The thread stops when the returned [`Reaper`] is
    /// dropped or the store is gone.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> Reaper {
        let store: Weak<Self> = Arc::downgrade(self);
        let (shutdown, stop) = channel::bounded::<()>(0);
        let handle = thread::spawn(move || {
            let ticker = channel::tick(interval);
            loop {
                crossbeam::select! {
                    recv(stop) -> _ => break,
                    recv(ticker) -> _ => {
                        let Some(store) = store.upgrade() else { break };
                        let removed = store.purge_expired();
                        if removed > 0 {
                            tracing::trace!(removed, "purged expired holds");
                        }
                    }
                }
            }
        });
        Reaper {
            shutdown: Some(shutdown),
            handle: Some(handle),
        }
    }

    fn insert_if_absent(
        &self,
        record_key: &str,
        field: &str,
        value: Decimal,
        ttl: Duration,
    ) -> Result<AtomicOutcome, StoreError> {
        let now = self.clock.now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| StoreError::Operation(format!("ttl {ttl:?} overflows the clock")))?;

        let mut record = self.records.entry(record_key.to_owned()).or_default();
        record.purge_expired(now);
        let before = record.aggregate()?;
        let outcome = match record.fields.entry(field.to_owned()) {
            Entry::Occupied(_) => Ok(AtomicOutcome {
                changed: false,
                aggregate: before,
            }),
            // The new total is computed before the write so an overflow stores nothing.
            Entry::Vacant(slot) => checked_total(before, value).map(|aggregate| {
                slot.insert(Field { value, expires_at });
                AtomicOutcome {
                    changed: true,
                    aggregate,
                }
            }),
        };
        let empty = record.fields.is_empty();
        drop(record);

        if empty {
            self.records.remove_if(record_key, |_, r| r.fields.is_empty());
        }
        outcome
    }

    fn delete_field(&self, record_key: &str, field: &str) -> Result<AtomicOutcome, StoreError> {
        let now = self.clock.now();
        let Some(mut record) = self.records.get_mut(record_key) else {
            return Ok(AtomicOutcome {
                changed: false,
                aggregate: Decimal::ZERO,
            });
        };
        record.purge_expired(now);
        let changed = record.fields.remove(field).is_some();
        let outcome = record.aggregate().map(|aggregate| AtomicOutcome { changed, aggregate });
        let empty = record.fields.is_empty();
        drop(record);

        // Re-checked under the shard lock; a concurrent insert may have landed.
        if empty {
            self.records.remove_if(record_key, |_, r| r.fields.is_empty());
        }
        outcome
    }

    fn aggregate_fields(&self, record_key: &str) -> Result<AtomicOutcome, StoreError> {
        let now = self.clock.now();
        let aggregate = match self.records.get(record_key) {
            Some(record) => record.live_aggregate(now)?,
            None => Decimal::ZERO,
        };
        Ok(AtomicOutcome {
            changed: false,
            aggregate,
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicStore for InMemoryStore {
    fn run_atomic(&self, record_key: &str, op: AtomicOp<'_>) -> Result<AtomicOutcome, StoreError> {
        match op {
            AtomicOp::InsertFieldIfAbsentWithExpiry { field, value, ttl } => {
                self.insert_if_absent(record_key, field, value, ttl)
            }
            AtomicOp::DeleteField { field } => self.delete_field(record_key, field),
            AtomicOp::AggregateFields => self.aggregate_fields(record_key),
        }
    }

    fn delete_record(&self, record_key: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(record_key).is_some())
    }
}

/// Handle to the background expiry thread spawned by
/// [`InMemoryStore::spawn_reaper`].
#[derive(Debug)]
pub struct Reaper {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Reaper {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the thread out of `select!`.
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
