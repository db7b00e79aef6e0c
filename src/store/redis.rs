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

//! Redis-backed [`AtomicStore`].
//!
//! Each atomic unit is one Lua script, which Redis runs without interleaving
//! any other command. Per-field expiry uses `HSETEX ... FNX PX`, so the server
//! drops expired holds by itself and `HVALS` never returns them. This needs a
//! server with hash-field expiry (Redis 8.0 or later).
//!
//! Scripts return the live values rather than a Lua-side sum; the values are
//! a snapshot taken inside the script and are summed here as [`Decimal`] so
//! the aggregate is exact. The register script refuses an insert whose
//! total would come within a millionth of `Decimal::MAX`; Lua sums in
//! doubles, so the margin keeps the exact client-side sum in range.

use super::{AtomicOp, AtomicOutcome, AtomicStore, aggregate};
use crate::error::StoreError;
use ::redis::{Client, Connection, RedisError, RedisResult, Script};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

const REGISTER_SCRIPT: &str = r"
local key = KEYS[1]
if redis.call('HEXISTS', key, ARGV[1]) == 0 then
  local total = tonumber(ARGV[2])
  for _, v in ipairs(redis.call('HVALS', key)) do
    total = total + tonumber(v)
  end
  if total > tonumber(ARGV[4]) then
    return {-1, redis.call('HVALS', key)}
  end
end
local inserted = redis.call('HSETEX', key, 'FNX', 'PX', ARGV[3], 'FIELDS', 1, ARGV[1], ARGV[2])
return {inserted, redis.call('HVALS', key)}
";

const UNREGISTER_SCRIPT: &str = r"
local key = KEYS[1]
local deleted = redis.call('HDEL', key, ARGV[1])
return {deleted, redis.call('HVALS', key)}
";

const AGGREGATE_SCRIPT: &str = r"
return redis.call('HVALS', KEYS[1])
";

/// Networked store over a Redis server.
///
/// Connections are pooled so that calls for different records never wait on
/// each other client-side; serialization happens on the server.
pub struct RedisStore {
    client: Client,
    timeout: Duration,
    idle: Mutex<Vec<Connection>>,
    register: Script,
    unregister: Script,
    aggregate: Script,
}

impl RedisStore {
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Creates a store for `url` (e.g. `redis://localhost:6379/0`).
    ///
    /// No connection is made until the first operation.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(classify)?;
        Ok(Self {
            client,
            timeout: Self::DEFAULT_TIMEOUT,
            idle: Mutex::new(Vec::new()),
            register: Script::new(REGISTER_SCRIPT),
            unregister: Script::new(UNREGISTER_SCRIPT),
            aggregate: Script::new(AGGREGATE_SCRIPT),
        })
    }

    /// Sets the connect/read/write timeout for new connections.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Opens a connection and issues `PING`.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.with_connection(|con| ::redis::cmd("PING").query::<String>(con).map(|_| ()))
    }

    fn connect(&self) -> RedisResult<Connection> {
        let con = self.client.get_connection_with_timeout(self.timeout)?;
        con.set_read_timeout(Some(self.timeout))?;
        con.set_write_timeout(Some(self.timeout))?;
        Ok(con)
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> Result<T, StoreError> {
        let pooled = self.idle.lock().pop();
        let mut con = match pooled {
            Some(con) => con,
            None => self.connect().map_err(classify)?,
        };
        match f(&mut con) {
            Ok(value) => {
                self.idle.lock().push(con);
                Ok(value)
            }
            Err(err) => {
                // A broken connection is dropped instead of returned to the pool.
                if !is_unavailable(&err) {
                    self.idle.lock().push(con);
                }
                Err(classify(err))
            }
        }
    }
}

impl AtomicStore for RedisStore {
    fn run_atomic(&self, record_key: &str, op: AtomicOp<'_>) -> Result<AtomicOutcome, StoreError> {
        let (changed, values) = match op {
            AtomicOp::InsertFieldIfAbsentWithExpiry { field, value, ttl } => {
                let ttl_ms = u64::try_from(ttl.as_millis())
                    .map_err(|_| StoreError::Operation(format!("ttl {ttl:?} too large")))?;
                let (inserted, values): (i64, Vec<String>) = self.with_connection(|con| {
                    self.register
                        .key(record_key)
                        .arg(field)
                        .arg(value.to_string())
                        .arg(ttl_ms)
                        .arg(insert_limit().to_string())
                        .invoke(con)
                })?;
                if inserted < 0 {
                    return Err(StoreError::Operation(format!(
                        "aggregate of {record_key} would overflow adding {value}"
                    )));
                }
                (inserted > 0, values)
            }
            AtomicOp::DeleteField { field } => {
                let (deleted, values): (i64, Vec<String>) = self.with_connection(|con| {
                    self.unregister.key(record_key).arg(field).invoke(con)
                })?;
                (deleted > 0, values)
            }
            AtomicOp::AggregateFields => {
                let values: Vec<String> =
                    self.with_connection(|con| self.aggregate.key(record_key).invoke(con))?;
                (false, values)
            }
        };

        Ok(AtomicOutcome {
            changed,
            aggregate: sum_values(&values)?,
        })
    }

    fn delete_record(&self, record_key: &str) -> Result<bool, StoreError> {
        let removed: i64 =
            self.with_connection(|con| ::redis::cmd("DEL").arg(record_key).query(con))?;
        Ok(removed > 0)
    }
}

fn sum_values(values: &[String]) -> Result<Decimal, StoreError> {
    let parsed = values
        .iter()
        .map(|raw| {
            Decimal::from_str(raw).map_err(|e| {
                StoreError::Operation(format!("non-decimal field value {raw:?}: {e}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    aggregate(&parsed)
}

/// Highest total the register script lets a new hold reach.
fn insert_limit() -> Decimal {
    Decimal::MAX - Decimal::MAX / Decimal::from(1_000_000)
}

fn is_unavailable(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_refusal()
        || err.is_timeout()
        || err.is_connection_dropped()
}

fn classify(err: RedisError) -> StoreError {
    if is_unavailable(&err) {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Operation(err.to_string())
    }
}
