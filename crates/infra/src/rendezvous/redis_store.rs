//! Redis-backed rendezvous store (optional).
//!
//! Slots are encoded as plain strings: `"W"` for the WAITING sentinel and
//! `"R"` followed by the payload for a resolved value. Conditional writes run
//! as Lua scripts so they are atomic on the server.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use redis::{Commands, RedisResult};

use super::store::{RendezvousStore, Slot, StoreError};

const WAITING: &str = "W";
const RESOLVED_PREFIX: char = 'R';

/// KEYS[1] = key, ARGV[1] = encoded slot, ARGV[2] = sentinel, ARGV[3] = ttl ms
const SET_IF_ABSENT_OR_WAITING: &str = r"
local current = redis.call('GET', KEYS[1])
if current == false or current == ARGV[2] then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[3])
  return 1
end
return 0
";

/// KEYS[1] = key, ARGV[1] = encoded slot, ARGV[2] = sentinel, ARGV[3] = ttl ms
///
/// `XX` keeps the write from recreating a key that vanished in between.
const RESOLVE_WAITING: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[2] then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[3], 'XX')
  return 1
end
return 0
";

/// One cached connection, re-established after an I/O failure.
pub struct RedisRendezvousStore {
    client: redis::Client,
    connection: Mutex<Option<redis::Connection>>,
    set_script: redis::Script,
    resolve_script: redis::Script,
}

impl RedisRendezvousStore {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(backend)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            set_script: redis::Script::new(SET_IF_ABSENT_OR_WAITING),
            resolve_script: redis::Script::new(RESOLVE_WAITING),
        })
    }

    /// Run `op` on the cached connection, connecting first if there is none.
    fn with_connection<T>(&self, op: impl FnOnce(&mut redis::Connection) -> RedisResult<T>) -> Result<T, StoreError> {
        let mut cached = self.connection.lock().map_err(|_| StoreError::Poisoned)?;
        let mut conn = match cached.take() {
            Some(conn) => conn,
            None => self.client.get_connection().map_err(backend)?,
        };

        match op(&mut conn) {
            Ok(value) => {
                *cached = Some(conn);
                Ok(value)
            }
            Err(e) => {
                if !broken(&e) {
                    *cached = Some(conn);
                }
                Err(backend(e))
            }
        }
    }

    fn run_script(&self, script: &redis::Script, key: &str, slot: &Slot, ttl: Duration) -> Result<bool, StoreError> {
        // PX rejects 0; round sub-millisecond TTLs up.
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let encoded = encode(slot);

        let written: i32 = self.with_connection(|conn| {
            script
                .key(key)
                .arg(&encoded)
                .arg(WAITING)
                .arg(ttl_ms)
                .invoke(conn)
        })?;

        Ok(written == 1)
    }
}

impl fmt::Debug for RedisRendezvousStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisRendezvousStore")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

/// Errors after which the connection cannot be reused.
fn broken(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode(slot: &Slot) -> String {
    match slot {
        Slot::Waiting => WAITING.to_string(),
        Slot::Resolved(value) => format!("{RESOLVED_PREFIX}{value}"),
    }
}

fn decode(raw: &str) -> Result<Slot, StoreError> {
    if raw == WAITING {
        return Ok(Slot::Waiting);
    }
    raw.strip_prefix(RESOLVED_PREFIX)
        .map(|value| Slot::Resolved(value.to_string()))
        .ok_or_else(|| StoreError::Backend(format!("unrecognised slot encoding: {raw:.16}")))
}

impl RendezvousStore for RedisRendezvousStore {
    fn set_if_absent_or_waiting(&self, key: &str, slot: Slot, ttl: Duration) -> Result<bool, StoreError> {
        self.run_script(&self.set_script, key, &slot, ttl)
    }

    fn resolve_waiting(&self, key: &str, value: String, ttl: Duration) -> Result<bool, StoreError> {
        self.run_script(&self.resolve_script, key, &Slot::Resolved(value), ttl)
    }

    fn get(&self, key: &str) -> Result<Option<Slot>, StoreError> {
        let raw: Option<String> = self.with_connection(|conn| conn.get(key))?;
        raw.as_deref().map(decode).transpose()
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _: i64 = self.with_connection(|conn| conn.del(key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_encoding_is_unambiguous() {
        assert_eq!(decode(&encode(&Slot::Waiting)).unwrap(), Slot::Waiting);
        assert_eq!(
            decode(&encode(&Slot::Resolved("W".into()))).unwrap(),
            Slot::Resolved("W".into())
        );
        assert!(decode("garbage").is_err());
    }

    #[test]
    fn unreachable_server_is_a_backend_error_and_nothing_is_cached() {
        let store = RedisRendezvousStore::new("redis://127.0.0.1:1/").unwrap();

        let err = store.get("k").unwrap_err();

        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.connection.lock().unwrap().is_none());
    }
}
