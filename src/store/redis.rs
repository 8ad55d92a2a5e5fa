//! Redis-backed implementation of the coordination store.
//!
//! Uses the synchronous client; a connection is opened per operation from
//! the shared [`redis::Client`] with a connect timeout, so one stuck
//! socket cannot wedge every worker thread sharing the store.

use std::time::Duration;

use redis::{Commands, Connection};

use super::{RemoteStore, StoreError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared coordination store over a Redis server.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Open a client for `url` and verify the server is reachable.
    ///
    /// The ping here is the single construction-time probe: callers that
    /// cannot tolerate an unreachable store decide their fallback now
    /// rather than discovering it mid-operation.
    pub fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let store = Self { client };
        store.ping()?;
        tracing::info!(url, "redis coordination store connected");
        Ok(store)
    }

    fn conn(&self) -> Result<Connection, StoreError> {
        Ok(self.client.get_connection_with_timeout(CONNECT_TIMEOUT)?)
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

impl RemoteStore for RedisStore {
    fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut con = self.conn()?;
        Ok(con.get(key)?)
    }

    fn put_value(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut con = self.conn()?;
        // SETEX rejects a zero expiry; clamp to the 1s floor Redis can express.
        let secs = ttl.as_secs().max(1);
        con.set_ex::<_, _, ()>(key, value, secs)?;
        Ok(())
    }

    fn delete_value(&self, key: &str) -> Result<(), StoreError> {
        let mut con = self.conn()?;
        con.del::<_, ()>(key)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        let mut con = self.conn()?;
        redis::cmd("FLUSHDB").query::<()>(&mut con)?;
        Ok(())
    }

    fn ping(&self) -> Result<(), StoreError> {
        let mut con = self.conn()?;
        redis::cmd("PING").query::<String>(&mut con)?;
        Ok(())
    }

    fn prune_window(&self, key: &str, min_score: f64) -> Result<u64, StoreError> {
        let mut con = self.conn()?;
        Ok(con.zrembyscore(key, "-inf", min_score)?)
    }

    fn window_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut con = self.conn()?;
        Ok(con.zcard(key)?)
    }

    fn window_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut con = self.conn()?;
        con.zadd::<_, _, _, ()>(key, member, score)?;
        Ok(())
    }

    fn oldest_score(&self, key: &str) -> Result<Option<f64>, StoreError> {
        let mut con = self.conn()?;
        let oldest: Vec<(String, f64)> = con.zrange_withscores(key, 0, 0)?;
        Ok(oldest.first().map(|(_, score)| *score))
    }

    fn touch_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut con = self.conn()?;
        con.expire::<_, ()>(key, ttl.as_secs().max(1) as i64)?;
        Ok(())
    }
}
