//! Redis-backed [`KeyValueStore`].
//!
//! Slots live under the plain keys described in [`crate::backend::kv`] in
//! the database selected by the connection URL. Multi-key writes are sent as
//! a `MULTI`/`EXEC` pipeline.

use std::fmt;

use redis::Commands;

use crate::backend::kv::KeyValueStore;
use crate::error::Result;

/// A synchronous connection to one Redis database.
pub struct RedisStore {
    url: String,
    conn: redis::Connection,
}

impl RedisStore {
    /// Connects to the server at `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns a backend error if the URL is invalid or the server cannot be
    /// reached.
    pub fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection()?;
        tracing::debug!(url, "connected to redis");
        Ok(Self {
            url: url.to_string(),
            conn,
        })
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish_non_exhaustive()
    }
}

impl KeyValueStore for RedisStore {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.conn.get(key)?;
        Ok(value)
    }

    fn get_many(&mut self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query(&mut self.conn)?;
        Ok(values)
    }

    fn set_many(&mut self, entries: &[(String, String)]) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.set(key, value).ignore();
        }
        pipe.query::<()>(&mut self.conn)?;
        Ok(())
    }
}
