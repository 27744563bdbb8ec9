//! Redis-backed [`KeyValueStore`].

use super::{ttl_seconds, KeyValueStore, Replacement, StoreError};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use std::time::Duration;
use tracing::{debug, instrument};

// KEYS[1] = key
// ARGV[1] = "1" if the key must be absent
// ARGV[2] = expected value
// ARGV[3] = "set" or "del"
// ARGV[4] = new value, ARGV[5] = ttl seconds
const COMPARE_AND_SWAP: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current then return 0 end
elseif current ~= ARGV[2] then
    return 0
end
if ARGV[3] == 'del' then
    redis.call('DEL', KEYS[1])
else
    redis.call('SET', KEYS[1], ARGV[4], 'EX', ARGV[5])
end
return 1
";

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    compare_and_swap: Script,
}

impl RedisStore {
    /// Connect to the Redis server behind `url` (`redis://host:port/db`).
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection fails.
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;

        debug!("connected to redis");

        Ok(Self {
            connection,
            compare_and_swap: Script::new(COMPARE_AND_SWAP),
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.set_ex(key, value, ttl_seconds(ttl)).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        // SET .. NX replies OK on write and nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await?;

        match reply.as_deref() {
            None => Ok(false),
            Some("OK") => Ok(true),
            Some(other) => Err(StoreError::UnexpectedReply(other.to_string())),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        replacement: Replacement<'_>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();

        let mut invocation = self.compare_and_swap.key(key);
        invocation
            .arg(if expected.is_none() { "1" } else { "0" })
            .arg(expected.unwrap_or_default());

        match replacement {
            Replacement::Set { value, ttl } => {
                invocation.arg("set").arg(value).arg(ttl_seconds(ttl));
            }
            Replacement::Delete => {
                invocation.arg("del").arg("").arg(0);
            }
        }

        let swapped: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }
}
