use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd};

use super::{ScanPage, SetCondition, SetOptions, Store, StoreError, StoreResult};

/// A [`Store`] backed by a Redis server.
///
/// A single multiplexed connection is shared by all operations. It is opened by
/// [`Store::connect`] and dropped by [`Store::disconnect`]; operations in between fail with
/// [`StoreError::NotConnected`].
pub struct RedisStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("client", &self.client)
            .field("connected", &self.connection.lock().is_some())
            .finish()
    }
}

impl RedisStore {
    /// Creates a store for the Redis server at `url`, without connecting yet.
    pub fn open(url: &str) -> StoreResult<Self> {
        Ok(Self {
            client: Client::open(url)?,
            connection: Mutex::new(None),
        })
    }

    fn connection(&self) -> StoreResult<MultiplexedConnection> {
        self.connection
            .lock()
            .clone()
            .ok_or(StoreError::NotConnected("redis"))
    }
}

/// Builds the `SET` command for the given options.
fn set_command(key: &str, value: &str, options: &SetOptions) -> Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    match options.expiry {
        Some(expiry) => {
            let millis = u64::try_from(expiry.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(millis);
        }
        None if options.keep_ttl => {
            cmd.arg("KEEPTTL");
        }
        None => {}
    }
    match options.condition {
        Some(SetCondition::NotExists) => {
            cmd.arg("NX");
        }
        Some(SetCondition::Exists) => {
            cmd.arg("XX");
        }
        None => {}
    }
    cmd
}

#[async_trait]
impl Store for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> StoreResult<()> {
        if self.connection.lock().is_some() {
            return Ok(());
        }
        let connection = self.client.get_multiplexed_async_connection().await?;
        tracing::debug!(
            addr = ?self.client.get_connection_info().addr,
            "Connected to redis"
        );
        *self.connection.lock() = Some(connection);
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        if self.connection.lock().take().is_some() {
            tracing::debug!("Disconnected from redis");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut connection = self.connection()?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut connection)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, options: &SetOptions) -> StoreResult<()> {
        let mut connection = self.connection()?;
        // `SET` replies with nil instead of `OK` when its condition is not met.
        let _reply: Option<String> = set_command(key, value, options)
            .query_async(&mut connection)
            .await?;
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut connection = self.connection()?;
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut connection)
            .await?;
        Ok(values)
    }

    async fn mset(&self, pairs: &[(String, String)]) -> StoreResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut connection = self.connection()?;
        let mut cmd = redis::cmd("MSET");
        for (key, value) in pairs {
            cmd.arg(key).arg(value);
        }
        let _: () = cmd.query_async(&mut connection).await?;
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let mut connection = self.connection()?;
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut connection)
            .await?;
        Ok(ScanPage { cursor, keys })
    }

    async fn flush_db(&self) -> StoreResult<()> {
        let mut connection = self.connection()?;
        let _: () = redis::cmd("FLUSHDB").query_async(&mut connection).await?;
        Ok(())
    }
}
