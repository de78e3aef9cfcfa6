//! Networked cache backend over one or more Redis servers.
//!
//! Keys are spread across servers by hashing the canonical key with SHA-256,
//! so every client configured with the same server list agrees on where a
//! key lives. Each server gets one multiplexed connection, opened lazily on
//! first use and shared by all callers.
//!
//! Every command is bounded by the configured timeout. A timeout surfaces as
//! [`CacheError::Connection`]; the client treats read failures as misses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dscache_core::{CacheError, CacheResult};
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, FromRedisValue, RedisError};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use super::traits::{CacheBackend, CacheStats};

struct Shard {
    address: String,
    client: Client,
    connection: OnceCell<MultiplexedConnection>,
}

/// Cache backend talking to Redis servers.
pub struct RedisCacheBackend {
    shards: Vec<Shard>,
    timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RedisCacheBackend {
    /// Create a backend for `servers` (`host:port` or full `redis://` URLs).
    ///
    /// No connection is made until the first command.
    pub fn new(servers: &[String], timeout: Duration) -> CacheResult<Self> {
        if servers.is_empty() {
            return Err(CacheError::Connection(
                "no cache servers configured".to_string(),
            ));
        }

        let shards = servers
            .iter()
            .map(|server| {
                let address = normalize_address(server);
                let client = Client::open(address.as_str()).map_err(|e| {
                    CacheError::Connection(format!("invalid server address {server}: {e}"))
                })?;
                Ok(Shard {
                    address,
                    client,
                    connection: OnceCell::new(),
                })
            })
            .collect::<CacheResult<Vec<_>>>()?;

        Ok(Self {
            shards,
            timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Server URLs in shard order.
    pub fn addresses(&self) -> Vec<&str> {
        self.shards.iter().map(|s| s.address.as_str()).collect()
    }

    fn shard_for(&self, key: &str) -> &Shard {
        &self.shards[shard_index(key, self.shards.len())]
    }

    async fn connection(&self, shard: &Shard) -> CacheResult<MultiplexedConnection> {
        let connection = shard
            .connection
            .get_or_try_init(|| async {
                tokio::time::timeout(self.timeout, shard.client.get_multiplexed_async_connection())
                    .await
                    .map_err(|_| {
                        CacheError::Connection(format!("timed out connecting to {}", shard.address))
                    })?
                    .map_err(redis_error)
            })
            .await?;
        Ok(connection.clone())
    }

    async fn query<T: FromRedisValue>(&self, shard: &Shard, cmd: Cmd) -> CacheResult<T> {
        let mut connection = self.connection(shard).await?;
        let result: Result<T, RedisError> =
            tokio::time::timeout(self.timeout, cmd.query_async(&mut connection))
                .await
                .map_err(|_| {
                    CacheError::Connection(format!("command timed out on {}", shard.address))
                })?;
        result.map_err(redis_error)
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        let value: Option<Vec<u8>> = self.query(self.shard_for(key), cmd).await?;
        self.record_lookup(value.is_some());
        Ok(value)
    }

    async fn get_multi(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for (index, shard_keys) in group_by_shard(keys, self.shards.len()) {
            let mut cmd = redis::cmd("MGET");
            for key in &shard_keys {
                cmd.arg(key.as_str());
            }
            let values: Vec<Option<Vec<u8>>> = self.query(&self.shards[index], cmd).await?;
            for (key, value) in shard_keys.into_iter().zip(values) {
                self.record_lookup(value.is_some());
                if let Some(bytes) = value {
                    found.insert(key.clone(), bytes);
                }
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> CacheResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.query::<()>(self.shard_for(key), cmd).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let _removed: u64 = self.query(self.shard_for(key), cmd).await?;
        Ok(())
    }

    async fn delete_all(&self) -> CacheResult<()> {
        for shard in &self.shards {
            self.query::<()>(shard, redis::cmd("FLUSHDB")).await?;
        }
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let mut entry_count = 0u64;
        for shard in &self.shards {
            let size: u64 = self.query(shard, redis::cmd("DBSIZE")).await?;
            entry_count += size;
        }
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes: 0,
            evictions: 0,
        })
    }
}

/// `host:port` becomes `redis://host:port/`; URLs pass through.
fn normalize_address(server: &str) -> String {
    let server = server.trim();
    if server.contains("://") {
        server.to_string()
    } else {
        format!("redis://{server}/")
    }
}

/// Server index for `key` among `shard_count` servers.
fn shard_index(key: &str, shard_count: usize) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % shard_count as u64) as usize
}

/// Keys grouped per shard, keeping request order inside each group.
fn group_by_shard(keys: &[String], shard_count: usize) -> Vec<(usize, Vec<&String>)> {
    let mut groups: Vec<(usize, Vec<&String>)> = Vec::new();
    for key in keys {
        let index = shard_index(key, shard_count);
        match groups.iter_mut().find(|(i, _)| *i == index) {
            Some((_, group)) => group.push(key),
            None => groups.push((index, vec![key])),
        }
    }
    groups
}

fn redis_error(e: RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
    {
        CacheError::Connection(e.to_string())
    } else {
        CacheError::Transaction(e.to_string())
    }
}
