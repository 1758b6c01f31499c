//! KV store access (Redis)
//!
//! A shared multiplexed connection serves ordinary commands. The signal-bus
//! consumer asks for its own dedicated connection so blocking stream reads
//! never starve publishers.

use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::error::Result;

/// KV store handle
pub struct KvStore {
    client: redis::Client,
    manager: ConnectionManager,
}

impl KvStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        info!("Connected to KV store");
        Ok(Self { client, manager })
    }

    /// A dedicated connection for blocking stream reads.
    pub async fn dedicated_connection(&self) -> Result<ConnectionManager> {
        Ok(self.client.get_connection_manager().await?)
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    // ── strings ─────────────────────────────────────────────────

    pub async fn set_ex(&self, key: &str, value: &str, seconds: u64) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    pub async fn expire(&self, key: &str, seconds: i64) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn.expire(key, seconds as usize).await?;
        Ok(())
    }

    // ── hashes ──────────────────────────────────────────────────

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn();
        let entries: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(entries)
    }

    pub async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn.hdel(key, field).await?;
        Ok(())
    }

    // ── sets and sorted sets ────────────────────────────────────

    pub async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    pub async fn smembers(&self, key: &str) -> Result<HashSet<String>> {
        let mut conn = self.conn();
        let members: HashSet<String> = conn.smembers(key).await?;
        Ok(members)
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    // ── streams ─────────────────────────────────────────────────

    /// Append to a stream with an approximate length cap.
    pub async fn xadd_capped(&self, key: &str, payload: &str, maxlen: usize) -> Result<String> {
        let mut conn = self.conn();
        let id: String = conn
            .xadd_maxlen(key, StreamMaxlen::Approx(maxlen), "*", &[("payload", payload)])
            .await?;
        Ok(id)
    }

    /// Create a consumer group at the stream tail, tolerating an existing one.
    pub async fn ensure_group(&self, key: &str, group: &str) -> Result<()> {
        let mut conn = self.conn();
        let created: std::result::Result<String, redis::RedisError> =
            conn.xgroup_create_mkstream(key, group, "$").await;
        match created {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocking group read on a dedicated connection.
    pub async fn read_group(
        conn: &mut ConnectionManager,
        keys: &[String],
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<StreamReadReply> {
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms);
        let ids: Vec<&str> = keys.iter().map(|_| ">").collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let reply: StreamReadReply = conn.xread_options(&key_refs, &ids, &options).await?;
        Ok(reply)
    }

    pub async fn xack(&self, key: &str, group: &str, id: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn.xack(key, group, &[id]).await?;
        Ok(())
    }
}
