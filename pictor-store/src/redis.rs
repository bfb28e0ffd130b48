use crate::edge::{EdgeCache, EdgeEntry};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ::redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const NAMESPACE: &str = "pictor:edge:";

/// Shared edge cache backed by Redis.
///
/// Every operation is best-effort: any I/O failure degrades to a miss or a
/// no-op. The service stays up when Redis is down; it just stops getting
/// edge hits.
pub struct RedisEdgeCache {
    conn: ConnectionManager,
}

impl RedisEdgeCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn namespaced(key: &str) -> String {
        format!("{NAMESPACE}{key}")
    }

    async fn scan_delete(&self, pattern: &str) -> redis::RedisResult<u64> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let n: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += n;
            }
            if next == 0 {
                return Ok(removed);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl EdgeCache for RedisEdgeCache {
    async fn get(&self, key: &str) -> Option<EdgeEntry> {
        let k = Self::namespaced(key);
        let mut conn = self.conn.clone();
        let fields: HashMap<String, Vec<u8>> = match redis::cmd("HGETALL")
            .arg(&k)
            .query_async(&mut conn)
            .await
        {
            Ok(fields) => fields,
            Err(e) => {
                debug!(key = %key, error = %e, "edge cache read failed, treating as miss");
                return None;
            }
        };
        let data = fields.get("data")?.clone();
        let content_type = fields
            .get("content_type")
            .and_then(|v| String::from_utf8(v.clone()).ok())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let cached_at = fields
            .get("cached_at")
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Some(EdgeEntry {
            bytes: Bytes::from(data),
            content_type,
            cached_at,
        })
    }

    async fn set(&self, key: &str, entry: EdgeEntry, ttl: Duration) {
        let k = Self::namespaced(key);
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::pipe()
            .cmd("HSET")
            .arg(&k)
            .arg("data")
            .arg(entry.bytes.as_ref())
            .arg("content_type")
            .arg(entry.content_type.as_str())
            .arg("cached_at")
            .arg(entry.cached_at.to_rfc3339())
            .ignore()
            .cmd("EXPIRE")
            .arg(&k)
            .arg(ttl.as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!(key = %key, error = %e, "edge cache write failed");
        }
    }

    async fn delete(&self, key: &str) {
        let k = Self::namespaced(key);
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> =
            redis::cmd("DEL").arg(&k).query_async(&mut conn).await;
        if let Err(e) = result {
            warn!(key = %key, error = %e, "edge cache delete failed");
        }
    }

    async fn delete_by_prefix(&self, prefix: &str) {
        let pattern = format!("{}*", Self::namespaced(prefix));
        match self.scan_delete(&pattern).await {
            Ok(removed) => debug!(prefix = %prefix, removed, "edge cache prefix purge"),
            Err(e) => warn!(prefix = %prefix, error = %e, "edge cache prefix purge failed"),
        }
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        matches!(
            redis::cmd("PING").query_async::<String>(&mut conn).await,
            Ok(pong) if pong == "PONG"
        )
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
