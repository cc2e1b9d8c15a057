use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use crate::models::IngestProgress;

/// Redis service for ingest job progress and processing locks
#[derive(Clone)]
pub struct RedisService {
    conn: ConnectionManager,
}

fn progress_key(job_id: &str) -> String {
    format!("ingest:progress:{}", job_id)
}

fn lock_key(content_hash: &str) -> String {
    format!("ingest:lock:{}", content_hash)
}

impl RedisService {
    /// Create a new Redis service with connection pooling
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Set a key with expiration (seconds)
    pub async fn set_ex<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(value)?;
        conn.set_ex::<_, _, ()>(key, serialized, ttl_seconds).await?;
        Ok(())
    }

    /// Get a key and deserialize
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    /// Delete a key
    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// Set a key only if it doesn't exist (for locking)
    /// Returns true if set successfully, false if key already exists
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    /// Ping Redis to check connection
    pub async fn ping(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }

    // ============ Ingest Progress ============

    pub async fn set_ingest_progress(&self, progress: &IngestProgress, ttl_seconds: u64) -> Result<()> {
        self.set_ex(&progress_key(&progress.job_id), progress, ttl_seconds).await
    }

    pub async fn get_ingest_progress(&self, job_id: &str) -> Result<Option<IngestProgress>> {
        self.get(&progress_key(job_id)).await
    }

    // ============ Processing Lock Operations ============

    /// Acquire processing lock (prevents the same content being ingested twice at once)
    pub async fn acquire_processing_lock(&self, content_hash: &str, job_id: &str, ttl_seconds: u64) -> Result<bool> {
        self.set_nx_ex(&lock_key(content_hash), job_id, ttl_seconds).await
    }

    /// Job currently holding the lock
    pub async fn get_processing_lock(&self, content_hash: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(lock_key(content_hash)).await?;
        Ok(value)
    }

    /// Release processing lock
    pub async fn release_processing_lock(&self, content_hash: &str) -> Result<()> {
        self.del(&lock_key(content_hash)).await
    }
}
