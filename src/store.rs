//! Work object storage.
//!
//! Every stored work carries a version token. Writes must present the token
//! they read; a write against a newer version is rejected with `Conflict`,
//! so a read-modify-write never silently overwrites a concurrent update.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::model::{WorkObject, FIELD_MODIFY_DATE};

/// Which parts of a work a write replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Components {
    pub metadata: bool,
    pub fields: bool,
    pub files: bool,
}

impl Components {
    pub const ALL: Self = Self {
        metadata: true,
        fields: true,
        files: true,
    };
    pub const FIELDS: Self = Self {
        metadata: false,
        fields: true,
        files: false,
    };
}

/// Trait for storage backends
#[async_trait]
pub trait WorkBackend: Send + Sync {
    async fn get(&self, namespace: &str, id: &str) -> Result<Option<WorkObject>, AppError>;
    async fn create(&self, work: WorkObject) -> Result<WorkObject, AppError>;
    async fn update(&self, work: WorkObject, components: Components) -> Result<WorkObject, AppError>;
    async fn delete(&self, namespace: &str, id: &str) -> Result<bool, AppError>;
}

/// Merge `incoming` into `stored` after checking the version token.
fn commit(stored: &WorkObject, incoming: WorkObject, components: Components) -> Result<WorkObject, AppError> {
    if stored.version != incoming.version {
        tracing::warn!(
            work_id = %stored.id,
            stored = stored.version,
            presented = incoming.version,
            "rejecting update against stale version"
        );
        return Err(AppError::conflict(format!(
            "{} was modified by another request",
            stored.id
        )));
    }

    let now = Utc::now();
    let mut next = stored.clone();
    if components.metadata {
        next.metadata = incoming.metadata;
    }
    if components.fields {
        next.fields = incoming.fields;
    }
    if components.files {
        next.files = incoming.files;
    }
    next.fields.set(FIELD_MODIFY_DATE, now.to_rfc3339());
    next.version = stored.version + 1;
    next.modified_at = now;
    Ok(next)
}

fn not_found(id: &str) -> AppError {
    AppError::not_found(format!("{id} was not found"))
}

/// In-process backend used for development and tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<(String, String), WorkObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, id: &str) -> (String, String) {
        (namespace.to_string(), id.to_string())
    }
}

#[async_trait]
impl WorkBackend for MemoryStore {
    async fn get(&self, namespace: &str, id: &str) -> Result<Option<WorkObject>, AppError> {
        let guard = self.inner.read().await;
        Ok(guard.get(&Self::key(namespace, id)).cloned())
    }

    async fn create(&self, work: WorkObject) -> Result<WorkObject, AppError> {
        let mut guard = self.inner.write().await;
        let key = Self::key(&work.namespace, &work.id);
        if guard.contains_key(&key) {
            return Err(AppError::conflict(format!("{} already exists", work.id)));
        }
        guard.insert(key, work.clone());
        Ok(work)
    }

    async fn update(&self, work: WorkObject, components: Components) -> Result<WorkObject, AppError> {
        let mut guard = self.inner.write().await;
        let key = Self::key(&work.namespace, &work.id);
        let stored = guard.get(&key).ok_or_else(|| not_found(&work.id))?;
        let next = commit(stored, work, components)?;
        guard.insert(key, next.clone());
        Ok(next)
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<bool, AppError> {
        let mut guard = self.inner.write().await;
        Ok(guard.remove(&Self::key(namespace, id)).is_some())
    }
}

/// Redis-based backend
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create Redis client: {}", e)))?;

        Ok(Self { client })
    }

    /// Test the Redis connection
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to connect to Redis: {}", e)))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis PING failed: {}", e)))?;

        Ok(())
    }

    fn build_redis_key(&self, namespace: &str, id: &str) -> String {
        format!("libra:work:{}:{}", namespace, id)
    }
}

fn decode(json: &str) -> Result<WorkObject, AppError> {
    serde_json::from_str(json)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to deserialize work: {}", e)))
}

fn encode(work: &WorkObject) -> Result<String, AppError> {
    serde_json::to_string(work)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize work: {}", e)))
}

#[async_trait]
impl WorkBackend for RedisStore {
    async fn get(&self, namespace: &str, id: &str) -> Result<Option<WorkObject>, AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis connection failed: {}", e)))?;

        let data: Option<String> = conn.get(self.build_redis_key(namespace, id)).await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis GET failed: {}", e)))?;

        data.as_deref().map(decode).transpose()
    }

    async fn create(&self, work: WorkObject) -> Result<WorkObject, AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis connection failed: {}", e)))?;

        let created: bool = conn.set_nx(self.build_redis_key(&work.namespace, &work.id), encode(&work)?).await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis SETNX failed: {}", e)))?;

        if !created {
            return Err(AppError::conflict(format!("{} already exists", work.id)));
        }
        Ok(work)
    }

    async fn update(&self, work: WorkObject, components: Components) -> Result<WorkObject, AppError> {
        // WATCH is per connection, so this needs a dedicated one.
        let mut conn = self.client.get_async_connection().await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis connection failed: {}", e)))?;

        let redis_key = self.build_redis_key(&work.namespace, &work.id);
        redis::cmd("WATCH")
            .arg(&redis_key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis WATCH failed: {}", e)))?;

        let data: Option<String> = conn.get(&redis_key).await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis GET failed: {}", e)))?;
        let Some(json) = data else {
            return Err(not_found(&work.id));
        };

        let id = work.id.clone();
        let next = commit(&decode(&json)?, work, components)?;

        let committed: Option<()> = redis::pipe()
            .atomic()
            .set(&redis_key, encode(&next)?)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis EXEC failed: {}", e)))?;

        match committed {
            Some(()) => Ok(next),
            None => Err(AppError::conflict(format!("{id} was modified by another request"))),
        }
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<bool, AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis connection failed: {}", e)))?;

        let deleted: i32 = conn.del(self.build_redis_key(namespace, id)).await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Redis DEL failed: {}", e)))?;

        Ok(deleted > 0)
    }
}

/// Store wrapper that can use different backends
#[derive(Clone)]
pub struct WorkStore {
    backend: Arc<dyn WorkBackend>,
}

impl WorkStore {
    pub fn new(backend: impl WorkBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Fetch a work; a missing work is `NotFound`.
    pub async fn fetch(&self, namespace: &str, id: &str) -> Result<WorkObject, AppError> {
        self.backend
            .get(namespace, id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    pub async fn create(&self, work: WorkObject) -> Result<WorkObject, AppError> {
        self.backend.create(work).await
    }

    /// Write the selected components; `work.version` must match the stored one.
    pub async fn update(&self, work: WorkObject, components: Components) -> Result<WorkObject, AppError> {
        self.backend.update(work, components).await
    }

    pub async fn delete(&self, namespace: &str, id: &str) -> Result<(), AppError> {
        if self.backend.delete(namespace, id).await? {
            Ok(())
        } else {
            Err(not_found(id))
        }
    }
}
