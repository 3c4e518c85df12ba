use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

const MAX_TRACKED_USERS: u64 = 100_000;

/// Backing store for user→engine assignments. Swappable so multi-process
/// deployments can point all workers at one shared store; the default is
/// process-local memory.
#[async_trait]
pub trait AffinityBackend: Send + Sync {
    async fn get(&self, user_id: &str) -> Option<String>;
    async fn put(&self, user_id: &str, engine_key: &str);
}

/// In-memory backend. Entries expire a fixed TTL after assignment (not
/// sliding); an expired entry simply reads as a miss.
pub struct MemoryAffinity {
    inner: Cache<String, String>,
}

impl MemoryAffinity {
    pub fn new(ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(MAX_TRACKED_USERS)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }
}

#[async_trait]
impl AffinityBackend for MemoryAffinity {
    async fn get(&self, user_id: &str) -> Option<String> {
        self.inner.get(user_id).await
    }

    async fn put(&self, user_id: &str, engine_key: &str) {
        self.inner
            .insert(user_id.to_string(), engine_key.to_string())
            .await;
    }
}

#[derive(Clone)]
pub struct AffinityStore {
    backend: Arc<dyn AffinityBackend>,
}

impl AffinityStore {
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            backend: Arc::new(MemoryAffinity::new(ttl)),
        }
    }

    pub fn with_backend(backend: Arc<dyn AffinityBackend>) -> Self {
        Self { backend }
    }

    /// Returns the user's assignment only while it references a configured
    /// engine. A stale key (engine removed from the registry) reads as a
    /// miss and the caller assigns fresh.
    pub async fn resolve(&self, user_id: &str, valid_keys: &[String]) -> Option<String> {
        let key = self.backend.get(user_id).await?;
        if valid_keys.iter().any(|k| *k == key) {
            Some(key)
        } else {
            tracing::debug!(user_id, engine = %key, "sticky assignment references removed engine");
            None
        }
    }

    /// Last-writer-wins; assignment is idempotent so concurrent writers for
    /// the same user are harmless.
    pub async fn assign(&self, user_id: &str, engine_key: &str) {
        self.backend.put(user_id, engine_key).await;
        tracing::info!(user_id, engine = engine_key, "sticky assignment created");
    }
}
