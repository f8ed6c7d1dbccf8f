use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Per-user slot holding at most one "current configuration" blob, the way a
/// browser keeps it in local storage. Blobs are raw JSON: they may be stale
/// or incomplete, and readers must validate them.
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Option<Value>;

    async fn save(&self, user_id: &str, blob: Value);

    async fn clear(&self, user_id: &str);
}

/// Process-lifetime client store. Nothing is written to disk.
#[derive(Default)]
pub struct MemoryClientStore {
    slots: RwLock<HashMap<String, Value>>,
}

impl MemoryClientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStore for MemoryClientStore {
    async fn load(&self, user_id: &str) -> Option<Value> {
        self.slots.read().await.get(user_id).cloned()
    }

    async fn save(&self, user_id: &str, blob: Value) {
        self.slots.write().await.insert(user_id.to_string(), blob);
    }

    async fn clear(&self, user_id: &str) {
        self.slots.write().await.remove(user_id);
    }
}
