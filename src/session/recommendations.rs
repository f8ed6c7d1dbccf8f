use crate::backend::QueryBackend;
use crate::session::ContextId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a caller sees for one context's suggested questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "kebab-case")]
pub enum RecommendationState {
    Idle,
    Fetching,
    Loaded(Vec<String>),
    Failed(String),
}

enum Slot {
    Pending { ticket: u64, timer: JoinHandle<()> },
    Loaded(Vec<String>),
    Failed(String),
}

#[derive(Default)]
struct CacheInner {
    slots: HashMap<ContextId, Slot>,
    next_ticket: u64,
}

/// Session-scoped recommendations keyed by context.
///
/// The first `get` for a key starts a debounce timer; the backend is asked once
/// the delay elapses. Loaded entries live until invalidated. A failed fetch
/// keeps its message but no data, so the next `get` retries.
pub struct RecommendationCache {
    backend: Arc<dyn QueryBackend>,
    debounce: Duration,
    inner: Arc<Mutex<CacheInner>>,
}

impl RecommendationCache {
    pub fn new(backend: Arc<dyn QueryBackend>, debounce: Duration) -> Self {
        Self {
            backend,
            debounce,
            inner: Arc::new(Mutex::new(CacheInner::default())),
        }
    }

    pub fn get(&self, key: &ContextId) -> RecommendationState {
        let mut inner = lock(&self.inner);
        match inner.slots.get(key) {
            Some(Slot::Loaded(recs)) => return RecommendationState::Loaded(recs.clone()),
            Some(Slot::Pending { .. }) => return RecommendationState::Fetching,
            Some(Slot::Failed(_)) | None => {}
        }

        inner.next_ticket += 1;
        let ticket = inner.next_ticket;
        let timer = tokio::spawn(fetch_after_debounce(
            self.backend.clone(),
            self.inner.clone(),
            key.clone(),
            ticket,
            self.debounce,
        ));
        debug!("Scheduled recommendations for {} (ticket {})", key, ticket);
        inner.slots.insert(key.clone(), Slot::Pending { ticket, timer });
        RecommendationState::Fetching
    }

    /// Current state without scheduling anything.
    pub fn peek(&self, key: &ContextId) -> RecommendationState {
        match lock(&self.inner).slots.get(key) {
            Some(Slot::Loaded(recs)) => RecommendationState::Loaded(recs.clone()),
            Some(Slot::Pending { .. }) => RecommendationState::Fetching,
            Some(Slot::Failed(msg)) => RecommendationState::Failed(msg.clone()),
            None => RecommendationState::Idle,
        }
    }

    /// Abort a pending fetch for `key`, keeping any loaded entry.
    pub fn cancel(&self, key: &ContextId) {
        let mut inner = lock(&self.inner);
        if !matches!(inner.slots.get(key), Some(Slot::Pending { .. })) {
            return;
        }
        if let Some(Slot::Pending { timer, .. }) = inner.slots.remove(key) {
            timer.abort();
            debug!("Cancelled pending recommendations for {}", key);
        }
    }

    pub fn invalidate(&self, key: &ContextId) {
        if let Some(Slot::Pending { timer, .. }) = lock(&self.inner).slots.remove(key) {
            timer.abort();
        }
    }

    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        for (_, slot) in inner.slots.drain() {
            if let Slot::Pending { timer, .. } = slot {
                timer.abort();
            }
        }
    }
}

impl Drop for RecommendationCache {
    fn drop(&mut self) {
        self.clear();
    }
}

fn lock(inner: &Mutex<CacheInner>) -> MutexGuard<'_, CacheInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn fetch_after_debounce(
    backend: Arc<dyn QueryBackend>,
    inner: Arc<Mutex<CacheInner>>,
    key: ContextId,
    ticket: u64,
    debounce: Duration,
) {
    tokio::time::sleep(debounce).await;
    let result = backend.recommendations(&key).await;

    let mut guard = lock(&inner);
    match guard.slots.get(&key) {
        Some(Slot::Pending { ticket: current, .. }) if *current == ticket => {}
        _ => {
            debug!("Dropping late recommendations for {} (ticket {})", key, ticket);
            return;
        }
    }

    let slot = match result {
        Ok(recs) => {
            info!("Loaded {} recommendations for {}", recs.len(), key);
            Slot::Loaded(recs)
        }
        Err(e) => {
            warn!("Failed to fetch recommendations for {}: {}", key, e);
            Slot::Failed(e.to_string())
        }
    };
    guard.slots.insert(key, slot);
}
