use crate::backend::QueryBackend;
use crate::config::AppConfig;
use crate::session::workflow::{SessionServices, WorkflowStateMachine};
use crate::store::client::ClientStore;
use crate::store::{ConnectionStore, HistoryStore, SecretStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tracing::{debug, info};

struct SessionEntry {
    session: Arc<WorkflowStateMachine>,
    last_used: Instant,
}

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub backend: Arc<dyn QueryBackend>,
    pub connections: Arc<dyn ConnectionStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub history: Arc<dyn HistoryStore>,
    pub client: Arc<dyn ClientStore>,
    // One guided session per user
    sessions: RwLock<HashMap<String, SessionEntry>>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn QueryBackend>,
        connections: Arc<dyn ConnectionStore>,
        secrets: Arc<dyn SecretStore>,
        history: Arc<dyn HistoryStore>,
        client: Arc<dyn ClientStore>,
    ) -> Self {
        Self {
            config,
            backend,
            connections,
            secrets,
            history,
            client,
            sessions: RwLock::new(HashMap::new()),
            startup_time: chrono::Utc::now(),
        }
    }

    fn services(&self) -> SessionServices {
        SessionServices {
            backend: self.backend.clone(),
            connections: self.connections.clone(),
            secrets: self.secrets.clone(),
            history: self.history.clone(),
            client: self.client.clone(),
            recommendation_debounce: self.config.workflow.recommendation_debounce(),
        }
    }

    /// The user's session, created on first use.
    pub async fn session_for(&self, user_id: &str) -> Arc<WorkflowStateMachine> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(user_id.to_string()).or_insert_with(|| {
            info!("Creating session for {}", user_id);
            SessionEntry {
                session: Arc::new(WorkflowStateMachine::new(user_id, &self.services())),
                last_used: Instant::now(),
            }
        });
        entry.last_used = Instant::now();
        entry.session.clone()
    }

    /// Forget the user's session; its pending recommendation timers stop with it.
    pub async fn end_session(&self, user_id: &str) -> Option<Arc<WorkflowStateMachine>> {
        self.sessions
            .write()
            .await
            .remove(user_id)
            .map(|entry| entry.session)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions not used for `idle`. Returns how many were dropped.
    pub async fn evict_idle(&self, idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|user_id, entry| {
            let keep = entry.last_used.elapsed() < idle;
            if !keep {
                info!("Evicting idle session for {}", user_id);
            }
            keep
        });
        before - sessions.len()
    }
}

/// Periodically evict idle sessions until the returned handle is aborted.
pub fn spawn_session_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    let idle = state.config.workflow.session_idle_timeout();
    let period = idle.clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut timer = interval(period);
        // Skip the first immediate tick
        timer.tick().await;
        loop {
            timer.tick().await;
            let evicted = state.evict_idle(idle).await;
            if evicted > 0 {
                debug!("Evicted {} idle sessions", evicted);
            }
        }
    })
}
