use crate::session::{ConnectionConfig, ResolutionError};
use crate::store::client::ClientStore;
use crate::store::{ConnectionStore, SecretStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a session's connection configuration comes from. Sources are tried
/// in order: inline payload, saved connection, then the client-stored blob.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    pub inline: Option<ConnectionConfig>,
    pub connection_id: Option<i64>,
}

impl ConfigSource {
    pub fn inline(config: ConnectionConfig) -> Self {
        Self {
            inline: Some(config),
            connection_id: None,
        }
    }

    pub fn saved(connection_id: i64) -> Self {
        Self {
            inline: None,
            connection_id: Some(connection_id),
        }
    }

    /// Resume from whatever the client store holds.
    pub fn stored() -> Self {
        Self::default()
    }
}

pub struct SessionConfigResolver {
    connections: Arc<dyn ConnectionStore>,
    secrets: Arc<dyn SecretStore>,
    client: Arc<dyn ClientStore>,
}

impl SessionConfigResolver {
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        secrets: Arc<dyn SecretStore>,
        client: Arc<dyn ClientStore>,
    ) -> Self {
        Self {
            connections,
            secrets,
            client,
        }
    }

    /// Resolve a usable configuration. Only an unusable stored blob is
    /// written back (cleared); remembering the result is left to the caller.
    pub async fn resolve(
        &self,
        user_id: &str,
        source: &ConfigSource,
    ) -> Result<ConnectionConfig, ResolutionError> {
        let mut store_failure = None;

        if let Some(config) = &source.inline {
            match config.validate() {
                Ok(()) => {
                    debug!("Using inline configuration for {}", user_id);
                    return Ok(config.clone());
                }
                Err(e) => warn!("Ignoring inline configuration: {}", e),
            }
        }

        if let Some(id) = source.connection_id {
            match self.from_saved(user_id, id).await {
                Ok(Some(config)) => return Ok(config),
                Ok(None) => warn!("Saved connection {} not found for {}", id, user_id),
                Err(e) => {
                    warn!("Failed to load saved connection {}: {}", id, e);
                    store_failure = Some(e);
                }
            }
        }

        if let Some(config) = self.from_client_store(user_id).await {
            debug!("Resumed stored configuration for {}", user_id);
            return Ok(config);
        }

        Err(match store_failure {
            Some(e) => ResolutionError::Store(e),
            None => ResolutionError::ConfigNotFound,
        })
    }

    async fn from_saved(
        &self,
        user_id: &str,
        id: i64,
    ) -> Result<Option<ConnectionConfig>, String> {
        let Some(saved) = self
            .connections
            .get_connection(user_id, id)
            .await
            .map_err(|e| e.to_string())?
        else {
            return Ok(None);
        };

        // The secret is fetched separately; losing it only leaves the password blank.
        let password = match self.secrets.password(id).await {
            Ok(Some(password)) => password,
            Ok(None) => {
                warn!("No stored password for connection {}", id);
                String::new()
            }
            Err(e) => {
                warn!("Failed to fetch password for connection {}: {}", id, e);
                String::new()
            }
        };

        info!("Resolved saved connection '{}' ({})", saved.name, id);
        Ok(Some(saved.to_config(password)))
    }

    async fn from_client_store(&self, user_id: &str) -> Option<ConnectionConfig> {
        let blob = self.client.load(user_id).await?;
        let config = serde_json::from_value::<ConnectionConfig>(blob)
            .map_err(|e| e.to_string())
            .and_then(|config| {
                config.validate().map_err(|e| e.to_string())?;
                Ok(config)
            });

        match config {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Discarding stored configuration for {}: {}", user_id, e);
                self.client.clear(user_id).await;
                None
            }
        }
    }

    /// Keep `config` in the client store so a later session can resume it.
    pub async fn remember(&self, user_id: &str, config: &ConnectionConfig) {
        match serde_json::to_value(config) {
            Ok(blob) => self.client.save(user_id, blob).await,
            Err(e) => warn!("Failed to store configuration for {}: {}", user_id, e),
        }
    }
}
