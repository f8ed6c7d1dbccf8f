use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub api_url: String, // Base URL of the NL-to-SQL service
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    pub recommendation_debounce_ms: u64,
    pub session_idle_timeout_secs: u64, // Sessions unused this long are dropped
}

impl WorkflowConfig {
    pub fn recommendation_debounce(&self) -> Duration {
        Duration::from_millis(self.recommendation_debounce_ms)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub backend: BackendConfig,
    pub workflow: WorkflowConfig,
    pub data_dir: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory for data storage
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Base URL of the NL-to-SQL backend service
    #[arg(long)]
    pub backend_url: Option<String>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();

        // Start with default configuration
        let mut config_builder = Config::builder()
            .set_default("data_dir", defaults.data_dir)?
            .set_default("database.connection_string", defaults.database.connection_string)?
            .set_default("database.pool_size", defaults.database.pool_size as i64)?
            .set_default("web.host", defaults.web.host)?
            .set_default("web.port", defaults.web.port as i64)?
            .set_default("backend.api_url", defaults.backend.api_url)?
            .set_default("backend.timeout_secs", defaults.backend.timeout_secs as i64)?
            .set_default(
                "workflow.recommendation_debounce_ms",
                defaults.workflow.recommendation_debounce_ms as i64,
            )?
            .set_default(
                "workflow.session_idle_timeout_secs",
                defaults.workflow.session_idle_timeout_secs as i64,
            )?;

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/aura-sql/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // AURA_SQL__BACKEND__API_URL and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix("AURA_SQL")
                .prefix_separator("__")
                .separator("__"),
        );

        // Build the config
        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(data_dir) = &args.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(backend_url) = &args.backend_url {
            config.backend.api_url = backend_url.clone();
        }

        Ok(config)
    }

    /// Location of the DuckDB file holding connections, secrets and history.
    /// Relative paths live inside `data_dir`.
    pub fn database_path(&self) -> String {
        let conn = &self.database.connection_string;
        if conn == ":memory:" || Path::new(conn).is_absolute() {
            return conn.clone();
        }
        PathBuf::from(&self.data_dir)
            .join(conn)
            .to_string_lossy()
            .into_owned()
    }
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                connection_string: "aura-sql.db".to_string(),
                pool_size: 5,
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            backend: BackendConfig {
                api_url: "http://localhost:8000".to_string(),
                timeout_secs: 60,
            },
            workflow: WorkflowConfig {
                recommendation_debounce_ms: 5000,
                session_idle_timeout_secs: 3600,
            },
            data_dir: "data".to_string(),
        }
    }
}
