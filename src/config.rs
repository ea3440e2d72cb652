use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongodb,
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub connection_string: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    pub fixture_path: String,
    pub dry_run: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Mongodb,
            host: "localhost".to_string(),
            port: None,
            database: "flow_ops_db".to_string(),
            connection_string: None,
            max_connections: Some(5),
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            fixture_path: "fixtures/opsflow.json".to_string(),
            dry_run: false,
        }
    }
}

/// Values given on the command line; `None` keeps the loaded setting
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub backend: Option<StoreBackend>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub connection_string: Option<String>,
    pub fixture_path: Option<String>,
    pub dry_run: bool,
}

impl AppConfig {
    /// Load configuration from defaults, a config file and environment variables
    pub fn load(config_file: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // An explicit file must exist; the implicit `seed.*` file is optional
        config = match config_file {
            Some(path) => config.add_source(config::File::from(path).required(true)),
            None => config.add_source(config::File::with_name("seed").required(false)),
        };

        // Environment variables, e.g. OPSFLOW_SEED_STORE__DATABASE
        config = config.add_source(
            config::Environment::with_prefix("OPSFLOW_SEED")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(backend) = overrides.backend {
            self.store.backend = backend;
        }
        if let Some(host) = overrides.host {
            self.store.host = host;
        }
        if let Some(port) = overrides.port {
            self.store.port = Some(port);
        }
        if let Some(database) = overrides.database {
            self.store.database = database;
        }
        if let Some(connection_string) = overrides.connection_string {
            self.store.connection_string = Some(connection_string);
        }
        if let Some(fixture_path) = overrides.fixture_path {
            self.seed.fixture_path = fixture_path;
        }
        self.seed.dry_run |= overrides.dry_run;
        self
    }
}

impl StoreConfig {
    /// Connection URL from config, then the backend's environment variable,
    /// then host/port/database
    pub fn connection_url(&self) -> String {
        if let Some(connection_string) = &self.connection_string {
            return connection_string.clone();
        }

        let env_var = match self.backend {
            StoreBackend::Mongodb => Some("MONGODB_URI"),
            StoreBackend::Postgres => Some("DATABASE_URL"),
            StoreBackend::Memory => None,
        };
        if let Some(url) = env_var.and_then(|name| std::env::var(name).ok()) {
            return url;
        }

        self.default_url()
    }

    fn default_url(&self) -> String {
        match self.backend {
            StoreBackend::Mongodb => {
                format!("mongodb://{}:{}", self.host, self.port.unwrap_or(27017))
            }
            StoreBackend::Postgres => format!(
                "postgres://postgres:password@{}:{}/{}",
                self.host,
                self.port.unwrap_or(5432),
                self.database
            ),
            StoreBackend::Memory => "memory://".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_target_flow_ops_db() {
        let config = AppConfig::default();
        assert_eq!(config.store.backend, StoreBackend::Mongodb);
        assert_eq!(config.store.database, "flow_ops_db");
        assert_eq!(config.store.default_url(), "mongodb://localhost:27017");
        assert_eq!(config.seed.fixture_path, "fixtures/opsflow.json");
        assert!(!config.seed.dry_run);
    }

    #[test]
    fn test_postgres_url_is_built_from_parts() {
        let store = StoreConfig {
            backend: StoreBackend::Postgres,
            host: "db".to_string(),
            port: Some(6543),
            database: "seeded".to_string(),
            ..StoreConfig::default()
        };
        assert_eq!(store.default_url(), "postgres://postgres:password@db:6543/seeded");
    }

    #[test]
    fn test_connection_string_wins() {
        let store = StoreConfig {
            connection_string: Some("mongodb://replica:27018/?replicaSet=rs0".to_string()),
            ..StoreConfig::default()
        };
        assert_eq!(store.connection_url(), "mongodb://replica:27018/?replicaSet=rs0");
    }

    #[test]
    fn test_overrides_replace_only_given_values() {
        let config = AppConfig::default().with_overrides(ConfigOverrides {
            backend: Some(StoreBackend::Memory),
            database: Some("scratch".to_string()),
            dry_run: true,
            ..ConfigOverrides::default()
        });
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.database, "scratch");
        assert_eq!(config.store.host, "localhost");
        assert!(config.seed.dry_run);
        assert_eq!(config.store.connection_url(), "memory://");
    }
}
