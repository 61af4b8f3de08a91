//! Configuration for govledgerd

use govledger_core::{EventStorageConfig, GovernanceLedgerConfig, StalenessConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub staleness: StalenessConfig,

    #[serde(default)]
    pub integrity: IntegrityConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Events live in process memory only
    #[default]
    Memory,

    /// Events are persisted in PostgreSQL
    Postgres {
        url: String,

        #[serde(default = "default_pool_size")]
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn to_event_storage(&self) -> EventStorageConfig {
        match self {
            StorageConfig::Memory => EventStorageConfig::memory(),
            StorageConfig::Postgres {
                url,
                max_connections,
            } => EventStorageConfig::postgres(url.clone(), *max_connections),
        }
    }
}

/// A bearer token and the identity it resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub actor_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenGrant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleCondition {
    pub oracle_id: String,
    pub condition: String,
}

/// Oracles whose failures represent integrity conditions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityConfig {
    #[serde(default)]
    pub oracle_conditions: Vec<OracleCondition>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8090))
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Defaults, then the optional file, then `GOVLEDGER__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ServiceConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GOVLEDGER")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn ledger_config(&self) -> GovernanceLedgerConfig {
        GovernanceLedgerConfig {
            storage: self.storage.to_event_storage(),
            staleness: self.staleness.clone(),
            oracle_conditions: self
                .integrity
                .oracle_conditions
                .iter()
                .map(|entry| (entry.oracle_id.clone(), entry.condition.clone()))
                .collect::<HashMap<_, _>>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8090);
        assert!(config.server.enable_cors);
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.staleness.default_max_depth, 5);
        assert_eq!(config.staleness.max_depth_limit, 32);
        assert!(config.auth.tokens.is_empty());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = ServiceConfig::load(None).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.ledger_config().storage, EventStorageConfig::Memory);
    }

    #[test]
    fn file_sections_override_defaults() {
        let path = std::env::temp_dir().join(format!(
            "govledger-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"
[server]
listen_addr = "0.0.0.0:9000"

[staleness]
default_max_depth = 3

[[auth.tokens]]
token = "t-alice"
actor_id = "alice"
roles = ["reviewer"]

[[integrity.oracle_conditions]]
oracle_id = "oracle:integrity_check"
condition = "ORACLE_TAMPER"
"#,
        )
        .unwrap();

        let config = ServiceConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.staleness.default_max_depth, 3);
        assert_eq!(config.staleness.max_depth_limit, 32);
        assert_eq!(config.auth.tokens[0].actor_id, "alice");
        assert_eq!(
            config.ledger_config().oracle_conditions.get("oracle:integrity_check"),
            Some(&"ORACLE_TAMPER".to_string())
        );
    }

    #[test]
    fn postgres_storage_maps_to_event_storage() {
        let storage = StorageConfig::Postgres {
            url: "postgres://localhost/govledger".into(),
            max_connections: 8,
        };
        assert_eq!(
            storage.to_event_storage(),
            EventStorageConfig::postgres("postgres://localhost/govledger", 8)
        );
    }
}
