use serde::Deserialize;
use std::time::Duration;

use crate::sync::SyncConfig;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    /// Delay before the first audit after a group is opened
    pub initial_delay_ms: u64,
    /// Delay before the audit that follows a membership or assignment change
    pub mutation_delay_ms: u64,
    /// How long a finished report stays readable from the cache
    pub report_retention_secs: u64,
}

impl AuditConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn mutation_delay(&self) -> Duration {
        Duration::from_millis(self.mutation_delay_ms)
    }

    pub fn report_retention(&self) -> Duration {
        Duration::from_secs(self.report_retention_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub store_backend: StoreBackend,
    /// Comma separated in the environment; empty allows any origin
    pub cors_allowed_origins: Vec<String>,
    pub audit: AuditConfig,
    pub sync: SyncConfig,
    pub db: DbConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(env: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("database_url", "postgresql://localhost/group_sync")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("store_backend", "postgres")?
            .set_default("cors_allowed_origins", Vec::<String>::new())?
            .set_default("audit.initial_delay_ms", 1000)?
            .set_default("audit.mutation_delay_ms", 1500)?
            .set_default("audit.report_retention_secs", 86_400)?
            .set_default("sync.max_concurrent_writes", 1)?
            .set_default("db.max_connections", 20)?
            .add_source(
                env.separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors_allowed_origins"),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_vars(vars: &[(&str, &str)]) -> Result<Config, config::ConfigError> {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_environment(config::Environment::default().source(Some(source)))
    }

    #[test]
    fn test_defaults() {
        let config = from_vars(&[]).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert_eq!(config.audit.initial_delay(), Duration::from_millis(1000));
        assert_eq!(config.audit.mutation_delay(), Duration::from_millis(1500));
        assert_eq!(config.audit.report_retention(), Duration::from_secs(86_400));
        assert_eq!(config.sync.max_concurrent_writes, 1);
        assert!(config.cors_allowed_origins.is_empty());
    }

    #[test]
    fn test_environment_overrides() {
        let config = from_vars(&[
            ("DATABASE_URL", "postgresql://db/coaching"),
            ("STORE_BACKEND", "memory"),
            ("AUDIT__MUTATION_DELAY_MS", "250"),
            ("SYNC__MAX_CONCURRENT_WRITES", "8"),
            ("DB__MAX_CONNECTIONS", "5"),
            ("CORS_ALLOWED_ORIGINS", "http://localhost:3000,https://coach.example.com"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "postgresql://db/coaching");
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.audit.mutation_delay_ms, 250);
        assert_eq!(config.audit.initial_delay_ms, 1000);
        assert_eq!(config.sync.max_concurrent_writes, 8);
        assert_eq!(config.db.max_connections, 5);
        assert_eq!(
            config.cors_allowed_origins,
            vec!["http://localhost:3000", "https://coach.example.com"]
        );
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(from_vars(&[("STORE_BACKEND", "sqlite")]).is_err());
    }
}
