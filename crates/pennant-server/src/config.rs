//! Server configuration.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Runtime configuration, loaded from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Database connection URL (postgres:// or sqlite://).
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Redis connection URL for the evaluation cache.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// TTL for cached evaluations, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl ServerConfig {
    /// Loads configuration from `PENNANT_`-prefixed environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("PENNANT").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            database_url: default_database_url(),
            redis_url: default_redis_url(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost/pennant".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}
