//! Configuration system for Warden.
//!
//! Configuration is loaded from multiple sources with the following
//! precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `WARDEN_SERVER_HOST` - Server bind address
//! - `WARDEN_SERVER_PORT` - Server port
//! - `WARDEN_DATABASE_TYPE` - Storage backend: "memory", "sqlite" or "postgres"
//! - `WARDEN_DATABASE_URL` - Database connection URL
//! - `WARDEN_LOG_LEVEL` - Log level (trace, debug, info, warn, error)

use config::Config;
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;

use crate::errors::{LicenseError, LicenseResult};

/// Global configuration singleton.
static CONFIG: OnceLock<WardenConfig> = OnceLock::new();

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Storage backend: "memory", "sqlite" or "postgres"
    pub db_type: String,
    /// SQLite connection URL
    pub sqlite_url: String,
    /// PostgreSQL connection URL
    pub postgres_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://warden.db".to_string(),
            postgres_url: "postgres://localhost/warden".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl WardenConfig {
    /// Load configuration from file and environment.
    ///
    /// Later sources override earlier ones: defaults, then an optional
    /// `config.toml`, then `WARDEN_*` environment variables.
    fn load() -> LicenseResult<Self> {
        let builder = Config::builder()
            .set_default("server.host", "127.0.0.1")
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_default("server.port", 8080)
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_default("database.db_type", "sqlite")
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_default("database.sqlite_url", "sqlite://warden.db")
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_default("database.postgres_url", "postgres://localhost/warden")
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_default("logging.level", "info")
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            // Load from config.toml (optional)
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables
            .set_override_option("server.host", env::var("WARDEN_SERVER_HOST").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "server.port",
                env::var("WARDEN_SERVER_PORT")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("database.db_type", env::var("WARDEN_DATABASE_TYPE").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "database.sqlite_url",
                env::var("WARDEN_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("sqlite")),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "database.postgres_url",
                env::var("WARDEN_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("postgres")),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("logging.level", env::var("WARDEN_LOG_LEVEL").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?;

        let settings = builder
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| LicenseError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.server.port == 0 {
            return Err(LicenseError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        match self.database.db_type.as_str() {
            "memory" | "sqlite" | "postgres" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "database.db_type must be 'memory', 'sqlite' or 'postgres', got '{other}'"
                )));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// Loads on first access and caches the validated result.
pub fn get_config() -> LicenseResult<&'static WardenConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = WardenConfig::load()?;
    config.validate()?;

    // Another thread may have beaten us to it; either copy is fine.
    let _ = CONFIG.set(config.clone());

    Ok(CONFIG.get().expect("config was just set"))
}

/// Initialize configuration explicitly.
///
/// Call this early in your application to catch configuration errors.
pub fn init_config() -> LicenseResult<&'static WardenConfig> {
    get_config()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = WardenConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = WardenConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_db_type_is_rejected() {
        let mut config = WardenConfig::default();
        config.database.db_type = "mongodb".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("db_type"));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut config = WardenConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }
}
