//! Application configuration

use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // External video-platform probing (pre-check gate)
    pub video_probe_call_timeout: Duration,
    pub video_probe_total_timeout: Duration,

    // Admin access
    pub admin_api_key: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),

            video_probe_call_timeout: Duration::from_secs(
                env::var("VIDEO_PROBE_CALL_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .unwrap_or(15),
            ),
            video_probe_total_timeout: Duration::from_secs(
                env::var("VIDEO_PROBE_TOTAL_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .unwrap_or(20),
            ),

            admin_api_key: env::var("ADMIN_API_KEY")
                .map_err(|_| ConfigError::Missing("ADMIN_API_KEY"))?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("ADMIN_API_KEY", "test-admin-key");
    }

    fn cleanup_config() {
        env::remove_var("DATABASE_URL");
        env::remove_var("ADMIN_API_KEY");
        env::remove_var("BIND_ADDRESS");
    }

    #[test]
    #[serial]
    fn missing_database_url_fails() {
        cleanup_config();
        env::set_var("ADMIN_API_KEY", "test-admin-key");
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::Missing("DATABASE_URL"))));
        cleanup_config();
    }

    #[test]
    #[serial]
    fn defaults_apply_when_optional_vars_absent() {
        setup_minimal_config();
        let config = Config::from_env().expect("valid config");
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.database_max_connections, 5);
        cleanup_config();
    }
}
