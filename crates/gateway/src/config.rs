use common::{Environment, LogLevel};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub log_level: LogLevel,
    pub environment: Environment,
    pub max_upload_mb: usize,
    /// `*` for any origin, otherwise a comma-separated list.
    pub cors_allow_origins: String,
}

impl GatewayConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// Explicit origins, or `None` when any origin is allowed.
    pub fn cors_origins(&self) -> Option<Vec<String>> {
        let raw = self.cors_allow_origins.trim();
        if raw == "*" {
            return None;
        }
        Some(
            raw.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            log_level: LogLevel::Info,
            environment: Environment::Development,
            max_upload_mb: 100,
            cors_allow_origins: "*".to_string(),
        }
    }
}

pub fn get_configuration() -> Result<GatewayConfig, config::ConfigError> {
    let config = config::Config::builder()
        .set_default("bind_addr", "0.0.0.0:8000")?
        .set_default("log_level", "info")?
        .set_default("environment", "development")?
        .set_default("max_upload_mb", 100)?
        .set_default("cors_allow_origins", "*")?
        .add_source(
            config::Environment::with_prefix("GATEWAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    config.try_deserialize::<GatewayConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: [&str; 3] = [
        "GATEWAY_BIND_ADDR",
        "GATEWAY_MAX_UPLOAD_MB",
        "GATEWAY_CORS_ALLOW_ORIGINS",
    ];

    fn clear_env() {
        for var in VARS {
            // SAFETY: tests touching the environment are serialised
            unsafe { env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = get_configuration().unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.max_upload_bytes(), 100 * 1024 * 1024);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.cors_origins().is_none());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        unsafe {
            env::set_var("GATEWAY_BIND_ADDR", "127.0.0.1:9000");
            env::set_var("GATEWAY_MAX_UPLOAD_MB", "5");
            env::set_var(
                "GATEWAY_CORS_ALLOW_ORIGINS",
                "https://a.example, https://b.example",
            );
        }

        let config = get_configuration().unwrap();
        clear_env();

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.max_upload_mb, 5);
        assert_eq!(
            config.cors_origins().unwrap(),
            vec!["https://a.example", "https://b.example"]
        );
    }
}
