use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub security: SecurityConfig,

    pub mail: MailConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 8192 = 8MB)
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,

    /// Minimum accepted length for new passwords.
    pub min_password_length: usize,

    /// Inactivity timeout applied when a user has no personal preference.
    pub session_timeout_minutes: u32,

    /// Upper bound for both the per-user timeout and the cookie expiry.
    pub max_session_timeout_minutes: u32,

    /// Validity window of an emailed one-time code.
    pub otp_ttl_minutes: u32,

    /// Validity window of a password reset link.
    pub password_reset_ttl_minutes: u32,

    /// Role names whose holders must always pass a second factor.
    pub two_factor_required_roles: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
            min_password_length: 8,
            session_timeout_minutes: 30,
            max_session_timeout_minutes: 24 * 60,
            otp_ttl_minutes: 10,
            password_reset_ttl_minutes: 60,
            two_factor_required_roles: vec!["super_admin".to_string(), "admin".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Sender address for verification codes and reset links.
    pub from_address: String,

    /// Public base URL used to build links inside emails.
    pub app_url: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from_address: "no-reply@terraintrack.local".to_string(),
            app_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "terraintrack".to_string());

        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on session cookies.
    /// Set to false for local development without HTTPS.
    pub secure_cookies: bool,

    /// Backend for server-side session records.
    pub session_store: SessionStoreKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cors_allowed_origins: vec![
                "http://localhost:8080".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
            secure_cookies: true,
            session_store: SessionStoreKind::Memory,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/terraintrack.db".to_string(),
            log_level: "info".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("terraintrack").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".terraintrack").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let security = &self.security;

        if security.session_timeout_minutes == 0 {
            anyhow::bail!("security.session_timeout_minutes must be > 0");
        }

        if security.session_timeout_minutes > security.max_session_timeout_minutes {
            anyhow::bail!(
                "security.session_timeout_minutes ({}) exceeds max_session_timeout_minutes ({})",
                security.session_timeout_minutes,
                security.max_session_timeout_minutes
            );
        }

        if security.otp_ttl_minutes == 0 {
            anyhow::bail!("security.otp_ttl_minutes must be > 0");
        }

        if security.min_password_length < 8 {
            anyhow::bail!("security.min_password_length must be at least 8");
        }

        if self.observability.loki_enabled && self.observability.loki_url.is_empty() {
            anyhow::bail!("Loki URL cannot be empty when enabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.security.session_timeout_minutes, 30);
        assert_eq!(config.security.otp_ttl_minutes, 10);
        assert_eq!(config.server.session_store, SessionStoreKind::Memory);
        assert!(
            config
                .security
                .two_factor_required_roles
                .contains(&"super_admin".to_string())
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[security]"));
        assert!(toml_str.contains("session_store = \"memory\""));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [server]
            session_store = "sqlite"

            [security]
            session_timeout_minutes = 15
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.server.session_store, SessionStoreKind::Sqlite);
        assert_eq!(config.security.session_timeout_minutes, 15);

        assert_eq!(config.security.otp_ttl_minutes, 10);
    }

    #[test]
    fn test_validate_rejects_timeout_above_max() {
        let mut config = Config::default();
        config.security.session_timeout_minutes = config.security.max_session_timeout_minutes + 1;
        assert!(config.validate().is_err());
    }
}
