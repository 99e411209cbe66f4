use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub livestream: LivestreamConfig,
    pub auth: AuthConfig,
    pub scheduler: SchedulerConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("storage", &self.storage)
            .field("logging", &self.logging)
            .field("livestream", &self.livestream)
            .field("auth", &"<redacted>")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the KV file and the logs/ directory.
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn db_path(&self) -> std::path::PathBuf {
        Path::new(&self.data_dir).join("studiocast.redb")
    }

    #[must_use]
    pub fn log_dir(&self) -> std::path::PathBuf {
        Path::new(&self.data_dir).join("logs")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty"
    pub format: String,
    /// Log file name inside the storage log directory.
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            file_name: "stream.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivestreamConfig {
    /// Base RTMP URL of the origin server, e.g. "rtmp://127.0.0.1:1935".
    pub srs_rtmp_base: String,
    /// Root directory for HLS output trees.
    pub hls_base_dir: String,
    /// Upper bound on simultaneously running transcoder children.
    pub max_concurrent_transcoders: usize,
    /// Seconds to wait after SIGTERM before SIGKILL on supervisor stop.
    pub stop_grace_seconds: u64,
}

impl Default for LivestreamConfig {
    fn default() -> Self {
        Self {
            srs_rtmp_base: "rtmp://127.0.0.1:1935".to_string(),
            hls_base_dir: "./hls".to_string(),
            max_concurrent_transcoders: 8,
            stop_grace_seconds: 5,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Absolute base URL used when building OAuth redirect URLs.
    pub site_url: String,
    /// Google OAuth credentials. Google login is disabled when unset.
    pub google_client_id: String,
    pub google_client_secret: String,
    /// Symmetric key for signing viewer session cookies.
    pub cookie_secret: String,
}

impl AuthConfig {
    #[must_use]
    pub fn google_login_enabled(&self) -> bool {
        !self.google_client_id.is_empty() && !self.google_client_secret.is_empty()
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("site_url", &self.site_url)
            .field("google_client_id", &self.google_client_id)
            .field("google_client_secret", &"<redacted>")
            .field("cookie_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_seconds: 30 }
    }
}

impl Config {
    /// Load configuration from an optional TOML file plus the environment.
    ///
    /// Layering, weakest first: defaults, `studiocast.toml` (or `$STUDIOCAST_CONFIG`),
    /// `STUDIOCAST_*` variables, then the handful of flat variables the deployment
    /// environment historically sets (`SITE_URL`, `GOOGLE_CLIENT_ID`,
    /// `GOOGLE_CLIENT_SECRET`, `MAX_CONCURRENT_TRANSCODERS`, `SRS_RTMP_BASE`,
    /// `HLS_BASE_DIR`).
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("STUDIOCAST_CONFIG").unwrap_or_else(|_| "studiocast.toml".to_string());

        let mut builder = ConfigBuilder::builder();
        if Path::new(&config_path).exists() {
            builder = builder.add_source(File::with_name(&config_path));
        }
        builder = builder.add_source(
            Environment::with_prefix("STUDIOCAST")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: Self = builder.build()?.try_deserialize()?;
        cfg.apply_flat_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_flat_env(&mut self) {
        if let Ok(v) = std::env::var("SITE_URL") {
            self.auth.site_url = v;
        }
        if let Ok(v) = std::env::var("GOOGLE_CLIENT_ID") {
            self.auth.google_client_id = v;
        }
        if let Ok(v) = std::env::var("GOOGLE_CLIENT_SECRET") {
            self.auth.google_client_secret = v;
        }
        if let Ok(v) = std::env::var("SRS_RTMP_BASE") {
            self.livestream.srs_rtmp_base = v;
        }
        if let Ok(v) = std::env::var("HLS_BASE_DIR") {
            self.livestream.hls_base_dir = v;
        }
        if let Ok(v) = std::env::var("MAX_CONCURRENT_TRANSCODERS") {
            if let Ok(n) = v.parse::<usize>() {
                self.livestream.max_concurrent_transcoders = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let max = self.livestream.max_concurrent_transcoders;
        if max == 0 || max > 100 {
            return Err(ConfigError::Message(format!(
                "max_concurrent_transcoders must be in (0, 100], got {max}"
            )));
        }
        if self.scheduler.tick_seconds == 0 {
            return Err(ConfigError::Message(
                "scheduler.tick_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_pass_validation() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.livestream.max_concurrent_transcoders, 8);
        assert_eq!(cfg.scheduler.tick_seconds, 30);
    }

    #[test]
    fn test_transcoder_cap_bounds() {
        let mut cfg = Config::default();
        cfg.livestream.max_concurrent_transcoders = 0;
        assert!(cfg.validate().is_err());
        cfg.livestream.max_concurrent_transcoders = 101;
        assert!(cfg.validate().is_err());
        cfg.livestream.max_concurrent_transcoders = 100;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_google_login_requires_both_credentials() {
        let mut cfg = Config::default();
        assert!(!cfg.auth.google_login_enabled());
        cfg.auth.google_client_id = "id".to_string();
        assert!(!cfg.auth.google_login_enabled());
        cfg.auth.google_client_secret = "secret".to_string();
        assert!(cfg.auth.google_login_enabled());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut cfg = Config::default();
        cfg.auth.cookie_secret = "supersecret".to_string();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("supersecret"));
    }

    #[test]
    fn test_storage_paths() {
        let cfg = StorageConfig {
            data_dir: "/var/lib/studiocast".to_string(),
        };
        assert!(cfg.db_path().ends_with("studiocast.redb"));
        assert!(cfg.log_dir().ends_with("logs"));
    }
}
