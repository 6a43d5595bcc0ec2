use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::broker::auth::{AllowAll, Authenticator, StaticCredentials};
use crate::broker::store::StoreConfig;
use crate::session::connection::{ConnectionSettings, HeartbeatPlan};

fn default_bind() -> String {
    "0.0.0.0:61613".to_string()
}

fn default_connect_timeout_seconds() -> u64 {
    30
}

fn default_heartbeat_ms() -> u64 {
    30_000
}

fn default_idle_timeout_seconds() -> u64 {
    300
}

fn default_cleanup_interval_seconds() -> u64 {
    60
}

fn default_status_interval_seconds() -> u64 {
    5
}

fn default_status_destination() -> String {
    "status".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Top-level configuration for the Tachyon broker.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// How long to wait for the initial CONNECT frame.
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    /// The server's preferred heartbeat intervals in milliseconds; 0 disables
    /// a direction outright.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            heartbeat_outgoing_ms: default_heartbeat_ms(),
            heartbeat_incoming_ms: default_heartbeat_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Detached sessions are evicted after this much idle time.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout_seconds(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_interval_seconds")]
    pub interval_seconds: u64,
    /// Topic name the reports are broadcast to.
    #[serde(default = "default_status_destination")]
    pub destination: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_status_interval_seconds(),
            destination: default_status_destination(),
        }
    }
}

/// Credential table for CONNECT authentication. With no users configured
/// every connection is accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub users: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Default tracing filter, overridable via RUST_LOG.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Load configuration from a path resolved via TACHYON_CONFIG, falling
    /// back to `config/tachyon.toml`. When neither the variable nor the
    /// default file is present, the built-in defaults apply.
    pub fn load_from_env() -> Result<Self> {
        let path = env_config_path();
        if std::env::var("TACHYON_CONFIG").is_err() && !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Load configuration from a specific TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let data = fs::read_to_string(path_ref)
            .with_context(|| format!("unable to read config {}", path_ref.display()))?;
        toml::from_str(&data).with_context(|| format!("invalid TOML config {}", path_ref.display()))
    }

    /// Validate schema-level invariants for ops usage.
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        if self.network.connect_timeout_seconds == 0 {
            bail!("network.connect_timeout_seconds must be > 0");
        }
        if self.sessions.idle_timeout_seconds == 0 {
            bail!("sessions.idle_timeout_seconds must be > 0");
        }
        if self.sessions.cleanup_interval_seconds == 0 {
            bail!("sessions.cleanup_interval_seconds must be > 0");
        }
        if self.status.interval_seconds == 0 {
            bail!("status.interval_seconds must be > 0");
        }
        if self.status.destination.is_empty() {
            bail!("status.destination must be non-empty");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.network
            .bind
            .parse()
            .with_context(|| format!("network.bind {} is not an address", self.network.bind))
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            connect_timeout: Duration::from_secs(self.network.connect_timeout_seconds),
            server_heartbeat: HeartbeatPlan {
                outgoing_ms: self.network.heartbeat_outgoing_ms,
                incoming_ms: self.network.heartbeat_incoming_ms,
            },
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            session_idle_timeout: Duration::from_secs(self.sessions.idle_timeout_seconds),
            status_destination: self.status.destination.clone(),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.cleanup_interval_seconds)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status.interval_seconds)
    }

    pub fn authenticator(&self) -> Arc<dyn Authenticator> {
        if self.auth.users.is_empty() {
            Arc::new(AllowAll)
        } else {
            Arc::new(StaticCredentials::new(self.auth.users.clone()))
        }
    }
}

fn env_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TACHYON_CONFIG") {
        PathBuf::from(path)
    } else {
        PathBuf::from("config/tachyon.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_yields_defaults() {
        let file = write_config("");
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.network.bind, "0.0.0.0:61613");
        assert_eq!(cfg.sessions.idle_timeout_seconds, 300);
        assert_eq!(cfg.status.interval_seconds, 5);
        assert_eq!(cfg.status.destination, "status");
        assert!(cfg.auth.users.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn overrides_are_honored() {
        let file = write_config(
            r#"
[network]
bind = "127.0.0.1:9999"
heartbeat_outgoing_ms = 10000
heartbeat_incoming_ms = 0

[sessions]
idle_timeout_seconds = 60

[auth]
users = { alice = "secret" }
"#,
        );
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.network.bind, "127.0.0.1:9999");
        let settings = cfg.connection_settings();
        assert_eq!(settings.server_heartbeat.outgoing_ms, 10_000);
        assert_eq!(settings.server_heartbeat.incoming_ms, 0);
        assert_eq!(
            cfg.store_config().session_idle_timeout,
            Duration::from_secs(60)
        );
        assert!(cfg.auth.users.contains_key("alice"));
    }

    #[test]
    fn invalid_bind_fails_validation() {
        let file = write_config("[network]\nbind = \"not-an-address\"\n");
        let cfg = Config::load(file.path()).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_intervals_fail_validation() {
        let file = write_config("[sessions]\ncleanup_interval_seconds = 0\n");
        let cfg = Config::load(file.path()).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("cleanup_interval_seconds"));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let file = write_config("[network\nbind=");
        assert!(Config::load(file.path()).is_err());
    }
}
