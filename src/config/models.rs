use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::queue::BrokerSettings;
use crate::runner::RunnerSettings;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Root for the ledger and queue keyspaces
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub api: ApiLimits,
}

impl ServerConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue")
    }
}

/// HTTP request limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiLimits {
    /// JSON request bodies
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
    /// Raw archive uploads
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            api: ApiLimits::default(),
        }
    }
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_archive_bytes: default_max_archive_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize::mb(1)
}

fn default_max_archive_bytes() -> ByteSize {
    ByteSize::mb(64)
}

/// Archive storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Local,
    /// Process-local, lost on restart
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/archives")
}

/// Job dispatch and message delivery
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_inflight_jobs")]
    pub max_inflight_jobs: usize,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
    #[serde(default = "default_redelivery_backoff_ms")]
    pub redelivery_backoff_ms: u64,
}

impl DispatchConfig {
    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            channel_size: self.channel_size,
            max_delivery_attempts: self.max_delivery_attempts,
            redelivery_backoff: Duration::from_millis(self.redelivery_backoff_ms),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_inflight_jobs: default_max_inflight_jobs(),
            channel_size: default_channel_size(),
            max_delivery_attempts: default_max_delivery_attempts(),
            redelivery_backoff_ms: default_redelivery_backoff_ms(),
        }
    }
}

fn default_max_inflight_jobs() -> usize {
    8
}

fn default_channel_size() -> usize {
    100
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_redelivery_backoff_ms() -> u64 {
    1000
}

/// Container sandbox
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Unix socket of the engine; platform default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<String>,
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    #[serde(default = "default_true")]
    pub network_disabled: bool,
    #[serde(default = "default_true")]
    pub cleanup_images: bool,
}

impl RunnerConfig {
    pub fn settings(&self) -> RunnerSettings {
        RunnerSettings {
            build_timeout: Duration::from_secs(self.build_timeout_secs),
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            memory_limit_mb: self.memory_limit_mb,
            network_disabled: self.network_disabled,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            docker_socket: None,
            image_prefix: default_image_prefix(),
            build_timeout_secs: default_build_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            memory_limit_mb: default_memory_limit_mb(),
            network_disabled: true,
            cleanup_images: true,
        }
    }
}

fn default_image_prefix() -> String {
    "runbox".to_string()
}

fn default_build_timeout_secs() -> u64 {
    600
}

fn default_run_timeout_secs() -> u64 {
    300
}

fn default_memory_limit_mb() -> u64 {
    512
}

fn default_true() -> bool {
    true
}

/// Expiry of jobs stuck in `Running`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stuck_after_secs: default_stuck_after_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_stuck_after_secs() -> u64 {
    3600
}

fn default_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Fallback when `RUST_LOG` is unset
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

fn default_log_filter() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.server.api.max_payload_bytes, ByteSize::mb(1));
        assert_eq!(config.server.api.max_archive_bytes, ByteSize::mb(64));
        assert_eq!(config.server.ledger_path(), PathBuf::from("data/ledger"));
        assert_eq!(config.storage.provider, StorageProvider::Local);
        assert_eq!(config.dispatch.max_inflight_jobs, 8);
        assert_eq!(config.runner.image_prefix, "runbox");
        assert!(config.runner.cleanup_images);
        assert!(config.reconcile.enabled);
        assert_eq!(config.telemetry.log_filter, "info");
    }

    #[test]
    fn test_settings_conversion() {
        let config = Config::default();

        let broker = config.dispatch.broker_settings();
        assert_eq!(broker.max_delivery_attempts, 5);
        assert_eq!(broker.redelivery_backoff, Duration::from_secs(1));

        let runner = config.runner.settings();
        assert_eq!(runner.build_timeout, Duration::from_secs(600));
        assert_eq!(runner.run_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[runner]
image_prefix = "sandbox"
"#,
        )
        .unwrap();
        assert_eq!(config.runner.image_prefix, "sandbox");
        assert_eq!(config.runner.memory_limit_mb, 512);
        assert!(config.runner.network_disabled);
    }
}
