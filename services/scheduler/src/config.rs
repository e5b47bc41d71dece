//! Configuration for the scheduler.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Scheduler configuration, loaded once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    /// Master endpoint the caller connects to.
    pub master_endpoint: String,

    /// Human-readable framework name presented on subscribe.
    pub framework_name: String,

    /// Unix user tasks run as on agents.
    pub framework_user: String,

    /// How long the master keeps our tasks after a disconnect.
    pub failover_timeout_secs: f64,

    /// Whether agents checkpoint our tasks across agent restarts.
    pub checkpointing: bool,

    /// Allocation role, if any.
    pub role: Option<String>,

    /// Hostname advertised for this scheduler.
    pub hostname: Option<String>,

    /// Authentication principal, if any.
    pub principal: Option<String>,

    /// Path to the executor binary served to agents.
    pub executor_binary_path: String,

    /// Port the executor artifact server listens on.
    pub executor_listen_port: u16,

    /// TLS certificate path for the executor server.
    pub tls_cert_path: Option<String>,

    /// TLS key path for the executor server.
    pub tls_key_path: Option<String>,

    /// SQLite database path for the bundled storage driver.
    pub storage_path: String,

    /// Per-operation storage timeout.
    pub storage_timeout: Duration,

    /// Write-through persistence retry policy.
    pub persistence: PersistenceConfig,

    /// Control API listen address.
    pub api_listen_addr: SocketAddr,

    /// Tear the framework down on graceful shutdown instead of leaving
    /// tasks for a later failover.
    pub teardown_on_shutdown: bool,
}

/// Retry policy for write-through persistence.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceConfig {
    /// Fixed delay between storage retries.
    pub retry_interval: Duration,

    /// Retries after the initial attempt before giving up.
    pub max_retries: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            max_retries: 3,
        }
    }
}

impl Config {
    /// Load configuration from `BOSUN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let master_endpoint = std::env::var("BOSUN_MASTER_ENDPOINT")
            .unwrap_or_else(|_| "http://127.0.0.1:5050".to_string());

        let framework_name =
            std::env::var("BOSUN_FRAMEWORK_NAME").unwrap_or_else(|_| "bosun".to_string());

        let framework_user =
            std::env::var("BOSUN_FRAMEWORK_USER").unwrap_or_else(|_| "root".to_string());

        let failover_timeout_secs = env_parse("BOSUN_FAILOVER_TIMEOUT_SECS", 86_400.0)?;

        let checkpointing = std::env::var("BOSUN_CHECKPOINTING")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(true);

        let role = std::env::var("BOSUN_ROLE").ok().filter(|v| !v.is_empty());
        let hostname = std::env::var("BOSUN_HOSTNAME").ok().filter(|v| !v.is_empty());
        let principal = std::env::var("BOSUN_PRINCIPAL").ok().filter(|v| !v.is_empty());

        let executor_binary_path = std::env::var("BOSUN_EXECUTOR_BINARY")
            .unwrap_or_else(|_| "/usr/local/bin/bosun-executor".to_string());

        let executor_listen_port = env_parse("BOSUN_EXECUTOR_PORT", 8081u16)?;

        let tls_cert_path = std::env::var("BOSUN_TLS_CERT").ok().filter(|v| !v.is_empty());
        let tls_key_path = std::env::var("BOSUN_TLS_KEY").ok().filter(|v| !v.is_empty());

        let storage_path =
            std::env::var("BOSUN_STORAGE_PATH").unwrap_or_else(|_| "/var/lib/bosun/state.db".to_string());

        let storage_timeout = Duration::from_secs(env_parse("BOSUN_STORAGE_TIMEOUT_SECS", 5u64)?);

        let persistence = PersistenceConfig {
            retry_interval: Duration::from_millis(env_parse(
                "BOSUN_PERSISTENCE_RETRY_INTERVAL_MS",
                1_000u64,
            )?),
            max_retries: env_parse("BOSUN_PERSISTENCE_MAX_RETRIES", 3u32)?,
        };

        let api_listen_addr = std::env::var("BOSUN_API_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid BOSUN_API_LISTEN_ADDR")?;

        let teardown_on_shutdown = std::env::var("BOSUN_TEARDOWN_ON_SHUTDOWN")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            master_endpoint,
            framework_name,
            framework_user,
            failover_timeout_secs,
            checkpointing,
            role,
            hostname,
            principal,
            executor_binary_path,
            executor_listen_port,
            tls_cert_path,
            tls_key_path,
            storage_path,
            storage_timeout,
            persistence,
            api_listen_addr,
            teardown_on_shutdown,
        })
    }

    /// A configuration suitable for tests: local addresses, fast retries,
    /// no teardown.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            master_endpoint: "http://127.0.0.1:5050".to_string(),
            framework_name: "bosun-test".to_string(),
            framework_user: "nobody".to_string(),
            failover_timeout_secs: 60.0,
            checkpointing: false,
            role: None,
            hostname: None,
            principal: None,
            executor_binary_path: "/tmp/bosun-executor".to_string(),
            executor_listen_port: 0,
            tls_cert_path: None,
            tls_key_path: None,
            storage_path: ":memory:".to_string(),
            storage_timeout: Duration::from_secs(1),
            persistence: PersistenceConfig {
                retry_interval: Duration::from_millis(10),
                max_retries: 3,
            },
            api_listen_addr: "127.0.0.1:0".parse().unwrap(),
            teardown_on_shutdown: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().with_context(|| format!("invalid {name}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_defaults() {
        let persistence = PersistenceConfig::default();
        assert_eq!(persistence.retry_interval, Duration::from_secs(1));
        assert_eq!(persistence.max_retries, 3);
    }

    #[test]
    fn test_for_tests_is_fast() {
        let config = Config::for_tests();
        assert!(config.persistence.retry_interval < Duration::from_millis(100));
        assert!(!config.teardown_on_shutdown);
    }
}
