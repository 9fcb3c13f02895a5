//! Config resolution for the registry daemon.
//!
//! Mirrors `mesh_core::config`'s `ENV > param > default` priority chain
//! (§4.7's "ambient implementation notes"): `clap::Parser` supplies the
//! `param` tier, read from the CLI the same way an `AgentSpec` supplies it on
//! the agent side, and the environment variables in §6 still win over it.

use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::debug;

/// Config keys accepted by the registry daemon, per §6's env var list plus
/// the registry-only additions (`MCP_MESH_REGISTRY_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    BindHost,
    BindPort,
    StorePath,
    LogLevel,
    LogFormat,
    HealthSweepIntervalS,
}

impl ConfigKey {
    pub fn env_var(&self) -> &'static str {
        match self {
            ConfigKey::BindHost => "MCP_MESH_REGISTRY_BIND_HOST",
            ConfigKey::BindPort => "MCP_MESH_REGISTRY_BIND_PORT",
            ConfigKey::StorePath => "MCP_MESH_REGISTRY_STORE_PATH",
            ConfigKey::LogLevel => "MCP_MESH_LOG_LEVEL",
            ConfigKey::LogFormat => "MCP_MESH_REGISTRY_LOG_FORMAT",
            ConfigKey::HealthSweepIntervalS => "MCP_MESH_REGISTRY_HEALTH_SWEEP_INTERVAL_S",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            ConfigKey::BindHost => "0.0.0.0",
            ConfigKey::BindPort => "8000",
            ConfigKey::StorePath => "",
            ConfigKey::LogLevel => "info",
            ConfigKey::LogFormat => "pretty",
            ConfigKey::HealthSweepIntervalS => "5",
        }
    }
}

/// Resolve one key: `ENV[key.env_var()] > cli_value > key.default_value()`.
pub fn resolve_config(key: ConfigKey, cli_value: Option<&str>) -> String {
    if let Ok(value) = env::var(key.env_var()) {
        if !value.is_empty() {
            debug!(key = key.env_var(), "config resolved from environment");
            return value;
        }
    }
    if let Some(value) = cli_value.filter(|v| !v.is_empty()) {
        return value.to_string();
    }
    key.default_value().to_string()
}

/// CLI surface mirrored from the env vars above so `mesh-registry --help`
/// documents every knob, per §4.1's ambient implementation note.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "mesh-registry", about = "Authoritative registry service for the MCP agent coordination mesh")]
pub struct RegistryCli {
    /// Host to bind the HTTP server to (MCP_MESH_REGISTRY_BIND_HOST)
    #[arg(long)]
    pub bind_host: Option<String>,

    /// Port to bind the HTTP server to (MCP_MESH_REGISTRY_BIND_PORT)
    #[arg(long)]
    pub bind_port: Option<u16>,

    /// Path to the persisted store directory; empty means in-memory only
    /// (MCP_MESH_REGISTRY_STORE_PATH)
    #[arg(long)]
    pub store_path: Option<String>,

    /// Log level (MCP_MESH_LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format: "pretty" or "json" (MCP_MESH_REGISTRY_LOG_FORMAT)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Health sweep period in seconds (MCP_MESH_REGISTRY_HEALTH_SWEEP_INTERVAL_S)
    #[arg(long)]
    pub health_sweep_interval_s: Option<u64>,
}

/// Fully resolved registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub store_path: Option<String>,
    pub log_level: String,
    pub log_format: String,
    pub health_sweep_interval_s: u64,
}

impl RegistryConfig {
    pub fn resolve(cli: &RegistryCli) -> Self {
        let store_path = resolve_config(ConfigKey::StorePath, cli.store_path.as_deref());
        Self {
            bind_host: resolve_config(ConfigKey::BindHost, cli.bind_host.as_deref()),
            bind_port: resolve_config(ConfigKey::BindPort, cli.bind_port.map(|p| p.to_string()).as_deref())
                .parse()
                .unwrap_or(8000),
            store_path: if store_path.is_empty() { None } else { Some(store_path) },
            log_level: resolve_config(ConfigKey::LogLevel, cli.log_level.as_deref()),
            log_format: resolve_config(ConfigKey::LogFormat, cli.log_format.as_deref()),
            health_sweep_interval_s: resolve_config(
                ConfigKey::HealthSweepIntervalS,
                cli.health_sweep_interval_s.map(|s| s.to_string()).as_deref(),
            )
            .parse()
            .unwrap_or(5),
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Centralized here so `AgentRecord.last_seen_ms`/health-sweep comparisons go
/// through one call site (tests drive the comparison logic directly with
/// synthetic timestamps instead of calling this).
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static TEST_ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn env_overrides_cli_value() {
        let _guard = TEST_ENV_LOCK.lock().unwrap();
        env::set_var("MCP_MESH_REGISTRY_BIND_HOST", "10.0.0.1");
        let resolved = resolve_config(ConfigKey::BindHost, Some("127.0.0.1"));
        assert_eq!(resolved, "10.0.0.1");
        env::remove_var("MCP_MESH_REGISTRY_BIND_HOST");
    }

    #[test]
    fn cli_value_used_when_env_absent() {
        let _guard = TEST_ENV_LOCK.lock().unwrap();
        env::remove_var("MCP_MESH_REGISTRY_BIND_HOST");
        let resolved = resolve_config(ConfigKey::BindHost, Some("127.0.0.1"));
        assert_eq!(resolved, "127.0.0.1");
    }

    #[test]
    fn default_used_when_nothing_set() {
        let _guard = TEST_ENV_LOCK.lock().unwrap();
        env::remove_var("MCP_MESH_REGISTRY_BIND_PORT");
        let resolved = resolve_config(ConfigKey::BindPort, None);
        assert_eq!(resolved, "8000");
    }

    #[test]
    fn registry_config_resolves_from_defaults_when_cli_is_empty() {
        let _guard = TEST_ENV_LOCK.lock().unwrap();
        for key in [
            ConfigKey::BindHost,
            ConfigKey::BindPort,
            ConfigKey::StorePath,
            ConfigKey::LogLevel,
            ConfigKey::LogFormat,
            ConfigKey::HealthSweepIntervalS,
        ] {
            env::remove_var(key.env_var());
        }
        let cli = RegistryCli::default();
        let cfg = RegistryConfig::resolve(&cli);
        assert_eq!(cfg.bind_port, 8000);
        assert_eq!(cfg.health_sweep_interval_s, 5);
        assert!(cfg.store_path.is_none());
    }
}
