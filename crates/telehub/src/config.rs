//! Layered application configuration.
//!
//! Defaults ← TOML file ← `TELEHUB__`-prefixed environment variables.
//! A default config file is written on first run so operators have
//! something concrete to edit.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "telehub";
const ENV_PREFIX: &str = "TELEHUB";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub robot: RobotConfig,
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
}

/// Relay hub listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used for media links in chat replies.
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            public_base_url: "http://localhost:5000".to_string(),
        }
    }
}

/// The physical robot this deployment drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub id: String,
    pub ip: String,
    pub port: u16,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            id: "Robot_Niryo_01".to_string(),
            // Link-local default for a direct ethernet connection.
            ip: "169.254.200.200".to_string(),
            port: 9090,
        }
    }
}

/// Bridge link tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Relay robot-role ingress URL.
    pub relay_url: String,
    pub telemetry_interval_ms: u32,
    pub gripper_interval_ms: u32,
    pub state_interval_ms: u32,
    pub heartbeat_interval_ms: u64,
    pub retry_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:5000/robot".to_string(),
            telemetry_interval_ms: 100,
            gripper_interval_ms: 200,
            state_interval_ms: 500,
            heartbeat_interval_ms: 1000,
            retry_delay_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Resolve the config file path: explicit override, else the platform
/// config directory, else a dotfile next to the working directory.
pub fn config_path(override_path: Option<&Path>) -> PathBuf {
    if let Some(path) = override_path {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        let expanded = PathBuf::from(expanded);
        if expanded.is_dir() {
            return expanded.join("config.toml");
        }
        return expanded;
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_NAME).join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(format!(".{APP_NAME}.toml")))
}

/// Load the effective configuration, writing the default file first if
/// none exists yet.
pub fn load(override_path: Option<&Path>) -> Result<AppConfig> {
    let path = config_path(override_path);
    if !path.exists() {
        write_default_config(&path)?;
    }

    let built = Config::builder()
        .add_source(
            File::from(path.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .context("assembling configuration sources")?;

    built
        .try_deserialize()
        .context("deserializing configuration")
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {}", parent.display()))?;
    }

    let toml =
        toml::to_string_pretty(&AppConfig::default()).context("serializing default config")?;
    let body = format!(
        "# Configuration for {APP_NAME}\n# File: {}\n\n{toml}",
        path.display()
    );
    fs::write(path, body).with_context(|| format!("writing config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 5000);
        assert_eq!(cfg.robot.id, "Robot_Niryo_01");
        assert_eq!(cfg.bridge.retry_delay_ms, 3000);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn load_writes_and_reads_a_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let cfg = load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.server.port, 5000);

        // The written file is valid TOML that round-trips.
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Configuration for telehub"));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[server]\nport = 8123\n\n[robot]\nid = \"Robot_Lab_02\"\n",
        )
        .unwrap();

        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.server.port, 8123);
        assert_eq!(cfg.robot.id, "Robot_Lab_02");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.bridge.heartbeat_interval_ms, 1000);
    }

    #[test]
    fn directory_override_appends_the_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = config_path(Some(dir.path()));
        assert!(resolved.ends_with("config.toml"));
    }
}
