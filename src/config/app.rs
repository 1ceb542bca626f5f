//! Main application configuration
//!
//! Configuration comes from a TOML file or from defaults, with environment
//! variables layered on top. CLI flags are applied last by `main`.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub lobby: LobbySettings,
    pub matching: MatchingSettings,
    pub ready_check: ReadyCheckSettings,
    pub launcher: LauncherSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Lobby server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbySettings {
    /// Lobby server address as host:port
    pub server: String,
    pub username: String,
    pub password: String,
    /// Pause between reconnect attempts
    pub reconnect_delay_seconds: u64,
    /// Keep-alive PING period
    pub ping_interval_seconds: u64,
}

/// Queue and matching script settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    /// JSON array of queue definitions announced on login
    pub queues_file: PathBuf,
    /// Directory searched for `<queue name>.lua`
    pub scripts_dir: PathBuf,
    /// Script used when a queue has no script of its own
    pub default_script: Option<PathBuf>,
    /// Period of the `Update` hook in milliseconds
    pub tick_interval_ms: u64,
    /// VM instructions one hook invocation may execute
    pub script_instruction_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadyCheckSettings {
    pub timeout_seconds: u64,
}

/// Dedicated server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSettings {
    /// Dedicated server binary, looked up on $PATH when not absolute
    pub binary: String,
    /// Start scripts are written below this directory
    pub games_dir: PathBuf,
    /// Address players are told to connect to
    pub host_ip: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "matchbot".to_string(),
            log_level: "info".to_string(),
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            server: "localhost:8200".to_string(),
            username: "matchbot".to_string(),
            password: String::new(),
            reconnect_delay_seconds: 10,
            ping_interval_seconds: 20,
        }
    }
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            queues_file: PathBuf::from("queues.json"),
            scripts_dir: PathBuf::from("scripts"),
            default_script: None,
            tick_interval_ms: 1000,
            script_instruction_limit: crate::queue::script::DEFAULT_INSTRUCTION_LIMIT,
        }
    }
}

impl Default for ReadyCheckSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: crate::readycheck::DEFAULT_READY_CHECK_TIMEOUT.as_secs(),
        }
    }
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            binary: "spring-dedicated".to_string(),
            games_dir: PathBuf::from("games"),
            host_ip: "127.0.0.1".to_string(),
        }
    }
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} value: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Some(timeout) = parse_env("SHUTDOWN_TIMEOUT_SECONDS")? {
            self.service.shutdown_timeout_seconds = timeout;
        }

        if let Ok(server) = env::var("LOBBY_SERVER") {
            self.lobby.server = server;
        }
        if let Ok(username) = env::var("LOBBY_USERNAME") {
            self.lobby.username = username;
        }
        if let Ok(password) = env::var("LOBBY_PASSWORD") {
            self.lobby.password = password;
        }
        if let Some(delay) = parse_env("RECONNECT_DELAY_SECONDS")? {
            self.lobby.reconnect_delay_seconds = delay;
        }
        if let Some(interval) = parse_env("PING_INTERVAL_SECONDS")? {
            self.lobby.ping_interval_seconds = interval;
        }

        if let Ok(file) = env::var("QUEUES_FILE") {
            self.matching.queues_file = PathBuf::from(file);
        }
        if let Ok(dir) = env::var("SCRIPTS_DIR") {
            self.matching.scripts_dir = PathBuf::from(dir);
        }
        if let Ok(script) = env::var("DEFAULT_SCRIPT") {
            self.matching.default_script = Some(PathBuf::from(script));
        }

        if let Some(timeout) = parse_env("READY_CHECK_TIMEOUT_SECONDS")? {
            self.ready_check.timeout_seconds = timeout;
        }

        if let Ok(binary) = env::var("LAUNCHER_BINARY") {
            self.launcher.binary = binary;
        }
        if let Ok(dir) = env::var("GAMES_DIR") {
            self.launcher.games_dir = PathBuf::from(dir);
        }
        if let Ok(ip) = env::var("HOST_IP") {
            self.launcher.host_ip = ip;
        }

        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.lobby.reconnect_delay_seconds)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.lobby.ping_interval_seconds)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.matching.tick_interval_ms)
    }

    pub fn ready_check_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_check.timeout_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    if config.lobby.server.is_empty() {
        return Err(anyhow!("Lobby server address cannot be empty"));
    }
    if !config.lobby.server.contains(':') {
        return Err(anyhow!(
            "Lobby server must be host:port, got {}",
            config.lobby.server
        ));
    }
    if config.lobby.username.is_empty() {
        return Err(anyhow!("Lobby username cannot be empty"));
    }
    if config.lobby.ping_interval_seconds == 0 {
        return Err(anyhow!("Ping interval must be greater than 0"));
    }

    if config.matching.tick_interval_ms == 0 {
        return Err(anyhow!("Tick interval must be greater than 0"));
    }
    if config.matching.script_instruction_limit == 0 {
        return Err(anyhow!("Script instruction limit must be greater than 0"));
    }

    if config.ready_check.timeout_seconds == 0 {
        return Err(anyhow!("Ready check timeout must be greater than 0"));
    }

    if config.launcher.binary.is_empty() {
        return Err(anyhow!("Launcher binary cannot be empty"));
    }
    if config.launcher.host_ip.is_empty() {
        return Err(anyhow!("Launcher host IP cannot be empty"));
    }

    Ok(())
}
