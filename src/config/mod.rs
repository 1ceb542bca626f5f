//! Configuration management for the matchbot
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation, defaults, and the queue definitions file.

pub mod app;
pub mod queues;

// Re-export commonly used types
pub use app::{
    validate_config, AppConfig, LauncherSettings, LobbySettings, MatchingSettings,
    ReadyCheckSettings, ServiceSettings,
};
pub use queues::{find_script, load_queue_definitions, validate_queue_definitions};
