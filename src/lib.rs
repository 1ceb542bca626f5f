//! Matchbot - matchmaking bot for SpringRTS lobby servers
//!
//! This crate logs in to a lobby server, hosts the configured matchmaking
//! queues, forms matches with per-queue Lua scripts, runs ready checks and
//! starts a dedicated game server for every match that passes.

pub mod config;
pub mod error;
pub mod launcher;
pub mod protocol;
pub mod queue;
pub mod readycheck;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchbotError, Result};
pub use types::*;

// Re-export key components
pub use launcher::{DedicatedServerLauncher, GameLauncher};
pub use protocol::{LobbyClient, LobbyConnection, Message};
pub use queue::MatchQueue;
pub use readycheck::{MatchHandoff, ReadyCheckCoordinator};
pub use service::{ConnectionState, Matchbot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
