//! Error types for the matchbot
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchbotError {
    #[error("Lobby connection failed: {message}")]
    LobbyConnectionFailed { message: String },

    #[error("Not connected to the lobby server")]
    NotConnected,

    #[error("Malformed {command} payload: {reason}")]
    MalformedPayload { command: String, reason: String },

    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Player {player} is already in queue {queue}")]
    PlayerAlreadyQueued { player: String, queue: String },

    #[error("Player {player} is not in queue {queue}")]
    PlayerNotQueued { player: String, queue: String },

    #[error("Invalid match candidate: {reason}")]
    InvalidMatch { reason: String },

    #[error("Matching script error in queue {queue}: {message}")]
    ScriptError { queue: String, message: String },

    #[error("Game launch failed: {reason}")]
    LaunchFailed { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}
