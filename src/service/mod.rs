//! Orchestration of the lobby session
//!
//! This module ties the connection, the open queues, ready checks and game
//! launches together and owns the reconnect loop.

pub mod dispatch;
pub mod handoff;
pub mod matchbot;
pub mod registry;

pub use dispatch::Dispatcher;
pub use handoff::GameHandoff;
pub use matchbot::{ConnectionState, Matchbot};
pub use registry::{JoinOutcome, QueueRegistry};
