//! Matchmaking queues
//!
//! Each queue keeps its own player registry and runs an operator-supplied
//! Lua script that decides when waiting players form a match.

pub mod instance;
pub mod script;

pub use instance::MatchQueue;
pub use script::{HookOutcome, MatchCandidate, MatchScript, QueueDataSource};
