//! Lobby server protocol
//!
//! The lobby speaks a line-oriented text protocol; structured commands carry
//! one JSON-encoded parameter.

pub mod codec;
pub mod connection;
pub mod messages;

pub use codec::{decode, encode, Message};
pub use connection::{LobbyClient, LobbyConnection, LobbySession};
