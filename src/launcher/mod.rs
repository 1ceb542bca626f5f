//! Game hosting
//!
//! A passed ready check hands its match to a `GameLauncher`, which starts a
//! game server and returns the credentials each player needs to join.

pub mod dedicated;
pub mod script;

pub use dedicated::DedicatedServerLauncher;
pub use script::StartScript;

use crate::error::Result;
use crate::protocol::messages::ConnectUser;
use crate::types::{Match, PlayerName};
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Per-player join secret for one game
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerCredentials {
    pub name: PlayerName,
    pub password: String,
}

/// How a hosted game ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameExit {
    pub success: bool,
    pub code: Option<i32>,
}

/// A running game
#[derive(Debug)]
pub struct LaunchedGame {
    pub ip: String,
    pub port: u16,
    pub engine: String,
    pub credentials: Vec<PlayerCredentials>,
    /// Resolves when the game process exits
    pub completion: oneshot::Receiver<GameExit>,
}

impl LaunchedGame {
    /// CONNECTUSER payload for every player
    pub fn connect_messages(&self) -> Vec<ConnectUser> {
        self.credentials
            .iter()
            .map(|player| ConnectUser {
                user_name: player.name.clone(),
                ip: self.ip.clone(),
                port: self.port.to_string(),
                password: player.password.clone(),
                engine: self.engine.clone(),
            })
            .collect()
    }
}

#[async_trait]
pub trait GameLauncher: Send + Sync {
    async fn launch(&self, matched: &Match) -> Result<LaunchedGame>;
}
