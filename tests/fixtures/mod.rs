//! Test fixtures and mock implementations for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use matchbot::config::AppConfig;
use matchbot::error::{MatchbotError, Result};
use matchbot::launcher::{GameExit, GameLauncher, LaunchedGame, PlayerCredentials};
use matchbot::protocol::{LobbyClient, Message};
use matchbot::service::Dispatcher;
use matchbot::types::{Match, QueueDefinition};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Pairs players as soon as two are waiting. Never rematches on Update, so
/// released players stay Waiting.
pub const DUEL_SCRIPT: &str = r#"
function queue.PlayerJoined(name)
  local waiting = queue.GetPlayerList()
  if #waiting < 2 then
    return
  end
  queue.NewMatch({
    map = queue.GetMapList()[1],
    game = queue.GetGameList()[1],
    engineVersion = "103.0",
    players = {
      { name = waiting[1], team = 0, ally = 0 },
      { name = waiting[2], team = 1, ally = 1 },
    },
  })
end
"#;

/// Accepts everyone and never forms a match
pub const IDLE_SCRIPT: &str = "";

/// Lobby client that records every outbound message
#[derive(Debug, Default)]
pub struct MockLobby {
    sent: Mutex<Vec<Message>>,
}

impl MockLobby {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.command).collect()
    }

    /// JSON payloads of every message sent with `command`
    pub fn payloads(&self, command: &str) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter(|m| m.command == command)
            .map(|m| serde_json::from_str(&m.data).unwrap())
            .collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.sent().iter().filter(|m| m.command == command).count()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl LobbyClient for MockLobby {
    async fn send(&self, message: Message) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| MatchbotError::InternalError {
                message: "mock lobby poisoned".to_string(),
            })?
            .push(message);
        Ok(())
    }
}

/// Launcher that records matches instead of starting processes
#[derive(Debug, Default)]
pub struct MockLauncher {
    launched: Mutex<Vec<Match>>,
    fail: bool,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            launched: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn launched(&self) -> Vec<Match> {
        self.launched
            .lock()
            .map(|launched| launched.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GameLauncher for MockLauncher {
    async fn launch(&self, matched: &Match) -> Result<LaunchedGame> {
        if self.fail {
            return Err(MatchbotError::LaunchFailed {
                reason: "no dedicated server available".to_string(),
            }
            .into());
        }

        if let Ok(mut launched) = self.launched.lock() {
            launched.push(matched.clone());
        }

        let (done_tx, done_rx) = oneshot::channel();
        let _ = done_tx.send(GameExit {
            success: true,
            code: Some(0),
        });

        Ok(LaunchedGame {
            ip: "10.0.0.1".to_string(),
            port: 8452,
            engine: matched.engine_version.clone(),
            credentials: matched
                .players
                .iter()
                .map(|p| PlayerCredentials {
                    name: p.name.clone(),
                    password: format!("secret-{}", p.name),
                })
                .collect(),
            completion: done_rx,
        })
    }
}

pub fn definition(name: &str, min_players: u32, max_players: u32) -> QueueDefinition {
    QueueDefinition {
        name: name.to_string(),
        title: format!("{} queue", name),
        description: String::new(),
        map_names: vec!["DeltaSiegeDry".to_string()],
        game_names: vec!["Balanced Annihilation V10.24".to_string()],
        engine_versions: vec!["103.0".to_string()],
        min_players,
        max_players,
        team_join_allowed: false,
    }
}

pub fn standard_definitions() -> Vec<QueueDefinition> {
    vec![definition("1v1", 2, 2), definition("2v2", 4, 4)]
}

/// Scripts directory with the duel script for 1v1 and an idle one for 2v2
pub fn scripts_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "1v1", DUEL_SCRIPT);
    write_script(dir.path(), "2v2", IDLE_SCRIPT);
    dir
}

pub fn write_script(dir: &Path, queue: &str, source: &str) {
    std::fs::write(dir.join(format!("{}.lua", queue)), source).unwrap();
}

pub fn test_config(scripts: &Path, ready_check_seconds: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.matching.scripts_dir = scripts.to_path_buf();
    config.matching.tick_interval_ms = 50;
    config.ready_check.timeout_seconds = ready_check_seconds;
    config
}

/// A dispatcher wired to mocks, with its match pump running
pub struct TestSystem {
    pub dispatcher: Dispatcher,
    pub lobby: Arc<MockLobby>,
    pub launcher: Arc<MockLauncher>,
    pub shutdown: CancellationToken,
    _scripts: TempDir,
}

impl TestSystem {
    pub async fn start(ready_check_seconds: u64) -> Self {
        Self::start_with(MockLauncher::new(), ready_check_seconds).await
    }

    pub async fn start_with(launcher: MockLauncher, ready_check_seconds: u64) -> Self {
        let scripts = scripts_dir();
        let config = test_config(scripts.path(), ready_check_seconds);
        let lobby = Arc::new(MockLobby::new());
        let launcher = Arc::new(launcher);
        let shutdown = CancellationToken::new();

        let dispatcher = Dispatcher::new(
            &config,
            standard_definitions(),
            lobby.clone(),
            launcher.clone(),
            shutdown.clone(),
        );
        let _ = dispatcher.spawn_match_pump();

        for definition in standard_definitions() {
            dispatcher.handle(queue_opened(&definition)).await;
        }

        Self {
            dispatcher,
            lobby,
            launcher,
            shutdown,
            _scripts: scripts,
        }
    }
}

impl Drop for TestSystem {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn queue_opened(definition: &QueueDefinition) -> Message {
    Message::new("QUEUEOPENED", serde_json::to_string(definition).unwrap())
}

pub fn join_request(queue: &str, users: &[&str]) -> Message {
    Message::new(
        "JOINQUEUEREQUEST",
        serde_json::json!({ "name": queue, "userNames": users }).to_string(),
    )
}

pub fn queue_left(queue: &str, users: &[&str]) -> Message {
    Message::new(
        "QUEUELEFT",
        serde_json::json!({ "name": queue, "userNames": users }).to_string(),
    )
}

pub fn ready_response(queue: &str, user: &str, response: &str) -> Message {
    Message::new(
        "READYCHECKRESPONSE",
        serde_json::json!({
            "name": queue,
            "userName": user,
            "response": response,
            "responseTime": 1
        })
        .to_string(),
    )
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
