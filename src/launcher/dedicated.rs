//! Dedicated server launcher
//!
//! Writes a start script under `<games_dir>/<queue>/<unix time>-<match id>/`
//! and runs the dedicated server binary on it. Server output is forwarded to
//! the log.

use crate::config::LauncherSettings;
use crate::error::{MatchbotError, Result};
use crate::launcher::script::StartScript;
use crate::launcher::{GameExit, GameLauncher, LaunchedGame, PlayerCredentials};
use crate::types::Match;
use crate::utils::generate_password;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::UdpSocket;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

const PASSWORD_LENGTH: usize = 50;
const START_SCRIPT_NAME: &str = "startscript.txt";

pub struct DedicatedServerLauncher {
    settings: LauncherSettings,
}

fn launch_failed(reason: String) -> anyhow::Error {
    MatchbotError::LaunchFailed { reason }.into()
}

impl DedicatedServerLauncher {
    pub fn new(settings: LauncherSettings) -> Self {
        Self { settings }
    }

    /// Two distinct free UDP ports: the game port and the autohost port
    async fn allocate_ports() -> Result<(u16, u16)> {
        let game = UdpSocket::bind("127.0.0.1:0")
            .await
            .map_err(|e| launch_failed(format!("could not open game port: {}", e)))?;
        let autohost = UdpSocket::bind("127.0.0.1:0")
            .await
            .map_err(|e| launch_failed(format!("could not open autohost port: {}", e)))?;

        let game_port = game
            .local_addr()
            .map_err(|e| launch_failed(e.to_string()))?
            .port();
        let autohost_port = autohost
            .local_addr()
            .map_err(|e| launch_failed(e.to_string()))?
            .port();

        Ok((game_port, autohost_port))
    }

    fn game_dir(&self, matched: &Match) -> PathBuf {
        self.settings.games_dir.join(&matched.queue_name).join(format!(
            "{}-{}",
            chrono::Utc::now().timestamp(),
            matched.id
        ))
    }

    /// Write the script and return its absolute path. Never overwrites the
    /// script of another game.
    async fn write_start_script(&self, matched: &Match, script: &StartScript) -> Result<PathBuf> {
        let dir = self.game_dir(matched);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| launch_failed(format!("could not create {}: {}", dir.display(), e)))?;

        let path = dir.join(START_SCRIPT_NAME);
        let write_failed =
            |e: std::io::Error| launch_failed(format!("could not write {}: {}", path.display(), e));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(write_failed)?;
        file.write_all(script.render().as_bytes())
            .await
            .map_err(write_failed)?;
        file.flush().await.map_err(write_failed)?;

        tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| launch_failed(format!("could not resolve {}: {}", path.display(), e)))
    }

    fn spawn_server(&self, matched: &Match, script_path: &Path) -> Result<oneshot::Receiver<GameExit>> {
        let mut child = Command::new(&self.settings.binary)
            .arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                launch_failed(format!("could not start {}: {}", self.settings.binary, e))
            })?;

        let label = format!("{}#{}", matched.queue_name, matched.id);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, label.clone(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, label.clone(), true));
        }

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => GameExit {
                    success: status.success(),
                    code: status.code(),
                },
                Err(e) => {
                    error!("Lost track of game {}: {}", label, e);
                    GameExit {
                        success: false,
                        code: None,
                    }
                }
            };
            let _ = done_tx.send(exit);
        });

        Ok(done_rx)
    }
}

async fn forward_output<R>(reader: R, label: String, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!("[{}] {}", label, line),
            Ok(Some(line)) => debug!("[{}] {}", label, line),
            Ok(None) => break,
            Err(e) => {
                debug!("[{}] output closed: {}", label, e);
                break;
            }
        }
    }
}

#[async_trait]
impl GameLauncher for DedicatedServerLauncher {
    async fn launch(&self, matched: &Match) -> Result<LaunchedGame> {
        let (port, autohost_port) = Self::allocate_ports().await?;

        let script = StartScript::build(
            matched,
            &self.settings.host_ip,
            port,
            autohost_port,
            || generate_password(PASSWORD_LENGTH),
        );
        let script_path = self.write_start_script(matched, &script).await?;
        let completion = self.spawn_server(matched, &script_path)?;

        info!(
            "Started game for match {} in {} on port {} ({})",
            matched.id,
            matched.queue_name,
            port,
            script_path.display()
        );

        Ok(LaunchedGame {
            ip: script.host_ip.clone(),
            port,
            engine: script.engine.clone(),
            credentials: script
                .players
                .iter()
                .map(|p| PlayerCredentials {
                    name: p.name.clone(),
                    password: p.password.clone(),
                })
                .collect(),
            completion,
        })
    }
}
