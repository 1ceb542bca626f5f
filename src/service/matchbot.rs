//! Lobby session lifecycle
//!
//! `run` connects, logs in and dispatches until the session drops, then
//! forgets every queue and retries after the reconnect delay. It only
//! returns once shutdown is requested.

use crate::config::AppConfig;
use crate::error::Result;
use crate::launcher::GameLauncher;
use crate::protocol::connection::{LobbyClient, LobbyConnection};
use crate::protocol::messages;
use crate::service::dispatch::Dispatcher;
use crate::types::QueueDefinition;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    LoggedIn,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::LoggedIn => write!(f, "logged in"),
        }
    }
}

pub struct Matchbot {
    config: AppConfig,
    connection: Arc<LobbyConnection>,
    dispatcher: Arc<Dispatcher>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl Matchbot {
    pub fn new(
        config: AppConfig,
        definitions: Vec<QueueDefinition>,
        launcher: Arc<dyn GameLauncher>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let connection = Arc::new(LobbyConnection::new(config.ping_interval()));
        let dispatcher = Arc::new(Dispatcher::new(
            &config,
            definitions,
            connection.clone(),
            launcher,
            shutdown.clone(),
        ));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            connection,
            dispatcher,
            state,
            shutdown,
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Lobby connection {} -> {}", previous, next);
        }
    }

    /// Keep a lobby session alive until shutdown
    pub async fn run(&self) -> Result<()> {
        let pump = self.dispatcher.spawn_match_pump();

        while !self.shutdown.is_cancelled() {
            self.set_state(ConnectionState::Connecting);

            match self.run_session().await {
                Ok(()) => info!("Lobby session ended"),
                Err(e) => warn!("Lobby session failed: {}", e),
            }

            // shutdown() closes the queues itself
            if self.shutdown.is_cancelled() {
                break;
            }

            self.dispatcher.reset();
            self.set_state(ConnectionState::Disconnected);

            let delay = self.config.reconnect_delay();
            info!("Reconnecting in {}s", delay.as_secs());
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if let Some(pump) = pump {
            pump.abort();
        }
        Ok(())
    }

    async fn run_session(&self) -> Result<()> {
        let lobby = &self.config.lobby;
        let session = self.connection.connect(&lobby.server).await?;
        let keepalive = self.connection.spawn_keepalive(session.closed.clone());

        if let Err(e) = self.connection.login(&lobby.username, &lobby.password).await {
            session.closed.cancel();
            keepalive.abort();
            return Err(e);
        }
        info!("Logging in to {} as {}", lobby.server, lobby.username);

        let mut events = session.events;
        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = events.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            if message.command == messages::LOGIN_INFO_END {
                self.set_state(ConnectionState::LoggedIn);
            }
            self.dispatcher.handle(message).await;
        }

        keepalive.abort();
        Ok(())
    }

    /// Close every queue, say goodbye and drop the connection. Safe to call
    /// when not connected.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down matchbot");
        self.shutdown.cancel();

        if self.connection.is_connected().await {
            self.dispatcher.close_queues().await;
            self.connection.disconnect().await?;
        }

        self.dispatcher.reset();
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }
}
