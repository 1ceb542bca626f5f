//! Routes inbound lobby commands
//!
//! One `Dispatcher` lives for the whole process. Queues are rebuilt on each
//! lobby session and dropped by `reset` when the session ends.

use crate::config::{find_script, AppConfig, MatchingSettings};
use crate::error::{MatchbotError, Result};
use crate::launcher::GameLauncher;
use crate::protocol::codec::Message;
use crate::protocol::connection::LobbyClient;
use crate::protocol::messages::{
    self, parse_payload, JoinQueueRequest, QueueLeft, ReadyCheckResponse,
};
use crate::queue::MatchQueue;
use crate::readycheck::ReadyCheckCoordinator;
use crate::service::handoff::GameHandoff;
use crate::service::registry::{unknown_queue_reason, QueueRegistry};
use crate::types::{Match, QueueDefinition};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Dispatcher {
    lobby: Arc<dyn LobbyClient>,
    registry: Arc<QueueRegistry>,
    coordinator: ReadyCheckCoordinator,
    definitions: Vec<QueueDefinition>,
    matching: MatchingSettings,
    tick_interval: Duration,
    matches: mpsc::UnboundedSender<Match>,
    pending_matches: Mutex<Option<mpsc::UnboundedReceiver<Match>>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        config: &AppConfig,
        definitions: Vec<QueueDefinition>,
        lobby: Arc<dyn LobbyClient>,
        launcher: Arc<dyn GameLauncher>,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = Arc::new(QueueRegistry::new());
        let handoff = Arc::new(GameHandoff::new(
            lobby.clone(),
            launcher,
            registry.clone(),
        ));
        let coordinator = ReadyCheckCoordinator::new(
            lobby.clone(),
            handoff,
            config.ready_check_timeout(),
            shutdown.clone(),
        );
        let (matches, pending) = mpsc::unbounded_channel();

        Self {
            lobby,
            registry,
            coordinator,
            definitions,
            matching: config.matching.clone(),
            tick_interval: config.tick_interval(),
            matches,
            pending_matches: Mutex::new(Some(pending)),
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &ReadyCheckCoordinator {
        &self.coordinator
    }

    pub fn definitions(&self) -> &[QueueDefinition] {
        &self.definitions
    }

    /// Start feeding formed matches into ready checks. Only the first call
    /// spawns the pump.
    pub fn spawn_match_pump(&self) -> Option<JoinHandle<()>> {
        let mut matches = self.pending_matches.lock().ok()?.take()?;
        let coordinator = self.coordinator.clone();
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            loop {
                let matched = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    matched = matches.recv() => match matched {
                        Some(matched) => matched,
                        None => break,
                    },
                };

                let current = registry
                    .get(&matched.queue_name)
                    .is_some_and(|queue| queue.formed(&matched));
                if !current {
                    info!(
                        "Dropping match {} formed by a queue {} that has since closed",
                        matched.id, matched.queue_name
                    );
                    continue;
                }

                if let Err(e) = coordinator.start(matched).await {
                    warn!("Ready check could not start: {}", e);
                }
            }
            debug!("Match pump stopped");
        }))
    }

    /// Handle one inbound command. Per-request failures are logged here.
    pub async fn handle(&self, message: Message) {
        let command = message.command.as_str();
        if messages::IGNORED_COMMANDS.contains(&command) {
            return;
        }

        let result = match command {
            messages::LOGIN_INFO_END => self.announce_queues().await,
            messages::QUEUE_OPENED => self.open_queue(&message).await,
            messages::JOIN_QUEUE_REQUEST => self.join_queue(&message).await,
            messages::QUEUE_LEFT => self.leave_queue(&message),
            messages::REMOVE_USER => self.remove_user(&message),
            messages::READY_CHECK_RESPONSE => self.ready_check_response(&message),
            messages::SERVER_MSG => {
                info!("Server message: {}", message.data);
                Ok(())
            }
            messages::FAILED => {
                error!("Lobby reported failure: {}", message.data);
                Ok(())
            }
            _ => {
                warn!("Unknown command {} {}", message.command, message.data);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Error handling {}: {}", message.command, e);
        }
    }

    async fn announce_queues(&self) -> Result<()> {
        info!("Logged in, opening {} queues", self.definitions.len());
        for definition in &self.definitions {
            self.lobby.open_queue(definition).await?;
        }
        Ok(())
    }

    async fn open_queue(&self, message: &Message) -> Result<()> {
        let definition: QueueDefinition = parse_payload(message)?;
        let script_path = find_script(&self.matching, &definition.name)?;
        let source = tokio::fs::read_to_string(&script_path).await.map_err(|e| {
            MatchbotError::ConfigurationError {
                message: format!("Could not read {}: {}", script_path.display(), e),
            }
        })?;

        let queue = Arc::new(MatchQueue::new(
            definition,
            &script_path.display().to_string(),
            &source,
            self.matching.script_instruction_limit,
            self.matches.clone(),
        )?);

        let ticker = self.shutdown.child_token();
        self.registry.insert(queue.clone(), ticker.clone())?;
        queue.spawn_ticker(self.tick_interval, ticker);
        Ok(())
    }

    async fn join_queue(&self, message: &Message) -> Result<()> {
        let request: JoinQueueRequest = parse_payload(message)?;

        let outcome = match self.registry.join(&request.name, &request.user_names) {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(MatchbotError::QueueNotFound { .. }) = e.downcast_ref::<MatchbotError>() {
                    warn!(
                        "Join request for unknown queue {} from {:?}",
                        request.name, request.user_names
                    );
                    return self
                        .lobby
                        .join_queue_deny(
                            &request.name,
                            &request.user_names,
                            &unknown_queue_reason(&request.name),
                        )
                        .await;
                }
                return Err(e);
            }
        };

        for (reason, users) in &outcome.denied {
            self.lobby.join_queue_deny(&request.name, users, reason).await?;
        }
        if !outcome.accepted.is_empty() {
            info!("{:?} joined queue {}", outcome.accepted, request.name);
            self.lobby
                .join_queue_accept(&request.name, &outcome.accepted)
                .await?;
        }
        Ok(())
    }

    fn leave_queue(&self, message: &Message) -> Result<()> {
        let left: QueueLeft = parse_payload(message)?;
        let removed = self.registry.leave(&left.name, &left.user_names)?;
        if !removed.is_empty() {
            info!("{:?} left queue {}", removed, left.name);
        }
        Ok(())
    }

    fn remove_user(&self, message: &Message) -> Result<()> {
        let name = message.data.trim();
        if name.is_empty() {
            return Err(MatchbotError::MalformedPayload {
                command: message.command.clone(),
                reason: "missing user name".to_string(),
            }
            .into());
        }
        self.registry.remove_user(name)?;
        Ok(())
    }

    fn ready_check_response(&self, message: &Message) -> Result<()> {
        let response: ReadyCheckResponse = parse_payload(message)?;
        let delivered = self.coordinator.broadcast(response);
        debug!("Ready check response delivered to {} sessions", delivered);
        Ok(())
    }

    /// Send CLOSEQUEUE for every open queue
    pub async fn close_queues(&self) {
        for name in self.registry.queue_names() {
            if let Err(e) = self.lobby.close_queue(&name).await {
                warn!("Could not close queue {}: {}", name, e);
            }
        }
    }

    /// Forget every queue and queued player, and abandon the ready checks
    /// of the lobby session that ended
    pub fn reset(&self) {
        self.coordinator.cancel_active();
        let dropped = self.registry.clear();
        if dropped > 0 {
            info!("Dropped {} queues with the lobby session", dropped);
        }
    }
}
