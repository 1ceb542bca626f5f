//! Drives ready-check sessions
//!
//! Every formed match gets its own task. Responses from the lobby don't
//! name a session, so each one is fanned out to every session registered
//! at the moment of delivery and the sessions pick out their own.

use crate::error::{MatchbotError, Result};
use crate::protocol::connection::LobbyClient;
use crate::protocol::messages::ReadyCheckResponse;
use crate::readycheck::session::{ReadyCheckOutcome, ReadyCheckSession};
use crate::types::{Match, SessionId};
use crate::utils::generate_session_id;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default time players get to ready up
pub const DEFAULT_READY_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

type ResponseSender = mpsc::UnboundedSender<Arc<ReadyCheckResponse>>;
type SessionIndex = Arc<RwLock<HashMap<SessionId, ResponseSender>>>;

/// Receives the match once its ready check ends
#[async_trait]
pub trait MatchHandoff: Send + Sync {
    /// Every player readied up
    async fn match_passed(&self, matched: Match);

    /// A player declined or the deadline passed
    async fn match_failed(&self, matched: Match, outcome: ReadyCheckOutcome);
}

/// Removes a session from the index when its task ends, however it ends
struct Registration {
    sessions: SessionIndex,
    id: SessionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        match self.sessions.write() {
            Ok(mut sessions) => {
                sessions.remove(&self.id);
            }
            Err(_) => error!("Failed to deregister ready check {}", self.id),
        }
    }
}

/// Starts ready checks and routes responses to them
#[derive(Clone)]
pub struct ReadyCheckCoordinator {
    lobby: Arc<dyn LobbyClient>,
    handoff: Arc<dyn MatchHandoff>,
    sessions: SessionIndex,
    timeout: Duration,
    shutdown: CancellationToken,
    /// Cancels the sessions of the current lobby session; child of `shutdown`
    round: Arc<Mutex<CancellationToken>>,
}

impl ReadyCheckCoordinator {
    pub fn new(
        lobby: Arc<dyn LobbyClient>,
        handoff: Arc<dyn MatchHandoff>,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            lobby,
            handoff,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            timeout,
            round: Arc::new(Mutex::new(shutdown.child_token())),
            shutdown,
        }
    }

    fn current_round(&self) -> Result<CancellationToken> {
        self.round
            .lock()
            .map(|round| round.clone())
            .map_err(|_| {
                MatchbotError::InternalError {
                    message: "Failed to acquire ready check round lock".to_string(),
                }
                .into()
            })
    }

    /// Silently end every running session, as on shutdown, and start a new
    /// round for sessions started afterwards. Returns how many were running.
    pub fn cancel_active(&self) -> usize {
        let active = self.active_sessions();
        match self.round.lock() {
            Ok(mut round) => {
                round.cancel();
                *round = self.shutdown.child_token();
            }
            Err(_) => error!("Failed to acquire ready check round lock"),
        }
        if active > 0 {
            info!("Cancelled {} running ready checks", active);
        }
        active
    }

    /// Register a session for `matched`, send READYCHECK and spawn the
    /// session task. The task resolves to the terminal outcome.
    pub async fn start(&self, matched: Match) -> Result<JoinHandle<ReadyCheckOutcome>> {
        let id = generate_session_id();
        let cancel = self.current_round()?;
        let (tx, rx) = mpsc::unbounded_channel();

        // registered before READYCHECK goes out so an instant reply isn't lost
        self.sessions
            .write()
            .map_err(|_| MatchbotError::InternalError {
                message: "Failed to acquire ready check lock".to_string(),
            })?
            .insert(id, tx);
        let registration = Registration {
            sessions: self.sessions.clone(),
            id,
        };

        let names = matched.player_names();
        info!(
            "Starting ready check {} for match {} in {} with players {:?}",
            id, matched.id, matched.queue_name, names
        );

        if let Err(e) = self
            .lobby
            .ready_check(&matched.queue_name, &names, self.timeout.as_secs())
            .await
        {
            drop(registration);
            warn!(
                "Could not send ready check for match {} in {}: {}",
                matched.id, matched.queue_name, e
            );
            self.handoff
                .match_failed(matched, ReadyCheckOutcome::Failed(e.to_string()))
                .await;
            return Err(e);
        }

        let session = ReadyCheckSession::new(id, matched, self.timeout);
        let coordinator = self.clone();
        Ok(tokio::spawn(async move {
            coordinator.run(session, rx, registration, cancel).await
        }))
    }

    async fn run(
        &self,
        mut session: ReadyCheckSession,
        mut responses: mpsc::UnboundedReceiver<Arc<ReadyCheckResponse>>,
        registration: Registration,
        cancel: CancellationToken,
    ) -> ReadyCheckOutcome {
        let deadline = tokio::time::sleep_until(session.deadline());
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break ReadyCheckOutcome::Cancelled,
                _ = &mut deadline => break ReadyCheckOutcome::TimedOut,
                response = responses.recv() => match response {
                    Some(response) => {
                        if let Some(outcome) = session.handle_response(&response) {
                            break outcome;
                        }
                    }
                    None => break ReadyCheckOutcome::Cancelled,
                },
            }
        };
        drop(registration);

        if outcome == ReadyCheckOutcome::TimedOut {
            let missing: Vec<&str> = session
                .matched()
                .players
                .iter()
                .map(|p| p.name.as_str())
                .filter(|name| !session.is_acknowledged(name))
                .collect();
            info!(
                "Ready check {} ran out of time with {}/{} ready, missing {:?}",
                session.id(),
                session.ready_count(),
                session.required_count(),
                missing
            );
        }

        let matched = session.into_match();
        info!(
            "Ready check for match {} in {} {}",
            matched.id, matched.queue_name, outcome
        );

        if let Some(result) = outcome.result_message() {
            if let Err(e) = self
                .lobby
                .ready_check_result(&matched.queue_name, &matched.player_names(), result)
                .await
            {
                warn!(
                    "Could not report ready check result for match {}: {}",
                    matched.id, e
                );
            }
        }

        match &outcome {
            ReadyCheckOutcome::Passed => self.handoff.match_passed(matched).await,
            ReadyCheckOutcome::Failed(_) | ReadyCheckOutcome::TimedOut => {
                self.handoff.match_failed(matched, outcome.clone()).await
            }
            ReadyCheckOutcome::Cancelled => {
                debug!("Dropping match {} without hand-off", matched.id)
            }
        }

        outcome
    }

    /// Forward a response to every active session. Returns how many
    /// sessions it was delivered to.
    pub fn broadcast(&self, response: ReadyCheckResponse) -> usize {
        let senders: Vec<ResponseSender> = match self.sessions.read() {
            Ok(sessions) => sessions.values().cloned().collect(),
            Err(_) => {
                error!("Failed to acquire ready check lock for broadcast");
                return 0;
            }
        };

        let response = Arc::new(response);
        senders
            .iter()
            .filter(|sender| sender.send(Arc::clone(&response)).is_ok())
            .count()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }
}
