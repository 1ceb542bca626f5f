//! Per-match ready-check state machine
//!
//! `ReadyCheckSession` only tracks who has acknowledged; waiting on the
//! deadline and talking to the lobby is the coordinator's job.

use crate::protocol::messages::{
    ReadyCheckResponse, READY_CHECK_PASS, READY_CHECK_TIMEOUT, READY_RESPONSE,
};
use crate::types::{Match, PlayerName, SessionId};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Terminal state of a ready check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyCheckOutcome {
    /// Every player responded "ready"
    Passed,
    /// A player declined
    Failed(String),
    /// The deadline passed first
    TimedOut,
    /// The matchbot is shutting down
    Cancelled,
}

impl ReadyCheckOutcome {
    /// Result text reported to the lobby, if this outcome is reported at all
    pub fn result_message(&self) -> Option<&str> {
        match self {
            ReadyCheckOutcome::Passed => Some(READY_CHECK_PASS),
            ReadyCheckOutcome::Failed(reason) => Some(reason),
            ReadyCheckOutcome::TimedOut => Some(READY_CHECK_TIMEOUT),
            ReadyCheckOutcome::Cancelled => None,
        }
    }
}

impl fmt::Display for ReadyCheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyCheckOutcome::Passed => write!(f, "passed"),
            ReadyCheckOutcome::Failed(reason) => write!(f, "failed ({})", reason),
            ReadyCheckOutcome::TimedOut => write!(f, "timed out"),
            ReadyCheckOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One in-flight ready check
#[derive(Debug)]
pub struct ReadyCheckSession {
    id: SessionId,
    matched: Match,
    acknowledged: HashMap<PlayerName, bool>,
    ready_count: usize,
    deadline: Instant,
}

impl ReadyCheckSession {
    pub fn new(id: SessionId, matched: Match, timeout: Duration) -> Self {
        let acknowledged = matched
            .players
            .iter()
            .map(|p| (p.name.clone(), false))
            .collect();

        Self {
            id,
            matched,
            acknowledged,
            ready_count: 0,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn matched(&self) -> &Match {
        &self.matched
    }

    pub fn into_match(self) -> Match {
        self.matched
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn required_count(&self) -> usize {
        self.acknowledged.len()
    }

    pub fn ready_count(&self) -> usize {
        self.ready_count
    }

    pub fn is_acknowledged(&self, player: &str) -> bool {
        self.acknowledged.get(player).copied().unwrap_or(false)
    }

    /// Apply one response. Returns the terminal outcome once one is reached.
    pub fn handle_response(&mut self, response: &ReadyCheckResponse) -> Option<ReadyCheckOutcome> {
        if response.name != self.matched.queue_name {
            return None;
        }

        let Some(already_ready) = self.acknowledged.get_mut(&response.user_name) else {
            debug!(
                "Ready check {} ignoring response from {}, not in match {}",
                self.id, response.user_name, self.matched.id
            );
            return None;
        };

        debug!(
            "Ready check {} got '{}' from {} (match {} in {})",
            self.id, response.response, response.user_name, self.matched.id, self.matched.queue_name
        );

        if response.response != READY_RESPONSE {
            return Some(ReadyCheckOutcome::Failed(format!(
                "{} responded with status {}",
                response.user_name, response.response
            )));
        }

        if !*already_ready {
            *already_ready = true;
            self.ready_count += 1;
        }

        if self.ready_count == self.required_count() {
            info!(
                "Ready check complete for match {} in {}",
                self.matched.id, self.matched.queue_name
            );
            return Some(ReadyCheckOutcome::Passed);
        }

        None
    }
}
