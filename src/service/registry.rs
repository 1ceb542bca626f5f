//! Open queues and the player index
//!
//! Both maps sit behind one mutex so "is this player queued anywhere" and
//! "add them here" happen atomically. The lock is never held across an
//! await. Lock order is registry first, then a queue's own lock.

use crate::error::{MatchbotError, Result};
use crate::queue::MatchQueue;
use crate::types::PlayerName;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct OpenQueue {
    queue: Arc<MatchQueue>,
    ticker: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
    queues: HashMap<String, OpenQueue>,
    /// player name to the name of the queue they are in
    players: HashMap<PlayerName, String>,
}

impl RegistryState {
    fn unindex_queue(&mut self, queue_name: &str) -> usize {
        let before = self.players.len();
        self.players.retain(|_, queue| queue != queue_name);
        before - self.players.len()
    }
}

/// Per-player result of a join request
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub accepted: Vec<PlayerName>,
    /// Denied players grouped by reason
    pub denied: BTreeMap<String, Vec<PlayerName>>,
}

pub fn already_queued_reason(queue_name: &str) -> String {
    format!(
        "already waiting in {}. Leave that queue before joining another!",
        queue_name
    )
}

pub fn unknown_queue_reason(queue_name: &str) -> String {
    format!(
        "matchbot does not know about queue {}: something went wrong, contact the admin!",
        queue_name
    )
}

fn add_failed_reason(error: &anyhow::Error) -> String {
    format!(
        "matchbot error adding to queue! ask admin to check logs. error: {}",
        error
    )
}

#[derive(Default)]
pub struct QueueRegistry {
    state: Mutex<RegistryState>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>> {
        self.state.lock().map_err(|_| {
            MatchbotError::InternalError {
                message: "Failed to acquire queue registry lock".to_string(),
            }
            .into()
        })
    }

    /// Register a queue, replacing (and stopping) any queue of the same name
    pub fn insert(&self, queue: Arc<MatchQueue>, ticker: CancellationToken) -> Result<()> {
        let mut state = self.lock()?;
        let name = queue.name().to_string();

        if let Some(previous) = state.queues.insert(name.clone(), OpenQueue { queue, ticker }) {
            previous.ticker.cancel();
            let dropped = state.unindex_queue(&name);
            warn!(
                "Queue {} reopened, dropped {} players from the previous instance",
                name, dropped
            );
        } else {
            info!("Queue {} opened", name);
        }
        Ok(())
    }

    pub fn get(&self, queue_name: &str) -> Option<Arc<MatchQueue>> {
        self.lock()
            .ok()?
            .queues
            .get(queue_name)
            .map(|open| open.queue.clone())
    }

    pub fn queue_of(&self, player: &str) -> Option<String> {
        self.lock().ok()?.players.get(player).cloned()
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .map(|state| state.queues.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn queue_count(&self) -> usize {
        self.lock().map(|s| s.queues.len()).unwrap_or(0)
    }

    pub fn indexed_players(&self) -> usize {
        self.lock().map(|s| s.players.len()).unwrap_or(0)
    }

    /// Try to add every named player to `queue_name`
    pub fn join(&self, queue_name: &str, names: &[PlayerName]) -> Result<JoinOutcome> {
        let mut state = self.lock()?;
        let queue = match state.queues.get(queue_name) {
            Some(open) => open.queue.clone(),
            None => {
                return Err(MatchbotError::QueueNotFound {
                    queue: queue_name.to_string(),
                }
                .into())
            }
        };

        let mut outcome = JoinOutcome::default();
        for name in names {
            if let Some(current) = state.players.get(name) {
                outcome
                    .denied
                    .entry(already_queued_reason(current))
                    .or_default()
                    .push(name.clone());
                continue;
            }

            match queue.add_player(name) {
                Ok(_) => {
                    state.players.insert(name.clone(), queue_name.to_string());
                    outcome.accepted.push(name.clone());
                }
                Err(e) => {
                    warn!("Could not add {} to queue {}: {}", name, queue_name, e);
                    outcome
                        .denied
                        .entry(add_failed_reason(&e))
                        .or_default()
                        .push(name.clone());
                }
            }
        }

        Ok(outcome)
    }

    /// Remove players who asked to leave `requested_queue`. A player is
    /// removed from the queue they are actually in, even if that differs.
    /// Returns the players removed.
    pub fn leave(&self, requested_queue: &str, names: &[PlayerName]) -> Result<Vec<PlayerName>> {
        let mut state = self.lock()?;
        if !state.queues.contains_key(requested_queue) {
            warn!("Leave request for unknown queue {}", requested_queue);
        }

        let mut removed = Vec::new();
        for name in names {
            let Some(actual) = state.players.get(name).cloned() else {
                warn!(
                    "{} asked to leave {} but is not in any queue",
                    name, requested_queue
                );
                continue;
            };

            if actual != requested_queue {
                warn!(
                    "{} asked to leave {} but is waiting in {}, removing from {}",
                    name, requested_queue, actual, actual
                );
            }

            if let Some(open) = state.queues.get(&actual) {
                if let Err(e) = open.queue.remove_player(name) {
                    warn!("Error removing {} from queue {}: {}", name, actual, e);
                }
            }
            state.players.remove(name);
            removed.push(name.clone());
        }

        Ok(removed)
    }

    /// Remove a player from whatever queue they are in
    pub fn remove_user(&self, name: &str) -> Result<Option<String>> {
        let mut state = self.lock()?;
        let Some(queue_name) = state.players.remove(name) else {
            return Ok(None);
        };

        if let Some(open) = state.queues.get(&queue_name) {
            if let Err(e) = open.queue.remove_player(name) {
                warn!("Error removing {} from queue {}: {}", name, queue_name, e);
            }
        }
        debug!("Removed disconnected user {} from {}", name, queue_name);
        Ok(Some(queue_name))
    }

    /// Forget players whose match went ahead so they may queue again
    pub fn unindex(&self, queue_name: &str, names: &[PlayerName]) -> Result<()> {
        let mut state = self.lock()?;
        for name in names {
            if state.players.get(name).map(String::as_str) == Some(queue_name) {
                state.players.remove(name);
            }
        }
        Ok(())
    }

    /// Drop every queue and the whole index. Returns the queues dropped.
    pub fn clear(&self) -> usize {
        let Ok(mut state) = self.lock() else {
            return 0;
        };

        let dropped = state.queues.len();
        for (_, open) in state.queues.drain() {
            open.ticker.cancel();
        }
        state.players.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::script::DEFAULT_INSTRUCTION_LIMIT;
    use crate::types::QueueDefinition;
    use proptest::prelude::*;
    use tokio::sync::mpsc;

    fn open(registry: &QueueRegistry, name: &str) -> CancellationToken {
        let (tx, _rx) = mpsc::unbounded_channel();
        let definition = QueueDefinition {
            name: name.to_string(),
            title: name.to_string(),
            description: String::new(),
            map_names: vec![],
            game_names: vec![],
            engine_versions: vec![],
            min_players: 2,
            max_players: 2,
            team_join_allowed: false,
        };
        let queue = MatchQueue::new(definition, "t.lua", "", DEFAULT_INSTRUCTION_LIMIT, tx).unwrap();
        let token = CancellationToken::new();
        registry.insert(Arc::new(queue), token.clone()).unwrap();
        token
    }

    fn names(list: &[&str]) -> Vec<PlayerName> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_join_denies_players_queued_elsewhere() {
        let registry = QueueRegistry::new();
        open(&registry, "1v1");
        open(&registry, "2v2");

        let outcome = registry.join("2v2", &names(&["A"])).unwrap();
        assert_eq!(outcome.accepted, names(&["A"]));

        let outcome = registry.join("1v1", &names(&["A", "B"])).unwrap();
        assert_eq!(outcome.accepted, names(&["B"]));
        assert_eq!(
            outcome.denied.get(&already_queued_reason("2v2")),
            Some(&names(&["A"]))
        );
        assert!(already_queued_reason("2v2").contains("already waiting in 2v2"));

        // A's registration is unchanged
        assert_eq!(registry.queue_of("A").as_deref(), Some("2v2"));
        assert!(registry.get("1v1").unwrap().player("A").is_none());
    }

    #[test]
    fn test_join_unknown_queue() {
        let registry = QueueRegistry::new();
        let err = registry.join("nope", &names(&["A"])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchbotError>(),
            Some(MatchbotError::QueueNotFound { .. })
        ));
    }

    #[test]
    fn test_leave_uses_actual_queue() {
        let registry = QueueRegistry::new();
        open(&registry, "1v1");
        open(&registry, "2v2");
        registry.join("2v2", &names(&["A"])).unwrap();

        let removed = registry.leave("1v1", &names(&["A", "Ghost"])).unwrap();
        assert_eq!(removed, names(&["A"]));
        assert_eq!(registry.queue_of("A"), None);
        assert_eq!(registry.get("2v2").unwrap().player_count(), 0);

        // and may join again
        assert_eq!(
            registry.join("1v1", &names(&["A"])).unwrap().accepted,
            names(&["A"])
        );
    }

    #[test]
    fn test_remove_user() {
        let registry = QueueRegistry::new();
        open(&registry, "1v1");
        registry.join("1v1", &names(&["A"])).unwrap();

        assert_eq!(registry.remove_user("A").unwrap().as_deref(), Some("1v1"));
        assert_eq!(registry.remove_user("A").unwrap(), None);
        assert_eq!(registry.get("1v1").unwrap().player_count(), 0);
    }

    #[test]
    fn test_reopen_replaces_queue_and_unindexes() {
        let registry = QueueRegistry::new();
        let first = open(&registry, "1v1");
        registry.join("1v1", &names(&["A"])).unwrap();

        open(&registry, "1v1");
        assert!(first.is_cancelled());
        assert_eq!(registry.queue_count(), 1);
        assert_eq!(registry.queue_of("A"), None);
        assert_eq!(registry.get("1v1").unwrap().player_count(), 0);
    }

    #[test]
    fn test_clear_stops_everything() {
        let registry = QueueRegistry::new();
        let ticker = open(&registry, "1v1");
        registry.join("1v1", &names(&["A", "B"])).unwrap();

        assert_eq!(registry.clear(), 1);
        assert!(ticker.is_cancelled());
        assert_eq!(registry.queue_count(), 0);
        assert_eq!(registry.indexed_players(), 0);
    }

    const QUEUES: [&str; 3] = ["1v1", "2v2", "ffa"];
    const PLAYERS: [&str; 5] = ["A", "B", "C", "D", "E"];

    #[derive(Debug, Clone)]
    enum Step {
        Join(usize, Vec<usize>),
        Leave(usize, Vec<usize>),
        Disconnect(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        let players = || prop::collection::vec(0..PLAYERS.len(), 1..4);
        prop_oneof![
            (0..QUEUES.len(), players()).prop_map(|(q, p)| Step::Join(q, p)),
            (0..QUEUES.len(), players()).prop_map(|(q, p)| Step::Leave(q, p)),
            (0..PLAYERS.len()).prop_map(Step::Disconnect),
        ]
    }

    fn pick(indices: &[usize]) -> Vec<PlayerName> {
        indices.iter().map(|&i| PLAYERS[i].to_string()).collect()
    }

    proptest! {
        #[test]
        fn prop_player_is_in_at_most_one_queue(steps in prop::collection::vec(step(), 1..40)) {
            let registry = QueueRegistry::new();
            for queue in QUEUES {
                open(&registry, queue);
            }

            for step in steps {
                match step {
                    Step::Join(q, p) => {
                        registry.join(QUEUES[q], &pick(&p)).unwrap();
                    }
                    Step::Leave(q, p) => {
                        registry.leave(QUEUES[q], &pick(&p)).unwrap();
                    }
                    Step::Disconnect(p) => {
                        registry.remove_user(PLAYERS[p]).unwrap();
                    }
                }

                for player in PLAYERS {
                    let holding: Vec<&str> = QUEUES
                        .iter()
                        .copied()
                        .filter(|q| registry.get(q).unwrap().player(player).is_some())
                        .collect();
                    prop_assert!(holding.len() <= 1, "{} is in {:?}", player, holding);
                    let queue_of = registry.queue_of(player);
                    prop_assert_eq!(queue_of.as_deref(), holding.first().copied());
                }
            }
        }
    }
}
