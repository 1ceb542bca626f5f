//! One named matchmaking queue
//!
//! A `MatchQueue` owns its player registry and its matching script. The
//! script mutex is the queue lock: every registry mutation and every call
//! into Lua happens while holding it, so the script never runs concurrently
//! with itself. The registry has its own short-lived lock that the script's
//! callbacks take while the queue lock is already held.

use crate::error::{MatchbotError, Result};
use crate::queue::script::{HookOutcome, MatchCandidate, MatchScript, QueueDataSource};
use crate::types::{
    Assignment, Match, MatchId, Player, PlayerName, PlayerStatus, QueueDefinition, QueueInstanceId,
};
use crate::utils::generate_queue_instance_id;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Player registry shared between the queue and its script callbacks
struct Registry {
    definition: QueueDefinition,
    instance: QueueInstanceId,
    players: Mutex<HashMap<PlayerName, Player>>,
    last_match_id: AtomicU64,
    matches: mpsc::UnboundedSender<Match>,
}

impl Registry {
    fn players(&self) -> Result<MutexGuard<'_, HashMap<PlayerName, Player>>> {
        self.players.lock().map_err(|_| {
            MatchbotError::InternalError {
                message: format!("Failed to acquire player lock for {}", self.definition.name),
            }
            .into()
        })
    }

    fn next_match_id(&self) -> MatchId {
        self.last_match_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn invalid(reason: impl Into<String>) -> anyhow::Error {
        MatchbotError::InvalidMatch {
            reason: reason.into(),
        }
        .into()
    }
}

impl QueueDataSource for Registry {
    fn title(&self) -> String {
        self.definition.title.clone()
    }

    fn waiting_players(&self) -> Vec<PlayerName> {
        let Ok(players) = self.players() else {
            return Vec::new();
        };

        let mut waiting: Vec<&Player> = players
            .values()
            .filter(|p| p.status == PlayerStatus::Waiting)
            .collect();
        waiting.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.name.cmp(&b.name)));
        waiting.into_iter().map(|p| p.name.clone()).collect()
    }

    fn map_names(&self) -> Vec<String> {
        self.definition.map_names.clone()
    }

    fn game_names(&self) -> Vec<String> {
        self.definition.game_names.clone()
    }

    fn submit_match(&self, candidate: MatchCandidate) -> Result<MatchId> {
        if candidate.players.is_empty() {
            return Err(Self::invalid("no players named"));
        }

        let mut players = self.players()?;

        let mut seen = HashSet::new();
        for seat in &candidate.players {
            if !seen.insert(seat.name.as_str()) {
                return Err(Self::invalid(format!("player {} named twice", seat.name)));
            }
            match players.get(&seat.name) {
                None => {
                    return Err(Self::invalid(format!(
                        "player {} is not in the queue",
                        seat.name
                    )))
                }
                Some(player) if player.status != PlayerStatus::Waiting => {
                    return Err(Self::invalid(format!(
                        "player {} is {}, not Waiting",
                        seat.name, player.status
                    )))
                }
                Some(_) => {}
            }
        }

        let id = self.next_match_id();
        for seat in &candidate.players {
            if let Some(player) = players.get_mut(&seat.name) {
                player.set_matched(Assignment {
                    match_id: id,
                    team: seat.team,
                    ally_team: seat.ally,
                });
            }
        }

        let seat_count = seen.len();
        let formed = Match {
            id,
            queue_name: self.definition.name.clone(),
            queue_instance: self.instance,
            game: candidate.game,
            map: candidate.map,
            engine_version: candidate.engine_version,
            players: candidate.players,
        };

        if let Err(mpsc::error::SendError(unsent)) = self.matches.send(formed) {
            for seat in &unsent.players {
                if let Some(player) = players.get_mut(&seat.name) {
                    player.set_waiting();
                }
            }
            return Err(MatchbotError::InternalError {
                message: format!("Match channel for {} is closed", self.definition.name),
            }
            .into());
        }

        info!(
            "Formed match {} in queue {} with {} players",
            id,
            self.definition.name,
            seat_count
        );
        Ok(id)
    }
}

/// A queue: registry plus its sandboxed matching script
pub struct MatchQueue {
    registry: Arc<Registry>,
    script: Mutex<MatchScript>,
    opened_at: Instant,
}

impl MatchQueue {
    /// Load the matching script and open the queue. Formed matches are sent
    /// on `matches`.
    pub fn new(
        definition: QueueDefinition,
        script_name: &str,
        script_source: &str,
        instruction_limit: u32,
        matches: mpsc::UnboundedSender<Match>,
    ) -> Result<Self> {
        let registry = Arc::new(Registry {
            definition,
            instance: generate_queue_instance_id(),
            players: Mutex::new(HashMap::new()),
            last_match_id: AtomicU64::new(0),
            matches,
        });

        let script = MatchScript::load(
            &registry.definition.name,
            script_name,
            script_source,
            instruction_limit,
            registry.clone(),
        )?;

        Ok(Self {
            registry,
            script: Mutex::new(script),
            opened_at: Instant::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.registry.definition.name
    }

    pub fn definition(&self) -> &QueueDefinition {
        &self.registry.definition
    }

    pub fn instance(&self) -> QueueInstanceId {
        self.registry.instance
    }

    /// Whether `matched` was formed by this opening of the queue
    pub fn formed(&self, matched: &Match) -> bool {
        matched.queue_instance == self.registry.instance && matched.queue_name == self.name()
    }

    fn check_formed(&self, matched: &Match) -> Result<()> {
        if self.formed(matched) {
            return Ok(());
        }
        Err(MatchbotError::InvalidMatch {
            reason: format!(
                "match {} was formed by an earlier {} queue",
                matched.id, matched.queue_name
            ),
        }
        .into())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MatchScript>> {
        self.script.lock().map_err(|_| {
            MatchbotError::InternalError {
                message: format!("Failed to acquire queue lock for {}", self.name()),
            }
            .into()
        })
    }

    /// Register a player as Waiting and notify the script.
    ///
    /// The registration stands even when `PlayerJoined` fails; the hook
    /// outcome is returned for the caller to act on.
    pub fn add_player(&self, name: &str) -> Result<HookOutcome> {
        let script = self.lock()?;

        {
            let mut players = self.registry.players()?;
            if players.contains_key(name) {
                return Err(MatchbotError::PlayerAlreadyQueued {
                    player: name.to_string(),
                    queue: self.name().to_string(),
                }
                .into());
            }
            players.insert(name.to_string(), Player::new(name));
        }

        let outcome = script.call_hook("PlayerJoined", name);
        if let HookOutcome::Failed(reason) = &outcome {
            warn!("PlayerJoined({}) failed in queue {}: {}", name, self.name(), reason);
        }
        debug!("Player {} joined queue {}", name, self.name());
        Ok(outcome)
    }

    /// Drop a player and notify the script
    pub fn remove_player(&self, name: &str) -> Result<HookOutcome> {
        let script = self.lock()?;

        if self.registry.players()?.remove(name).is_none() {
            return Err(MatchbotError::PlayerNotQueued {
                player: name.to_string(),
                queue: self.name().to_string(),
            }
            .into());
        }

        let outcome = script.call_hook("PlayerLeft", name);
        if let HookOutcome::Failed(reason) = &outcome {
            warn!("PlayerLeft({}) failed in queue {}: {}", name, self.name(), reason);
        }
        debug!("Player {} left queue {}", name, self.name());
        Ok(outcome)
    }

    /// Run the script's `Update` hook
    pub fn tick(&self, elapsed_seconds: u64) -> HookOutcome {
        match self.lock() {
            Ok(script) => script.call_hook("Update", elapsed_seconds),
            Err(e) => HookOutcome::Failed(e.to_string()),
        }
    }

    /// Return the players `matched` still holds, Matched or Playing, to
    /// Waiting. Players who left, or who have since been matched again, are
    /// skipped. Returns how many were released.
    pub fn release_match(&self, matched: &Match) -> Result<usize> {
        self.check_formed(matched)?;
        let _script = self.lock()?;
        let mut players = self.registry.players()?;

        let mut released = 0;
        for seat in &matched.players {
            if let Some(player) = players.get_mut(&seat.name) {
                if player.belongs_to(matched.id) {
                    player.set_waiting();
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    /// Move the players `matched` holds to Playing. Returns how many moved.
    pub fn mark_playing(&self, matched: &Match) -> Result<usize> {
        self.check_formed(matched)?;
        let _script = self.lock()?;
        let mut players = self.registry.players()?;

        let mut marked = 0;
        for seat in &matched.players {
            if let Some(player) = players.get_mut(&seat.name) {
                if player.status == PlayerStatus::Matched && player.belongs_to(matched.id) {
                    player.set_playing();
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    /// Remove the players of a match that went ahead, firing `PlayerLeft`
    /// for each. Players held by another match stay. Returns the names
    /// actually removed.
    pub fn retire_match(&self, matched: &Match) -> Result<Vec<PlayerName>> {
        self.check_formed(matched)?;
        let script = self.lock()?;

        let mut retired = Vec::new();
        for seat in &matched.players {
            let removed = {
                let mut players = self.registry.players()?;
                match players.get(&seat.name) {
                    Some(player) if player.belongs_to(matched.id) => {
                        players.remove(&seat.name).is_some()
                    }
                    _ => false,
                }
            };
            if !removed {
                continue;
            }

            if let HookOutcome::Failed(reason) = script.call_hook("PlayerLeft", seat.name.as_str()) {
                warn!("PlayerLeft({}) failed in queue {}: {}", seat.name, self.name(), reason);
            }
            retired.push(seat.name.clone());
        }
        Ok(retired)
    }

    pub fn player(&self, name: &str) -> Option<Player> {
        self.registry.players().ok()?.get(name).cloned()
    }

    pub fn players(&self) -> Vec<Player> {
        self.registry
            .players()
            .map(|players| players.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn player_count(&self) -> usize {
        self.registry.players().map(|p| p.len()).unwrap_or(0)
    }

    pub fn waiting_players(&self) -> Vec<PlayerName> {
        self.registry.waiting_players()
    }

    /// Tick the script every `period` until `token` is cancelled
    pub fn spawn_ticker(self: Arc<Self>, period: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick of an interval completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let elapsed = self.opened_at.elapsed().as_secs();
                        if let HookOutcome::Failed(reason) = self.tick(elapsed) {
                            warn!("Update failed in queue {}: {}", self.name(), reason);
                        }
                    }
                }
            }

            debug!("Ticker for queue {} stopped", self.name());
        })
    }
}
