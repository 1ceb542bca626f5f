//! What happens to a match after its ready check

use crate::launcher::{GameExit, GameLauncher};
use crate::queue::MatchQueue;
use crate::protocol::connection::LobbyClient;
use crate::protocol::messages::READY_CHECK_FAIL;
use crate::readycheck::{MatchHandoff, ReadyCheckOutcome};
use crate::service::registry::QueueRegistry;
use crate::types::Match;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Launches passed matches and returns failed ones to their queue
pub struct GameHandoff {
    lobby: Arc<dyn LobbyClient>,
    launcher: Arc<dyn GameLauncher>,
    registry: Arc<QueueRegistry>,
}

impl GameHandoff {
    pub fn new(
        lobby: Arc<dyn LobbyClient>,
        launcher: Arc<dyn GameLauncher>,
        registry: Arc<QueueRegistry>,
    ) -> Self {
        Self {
            lobby,
            launcher,
            registry,
        }
    }

    /// The queue that formed `matched`, if it is still open
    fn queue_for(&self, matched: &Match) -> Option<Arc<MatchQueue>> {
        match self.registry.get(&matched.queue_name) {
            Some(queue) if queue.formed(matched) => Some(queue),
            Some(_) => {
                warn!(
                    "Queue {} was reopened since match {} formed",
                    matched.queue_name, matched.id
                );
                None
            }
            None => {
                warn!(
                    "Queue {} is gone, dropping match {}",
                    matched.queue_name, matched.id
                );
                None
            }
        }
    }

    fn release(&self, matched: &Match) {
        let Some(queue) = self.queue_for(matched) else {
            return;
        };

        match queue.release_match(matched) {
            Ok(count) => info!(
                "Returned {} players of match {} to {}",
                count, matched.id, matched.queue_name
            ),
            Err(e) => error!(
                "Failed to release players of match {} in {}: {}",
                matched.id, matched.queue_name, e
            ),
        }
    }
}

#[async_trait]
impl MatchHandoff for GameHandoff {
    async fn match_passed(&self, matched: Match) {
        let names = matched.player_names();
        let Some(queue) = self.queue_for(&matched) else {
            if let Err(e) = self
                .lobby
                .ready_check_result(&matched.queue_name, &names, READY_CHECK_FAIL)
                .await
            {
                warn!("Could not report dropped match {}: {}", matched.id, e);
            }
            return;
        };

        match queue.mark_playing(&matched) {
            Ok(marked) if marked < names.len() => warn!(
                "Only {} of {} players of match {} are still held by it",
                marked,
                names.len(),
                matched.id
            ),
            Ok(_) => {}
            Err(e) => warn!("Could not mark match {} as playing: {}", matched.id, e),
        }

        let game = match self.launcher.launch(&matched).await {
            Ok(game) => game,
            Err(e) => {
                error!(
                    "Failed to launch match {} in {}: {}",
                    matched.id, matched.queue_name, e
                );
                if let Err(e) = self
                    .lobby
                    .ready_check_result(&matched.queue_name, &names, READY_CHECK_FAIL)
                    .await
                {
                    warn!("Could not report launch failure: {}", e);
                }
                self.release(&matched);
                return;
            }
        };

        for connect in game.connect_messages() {
            if let Err(e) = self.lobby.connect_user(&connect).await {
                warn!(
                    "Could not send connection details to {}: {}",
                    connect.user_name, e
                );
            }
        }

        match queue.retire_match(&matched) {
            Ok(retired) => {
                if let Err(e) = self.registry.unindex(&matched.queue_name, &retired) {
                    warn!("Could not unindex players of match {}: {}", matched.id, e);
                }
            }
            Err(e) => warn!("Could not retire players of match {}: {}", matched.id, e),
        }

        info!(
            "Match {} in {} is live on {}:{}",
            matched.id, matched.queue_name, game.ip, game.port
        );

        let label = format!("{}#{}", matched.queue_name, matched.id);
        let completion = game.completion;
        tokio::spawn(async move {
            match completion.await {
                Ok(GameExit { success: true, .. }) => info!("Game {} finished", label),
                Ok(GameExit { code, .. }) => {
                    warn!("Game {} exited abnormally (code {:?})", label, code)
                }
                Err(_) => warn!("Lost the exit status of game {}", label),
            }
        });
    }

    async fn match_failed(&self, matched: Match, outcome: ReadyCheckOutcome) {
        info!(
            "Match {} in {} did not start: {}",
            matched.id, matched.queue_name, outcome
        );
        self.release(&matched);
    }
}
