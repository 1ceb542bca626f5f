//! Queue definitions file and matching script lookup

use crate::config::app::MatchingSettings;
use crate::error::{MatchbotError, Result};
use crate::types::QueueDefinition;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Read and validate the JSON array of queue definitions
pub fn load_queue_definitions(path: &Path) -> Result<Vec<QueueDefinition>> {
    let raw = std::fs::read_to_string(path).map_err(|e| MatchbotError::ConfigurationError {
        message: format!("Could not read queues file {}: {}", path.display(), e),
    })?;

    let definitions: Vec<QueueDefinition> =
        serde_json::from_str(&raw).map_err(|e| MatchbotError::ConfigurationError {
            message: format!("Could not decode queues file {}: {}", path.display(), e),
        })?;

    validate_queue_definitions(&definitions)?;
    Ok(definitions)
}

pub fn validate_queue_definitions(definitions: &[QueueDefinition]) -> Result<()> {
    let mut names = HashSet::new();

    for definition in definitions {
        if definition.name.trim().is_empty() {
            return Err(MatchbotError::ConfigurationError {
                message: "Queue definition with an empty name".to_string(),
            }
            .into());
        }
        if !names.insert(definition.name.as_str()) {
            return Err(MatchbotError::ConfigurationError {
                message: format!("Queue {} is defined more than once", definition.name),
            }
            .into());
        }
        if definition.min_players > definition.max_players {
            return Err(MatchbotError::ConfigurationError {
                message: format!(
                    "Queue {} has minPlayers {} above maxPlayers {}",
                    definition.name, definition.min_players, definition.max_players
                ),
            }
            .into());
        }
    }

    Ok(())
}

/// `<scripts_dir>/<queue>.lua` if present, otherwise the default script
pub fn find_script(settings: &MatchingSettings, queue_name: &str) -> Result<PathBuf> {
    let own = settings.scripts_dir.join(format!("{}.lua", queue_name));
    if own.is_file() {
        return Ok(own);
    }

    match &settings.default_script {
        Some(fallback) if fallback.is_file() => Ok(fallback.clone()),
        Some(fallback) => Err(MatchbotError::ConfigurationError {
            message: format!(
                "No script for queue {}: {} and {} do not exist",
                queue_name,
                own.display(),
                fallback.display()
            ),
        }
        .into()),
        None => Err(MatchbotError::ConfigurationError {
            message: format!(
                "No script for queue {}: {} does not exist",
                queue_name,
                own.display()
            ),
        }
        .into()),
    }
}
