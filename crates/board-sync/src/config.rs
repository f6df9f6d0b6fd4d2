//! Board configuration
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::{BoardError, Result, DEFAULT_PRIORITY};

/// What a failed reorder does to the optimistic order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Put the previous snapshot back unless the feed has moved on
    #[default]
    Restore,

    /// Leave the optimistic order until the next feed delivery
    AwaitFeed,
}

/// How a project's priority changes when it becomes completed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletedPolicy {
    /// Renumber it past every other project
    #[default]
    MoveToEnd,

    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub projects_path: String,
    pub people_path: String,
    pub default_priority: i64,
    pub rollback: RollbackPolicy,
    pub completed_policy: CompletedPolicy,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            projects_path: "projects".to_string(),
            people_path: "people".to_string(),
            default_priority: DEFAULT_PRIORITY,
            rollback: RollbackPolicy::default(),
            completed_policy: CompletedPolicy::default(),
        }
    }
}

impl BoardConfig {
    /// Read a JSON config; a missing file gives the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = fs::read_to_string(path)
            .map_err(|e| BoardError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| BoardError::Config(format!("invalid config {}: {}", path.display(), e)))?;

        if config.projects_path == config.people_path {
            return Err(BoardError::Config(
                "projects and people need separate collections".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BoardConfig::load(dir.path().join("board.json")).unwrap();
        assert_eq!(config, BoardConfig::default());
        assert_eq!(config.default_priority, 999);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        fs::write(&path, r#"{ "rollback": "await_feed", "people_path": "members" }"#).unwrap();

        let config = BoardConfig::load(&path).unwrap();
        assert_eq!(config.rollback, RollbackPolicy::AwaitFeed);
        assert_eq!(config.people_path, "members");
        assert_eq!(config.projects_path, "projects");
        assert_eq!(config.completed_policy, CompletedPolicy::MoveToEnd);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            BoardConfig::load(&path),
            Err(BoardError::Config(_))
        ));

        fs::write(&path, r#"{ "people_path": "projects" }"#).unwrap();
        assert!(matches!(
            BoardConfig::load(&path),
            Err(BoardError::Config(_))
        ));
    }
}
