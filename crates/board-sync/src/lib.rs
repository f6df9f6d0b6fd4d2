/// Real-time project board synchronization
/// Live, priority-ordered collections of projects and people kept current
/// from a shared document store's change feed
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod model;
pub use model::*;

mod validate;
pub use validate::*;

mod store;
pub use store::*;

mod memory;
pub use memory::*;

mod repository;
pub use repository::*;

mod cache;
pub use cache::*;

mod reorder;
pub use reorder::*;

mod board;
pub use board::*;

mod config;
pub use config::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("store write failed: {0}")]
    StoreWrite(String),

    #[error("store read failed: {0}")]
    StoreRead(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for BoardError {
    fn from(err: serde_json::Error) -> Self {
        BoardError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BoardError>;

/// Entity identifier, assigned once by the repository when a record is created
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// `<prefix>-<unix millis>-<random>`; needs no coordination between clients
    pub fn generate(prefix: &str) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}-{}", prefix, millis, &random[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
