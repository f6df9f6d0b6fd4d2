//! Contract of the shared document store the board syncs against
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::{BoardError, Result};

/// Characters a path segment may not contain
const FORBIDDEN_SEGMENT_CHARS: &[char] = &['.', '#', '$', '[', ']'];

/// Slash-separated location of a document or field, e.g. `projects/<id>/priority`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn parse(path: &str) -> Result<Self> {
        let mut parsed = Self {
            segments: Vec::new(),
        };
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            parsed = parsed.child(segment)?;
        }
        if parsed.segments.is_empty() {
            return Err(BoardError::InvalidArgument(format!(
                "empty store path '{}'",
                path
            )));
        }
        Ok(parsed)
    }

    pub fn child(&self, segment: &str) -> Result<Self> {
        if segment.is_empty()
            || segment.contains('/')
            || segment.contains(FORBIDDEN_SEGMENT_CHARS)
        {
            return Err(BoardError::InvalidArgument(format!(
                "invalid path segment '{}'",
                segment
            )));
        }
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Top-level collection the path lives under
    pub fn collection(&self) -> &str {
        &self.segments[0]
    }

    /// True if `self` equals `other` or is one of its ancestors
    pub fn contains(&self, other: &StorePath) -> bool {
        other.segments.starts_with(&self.segments)
    }
}

impl std::fmt::Display for StorePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Entire contents of a collection, keyed by record id; `None` when absent
pub type CollectionSnapshot = Option<Map<String, Value>>;

/// Live subscription to one collection
pub struct Feed {
    /// Receives a whole-collection snapshot now and after every change
    pub receiver: mpsc::UnboundedReceiver<CollectionSnapshot>,
    pub guard: FeedGuard,
}

/// Deregisters a feed listener. Safe to cancel more than once; dropping cancels.
pub struct FeedGuard {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FeedGuard {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn cancel(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_none()
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Path-addressable, real-time document store
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Replace the document at `path`
    async fn set(&self, path: &StorePath, record: Value) -> Result<()>;

    /// Write only the given fields of the document at `path`; `null` removes a field
    async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()>;

    /// Remove the document at `path`; removing nothing succeeds
    async fn remove(&self, path: &StorePath) -> Result<()>;

    /// Apply every write or none of them
    async fn multi_update(&self, writes: Vec<(StorePath, Value)>) -> Result<()>;

    /// Listen to every change under a top-level collection
    fn subscribe(&self, collection: &str) -> Result<Feed>;
}
