//! In-process real-time store: a JSON document tree with per-collection feeds
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{BoardError, CollectionSnapshot, CollectionStore, Feed, FeedGuard, Result, StorePath};

/// Shared in-memory store. Clones share the same data and subscribers.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    root: RwLock<Map<String, Value>>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscriber: AtomicU64,
    offline: AtomicBool,
    writes: AtomicU64,
}

struct Subscriber {
    collection: String,
    tx: mpsc::UnboundedSender<CollectionSnapshot>,
}

enum Write {
    Set(StorePath, Value),
    Merge(StorePath, Map<String, Value>),
    Remove(StorePath),
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document tree
    pub fn from_tree(root: Map<String, Value>) -> Self {
        let store = Self::default();
        *store.inner.root.write() = root;
        store
    }

    /// Load a tree saved with [`MemoryStore::save`]; a missing file is an empty store
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No store file at {}, starting empty", path.display());
            return Ok(Self::new());
        }

        let json = fs::read_to_string(path).await.map_err(|e| {
            BoardError::StoreRead(format!("failed to read {}: {}", path.display(), e))
        })?;
        let root: Map<String, Value> = serde_json::from_str(&json)?;

        info!("Loaded store from {}", path.display());
        Ok(Self::from_tree(root))
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(|e| {
                BoardError::StoreWrite(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }

        let json = serde_json::to_string_pretty(&*self.inner.root.read())?;
        fs::write(path, json).await.map_err(|e| {
            BoardError::StoreWrite(format!("failed to write {}: {}", path.display(), e))
        })?;

        debug!("Saved store to {}", path.display());
        Ok(())
    }

    /// While offline every write fails and nothing changes
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of write calls that reached the data
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Current value at `path`, if any
    pub fn read(&self, path: &StorePath) -> Option<Value> {
        let root = self.inner.root.read();
        let (first, rest) = path.segments().split_first()?;
        let mut node = root.get(first)?;
        for segment in rest {
            node = node.as_object()?.get(segment)?;
        }
        Some(node.clone())
    }

    fn apply(&self, writes: Vec<Write>) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(BoardError::StoreWrite("store is offline".to_string()));
        }

        let mut root = self.inner.root.write();
        let mut touched = BTreeSet::new();

        for write in writes {
            match write {
                Write::Set(path, value) => {
                    touched.insert(path.collection().to_string());
                    set_at(&mut root, path.segments(), value);
                }
                Write::Merge(path, fields) => {
                    touched.insert(path.collection().to_string());
                    for (field, value) in fields {
                        let mut segments = path.segments().to_vec();
                        segments.push(field);
                        set_at(&mut root, &segments, value);
                    }
                }
                Write::Remove(path) => {
                    touched.insert(path.collection().to_string());
                    remove_at(&mut root, path.segments());
                }
            }
        }
        self.inner.writes.fetch_add(1, Ordering::SeqCst);

        // Notify while still holding the tree so feeds observe writes in order
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|id, subscriber| {
            if !touched.contains(&subscriber.collection) {
                return true;
            }
            let alive = subscriber
                .tx
                .send(collection_snapshot(&root, &subscriber.collection))
                .is_ok();
            if !alive {
                debug!(subscriber = id, "dropping closed feed");
            }
            alive
        });

        Ok(())
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn set(&self, path: &StorePath, record: Value) -> Result<()> {
        self.apply(vec![Write::Set(path.clone(), record)])
    }

    async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
        self.apply(vec![Write::Merge(path.clone(), fields)])
    }

    async fn remove(&self, path: &StorePath) -> Result<()> {
        self.apply(vec![Write::Remove(path.clone())])
    }

    async fn multi_update(&self, writes: Vec<(StorePath, Value)>) -> Result<()> {
        for (i, (a, _)) in writes.iter().enumerate() {
            for (b, _) in writes.iter().skip(i + 1) {
                if a.contains(b) || b.contains(a) {
                    return Err(BoardError::InvalidArgument(format!(
                        "overlapping paths in one update: {} and {}",
                        a, b
                    )));
                }
            }
        }

        self.apply(
            writes
                .into_iter()
                .map(|(path, value)| Write::Set(path, value))
                .collect(),
        )
    }

    fn subscribe(&self, collection: &str) -> Result<Feed> {
        let collection = StorePath::parse(collection)?;
        if collection.segments().len() != 1 {
            return Err(BoardError::InvalidArgument(format!(
                "feeds are per top-level collection, got '{}'",
                collection
            )));
        }
        let collection = collection.collection().to_string();

        let (tx, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);

        {
            // Hold the tree so no write slips between the first snapshot and registration
            let root = self.inner.root.read();
            let _ = tx.send(collection_snapshot(&root, &collection));
            self.inner.subscribers.lock().insert(
                id,
                Subscriber {
                    collection: collection.clone(),
                    tx,
                },
            );
        }
        debug!(subscriber = id, %collection, "feed registered");

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let guard = FeedGuard::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.subscribers.lock().remove(&id);
                debug!(subscriber = id, "feed removed");
            }
        });

        Ok(Feed { receiver, guard })
    }
}

fn collection_snapshot(root: &Map<String, Value>, collection: &str) -> CollectionSnapshot {
    match root.get(collection) {
        Some(Value::Object(records)) => Some(records.clone()),
        _ => None,
    }
}

fn set_at(node: &mut Map<String, Value>, segments: &[String], value: Value) {
    if value.is_null() {
        remove_at(node, segments);
        return;
    }

    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut node = node;
    for segment in parents {
        let child = node
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        node = match child {
            Value::Object(map) => map,
            _ => return,
        };
    }
    node.insert(last.clone(), value);
}

/// Removes the value at `segments` and prunes parents left empty.
/// Returns true if `node` itself is now empty.
fn remove_at(node: &mut Map<String, Value>, segments: &[String]) -> bool {
    match segments {
        [] => {}
        [last] => {
            node.remove(last);
        }
        [first, rest @ ..] => {
            let emptied = match node.get_mut(first) {
                Some(Value::Object(child)) => remove_at(child, rest),
                _ => false,
            };
            if emptied {
                node.remove(first);
            }
        }
    }
    node.is_empty()
}
