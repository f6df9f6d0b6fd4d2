//! Live collection cache: the last full snapshot a change feed delivered
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{BoardError, Entity, EntityId, Repository, Result, Subscription};

struct CacheState<E> {
    items: Arc<Vec<E>>,
    loading: bool,
    error: Option<BoardError>,
    /// Feed deliveries received so far
    delivered: u64,
    closed: bool,
}

/// Synchronous view of a collection, replaced wholesale on every feed delivery
pub struct LiveCollection<E: Entity> {
    state: Arc<RwLock<CacheState<E>>>,
    deliveries: watch::Receiver<u64>,
    subscription: Subscription,
}

impl<E: Entity> LiveCollection<E> {
    /// Subscribe to the repository's feed. Must be called inside a tokio runtime.
    pub fn open(repository: &Repository<E>) -> Result<Self> {
        let state = Arc::new(RwLock::new(CacheState {
            items: Arc::new(Vec::new()),
            loading: true,
            error: None,
            delivered: 0,
            closed: false,
        }));
        let (tx, deliveries) = watch::channel(0u64);

        let feed_state = Arc::clone(&state);
        let collection = repository.collection().to_string();
        let subscription = repository.subscribe_to_all(move |snapshot| {
            let delivered = {
                let mut state = feed_state.write();
                if state.closed {
                    return;
                }
                debug!(%collection, count = snapshot.items.len(), "snapshot replaced");
                state.items = Arc::new(snapshot.items);
                match snapshot.error {
                    Some(err) => {
                        warn!(%collection, error = %err, "snapshot had unreadable records");
                        state.error = Some(err);
                    }
                    None if matches!(state.error, Some(BoardError::StoreRead(_))) => {
                        state.error = None;
                    }
                    None => {}
                }
                state.loading = false;
                state.delivered += 1;
                state.delivered
            };
            let _ = tx.send(delivered);
        })?;

        Ok(Self {
            state,
            deliveries,
            subscription,
        })
    }

    /// Current snapshot; pointer-equal until the next replacement
    pub fn items(&self) -> Arc<Vec<E>> {
        Arc::clone(&self.state.read().items)
    }

    /// True until the first feed delivery
    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    /// Most recent failure, cleared when the next operation starts
    pub fn error(&self) -> Option<BoardError> {
        self.state.read().error.clone()
    }

    pub fn deliveries(&self) -> u64 {
        self.state.read().delivered
    }

    pub fn get(&self, id: &EntityId) -> Option<E> {
        self.state
            .read()
            .items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    /// Entities for `ids` that currently exist, in input order
    pub fn get_many(&self, ids: &[EntityId]) -> Vec<E> {
        let state = self.state.read();
        ids.iter()
            .filter_map(|id| state.items.iter().find(|item| item.id() == id).cloned())
            .collect()
    }

    /// Wait until more than `seen` feed deliveries have arrived
    pub async fn wait_for_delivery(&self, seen: u64) -> Result<u64> {
        let mut deliveries = self.deliveries.clone();
        let delivered = deliveries
            .wait_for(|delivered| *delivered > seen)
            .await
            .map_err(|_| BoardError::StoreRead("feed closed".to_string()))?;
        Ok(*delivered)
    }

    /// Wait for the first feed delivery
    pub async fn loaded(&self) -> Result<()> {
        self.wait_for_delivery(0).await.map(|_| ())
    }

    /// Wait for the next feed delivery after now
    pub async fn next_delivery(&self) -> Result<u64> {
        self.wait_for_delivery(self.deliveries()).await
    }

    /// Stop listening; the snapshot is frozen afterwards
    pub fn close(&self) {
        {
            let mut state = self.state.write();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.subscription.unsubscribe();
        info!("live collection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    pub(crate) fn begin_attempt(&self) {
        self.state.write().error = None;
    }

    pub(crate) fn record_error(&self, err: BoardError) {
        self.state.write().error = Some(err);
    }

    /// Replace the snapshot locally, returning what it replaced and the delivery count
    pub(crate) fn apply_optimistic(&self, items: Vec<E>) -> (Arc<Vec<E>>, u64) {
        let mut state = self.state.write();
        let previous = std::mem::replace(&mut state.items, Arc::new(items));
        (previous, state.delivered)
    }

    /// Put `previous` back unless the feed delivered since `delivered`
    pub(crate) fn restore_if_unchanged(&self, previous: Arc<Vec<E>>, delivered: u64) -> bool {
        let mut state = self.state.write();
        if state.delivered != delivered || state.closed {
            return false;
        }
        state.items = previous;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CollectionStore, CreatePersonInput, MemoryStore, Person, StorePath};
    use serde_json::json;

    fn people() -> (MemoryStore, Repository<Person>) {
        let store = MemoryStore::new();
        let repo = Repository::new(Arc::new(store.clone()) as Arc<dyn CollectionStore>);
        (store, repo)
    }

    #[tokio::test]
    async fn test_loading_clears_on_first_delivery() {
        let (_store, repo) = people();
        let cache = LiveCollection::open(&repo).unwrap();

        cache.loaded().await.unwrap();
        assert!(!cache.is_loading());
        assert!(cache.items().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_replaced_on_write() {
        let (_store, repo) = people();
        let cache = LiveCollection::open(&repo).unwrap();
        cache.loaded().await.unwrap();

        let seen = cache.deliveries();
        let id = repo
            .create(CreatePersonInput::new("Steve", "#55FF55"))
            .await
            .unwrap();
        cache.wait_for_delivery(seen).await.unwrap();

        assert_eq!(cache.items().len(), 1);
        assert_eq!(cache.get(&id).map(|p| p.name), Some("Steve".to_string()));
    }

    #[tokio::test]
    async fn test_get_many_drops_missing_ids() {
        let (_store, repo) = people();
        let cache = LiveCollection::open(&repo).unwrap();
        cache.loaded().await.unwrap();

        let a = repo.create(CreatePersonInput::new("A", "#111")).await.unwrap();
        let b = repo.create(CreatePersonInput::new("B", "#222")).await.unwrap();
        // initial delivery plus one per create
        cache.wait_for_delivery(2).await.unwrap();

        let found = cache.get_many(&[b.clone(), EntityId::from("gone"), a.clone()]);
        let ids: Vec<EntityId> = found.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[tokio::test]
    async fn test_unreadable_record_keeps_rest_readable() {
        let (store, repo) = people();
        let steve = repo
            .create(CreatePersonInput::new("Steve", "#55FF55"))
            .await
            .unwrap();
        store
            .set(&StorePath::parse("people/broken").unwrap(), json!(42))
            .await
            .unwrap();

        let cache = LiveCollection::open(&repo).unwrap();
        cache.loaded().await.unwrap();

        assert!(!cache.is_loading());
        assert!(matches!(cache.error(), Some(BoardError::StoreRead(_))));
        assert_eq!(cache.items().len(), 1);
        assert!(cache.get(&steve).is_some());

        // a readable snapshot clears the read error
        let seen = cache.deliveries();
        store
            .remove(&StorePath::parse("people/broken").unwrap())
            .await
            .unwrap();
        cache.wait_for_delivery(seen).await.unwrap();
        assert_eq!(cache.error(), None);
    }

    #[tokio::test]
    async fn test_close_freezes_snapshot() {
        let (store, repo) = people();
        let cache = LiveCollection::open(&repo).unwrap();
        cache.loaded().await.unwrap();

        cache.close();
        cache.close();
        assert!(cache.is_closed());
        assert_eq!(store.subscriber_count(), 0);

        repo.create(CreatePersonInput::new("Late", "#333"))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(cache.items().is_empty());
    }

    #[tokio::test]
    async fn test_restore_skipped_after_delivery() {
        let (_store, repo) = people();
        let cache = LiveCollection::open(&repo).unwrap();
        cache.loaded().await.unwrap();

        let (previous, delivered) = cache.apply_optimistic(Vec::new());
        assert!(cache.restore_if_unchanged(Arc::clone(&previous), delivered));

        let (previous, delivered) = cache.apply_optimistic(Vec::new());
        repo.create(CreatePersonInput::new("A", "#111")).await.unwrap();
        cache.wait_for_delivery(delivered).await.unwrap();
        assert!(!cache.restore_if_unchanged(previous, delivered));
        assert_eq!(cache.items().len(), 1);
    }
}
