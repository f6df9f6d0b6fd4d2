//! Typed CRUD over one store collection, plus its normalized change feed
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    priority_writes, BoardError, CollectionSnapshot, CollectionStore, EntityId, Feed, FeedGuard,
    Project, Result, StorePath,
};

/// A record type that lives in its own store collection
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    type Create: Send;
    type Update: Serialize + Send + Sync;

    /// Default collection name
    const COLLECTION: &'static str;
    const ID_PREFIX: &'static str;

    fn id(&self) -> &EntityId;

    fn from_create(id: EntityId, input: Self::Create, now: DateTime<Utc>) -> Self;

    /// Order applied to every feed snapshot
    fn sort_snapshot(_items: &mut [Self]) {}
}

pub struct Repository<E: Entity> {
    store: Arc<dyn CollectionStore>,
    collection: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            collection: self.collection.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self::with_collection(store, E::COLLECTION)
    }

    pub fn with_collection(store: Arc<dyn CollectionStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            _entity: PhantomData,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn record_path(&self, id: &EntityId) -> Result<StorePath> {
        StorePath::parse(&self.collection)?.child(id.as_str())
    }

    /// Write a new record and return its generated id
    pub async fn create(&self, input: E::Create) -> Result<EntityId> {
        let id = EntityId::generate(E::ID_PREFIX);
        let entity = E::from_create(id.clone(), input, Utc::now());
        let record = serde_json::to_value(&entity)?;

        self.store.set(&self.record_path(&id)?, record).await?;

        debug!(collection = %self.collection, %id, "record created");
        Ok(id)
    }

    /// Merge only the provided fields into the record
    pub async fn update(&self, id: &EntityId, fields: &E::Update) -> Result<()> {
        let mut fields = match serde_json::to_value(fields)? {
            Value::Object(fields) => fields,
            other => {
                return Err(BoardError::Serialization(format!(
                    "update must be an object, got {}",
                    other
                )))
            }
        };
        fields.remove("id");

        if fields.is_empty() {
            debug!(collection = %self.collection, %id, "empty update skipped");
            return Ok(());
        }

        self.store.merge(&self.record_path(id)?, fields).await?;

        debug!(collection = %self.collection, %id, "record updated");
        Ok(())
    }

    pub async fn delete(&self, id: &EntityId) -> Result<()> {
        self.store.remove(&self.record_path(id)?).await?;

        debug!(collection = %self.collection, %id, "record deleted");
        Ok(())
    }

    /// Deliver the full, sorted collection now and after every change.
    /// Must be called inside a tokio runtime.
    pub fn subscribe_to_all<F>(&self, mut callback: F) -> Result<Subscription>
    where
        F: FnMut(FeedSnapshot<E>) + Send + 'static,
    {
        let Feed {
            mut receiver,
            guard,
        } = self.store.subscribe(&self.collection)?;

        let collection = self.collection.clone();
        let task = tokio::spawn(async move {
            while let Some(snapshot) = receiver.recv().await {
                callback(decode_snapshot::<E>(&collection, snapshot));
            }
        });

        info!(collection = %self.collection, "subscribed to collection");
        Ok(Subscription {
            collection: self.collection.clone(),
            guard,
            task,
        })
    }
}

impl Repository<Project> {
    /// Set `priority = index + 1` for every project, as one atomic write
    pub async fn batch_update_priorities(&self, ordered: &[Project]) -> Result<()> {
        let writes = priority_writes(ordered)
            .into_iter()
            .map(|write| {
                Ok((
                    self.record_path(&write.id)?.child("priority")?,
                    Value::from(write.priority),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        if writes.is_empty() {
            return Ok(());
        }

        let count = writes.len();
        self.store.multi_update(writes).await?;

        debug!(collection = %self.collection, count, "priorities written");
        Ok(())
    }
}

/// One decoded feed delivery
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot<E> {
    /// Every readable record, sorted
    pub items: Vec<E>,
    /// `StoreRead` when at least one record could not be decoded
    pub error: Option<BoardError>,
}

/// Turn a raw collection snapshot into sorted records.
/// Unreadable records are skipped; the rest are still returned.
pub fn decode_snapshot<E: Entity>(
    collection: &str,
    snapshot: CollectionSnapshot,
) -> FeedSnapshot<E> {
    let Some(records) = snapshot else {
        return FeedSnapshot {
            items: Vec::new(),
            error: None,
        };
    };

    let mut items = Vec::with_capacity(records.len());
    let mut unreadable = Vec::new();
    for (key, record) in records {
        match serde_json::from_value::<E>(record) {
            Ok(item) => items.push(item),
            Err(e) => {
                warn!(%collection, %key, error = %e, "skipping unreadable record");
                unreadable.push(format!("{}/{}: {}", collection, key, e));
            }
        }
    }

    E::sort_snapshot(&mut items);
    let error = (!unreadable.is_empty()).then(|| {
        BoardError::StoreRead(format!("unreadable records {}", unreadable.join("; ")))
    });
    FeedSnapshot { items, error }
}

/// Owned feed listener. Unsubscribing is idempotent and also happens on drop.
pub struct Subscription {
    collection: String,
    guard: FeedGuard,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if self.guard.is_cancelled() {
            return;
        }
        self.guard.cancel();
        self.task.abort();
        info!(collection = %self.collection, "unsubscribed from collection");
    }

    pub fn is_active(&self) -> bool {
        !self.guard.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CreateProjectInput, MemoryStore, Person, ProjectStatus, UpdateProjectInput};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn project_repo() -> (MemoryStore, Repository<Project>) {
        let store = MemoryStore::new();
        let repo = Repository::new(Arc::new(store.clone()) as Arc<dyn CollectionStore>);
        (store, repo)
    }

    #[tokio::test]
    async fn test_create_writes_full_record() {
        let (store, repo) = project_repo();

        let mut input = CreateProjectInput::new("Build spawn");
        input.priority = Some(3);
        let id = repo.create(input).await.unwrap();

        assert!(id.as_str().starts_with("project-"));
        let record = store
            .read(&StorePath::parse(&format!("projects/{}", id)).unwrap())
            .unwrap();
        assert_eq!(record["id"], json!(id.as_str()));
        assert_eq!(record["title"], json!("Build spawn"));
        assert_eq!(record["priority"], json!(3));
        assert!(record["createdAt"].is_i64());
    }

    #[tokio::test]
    async fn test_update_leaves_other_fields() {
        let (store, repo) = project_repo();
        let id = repo.create(CreateProjectInput::new("Farm")).await.unwrap();
        let other = repo.create(CreateProjectInput::new("Wall")).await.unwrap();

        let path = StorePath::parse(&format!("projects/{}", id)).unwrap();
        let other_path = StorePath::parse(&format!("projects/{}", other)).unwrap();
        let before = store.read(&path).unwrap();
        let other_before = store.read(&other_path).unwrap();

        let update = UpdateProjectInput {
            status: Some(ProjectStatus::InProgress),
            ..Default::default()
        };
        repo.update(&id, &update).await.unwrap();

        let mut expected = before.clone();
        expected["status"] = json!("in_progress");
        assert_eq!(store.read(&path).unwrap(), expected);
        assert_eq!(store.read(&other_path).unwrap(), other_before);
    }

    #[tokio::test]
    async fn test_empty_update_issues_no_write() {
        let (store, repo) = project_repo();
        let id = repo.create(CreateProjectInput::new("Farm")).await.unwrap();
        let writes = store.write_count();

        repo.update(&id, &UpdateProjectInput::default()).await.unwrap();
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let (store, repo) = project_repo();
        store.set_offline(true);

        let err = repo
            .create(CreateProjectInput::new("Farm"))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::StoreWrite(_)));

        let err = repo.delete(&EntityId::from("project-x")).await.unwrap_err();
        assert!(matches!(err, BoardError::StoreWrite(_)));
    }

    #[tokio::test]
    async fn test_feed_is_sorted_by_priority() {
        let (_store, repo) = project_repo();
        for priority in [3, 1, 2] {
            let mut input = CreateProjectInput::new(format!("P{}", priority));
            input.priority = Some(priority);
            repo.create(input).await.unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = repo
            .subscribe_to_all(move |delivery| {
                let _ = tx.send(delivery);
            })
            .unwrap();

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.error, None);
        let priorities: Vec<i64> = snapshot.items.iter().map(|p| p.priority).collect();
        assert_eq!(priorities, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_collection_delivers_empty_list() {
        let store = MemoryStore::new();
        let repo: Repository<Person> = Repository::new(Arc::new(store));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = repo
            .subscribe_to_all(move |delivery| {
                let _ = tx.send(delivery);
            })
            .unwrap();

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.items, Vec::<Person>::new());
        assert_eq!(snapshot.error, None);
    }

    #[tokio::test]
    async fn test_unreadable_record_is_skipped() {
        let (store, repo) = project_repo();
        let id = repo.create(CreateProjectInput::new("Farm")).await.unwrap();
        store
            .set(&StorePath::parse("projects/bad").unwrap(), json!("garbage"))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = repo
            .subscribe_to_all(move |delivery| {
                let _ = tx.send(delivery);
            })
            .unwrap();

        let snapshot = rx.recv().await.unwrap();
        assert!(matches!(snapshot.error, Some(BoardError::StoreRead(_))));
        let ids: Vec<EntityId> = snapshot.items.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![id]);
    }

    #[tokio::test]
    async fn test_update_of_missing_id_leaves_partial_record() {
        let (store, repo) = project_repo();
        let missing = EntityId::from("project-gone");

        let update = UpdateProjectInput {
            priority: Some(4),
            ..Default::default()
        };
        repo.update(&missing, &update).await.unwrap();

        let record = store
            .read(&StorePath::parse("projects/project-gone").unwrap())
            .unwrap();
        assert_eq!(record, json!({ "priority": 4 }));

        let snapshot = decode_snapshot::<Project>(
            "projects",
            Some(json!({ "project-gone": record }).as_object().unwrap().clone()),
        );
        assert!(snapshot.items.is_empty());
        assert!(matches!(snapshot.error, Some(BoardError::StoreRead(_))));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (store, repo) = project_repo();
        let subscription = repo.subscribe_to_all(|_| {}).unwrap();
        assert_eq!(store.subscriber_count(), 1);

        subscription.unsubscribe();
        repo.create(CreateProjectInput::new("Farm")).await.unwrap();
        subscription.unsubscribe();

        assert!(!subscription.is_active());
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_priorities_single_write() {
        let (store, repo) = project_repo();
        let a = repo.create(CreateProjectInput::new("A")).await.unwrap();
        let b = repo.create(CreateProjectInput::new("B")).await.unwrap();
        let writes = store.write_count();

        let mut projects = Vec::new();
        for id in [&b, &a] {
            let record = store
                .read(&StorePath::parse(&format!("projects/{}", id)).unwrap())
                .unwrap();
            projects.push(serde_json::from_value::<Project>(record).unwrap());
        }

        repo.batch_update_priorities(&projects).await.unwrap();

        assert_eq!(store.write_count(), writes + 1);
        let priority = |id: &EntityId| {
            store
                .read(&StorePath::parse(&format!("projects/{}/priority", id)).unwrap())
                .unwrap()
        };
        assert_eq!(priority(&b), json!(1));
        assert_eq!(priority(&a), json!(2));
    }
}
