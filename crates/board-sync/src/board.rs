//! Board facades: one per entity type, composing repository, live cache and
//! reordering into the surface a front end depends on
use parking_lot::Mutex;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    apply_plan, plan_reorder, BoardConfig, BoardError, CollectionStore, CompletedPolicy,
    CreatePersonInput, CreateProjectInput, EntityId, LiveCollection, Person, Project,
    ProjectStatus, ReorderIntent, ReorderPhase, ReorderTransaction, Repository, Result,
    RollbackPolicy, UpdatePersonInput, UpdateProjectInput, Validate,
};

/// Filtered subset of projects as displayed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectView {
    /// Everything not completed
    #[default]
    Active,
    Completed,
    All,
}

impl ProjectView {
    pub fn includes(&self, project: &Project) -> bool {
        match self {
            Self::Active => !project.is_completed(),
            Self::Completed => project.is_completed(),
            Self::All => true,
        }
    }
}

impl FromStr for ProjectView {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "all" => Ok(Self::All),
            other => Err(BoardError::InvalidArgument(format!("unknown view '{}'", other))),
        }
    }
}

pub struct ProjectBoard {
    repository: Repository<Project>,
    cache: LiveCollection<Project>,
    config: BoardConfig,
    last_reorder: Mutex<Option<ReorderPhase>>,
}

impl ProjectBoard {
    /// Subscribe to the projects collection. Must be called inside a tokio runtime.
    pub fn open(store: Arc<dyn CollectionStore>, config: &BoardConfig) -> Result<Self> {
        let repository = Repository::with_collection(store, config.projects_path.clone());
        let cache = LiveCollection::open(&repository)?;
        info!(collection = %config.projects_path, "project board opened");

        Ok(Self {
            repository,
            cache,
            config: config.clone(),
            last_reorder: Mutex::new(None),
        })
    }

    pub fn repository(&self) -> &Repository<Project> {
        &self.repository
    }

    pub fn cache(&self) -> &LiveCollection<Project> {
        &self.cache
    }

    /// All projects, ascending by priority
    pub fn projects(&self) -> Arc<Vec<Project>> {
        self.cache.items()
    }

    pub fn is_loading(&self) -> bool {
        self.cache.is_loading()
    }

    pub fn error(&self) -> Option<BoardError> {
        self.cache.error()
    }

    pub async fn loaded(&self) -> Result<()> {
        self.cache.loaded().await
    }

    pub fn get(&self, id: &EntityId) -> Option<Project> {
        self.cache.get(id)
    }

    pub fn view(&self, view: ProjectView) -> Vec<Project> {
        self.projects()
            .iter()
            .filter(|project| view.includes(project))
            .cloned()
            .collect()
    }

    pub fn projects_for_person(&self, person_id: &EntityId) -> Vec<Project> {
        self.projects()
            .iter()
            .filter(|project| project.is_assigned(person_id))
            .cloned()
            .collect()
    }

    /// Phase the most recent reorder ended in
    pub fn last_reorder_phase(&self) -> Option<ReorderPhase> {
        *self.last_reorder.lock()
    }

    pub async fn add(&self, input: CreateProjectInput) -> Result<EntityId> {
        self.cache.begin_attempt();
        let result = self.create(input).await;
        self.track(result)
    }

    async fn create(&self, input: CreateProjectInput) -> Result<EntityId> {
        let mut input = input.validated()?;
        input.priority.get_or_insert(self.config.default_priority);
        self.repository.create(input).await
    }

    pub async fn update(&self, id: &EntityId, fields: UpdateProjectInput) -> Result<()> {
        self.cache.begin_attempt();
        let result = self.merge(id, fields).await;
        self.track(result)
    }

    async fn merge(&self, id: &EntityId, fields: UpdateProjectInput) -> Result<()> {
        let mut fields = fields.validated()?;

        if self.config.completed_policy == CompletedPolicy::MoveToEnd
            && fields.status == Some(ProjectStatus::Completed)
            && fields.priority.is_none()
        {
            let newly_completed = self
                .get(id)
                .map(|project| !project.is_completed())
                .unwrap_or(false);
            if newly_completed {
                fields.priority = Some(self.max_priority() + 1);
            }
        }

        self.repository.update(id, &fields).await
    }

    fn max_priority(&self) -> i64 {
        self.projects()
            .iter()
            .map(|project| project.priority)
            .max()
            .unwrap_or(0)
    }

    pub async fn delete(&self, id: &EntityId) -> Result<()> {
        self.cache.begin_attempt();
        let result = self.repository.delete(id).await;
        self.track(result)
    }

    pub async fn assign(&self, project_id: &EntityId, person_id: &EntityId) -> Result<()> {
        self.cache.begin_attempt();
        let project = self.track(self.require(project_id))?;
        if project.is_assigned(person_id) {
            return Ok(());
        }

        let mut assigned = project.assigned_people;
        assigned.push(person_id.clone());
        self.update(
            project_id,
            UpdateProjectInput {
                assigned_people: Some(assigned),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn unassign(&self, project_id: &EntityId, person_id: &EntityId) -> Result<()> {
        self.cache.begin_attempt();
        let project = self.track(self.require(project_id))?;
        if !project.is_assigned(person_id) {
            return Ok(());
        }

        let assigned = project
            .assigned_people
            .into_iter()
            .filter(|id| id != person_id)
            .collect();
        self.update(
            project_id,
            UpdateProjectInput {
                assigned_people: Some(assigned),
                ..Default::default()
            },
        )
        .await
    }

    /// Remove a person from every project that references them.
    /// Returns how many projects were changed.
    pub async fn unassign_person(&self, person_id: &EntityId) -> Result<usize> {
        let projects = self.projects_for_person(person_id);
        for project in &projects {
            self.unassign(&project.id, person_id).await?;
        }
        Ok(projects.len())
    }

    /// Reorder within the current contents of `view`
    pub async fn reorder_view(&self, view: ProjectView, intent: ReorderIntent) -> Result<bool> {
        let projects = self.view(view);
        self.reorder(&projects, intent).await
    }

    /// Apply a move optimistically, then write the view's priorities in one batch.
    /// Projects in `view` that are gone from the cache are left out, so a stale
    /// view never writes to a deleted id.
    /// Returns false when the move changes nothing and no write is issued.
    pub async fn reorder(&self, view: &[Project], intent: ReorderIntent) -> Result<bool> {
        self.cache.begin_attempt();

        let current = self.projects();
        let live: HashSet<&EntityId> = current.iter().map(|project| &project.id).collect();
        let stale = view.len();
        let view: Vec<Project> = view
            .iter()
            .filter(|project| live.contains(&project.id))
            .cloned()
            .collect();
        if view.len() < stale {
            debug!(dropped = stale - view.len(), "deleted projects left out of reorder");
        }

        let plan = match self.track(plan_reorder(&view, &intent))? {
            Some(plan) => plan,
            None => return Ok(false),
        };

        let optimistic = apply_plan(&current, &plan);
        let (previous, delivered) = self.cache.apply_optimistic(optimistic);
        let mut txn = ReorderTransaction::begin(previous, delivered);
        *self.last_reorder.lock() = Some(txn.phase());

        match self.repository.batch_update_priorities(&plan.view).await {
            Ok(()) => {
                txn.confirm()?;
                info!(id = %intent.id(), "reorder confirmed");
            }
            Err(err) => {
                let restored = self.config.rollback == RollbackPolicy::Restore
                    && self
                        .cache
                        .restore_if_unchanged(Arc::clone(txn.previous()), txn.delivered());
                txn.roll_back()?;
                *self.last_reorder.lock() = Some(txn.phase());
                warn!(id = %intent.id(), error = %err, restored, "reorder rolled back");
                self.cache.record_error(err.clone());
                return Err(err);
            }
        }

        *self.last_reorder.lock() = Some(txn.phase());
        Ok(true)
    }

    pub fn close(&self) {
        self.cache.close();
    }

    fn require(&self, id: &EntityId) -> Result<Project> {
        self.get(id)
            .ok_or_else(|| BoardError::NotFound(format!("project {}", id)))
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.cache.record_error(err.clone());
        }
        result
    }
}

pub struct PeopleBoard {
    repository: Repository<Person>,
    cache: LiveCollection<Person>,
}

impl PeopleBoard {
    /// Subscribe to the people collection. Must be called inside a tokio runtime.
    pub fn open(store: Arc<dyn CollectionStore>, config: &BoardConfig) -> Result<Self> {
        let repository = Repository::with_collection(store, config.people_path.clone());
        let cache = LiveCollection::open(&repository)?;
        info!(collection = %config.people_path, "people board opened");

        Ok(Self { repository, cache })
    }

    pub fn repository(&self) -> &Repository<Person> {
        &self.repository
    }

    pub fn cache(&self) -> &LiveCollection<Person> {
        &self.cache
    }

    pub fn people(&self) -> Arc<Vec<Person>> {
        self.cache.items()
    }

    pub fn is_loading(&self) -> bool {
        self.cache.is_loading()
    }

    pub fn error(&self) -> Option<BoardError> {
        self.cache.error()
    }

    pub async fn loaded(&self) -> Result<()> {
        self.cache.loaded().await
    }

    pub fn get(&self, id: &EntityId) -> Option<Person> {
        self.cache.get(id)
    }

    /// Existing people for `ids`, in order; unknown ids are skipped
    pub fn get_many(&self, ids: &[EntityId]) -> Vec<Person> {
        self.cache.get_many(ids)
    }

    pub async fn add(&self, input: CreatePersonInput) -> Result<EntityId> {
        self.cache.begin_attempt();
        let result = match input.validated() {
            Ok(input) => self.repository.create(input).await,
            Err(err) => Err(err),
        };
        self.track(result)
    }

    pub async fn update(&self, id: &EntityId, fields: UpdatePersonInput) -> Result<()> {
        self.cache.begin_attempt();
        let result = match fields.validated() {
            Ok(fields) => self.repository.update(id, &fields).await,
            Err(err) => Err(err),
        };
        self.track(result)
    }

    /// Does not touch project assignments; see [`ProjectBoard::unassign_person`]
    pub async fn delete(&self, id: &EntityId) -> Result<()> {
        self.cache.begin_attempt();
        let result = self.repository.delete(id).await;
        self.track(result)
    }

    pub fn close(&self) {
        self.cache.close();
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.cache.record_error(err.clone());
        }
        result
    }
}
