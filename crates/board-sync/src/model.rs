//! Board records: projects and the people assigned to them
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::str::FromStr;

use crate::{BoardError, Entity, EntityId};

/// Priority a project receives when it is created without one
pub const DEFAULT_PRIORITY: i64 = 999;

/// External service that renders a head avatar from a username
pub const AVATAR_SERVICE_URL: &str = "https://crafthead.net/avatar";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Planned,
    InProgress,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "planned" => Ok(Self::Planned),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(BoardError::Validation(format!(
                "unknown project status '{}'",
                other
            ))),
        }
    }
}

/// A project on the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: EntityId,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: ProjectStatus,

    /// Sort key, ascending. Not unique and not contiguous across views.
    pub priority: i64,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub deadline: Option<DateTime<Utc>>,

    /// Person ids; may reference people that no longer exist
    #[serde(default)]
    pub assigned_people: Vec<EntityId>,
}

impl Project {
    pub fn is_completed(&self) -> bool {
        self.status == ProjectStatus::Completed
    }

    pub fn is_assigned(&self, person_id: &EntityId) -> bool {
        self.assigned_people.contains(person_id)
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map(|deadline| deadline < now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateProjectInput {
    pub title: String,
    pub description: String,
    pub status: ProjectStatus,
    /// Falls back to the configured default priority
    pub priority: Option<i64>,
    pub deadline: Option<DateTime<Utc>>,
    pub assigned_people: Vec<EntityId>,
}

impl CreateProjectInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Partial project update. Only fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    /// `Some(None)` clears the deadline
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_deadline_patch"
    )]
    pub deadline: Option<Option<DateTime<Utc>>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_people: Option<Vec<EntityId>>,
}

impl UpdateProjectInput {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn serialize_deadline_patch<S>(
    value: &Option<Option<DateTime<Utc>>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(Some(deadline)) => serializer.serialize_i64(deadline.timestamp_millis()),
        _ => serializer.serialize_none(),
    }
}

impl Entity for Project {
    type Create = CreateProjectInput;
    type Update = UpdateProjectInput;

    const COLLECTION: &'static str = "projects";
    const ID_PREFIX: &'static str = "project";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_create(id: EntityId, input: CreateProjectInput, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: input.title,
            description: input.description,
            status: input.status,
            priority: input.priority.unwrap_or(DEFAULT_PRIORITY),
            created_at: now,
            deadline: input.deadline,
            assigned_people: input.assigned_people,
        }
    }

    fn sort_snapshot(items: &mut [Self]) {
        // stable: ties keep store iteration order
        items.sort_by_key(|project| project.priority);
    }
}

/// How a person is pictured on the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Avatar {
    /// Uploaded image, stored as a URL or data URI
    Image { url: String },

    /// In-game username rendered by the avatar service
    Username { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: EntityId,

    pub name: String,

    /// `#RGB` or `#RRGGBB`
    pub color: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Avatar>,
}

impl Person {
    pub fn avatar_url(&self, size: u32) -> Option<String> {
        match &self.avatar {
            Some(Avatar::Image { url }) => Some(url.clone()),
            Some(Avatar::Username { name }) => {
                Some(format!("{}/{}/{}", AVATAR_SERVICE_URL, name, size))
            }
            None => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatePersonInput {
    pub name: String,
    pub color: String,
    pub avatar: Option<Avatar>,
}

impl CreatePersonInput {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            avatar: None,
        }
    }
}

/// Partial person update. Only fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePersonInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// `Some(None)` removes the avatar
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Option<Avatar>>,
}

impl UpdatePersonInput {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl Entity for Person {
    type Create = CreatePersonInput;
    type Update = UpdatePersonInput;

    const COLLECTION: &'static str = "people";
    const ID_PREFIX: &'static str = "person";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn from_create(id: EntityId, input: CreatePersonInput, _now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: input.name,
            color: input.color,
            avatar: input.avatar,
        }
    }
}
