use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Registered event kinds. Anything else is rejected by the codec.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Commit,
    ServiceHealth,
    IssueOpened,
    IssueResolved,
    DocumentPublished,
    RunbookPublished,
    TaskCreated,
}

/// An immutable change/incident event, decoded from its envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stable identity of the subject entity across redelivery
    pub natural_key: String,

    /// When the change happened at the source
    pub occurred_at: DateTime<Utc>,

    /// Typed payload
    pub body: EventBody,
}

impl Event {
    pub fn new(natural_key: impl Into<String>, occurred_at: DateTime<Utc>, body: EventBody) -> Self {
        Self {
            natural_key: natural_key.into(),
            occurred_at,
            body,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }
}

/// Typed union over every registered event kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventBody {
    Commit(CommitPayload),
    ServiceHealth(ServiceHealthPayload),
    IssueOpened(IssueOpenedPayload),
    IssueResolved(IssueResolvedPayload),
    DocumentPublished(DocumentPayload),
    RunbookPublished(RunbookPayload),
    TaskCreated(TaskCreatedPayload),
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::Commit(_) => EventKind::Commit,
            EventBody::ServiceHealth(_) => EventKind::ServiceHealth,
            EventBody::IssueOpened(_) => EventKind::IssueOpened,
            EventBody::IssueResolved(_) => EventKind::IssueResolved,
            EventBody::DocumentPublished(_) => EventKind::DocumentPublished,
            EventBody::RunbookPublished(_) => EventKind::RunbookPublished,
            EventBody::TaskCreated(_) => EventKind::TaskCreated,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitPayload {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files_changed: Vec<String>,
    /// Services touched by the commit
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealthPayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    /// Services this one depends on
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueOpenedPayload {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    /// Primary affected component (a service name)
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueResolvedPayload {
    #[serde(default)]
    pub solution_id: Option<String>,
    /// Solution title
    #[serde(default)]
    pub solution: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resolution_minutes: Option<u64>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub success_rate: Option<f64>,
    /// Issue title, used when the issue was never seen opened
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<String>,
    /// Issue keys the document describes
    #[serde(default, deserialize_with = "null_as_default")]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunbookPayload {
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<RunbookStep>,
    /// Names of prerequisite runbooks
    #[serde(default, deserialize_with = "null_as_default")]
    pub requires: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunbookStep {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCreatedPayload {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub created_from: Option<String>,
}

/// Optional list fields treat an explicit `null` like an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
