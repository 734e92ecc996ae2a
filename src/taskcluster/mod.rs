//! Remote task platform: hook triggering, task status, task re-creation and
//! notifications.
//!
//! The monitor and the hook only see the [`TaskPlatform`] and [`Notifier`]
//! traits; [`TaskclusterClient`] implements both over the Taskcluster REST API.

pub mod client;

pub use client::TaskclusterClient;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Environment overrides merged into a hook's task template.
pub type TaskEnv = BTreeMap<String, String>;

/// Remote task state, as reported by the queue service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Unscheduled,
    Pending,
    Running,
    Completed,
    Failed,
    Exception,
}

impl TaskState {
    /// Completed, Failed and Exception end a run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Exception
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Unscheduled => "unscheduled",
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Exception => "exception",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRun {
    #[serde(default)]
    pub resolved: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default)]
    pub runs: Vec<TaskRun>,
}

/// A task definition as fetched from the queue.
///
/// Only the fields rewritten on retry are typed; everything else is carried
/// through untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(with = "tc_date")]
    pub created: DateTime<Utc>,
    #[serde(with = "tc_date")]
    pub deadline: DateTime<Utc>,
    #[serde(with = "tc_date")]
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub retries: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskDefinition {
    /// Move `created` to `now`, keeping the deadline and expiry durations.
    pub fn shift_to(&mut self, now: DateTime<Utc>) {
        let deadline = self.deadline - self.created;
        let expires = self.expires - self.created;
        self.created = now;
        self.deadline = now + deadline;
        self.expires = now + expires;
    }
}

/// Taskcluster dates: RFC 3339, millisecond precision, `Z` suffix.
pub mod tc_date {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(date: &DateTime<Utc>) -> String {
        date.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|d| d.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// New Taskcluster task id: URL-safe base64 of a random v4 UUID.
pub fn slug_id() -> String {
    URL_SAFE_NO_PAD.encode(uuid::Uuid::new_v4().as_bytes())
}

/// Operations the pipeline needs from the task platform.
#[async_trait]
pub trait TaskPlatform: Send + Sync {
    /// Trigger a hook with environment overrides, returning the new task id.
    async fn trigger_hook(&self, group_id: &str, hook_id: &str, env: &TaskEnv) -> Result<String>;

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus>;

    async fn task_definition(&self, task_id: &str) -> Result<TaskDefinition>;

    async fn create_task(&self, task_id: &str, definition: &TaskDefinition) -> Result<()>;

    /// Payload of the task indexed under `namespace`.
    async fn indexed_task(&self, namespace: &str) -> Result<serde_json::Value>;
}

/// Outbound notification channel for reports.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, address: &str, subject: &str, body: &str) -> Result<()>;
}
