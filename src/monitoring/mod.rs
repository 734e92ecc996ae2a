//! Task monitor: supervises triggered tasks until they end, retries the ones
//! that ended in an exception and mails a digest of failures every period.
//!
//! The monitor owns its watch set. Tasks are polled one at a time in
//! round-robin order: a task that is still running goes back to the end of
//! the set, so one slow task never holds back the others.

pub mod report;

pub use report::{HookStats, PeriodStats, Reportable};

use crate::bus::{MessageBus, QUEUE_MONITOR};
use crate::errors::BusError;
use crate::taskcluster::{Notifier, TaskPlatform, TaskState, slug_id};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Identifies one task created from a hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskTriple {
    pub group_id: String,
    pub hook_id: String,
    pub task_id: String,
}

impl TaskTriple {
    pub fn new(
        group_id: impl Into<String>,
        hook_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            hook_id: hook_id.into(),
            task_id: task_id.into(),
        }
    }
}

impl fmt::Display for TaskTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group_id, self.hook_id, self.task_id)
    }
}

/// Messages accepted on the `monitor` queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorMessage {
    /// Start watching a newly created task
    Watch(TaskTriple),
    /// Send the current report now instead of waiting for the period to end
    Report,
}

/// A watched task and its last known state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub group_id: String,
    pub hook_id: String,
    pub task_id: String,
    pub status: TaskState,
}

impl From<TaskTriple> for TaskRecord {
    fn from(triple: TaskTriple) -> Self {
        Self {
            group_id: triple.group_id,
            hook_id: triple.hook_id,
            task_id: triple.task_id,
            status: TaskState::Unscheduled,
        }
    }
}

/// Tasks not yet seen in a terminal state, in polling order.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    entries: VecDeque<TaskRecord>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: TaskRecord) {
        self.entries.push_back(record);
    }

    pub fn pop(&mut self) -> Option<TaskRecord> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.iter().any(|r| r.task_id == task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.entries.iter()
    }
}

/// Result of a retry attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// A new task was created with this id and is now watched
    Retried(String),
    /// No task was created
    Abandoned(String),
}

/// What one `check_task` call did with the entry it polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The task is still going and was requeued
    Pending(TaskState),
    /// The status could not be fetched; the task was requeued
    Unreachable,
    /// The task ended; `retry` is set when a retry was attempted
    Finished {
        state: TaskState,
        retry: Option<RetryOutcome>,
    },
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between two reports
    pub period: Duration,
    /// Pause between two status polls
    pub poll_interval: Duration,
    /// Report recipients
    pub emails: Vec<String>,
    pub subject: String,
    /// Index namespace template (`{task_id}` is substituted) marking failed
    /// tasks as restartable. `None` disables restarts of failed tasks.
    pub restart_namespace: Option<String>,
    /// Base URL of task pages used for report links
    pub tasks_url: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(7 * 3600),
            poll_interval: Duration::from_secs(1),
            emails: Vec::new(),
            subject: "Pulse listener tasks".to_string(),
            restart_namespace: None,
            tasks_url: "http://taskcluster/tasks".to_string(),
        }
    }
}

pub struct TaskMonitor {
    platform: Arc<dyn TaskPlatform>,
    notifier: Arc<dyn Notifier>,
    bus: Arc<MessageBus>,
    config: MonitorConfig,
    stats: PeriodStats,
}

impl TaskMonitor {
    pub fn new(
        platform: Arc<dyn TaskPlatform>,
        notifier: Arc<dyn Notifier>,
        bus: Arc<MessageBus>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            platform,
            notifier,
            bus,
            config,
            stats: PeriodStats::new(),
        }
    }

    pub fn stats(&self) -> &PeriodStats {
        &self.stats
    }

    async fn accept(&mut self, message: MonitorMessage, watch: &mut WatchSet) {
        match message {
            MonitorMessage::Watch(triple) => {
                debug!(task = %triple, "Watching task");
                watch.push(triple.into());
            }
            MonitorMessage::Report => {
                self.send_report().await;
            }
        }
    }

    /// Move every waiting bus message into the watch set.
    ///
    /// When nothing is watched, waits up to `poll_interval` for a message.
    async fn collect(&mut self, watch: &mut WatchSet) -> Result<(), BusError> {
        while let Some(message) = self.bus.try_receive::<MonitorMessage>(QUEUE_MONITOR)? {
            self.accept(message, watch).await;
        }

        if watch.is_empty() {
            let received = tokio::time::timeout(
                self.config.poll_interval,
                self.bus.receive::<MonitorMessage>(QUEUE_MONITOR),
            )
            .await;
            if let Ok(message) = received {
                self.accept(message?, watch).await;
            }
        }
        Ok(())
    }

    /// Poll the oldest watched task once.
    ///
    /// Returns `None` when there was nothing to poll.
    pub async fn check_task(
        &mut self,
        watch: &mut WatchSet,
    ) -> Result<Option<CheckOutcome>, BusError> {
        self.collect(watch).await?;
        let Some(mut record) = watch.pop() else {
            return Ok(None);
        };

        let status = match self.platform.task_status(&record.task_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    task_id = %record.task_id,
                    error = %format!("{:#}", e),
                    "Taskcluster queue status failure"
                );
                watch.push(record);
                return Ok(Some(CheckOutcome::Unreachable));
            }
        };
        record.status = status.state;

        if !status.state.is_terminal() {
            watch.push(record);
            return Ok(Some(CheckOutcome::Pending(status.state)));
        }

        self.stats
            .record(&record.hook_id, status.state, &record.task_id);
        info!(task_id = %record.task_id, status = %status.state, "Got a task status");

        let retry = match status.state {
            TaskState::Exception => Some(self.retry_task(&record, watch).await),
            TaskState::Failed => {
                if self.is_restartable(&record.task_id).await {
                    info!(task_id = %record.task_id, "Failed task is restartable");
                    Some(self.retry_task(&record, watch).await)
                } else {
                    None
                }
            }
            _ => None,
        };

        Ok(Some(CheckOutcome::Finished {
            state: status.state,
            retry,
        }))
    }

    /// Re-create a task from its definition with shifted dates and one retry less.
    ///
    /// Remote errors abort this attempt only and are reported as `Abandoned`.
    pub async fn retry_task(&self, record: &TaskRecord, watch: &mut WatchSet) -> RetryOutcome {
        match self.try_retry(record, watch).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(task_id = %record.task_id, error = %reason, "Task retry failed");
                RetryOutcome::Abandoned(reason)
            }
        }
    }

    async fn try_retry(&self, record: &TaskRecord, watch: &mut WatchSet) -> Result<RetryOutcome> {
        let mut definition = self
            .platform
            .task_definition(&record.task_id)
            .await
            .with_context(|| format!("Failed to fetch definition of task {}", record.task_id))?;

        definition.shift_to(Utc::now());
        definition.retries -= 1;
        if definition.retries < 0 {
            warn!(
                task_id = %record.task_id,
                group_id = %record.group_id,
                hook_id = %record.hook_id,
                "Will not retry task, no more retries left"
            );
            return Ok(RetryOutcome::Abandoned(format!(
                "no retries left for task {}",
                record.task_id
            )));
        }

        let new_task_id = slug_id();
        self.platform
            .create_task(&new_task_id, &definition)
            .await
            .with_context(|| format!("Failed to create retry task {}", new_task_id))?;
        info!(old_task = %record.task_id, new_task = %new_task_id, "Retry task");

        watch.push(TaskRecord::from(TaskTriple::new(
            &record.group_id,
            &record.hook_id,
            &new_task_id,
        )));
        Ok(RetryOutcome::Retried(new_task_id))
    }

    /// A failed task is restartable when its index entry sets `monitoring_restart`.
    pub async fn is_restartable(&self, task_id: &str) -> bool {
        let Some(template) = &self.config.restart_namespace else {
            return false;
        };
        let namespace = template.replace("{task_id}", task_id);
        match self.platform.indexed_task(&namespace).await {
            Ok(data) => data.get("monitoring_restart") == Some(&serde_json::Value::Bool(true)),
            Err(e) => {
                info!(task_id, error = %format!("{:#}", e), "Task not found in index");
                false
            }
        }
    }

    /// Mail the report of the current period and reset the statistics.
    ///
    /// Returns the number of notifications delivered.
    pub async fn send_report(&mut self) -> usize {
        if self.stats.is_empty() {
            return 0;
        }
        let report = self.stats.render(&self.config.tasks_url);
        self.stats.clear();

        let Some(content) = report else {
            debug!("Only completed tasks this period, no report");
            return 0;
        };

        info!(recipients = self.config.emails.len(), "Sending email to admins");
        let mut sent = 0;
        for email in &self.config.emails {
            match self
                .notifier
                .send_notification(email, &self.config.subject, &content)
                .await
            {
                Ok(()) => sent += 1,
                Err(e) => warn!(email = %email, error = %format!("{:#}", e), "Failed to send report"),
            }
        }
        sent
    }

    /// Poll tasks and send a report every period until shutdown.
    ///
    /// A last report is sent on shutdown and the remaining watch set is
    /// returned to the caller.
    pub async fn run(
        &mut self,
        mut watch: WatchSet,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<WatchSet, BusError> {
        self.bus.expect_queue::<MonitorMessage>(QUEUE_MONITOR)?;
        info!(
            period_secs = self.config.period.as_secs(),
            recipients = self.config.emails.len(),
            "Task monitor started"
        );

        let mut next_report = Instant::now() + self.config.period;
        while !*shutdown.borrow() {
            self.check_task(&mut watch).await?;

            if Instant::now() >= next_report {
                self.send_report().await;
                next_report += self.config.period;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.send_report().await;
        info!(remaining = watch.len(), "Task monitor stopped");
        Ok(watch)
    }
}
