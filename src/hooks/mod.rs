//! Task hook: turns environment payloads into remote tasks.
//!
//! A hook is a task template registered on the task platform under a
//! `(group_id, hook_id)` pair. Every payload received on the `hook` queue
//! triggers one task with the payload merged into the template environment,
//! and the resulting task is handed to the monitor.
//!
//! Creation failures are logged and the payload is dropped: nothing is
//! retried here, the monitor only retries tasks that did get created.
//!
//! # Usage
//!
//! ```ignore
//! let hook = TaskHook::new("project-releng", "services-staticanalysis", platform);
//!
//! // Public builds become hook payloads
//! let filter = BuildEnv::new(repositories);
//! bus.pipe(QUEUE_OUT, QUEUE_HOOK, |build: Build| std::future::ready(filter.env(&build)));
//!
//! hook.run(bus, shutdown).await?;
//! ```

pub mod env;

pub use env::BuildEnv;

use crate::bus::{MessageBus, QUEUE_HOOK, QUEUE_MONITOR};
use crate::errors::BusError;
use crate::monitoring::{MonitorMessage, TaskTriple};
use crate::taskcluster::{TaskEnv, TaskPlatform};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// A remote task template triggered with environment overrides.
pub struct TaskHook {
    group_id: String,
    hook_id: String,
    platform: Arc<dyn TaskPlatform>,
}

impl TaskHook {
    pub fn new(
        group_id: impl Into<String>,
        hook_id: impl Into<String>,
        platform: Arc<dyn TaskPlatform>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            hook_id: hook_id.into(),
            platform,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn hook_id(&self) -> &str {
        &self.hook_id
    }

    /// Trigger one task and start monitoring it.
    ///
    /// A failed trigger is logged and yields `None`; nothing is sent to the
    /// monitor in that case.
    pub async fn create_task(
        &self,
        bus: &MessageBus,
        extra_env: &TaskEnv,
    ) -> Result<Option<String>, BusError> {
        let task_id = match self
            .platform
            .trigger_hook(&self.group_id, &self.hook_id, extra_env)
            .await
        {
            Ok(task_id) => task_id,
            Err(e) => {
                error!(
                    group_id = %self.group_id,
                    hook_id = %self.hook_id,
                    error = %format!("{:#}", e),
                    "Failed to create task"
                );
                return Ok(None);
            }
        };
        info!(
            group_id = %self.group_id,
            hook_id = %self.hook_id,
            task_id = %task_id,
            "Triggered a new task"
        );

        let triple = TaskTriple::new(&self.group_id, &self.hook_id, &task_id);
        bus.send(QUEUE_MONITOR, MonitorMessage::Watch(triple)).await?;
        Ok(Some(task_id))
    }

    /// Consume `hook` payloads until shutdown is signalled.
    pub async fn run(
        &self,
        bus: Arc<MessageBus>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        bus.expect_queue::<TaskEnv>(QUEUE_HOOK)?;
        bus.expect_queue::<MonitorMessage>(QUEUE_MONITOR)?;
        info!(group_id = %self.group_id, hook_id = %self.hook_id, "Task hook started");

        loop {
            let env = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                env = bus.receive::<TaskEnv>(QUEUE_HOOK) => env?,
            };
            self.create_task(&bus, &env).await?;
        }

        info!(hook_id = %self.hook_id, "Task hook stopped");
        Ok(())
    }
}
