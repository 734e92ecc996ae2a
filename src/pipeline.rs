//! Pipeline assembly: queues, components and their driving loops.
//!
//! ```text
//! web ──▶ in ──▶ BuildTracker ──▶ out ──pipe(BuildEnv)──▶ hook ──▶ TaskHook ──▶ monitor ──▶ TaskMonitor
//!          ▲          │
//!          └──────────┘ requeue while queued
//! ```
//!
//! Every loop watches the same shutdown signal. On shutdown each loop
//! finishes the message it is working on, the monitor flushes a last report,
//! and `run` returns the tasks still being watched.

use crate::bus::{MessageBus, QUEUE_HOOK, QUEUE_IN, QUEUE_MONITOR, QUEUE_OUT};
use crate::config::PulsewatchToml;
use crate::errors::{BusError, PipelineError};
use crate::hooks::{BuildEnv, TaskHook};
use crate::monitoring::{MonitorMessage, TaskMonitor, WatchSet};
use crate::review::{Build, BuildTracker, PhabricatorClient, ReviewPlatform};
use crate::taskcluster::{Notifier, TaskEnv, TaskPlatform, TaskclusterClient};
use crate::web::WebServer;
use anyhow::anyhow;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Create a bus with the four pipeline queues, all unbounded.
pub fn create_bus() -> Result<MessageBus, BusError> {
    let mut bus = MessageBus::new();
    bus.create_queue::<Build>(QUEUE_IN, None)?;
    bus.create_queue::<Build>(QUEUE_OUT, None)?;
    bus.create_queue::<TaskEnv>(QUEUE_HOOK, None)?;
    bus.create_queue::<MonitorMessage>(QUEUE_MONITOR, None)?;
    Ok(bus)
}

/// Remote collaborators of the pipeline.
#[derive(Clone)]
pub struct Remotes {
    pub review: Arc<dyn ReviewPlatform>,
    pub tasks: Arc<dyn TaskPlatform>,
    pub notifier: Arc<dyn Notifier>,
}

impl Remotes {
    /// Connect to Phabricator and Taskcluster as configured.
    pub async fn connect(config: &PulsewatchToml) -> Result<Self, PipelineError> {
        let token = config
            .phabricator
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PipelineError::Config("missing Phabricator token".to_string()))?;
        let phabricator = PhabricatorClient::connect(
            &config.phabricator.url,
            token,
            &config.phabricator.secure_project_slugs,
        )
        .await?;
        let taskcluster = Arc::new(TaskclusterClient::new(&config.taskcluster.root_url));

        Ok(Self {
            review: Arc::new(phabricator),
            tasks: taskcluster.clone(),
            notifier: taskcluster,
        })
    }
}

pub struct Pipeline {
    bus: Arc<MessageBus>,
    tracker: Arc<BuildTracker>,
    build_env: Arc<BuildEnv>,
    hook: Arc<TaskHook>,
    monitor: TaskMonitor,
}

impl Pipeline {
    pub fn new(config: &PulsewatchToml, remotes: Remotes) -> Result<Self, PipelineError> {
        if config.hook.hook_id.is_empty() {
            return Err(PipelineError::Config("missing hook.hook_id".to_string()));
        }
        if config.monitoring.period_secs == 0 {
            return Err(PipelineError::Config(
                "monitoring.period_secs must be above 0".to_string(),
            ));
        }

        let bus = Arc::new(create_bus()?);
        let tracker = BuildTracker::new(remotes.review, config.tracker_config());
        let hook = TaskHook::new(
            &config.hook.group_id,
            &config.hook.hook_id,
            remotes.tasks.clone(),
        );
        let monitor = TaskMonitor::new(
            remotes.tasks,
            remotes.notifier,
            bus.clone(),
            config.monitor_config(),
        );

        Ok(Self {
            bus,
            tracker: Arc::new(tracker),
            build_env: Arc::new(BuildEnv::new(config.phabricator.repositories.clone())),
            hook: Arc::new(hook),
            monitor,
        })
    }

    /// The bus shared by every component, for extra producers.
    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    /// Run every component until shutdown is signalled.
    ///
    /// Returns the watch set left when the monitor stopped.
    pub async fn run(
        self,
        web: Option<WebServer>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<WatchSet, PipelineError> {
        let Pipeline {
            bus,
            tracker,
            build_env,
            hook,
            mut monitor,
        } = self;

        let mut handles: Vec<ComponentHandle> = Vec::new();

        if let Some(web) = web {
            let (bus, shutdown) = (bus.clone(), shutdown.clone());
            handles.push((
                "web",
                tokio::spawn(async move { web.serve(bus, shutdown).await.map_err(PipelineError::from) }),
            ));
        }

        {
            let (bus, shutdown) = (bus.clone(), shutdown.clone());
            handles.push((
                "tracker",
                tokio::spawn(async move { tracker.run(bus, shutdown).await.map_err(PipelineError::from) }),
            ));
        }

        {
            let (bus, mut shutdown) = (bus.clone(), shutdown.clone());
            handles.push((
                "pipe",
                tokio::spawn(async move {
                    let transform =
                        move |build: Build| std::future::ready(build_env.env(&build));
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => Ok(()),
                        result = bus.pipe(QUEUE_OUT, QUEUE_HOOK, transform) => result.map_err(PipelineError::from),
                    }
                }),
            ));
        }

        {
            let (bus, shutdown) = (bus.clone(), shutdown.clone());
            handles.push((
                "hook",
                tokio::spawn(async move { hook.run(bus, shutdown).await.map_err(PipelineError::from) }),
            ));
        }

        info!(components = handles.len() + 1, "Pipeline started");
        let monitored = monitor.run(WatchSet::new(), shutdown).await;
        let watch = join_components(handles, monitored).await?;

        info!(
            watched = watch.len(),
            pending_builds = bus.len::<Build>(QUEUE_IN)?,
            "Pipeline stopped"
        );
        Ok(watch)
    }
}

type ComponentHandle = (&'static str, JoinHandle<Result<(), PipelineError>>);

/// Wait for every spawned component once the monitor returned.
///
/// When the monitor failed, the other components are aborted instead so
/// none of them outlives the pipeline.
async fn join_components(
    handles: Vec<ComponentHandle>,
    monitored: Result<WatchSet, BusError>,
) -> Result<WatchSet, PipelineError> {
    let watch = match monitored {
        Ok(watch) => watch,
        Err(e) => {
            error!(error = %e, "Task monitor failed, stopping the pipeline");
            for (_, handle) in &handles {
                handle.abort();
            }
            for (_, handle) in handles {
                let _ = handle.await;
            }
            return Err(e.into());
        }
    };

    for (name, handle) in handles {
        handle
            .await
            .map_err(|e| PipelineError::Other(anyhow!("{} task panicked: {}", name, e)))??;
    }
    Ok(watch)
}
