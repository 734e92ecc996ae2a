//! Visibility state machine driving builds from `in` to `out`.

use super::{Build, BuildState, ReviewPlatform};
use crate::bus::{MessageBus, QUEUE_IN, QUEUE_OUT};
use crate::errors::BusError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Retry policy for visibility checks.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Number of visibility checks before a build is marked secured
    pub retries: u32,
    /// Minimum delay between two checks of the same build
    pub sleep_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            sleep_interval: Duration::from_secs(10),
        }
    }
}

/// Advances builds through the `Queued → Public | Secured` state machine.
pub struct BuildTracker {
    platform: Arc<dyn ReviewPlatform>,
    config: TrackerConfig,
    received: AtomicU64,
}

impl BuildTracker {
    pub fn new(platform: Arc<dyn ReviewPlatform>, config: TrackerConfig) -> Self {
        info!(
            retries = config.retries,
            sleep_secs = config.sleep_interval.as_secs(),
            "Will retry secure revision queries"
        );
        Self {
            platform,
            config,
            received: AtomicU64::new(0),
        }
    }

    /// Builds taken from `in` by `run` so far, parked ones included.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Run at most one visibility check on a queued build.
    ///
    /// The build comes back unchanged when it is not queued, has no retries
    /// left, or was already checked less than `sleep_interval` ago. Errors
    /// from the review system count as a restricted answer for that attempt.
    pub async fn check_visibility(&self, mut build: Build) -> Build {
        let retries_left = *build.retries_left.get_or_insert(self.config.retries);

        if build.state != BuildState::Queued || retries_left == 0 {
            return build;
        }

        let now = Instant::now();
        if let Some(last) = build.last_attempt
            && now.duration_since(last) < self.config.sleep_interval
        {
            return build;
        }

        let retries_left = retries_left - 1;
        build.retries_left = Some(retries_left);
        build.last_attempt = Some(now);
        info!(build = %build, retries_left, "Checking visibility status");

        match self
            .platform
            .check_build_visibility(build.revision_id, build.diff_id)
            .await
        {
            Ok(visibility) if visibility.visible => {
                build.patch_stack = visibility.patch_stack;
                build.reviewers = visibility.reviewers;
                build.state = BuildState::Public;
                info!(build = %build, patches = build.patch_stack.len(), "Revision is public");
                return build;
            }
            Ok(_) => info!(build = %build, "Revision not accessible"),
            Err(e) => warn!(build = %build, error = %e, "Revision visibility check failed"),
        }

        if retries_left == 0 {
            build.state = BuildState::Secured;
            info!(build = %build, "Revision is marked as secure");
        }
        build
    }

    /// Time left before `build` may be checked again.
    pub fn next_attempt_in(&self, build: &Build) -> Duration {
        match build.last_attempt {
            Some(last) => self.config.sleep_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Process one build taken from `in` and route it by its resulting state.
    pub async fn handle(&self, bus: &MessageBus, build: Build) -> Result<BuildState, BusError> {
        let build = self.check_visibility(build).await;
        let state = build.state;

        match state {
            BuildState::Public => bus.send(QUEUE_OUT, build).await?,
            BuildState::Secured => {
                info!(target_ref = %build.target_ref, "Secured revision, skipping.");
            }
            BuildState::Queued if build.retries_left == Some(0) => {
                warn!(build = %build, "Dropping queued build without retries left");
            }
            BuildState::Queued => bus.send(QUEUE_IN, build).await?,
        }
        Ok(state)
    }

    /// Whether `build` is queued but still inside its rate limit window.
    fn is_waiting(&self, build: &Build) -> bool {
        build.state == BuildState::Queued
            && build.retries_left != Some(0)
            && !self.next_attempt_in(build).is_zero()
    }

    /// Consume `in` until shutdown is signalled.
    ///
    /// Builds received inside their rate limit window are parked here and
    /// sent back to `in` once due, so waiting builds never spin the loop
    /// while new arrivals are still handled right away.
    pub async fn run(
        &self,
        bus: Arc<MessageBus>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        bus.expect_queue::<Build>(QUEUE_IN)?;
        bus.expect_queue::<Build>(QUEUE_OUT)?;
        info!("Build tracker started");

        let mut parked: Vec<Build> = Vec::new();
        loop {
            let due_in = parked.iter().map(|b| self.next_attempt_in(b)).min();
            let build = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                build = bus.receive::<Build>(QUEUE_IN) => build?,
                _ = tokio::time::sleep(due_in.unwrap_or_default()), if due_in.is_some() => {
                    let (due, waiting): (Vec<Build>, Vec<Build>) = std::mem::take(&mut parked)
                        .into_iter()
                        .partition(|b| !self.is_waiting(b));
                    parked = waiting;
                    for build in due {
                        bus.send(QUEUE_IN, build).await?;
                    }
                    continue;
                }
            };
            self.received.fetch_add(1, Ordering::Relaxed);

            if self.is_waiting(&build) {
                debug!(build = %build, "Parked until next attempt");
                parked.push(build);
                continue;
            }
            let state = self.handle(&bus, build).await?;
            debug!(%state, "Build handled");
        }

        for build in parked {
            bus.send(QUEUE_IN, build).await?;
        }
        info!(received = self.received(), "Build tracker stopped");
        Ok(())
    }
}
