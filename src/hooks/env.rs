//! Hook payloads built from public code review builds.

use crate::review::Build;
use crate::taskcluster::TaskEnv;
use std::collections::HashSet;
use tracing::info;

/// Value of `ANALYSIS_SOURCE` for code review builds.
pub const ANALYSIS_SOURCE: &str = "phabricator";

/// Converts public builds into hook environments, filtering by repository.
#[derive(Debug, Clone, Default)]
pub struct BuildEnv {
    /// Accepted repository references; empty accepts every repository
    repositories: HashSet<String>,
}

impl BuildEnv {
    pub fn new<I, S>(repositories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repositories: repositories.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accepts(&self, repo_ref: &str) -> bool {
        self.repositories.is_empty() || self.repositories.contains(repo_ref)
    }

    /// Hook environment for `build`, or `None` when its repository is not watched.
    pub fn env(&self, build: &Build) -> Option<TaskEnv> {
        if !self.accepts(&build.repo_ref) {
            info!(build = %build, repository = %build.repo_ref, "Skipping build from unwatched repository");
            return None;
        }

        Some(TaskEnv::from([
            ("ANALYSIS_SOURCE".to_string(), ANALYSIS_SOURCE.to_string()),
            ("ANALYSIS_ID".to_string(), build.target_ref.clone()),
            ("DIFF_ID".to_string(), build.diff_id.to_string()),
            ("REVISION_ID".to_string(), build.revision_id.to_string()),
            ("REPOSITORY".to_string(), build.repo_ref.clone()),
        ]))
    }
}
