//! Code review build requests and their visibility state.

use crate::errors::BuildError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::time::Instant;

/// Every HarborMaster build target identifier starts with this prefix.
pub const TARGET_PREFIX: &str = "PHID-HMBT-";

/// Visibility state of a build.
///
/// `Queued` is the initial state; `Public` and `Secured` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    /// Waiting for the revision to become visible to the bot
    Queued,
    /// The revision stays restricted; nothing may be published on it
    Secured,
    /// The revision is public and its assets are loaded
    Public,
}

impl BuildState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BuildState::Queued)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildState::Queued => write!(f, "queued"),
            BuildState::Secured => write!(f, "secured"),
            BuildState::Public => write!(f, "public"),
        }
    }
}

/// One diff of a patch stack, ready to be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub diff_id: u64,
    pub diff_ref: String,
    /// Raw unified diff
    pub patch: String,
    /// Revision the diff was created against, when the review system knows it
    pub base_revision: Option<String>,
}

/// A build request sent by the code review system.
#[derive(Debug, Clone)]
pub struct Build {
    pub diff_id: u64,
    pub repo_ref: String,
    pub revision_id: u64,
    pub target_ref: String,
    pub state: BuildState,
    /// `None` until the tracker first sees the build and applies its retry budget
    pub retries_left: Option<u32>,
    pub last_attempt: Option<Instant>,
    /// Patches from the oldest parent up to this diff, loaded once public
    pub patch_stack: Vec<Patch>,
    pub reviewers: Vec<String>,
}

impl Build {
    /// Create a queued build. Every identifier is required.
    pub fn new(
        diff_id: u64,
        repo_ref: impl Into<String>,
        revision_id: u64,
        target_ref: impl Into<String>,
    ) -> Result<Self, BuildError> {
        let repo_ref = repo_ref.into();
        let target_ref = target_ref.into();

        if diff_id == 0 {
            return Err(BuildError::MissingField("diff"));
        }
        if repo_ref.is_empty() {
            return Err(BuildError::MissingField("repo"));
        }
        if revision_id == 0 {
            return Err(BuildError::MissingField("revision"));
        }
        if target_ref.is_empty() {
            return Err(BuildError::MissingField("target"));
        }
        if !target_ref.starts_with(TARGET_PREFIX) {
            return Err(BuildError::InvalidTarget(target_ref));
        }

        Ok(Self {
            diff_id,
            repo_ref,
            revision_id,
            target_ref,
            state: BuildState::Queued,
            retries_left: None,
            last_attempt: None,
            patch_stack: Vec::new(),
            reviewers: Vec::new(),
        })
    }

    /// Parse a build from webhook query parameters (`diff`, `repo`, `revision`, `target`).
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, BuildError> {
        let diff_id = parse_id(params, "diff")?;
        let repo_ref = required(params, "repo")?;
        let revision_id = parse_id(params, "revision")?;
        let target_ref = required(params, "target")?;
        Self::new(diff_id, repo_ref, revision_id, target_ref)
    }

    /// Set an explicit retry budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries_left = Some(retries);
        self
    }
}

impl fmt::Display for Build {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision {} - {}", self.revision_id, self.target_ref)
    }
}

fn required<'a>(params: &'a HashMap<String, String>, field: &'static str) -> Result<&'a str, BuildError> {
    params
        .get(field)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(BuildError::MissingField(field))
}

fn parse_id(params: &HashMap<String, String>, field: &'static str) -> Result<u64, BuildError> {
    let raw = required(params, field)?;
    let id = raw.parse::<u64>().map_err(|_| BuildError::InvalidField {
        field,
        value: raw.to_string(),
    })?;
    if id == 0 {
        return Err(BuildError::MissingField(field));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_query_valid() {
        let build = Build::from_query(&query(&[
            ("diff", "1234"),
            ("repo", "PHID-REPO-abc"),
            ("revision", "56"),
            ("target", "PHID-HMBT-xyz"),
        ]))
        .unwrap();

        assert_eq!(build.diff_id, 1234);
        assert_eq!(build.repo_ref, "PHID-REPO-abc");
        assert_eq!(build.revision_id, 56);
        assert_eq!(build.target_ref, "PHID-HMBT-xyz");
        assert_eq!(build.state, BuildState::Queued);
        assert_eq!(build.retries_left, None);
        assert!(build.last_attempt.is_none());
        assert_eq!(build.to_string(), "Revision 56 - PHID-HMBT-xyz");
    }

    #[test]
    fn test_from_query_missing_fields() {
        let err = Build::from_query(&query(&[
            ("diff", "1234"),
            ("revision", "56"),
            ("target", "PHID-HMBT-xyz"),
        ]))
        .unwrap_err();
        assert_eq!(err, BuildError::MissingField("repo"));

        let err = Build::from_query(&query(&[
            ("diff", "1234"),
            ("repo", "PHID-REPO-abc"),
            ("revision", "56"),
        ]))
        .unwrap_err();
        assert_eq!(err, BuildError::MissingField("target"));
    }

    #[test]
    fn test_from_query_zero_id_counts_as_missing() {
        let err = Build::from_query(&query(&[
            ("diff", "0"),
            ("repo", "PHID-REPO-abc"),
            ("revision", "56"),
            ("target", "PHID-HMBT-xyz"),
        ]))
        .unwrap_err();
        assert_eq!(err, BuildError::MissingField("diff"));
    }

    #[test]
    fn test_from_query_non_numeric_id() {
        let err = Build::from_query(&query(&[
            ("diff", "1234"),
            ("repo", "PHID-REPO-abc"),
            ("revision", "D56"),
            ("target", "PHID-HMBT-xyz"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BuildError::InvalidField { field: "revision", .. }));
    }

    #[test]
    fn test_invalid_target_format() {
        let err = Build::new(1, "PHID-REPO-abc", 2, "PHID-DIFF-nope").unwrap_err();
        assert_eq!(err, BuildError::InvalidTarget("PHID-DIFF-nope".to_string()));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BuildState::Queued.is_terminal());
        assert!(BuildState::Public.is_terminal());
        assert!(BuildState::Secured.is_terminal());
    }
}
