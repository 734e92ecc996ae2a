//! Build state tracking for code review builds.
//!
//! A build arrives `Queued` and is re-checked against the review system until
//! its revision turns out to be visible (`Public`) or the retry budget runs
//! out (`Secured`). Secure revisions can take several minutes to be
//! reclassified by the bug tracker daemon, hence the bounded retries.
//!
//! ```text
//!            visible
//!  Queued ────────────▶ Public ──▶ out
//!    │  ▲
//!    │  │ restricted, retries left
//!    │  └──────────── (requeued on `in`)
//!    │
//!    └──────────────▶ Secured (dropped)
//!      restricted, no retries left
//! ```

pub mod build;
pub mod phabricator;
pub mod tracker;

pub use build::{Build, BuildState, Patch};
pub use phabricator::PhabricatorClient;
pub use tracker::{BuildTracker, TrackerConfig};

use anyhow::Result;
use async_trait::async_trait;

/// Answer of the review system about one revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Visibility {
    /// False when the revision is restricted or its diff is missing
    pub visible: bool,
    pub patch_stack: Vec<Patch>,
    pub reviewers: Vec<String>,
}

impl Visibility {
    /// A revision the bot cannot see.
    pub fn restricted() -> Self {
        Self::default()
    }

    /// A visible revision with its loaded assets.
    pub fn public(patch_stack: Vec<Patch>, reviewers: Vec<String>) -> Self {
        Self {
            visible: true,
            patch_stack,
            reviewers,
        }
    }
}

/// The code review authority queried by the tracker.
#[async_trait]
pub trait ReviewPlatform: Send + Sync {
    /// Check whether a revision is visible and, if so, load its patch stack and reviewers.
    async fn check_build_visibility(&self, revision_id: u64, diff_id: u64) -> Result<Visibility>;
}
