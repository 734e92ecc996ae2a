//! Phabricator Conduit client answering visibility checks.
//!
//! Only the handful of Conduit methods needed to decide whether the bot can
//! see a revision, and to load its patch stack, are implemented here.

use super::{Patch, ReviewPlatform, Visibility};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Edge type linking a revision to the revision it depends on.
const PARENT_EDGE: &str = "revision.parent";

#[derive(Debug, Deserialize)]
struct ConduitResponse<T> {
    result: Option<T>,
    error_code: Option<String>,
    error_info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResults<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Project {
    phid: String,
    fields: ProjectFields,
}

#[derive(Debug, Deserialize)]
struct ProjectFields {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Revision {
    phid: String,
    #[serde(default)]
    attachments: RevisionAttachments,
}

#[derive(Debug, Default, Deserialize)]
struct RevisionAttachments {
    #[serde(default)]
    projects: Option<ProjectsAttachment>,
    #[serde(default)]
    reviewers: Option<ReviewersAttachment>,
}

#[derive(Debug, Deserialize)]
struct ProjectsAttachment {
    #[serde(rename = "projectPHIDs", default)]
    project_phids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewersAttachment {
    #[serde(default)]
    reviewers: Vec<Reviewer>,
}

#[derive(Debug, Deserialize)]
struct Reviewer {
    #[serde(rename = "reviewerPHID")]
    reviewer_phid: String,
}

#[derive(Debug, Deserialize)]
struct Diff {
    id: u64,
    phid: String,
    fields: DiffFields,
}

#[derive(Debug, Deserialize)]
struct DiffFields {
    #[serde(rename = "revisionPHID")]
    revision_phid: String,
    #[serde(default)]
    refs: Vec<DiffRef>,
}

#[derive(Debug, Deserialize)]
struct DiffRef {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Edge {
    #[serde(rename = "destinationPHID")]
    destination_phid: String,
}

/// Client for the Conduit API of a Phabricator instance.
#[derive(Clone)]
pub struct PhabricatorClient {
    client: reqwest::Client,
    url: String,
    token: String,
    /// Secure project PHID → name
    secure_projects: HashMap<String, String>,
}

impl PhabricatorClient {
    /// Create a client without any secure project loaded.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            secure_projects: HashMap::new(),
        }
    }

    /// Create a client and resolve the secure projects from their slugs.
    pub async fn connect(
        url: impl Into<String>,
        token: impl Into<String>,
        secure_slugs: &[String],
    ) -> Result<Self> {
        let mut client = Self::new(url, token);
        client.load_secure_projects(secure_slugs).await?;
        Ok(client)
    }

    /// Names of the projects restricting revision visibility.
    pub fn secure_project_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.secure_projects.values().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    async fn load_secure_projects(&mut self, slugs: &[String]) -> Result<()> {
        if slugs.is_empty() {
            return Ok(());
        }
        let projects: SearchResults<Project> = self
            .request("project.search", json!({ "constraints": { "slugs": slugs } }))
            .await?;
        self.secure_projects = projects
            .data
            .into_iter()
            .map(|p| (p.phid, p.fields.name))
            .collect();
        info!(projects = ?self.secure_project_names(), "Loaded secure projects");
        Ok(())
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, mut params: serde_json::Value) -> Result<T> {
        params["__conduit__"] = json!({ "token": self.token });
        let params = serde_json::to_string(&params).context("Failed to serialize Conduit parameters")?;
        let url = format!("{}/api/{}", self.url, method);

        let response: ConduitResponse<T> = self
            .client
            .post(&url)
            .form(&[("params", params.as_str()), ("output", "json"), ("__conduit__", "1")])
            .send()
            .await
            .with_context(|| format!("Failed to send Conduit request {}", method))?
            .error_for_status()
            .with_context(|| format!("Conduit {} returned error status", method))?
            .json()
            .await
            .with_context(|| format!("Failed to parse Conduit {} response", method))?;

        if let Some(code) = response.error_code {
            anyhow::bail!(
                "Conduit {} failed: {} {}",
                method,
                code,
                response.error_info.unwrap_or_default()
            );
        }
        response
            .result
            .with_context(|| format!("Conduit {} returned no result", method))
    }

    async fn load_revision(&self, revision_id: u64) -> Result<Option<Revision>> {
        let revisions: SearchResults<Revision> = self
            .request(
                "differential.revision.search",
                json!({
                    "constraints": { "ids": [revision_id] },
                    "attachments": { "projects": true, "reviewers": true },
                }),
            )
            .await?;
        Ok(revisions.data.into_iter().next())
    }

    async fn load_diff(&self, diff_id: u64) -> Result<Option<Diff>> {
        let diffs: SearchResults<Diff> = self
            .request(
                "differential.diff.search",
                json!({ "constraints": { "ids": [diff_id] } }),
            )
            .await?;
        Ok(diffs.data.into_iter().next())
    }

    /// Most recent diff of a revision.
    async fn load_latest_diff(&self, revision_phid: &str) -> Result<Option<Diff>> {
        let diffs: SearchResults<Diff> = self
            .request(
                "differential.diff.search",
                json!({ "constraints": { "revisionPHIDs": [revision_phid] } }),
            )
            .await?;
        Ok(diffs.data.into_iter().max_by_key(|d| d.id))
    }

    async fn load_parent(&self, revision_phid: &str) -> Result<Option<String>> {
        let edges: SearchResults<Edge> = self
            .request(
                "edge.search",
                json!({ "sourcePHIDs": [revision_phid], "types": [PARENT_EDGE] }),
            )
            .await?;
        Ok(edges.data.into_iter().next().map(|e| e.destination_phid))
    }

    async fn load_patch(&self, diff: &Diff) -> Result<Patch> {
        let patch: String = self
            .request("differential.getrawdiff", json!({ "diffID": diff.id }))
            .await?;
        let base_revision = diff
            .fields
            .refs
            .iter()
            .find(|r| r.kind == "base")
            .and_then(|r| r.identifier.clone());
        Ok(Patch {
            diff_id: diff.id,
            diff_ref: diff.phid.clone(),
            patch,
            base_revision,
        })
    }

    /// Patch stack from the oldest ancestor revision up to `diff`.
    async fn load_stack(&self, diff: &Diff) -> Result<Vec<Patch>> {
        let mut stack = vec![self.load_patch(diff).await?];
        let mut seen = HashSet::from([diff.fields.revision_phid.clone()]);
        let mut current = diff.fields.revision_phid.clone();

        while let Some(parent) = self.load_parent(&current).await? {
            if !seen.insert(parent.clone()) {
                break;
            }
            debug!(parent = %parent, "Loading parent diff");
            if let Some(parent_diff) = self.load_latest_diff(&parent).await? {
                stack.insert(0, self.load_patch(&parent_diff).await?);
            }
            current = parent;
        }
        Ok(stack)
    }
}

#[async_trait]
impl ReviewPlatform for PhabricatorClient {
    async fn check_build_visibility(&self, revision_id: u64, diff_id: u64) -> Result<Visibility> {
        let Some(revision) = self.load_revision(revision_id).await? else {
            info!(revision_id, "Revision not found");
            return Ok(Visibility::restricted());
        };

        let projects = revision
            .attachments
            .projects
            .map(|p| p.project_phids)
            .unwrap_or_default();
        if projects.iter().any(|p| self.secure_projects.contains_key(p)) {
            info!(revision_id, revision = %revision.phid, "Secure revision");
            return Ok(Visibility::restricted());
        }

        let Some(diff) = self.load_diff(diff_id).await? else {
            info!(diff_id, "Diff not found");
            return Ok(Visibility::restricted());
        };

        let stack = self.load_stack(&diff).await?;
        let reviewers = revision
            .attachments
            .reviewers
            .map(|r| r.reviewers.into_iter().map(|r| r.reviewer_phid).collect())
            .unwrap_or_default();

        Ok(Visibility::public(stack, reviewers))
    }
}
