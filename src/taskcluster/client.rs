use super::{Notifier, TaskDefinition, TaskEnv, TaskPlatform, TaskStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Email template used by the notify service.
const EMAIL_TEMPLATE: &str = "fullscreen";

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: TaskStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerResponse {
    status: Option<TriggerStatus>,
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerStatus {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct IndexedTask {
    #[serde(default)]
    data: serde_json::Value,
}

/// Taskcluster REST client.
///
/// Requests go to `root_url` without Hawk signing, so the client is meant to
/// run behind the Taskcluster proxy of a task or a trusted gateway.
#[derive(Clone)]
pub struct TaskclusterClient {
    client: reqwest::Client,
    root_url: String,
}

impl TaskclusterClient {
    pub fn new(root_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            root_url: root_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    fn api(&self, service: &str, path: &str) -> String {
        format!("{}/api/{}/v1/{}", self.root_url, service, path)
    }
}

#[async_trait]
impl TaskPlatform for TaskclusterClient {
    async fn trigger_hook(&self, group_id: &str, hook_id: &str, env: &TaskEnv) -> Result<String> {
        let url = self.api("hooks", &format!("hooks/{}/{}/trigger", group_id, hook_id));
        debug!(group_id, hook_id, "Triggering hook");

        let response: TriggerResponse = self
            .client
            .post(&url)
            .json(env)
            .send()
            .await
            .context("Failed to send hook trigger request")?
            .error_for_status()
            .with_context(|| format!("Hook {}/{} trigger returned error status", group_id, hook_id))?
            .json()
            .await
            .context("Failed to parse hook trigger response")?;

        response
            .status
            .map(|s| s.task_id)
            .or(response.task_id)
            .context("Hook trigger response has no task id")
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let url = self.api("queue", &format!("task/{}/status", task_id));
        let response: StatusResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send task status request")?
            .error_for_status()
            .with_context(|| format!("Task {} status returned error status", task_id))?
            .json()
            .await
            .context("Failed to parse task status response")?;
        Ok(response.status)
    }

    async fn task_definition(&self, task_id: &str) -> Result<TaskDefinition> {
        let url = self.api("queue", &format!("task/{}", task_id));
        self.client
            .get(&url)
            .send()
            .await
            .context("Failed to send task definition request")?
            .error_for_status()
            .with_context(|| format!("Task {} definition returned error status", task_id))?
            .json()
            .await
            .context("Failed to parse task definition")
    }

    async fn create_task(&self, task_id: &str, definition: &TaskDefinition) -> Result<()> {
        let url = self.api("queue", &format!("task/{}", task_id));
        self.client
            .put(&url)
            .json(definition)
            .send()
            .await
            .context("Failed to send task creation request")?
            .error_for_status()
            .with_context(|| format!("Task {} creation returned error status", task_id))?;
        Ok(())
    }

    async fn indexed_task(&self, namespace: &str) -> Result<serde_json::Value> {
        let url = self.api("index", &format!("task/{}", namespace));
        let indexed: IndexedTask = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send index lookup request")?
            .error_for_status()
            .with_context(|| format!("Index lookup of {} returned error status", namespace))?
            .json()
            .await
            .context("Failed to parse indexed task")?;
        Ok(indexed.data)
    }
}

#[async_trait]
impl Notifier for TaskclusterClient {
    async fn send_notification(&self, address: &str, subject: &str, body: &str) -> Result<()> {
        let url = self.api("notify", "email");
        self.client
            .post(&url)
            .json(&json!({
                "address": address,
                "subject": subject,
                "content": body,
                "template": EMAIL_TEMPLATE,
            }))
            .send()
            .await
            .context("Failed to send notification request")?
            .error_for_status()
            .with_context(|| format!("Notification to {} returned error status", address))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taskcluster::TaskState;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_trigger_hook_returns_task_id() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/hooks/v1/hooks/project-releng/services-staging-staticanalysis/trigger")
            .match_body(Matcher::PartialJson(json!({ "ANALYSIS_ID": "PHID-HMBT-xyz" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": {"taskId": "fUAtRh2nRVWHfm6sYmPl0g", "state": "pending"}}"#)
            .create_async()
            .await;

        let client = TaskclusterClient::new(server.url());
        let env = TaskEnv::from([("ANALYSIS_ID".to_string(), "PHID-HMBT-xyz".to_string())]);
        let task_id = client
            .trigger_hook("project-releng", "services-staging-staticanalysis", &env)
            .await
            .unwrap();

        m.assert_async().await;
        assert_eq!(task_id, "fUAtRh2nRVWHfm6sYmPl0g");
    }

    #[tokio::test]
    async fn test_trigger_hook_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/hooks/v1/hooks/project-releng/missing/trigger")
            .with_status(404)
            .create_async()
            .await;

        let client = TaskclusterClient::new(server.url());
        let err = client
            .trigger_hook("project-releng", "missing", &TaskEnv::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("project-releng/missing"));
    }

    #[tokio::test]
    async fn test_task_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/queue/v1/task/abc/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": {"taskId": "abc", "state": "running", "runs": [{"runId": 0}]}}"#)
            .create_async()
            .await;

        let client = TaskclusterClient::new(format!("{}/", server.url()));
        let status = client.task_status("abc").await.unwrap();
        assert_eq!(status.state, TaskState::Running);
        assert_eq!(status.runs[0].resolved, None);
    }

    #[tokio::test]
    async fn test_create_task_puts_definition() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("PUT", "/api/queue/v1/task/newTask")
            .match_body(Matcher::PartialJson(json!({
                "created": "2018-06-01T10:00:00.000Z",
                "retries": 1,
                "payload": { "image": "bot" }
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let definition: TaskDefinition = serde_json::from_value(json!({
            "created": "2018-06-01T10:00:00.000Z",
            "deadline": "2018-06-01T12:00:00.000Z",
            "expires": "2018-06-08T10:00:00.000Z",
            "retries": 1,
            "payload": { "image": "bot" }
        }))
        .unwrap();

        let client = TaskclusterClient::new(server.url());
        client.create_task("newTask", &definition).await.unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_indexed_task_data() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/index/v1/task/project.releng.services.tasks.abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"taskId": "abc", "data": {"monitoring_restart": true}}"#)
            .create_async()
            .await;

        let client = TaskclusterClient::new(server.url());
        let data = client
            .indexed_task("project.releng.services.tasks.abc")
            .await
            .unwrap();
        assert_eq!(data["monitoring_restart"], true);
    }

    #[tokio::test]
    async fn test_send_notification_uses_template() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/notify/v1/email")
            .match_body(Matcher::Json(json!({
                "address": "admin@mozilla.com",
                "subject": "Pulse listener tasks",
                "content": "report",
                "template": "fullscreen",
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = TaskclusterClient::new(server.url());
        client
            .send_notification("admin@mozilla.com", "Pulse listener tasks", "report")
            .await
            .unwrap();
        m.assert_async().await;
    }
}
