//! Scripted test doubles for the remote collaborators.
//!
//! Real implementations: `PhabricatorClient`, `TaskclusterClient`.

use crate::review::{ReviewPlatform, Visibility};
use crate::taskcluster::{Notifier, TaskDefinition, TaskEnv, TaskPlatform, TaskState, TaskStatus};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Review platform answering visibility checks from a script.
///
/// Once the script is exhausted every check reports a restricted revision.
pub struct ScriptedReview {
    answers: Mutex<VecDeque<Result<Visibility, String>>>,
    calls: AtomicUsize,
}

impl ScriptedReview {
    pub fn new(answers: Vec<Result<Visibility, String>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewPlatform for ScriptedReview {
    async fn check_build_visibility(&self, _revision_id: u64, _diff_id: u64) -> Result<Visibility> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answers.lock().unwrap().pop_front();
        match answer {
            Some(Ok(visibility)) => Ok(visibility),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Ok(Visibility::restricted()),
        }
    }
}

/// Task platform with scripted statuses, definitions and index entries.
#[derive(Default)]
pub struct FakeTaskPlatform {
    triggers: Mutex<VecDeque<Result<String, String>>>,
    triggered: Mutex<Vec<(String, String, TaskEnv)>>,
    statuses: Mutex<HashMap<String, VecDeque<Result<TaskState, String>>>>,
    definitions: Mutex<HashMap<String, TaskDefinition>>,
    created: Mutex<Vec<(String, TaskDefinition)>>,
    index: Mutex<HashMap<String, serde_json::Value>>,
}

impl FakeTaskPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_trigger(&self, result: Result<String, String>) {
        self.triggers.lock().unwrap().push_back(result);
    }

    /// Queue the next status answer for `task_id`.
    pub fn push_status(&self, task_id: &str, status: Result<TaskState, String>) {
        self.statuses
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default()
            .push_back(status);
    }

    pub fn set_definition(&self, task_id: &str, definition: TaskDefinition) {
        self.definitions
            .lock()
            .unwrap()
            .insert(task_id.to_string(), definition);
    }

    pub fn set_index(&self, namespace: &str, data: serde_json::Value) {
        self.index
            .lock()
            .unwrap()
            .insert(namespace.to_string(), data);
    }

    pub fn triggered(&self) -> Vec<(String, String, TaskEnv)> {
        self.triggered.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<(String, TaskDefinition)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskPlatform for FakeTaskPlatform {
    async fn trigger_hook(&self, group_id: &str, hook_id: &str, env: &TaskEnv) -> Result<String> {
        self.triggered
            .lock()
            .unwrap()
            .push((group_id.to_string(), hook_id.to_string(), env.clone()));
        let next = self.triggers.lock().unwrap().pop_front();
        match next {
            Some(Ok(task_id)) => Ok(task_id),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("Hook {}/{} not found", group_id, hook_id)),
        }
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let next = self
            .statuses
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(|s| s.pop_front());
        match next {
            Some(Ok(state)) => Ok(TaskStatus {
                state,
                runs: Vec::new(),
            }),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("Unknown task {}", task_id)),
        }
    }

    async fn task_definition(&self, task_id: &str) -> Result<TaskDefinition> {
        self.definitions
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown task {}", task_id))
    }

    async fn create_task(&self, task_id: &str, definition: &TaskDefinition) -> Result<()> {
        self.created
            .lock()
            .unwrap()
            .push((task_id.to_string(), definition.clone()));
        Ok(())
    }

    async fn indexed_task(&self, namespace: &str) -> Result<serde_json::Value> {
        self.index
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .ok_or_else(|| anyhow!("Indexed task {} not found", namespace))
    }
}

/// Notifier recording what it sends; chosen addresses fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    /// `(address, subject, body)` of every delivered notification.
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(&self, address: &str, subject: &str, body: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(address) {
            return Err(anyhow!("Mailbox {} unavailable", address));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Task definition created on 2018-06-01 with a 2 hour deadline and 7 day expiry.
pub fn definition(retries: i64) -> TaskDefinition {
    let created = Utc.with_ymd_and_hms(2018, 6, 1, 10, 0, 0).unwrap();
    let mut extra = serde_json::Map::new();
    extra.insert("payload".to_string(), json!({ "image": "staticanalysis/bot" }));
    extra.insert("metadata".to_string(), json!({ "name": "code review" }));
    TaskDefinition {
        created,
        deadline: created + Duration::hours(2),
        expires: created + Duration::days(7),
        retries,
        extra,
    }
}
