//! Configuration for pulsewatch, read from `pulsewatch.toml`.
//!
//! Layered as file → environment. Every section is optional and falls back
//! to its defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [phabricator]
//! url = "https://phabricator.services.mozilla.com"
//! token = "api-xxx"
//! retries = 5
//! sleep_secs = 10
//! secure_project_slugs = ["secure-revision"]
//! repositories = ["PHID-REPO-saxv7uokbqlnfuc5rxvc"]
//!
//! [taskcluster]
//! root_url = "http://taskcluster"
//!
//! [hook]
//! group_id = "project-releng"
//! hook_id = "services-production-staticanalysis/bot"
//!
//! [monitoring]
//! period_secs = 25200
//! poll_interval_secs = 1
//! emails = ["admin@mozilla.com"]
//! report_subject = "Pulse listener tasks"
//! restart_index_namespace = "project.releng.services.tasks.{task_id}"
//!
//! [web]
//! bind = "0.0.0.0"
//! port = 9000
//!
//! [logging]
//! filter = "info"
//! format = "pretty"
//! ```
//!
//! # Environment overrides
//!
//! | Variable               | Overrides              |
//! |------------------------|------------------------|
//! | `PHABRICATOR_URL`      | `phabricator.url`      |
//! | `PHABRICATOR_TOKEN`    | `phabricator.token`    |
//! | `TASKCLUSTER_ROOT_URL` | `taskcluster.root_url` |
//! | `PORT`                 | `web.port`             |

use crate::monitoring::MonitorConfig;
use crate::review::TrackerConfig;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "pulsewatch.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhabricatorSection {
    #[serde(default = "default_phabricator_url")]
    pub url: String,
    /// Conduit API token
    #[serde(default)]
    pub token: Option<String>,
    /// Visibility checks before a build is considered secured
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Minimum delay between two visibility checks of a build
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: u64,
    #[serde(default = "default_secure_project_slugs")]
    pub secure_project_slugs: Vec<String>,
    /// Repository PHIDs whose builds trigger the hook; empty accepts all
    #[serde(default)]
    pub repositories: Vec<String>,
}

fn default_phabricator_url() -> String {
    "https://phabricator.services.mozilla.com".to_string()
}

fn default_retries() -> u32 {
    5
}

fn default_sleep_secs() -> u64 {
    10
}

fn default_secure_project_slugs() -> Vec<String> {
    vec!["secure-revision".to_string()]
}

impl Default for PhabricatorSection {
    fn default() -> Self {
        Self {
            url: default_phabricator_url(),
            token: None,
            retries: default_retries(),
            sleep_secs: default_sleep_secs(),
            secure_project_slugs: default_secure_project_slugs(),
            repositories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskclusterSection {
    #[serde(default = "default_root_url")]
    pub root_url: String,
}

fn default_root_url() -> String {
    "http://taskcluster".to_string()
}

impl Default for TaskclusterSection {
    fn default() -> Self {
        Self {
            root_url: default_root_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSection {
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default)]
    pub hook_id: String,
}

fn default_group_id() -> String {
    "project-releng".to_string()
}

impl Default for HookSection {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            hook_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSection {
    /// Seconds between two reports
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default = "default_report_subject")]
    pub report_subject: String,
    /// Index namespace of restartable failed tasks, `{task_id}` is substituted
    #[serde(default)]
    pub restart_index_namespace: Option<String>,
}

fn default_period_secs() -> u64 {
    7 * 3600
}

fn default_poll_interval_secs() -> u64 {
    1
}

fn default_report_subject() -> String {
    "Pulse listener tasks".to_string()
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            emails: Vec::new(),
            report_subject: default_report_subject(),
            restart_index_namespace: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow!(
                "Invalid log format '{}'. Valid options: pretty, json",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
        }
    }
}

/// The complete pulsewatch.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PulsewatchToml {
    #[serde(default)]
    pub phabricator: PhabricatorSection,
    #[serde(default)]
    pub taskcluster: TaskclusterSection,
    #[serde(default)]
    pub hook: HookSection,
    #[serde(default)]
    pub monitoring: MonitoringSection,
    #[serde(default)]
    pub web: WebSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl PulsewatchToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pulsewatch.toml")
    }

    /// Load configuration from `path`, or defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize pulsewatch.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PHABRICATOR_URL") {
            self.phabricator.url = url;
        }
        if let Some(token) = lookup("PHABRICATOR_TOKEN") {
            self.phabricator.token = Some(token);
        }
        if let Some(root_url) = lookup("TASKCLUSTER_ROOT_URL") {
            self.taskcluster.root_url = root_url;
        }
        if let Some(port) = lookup("PORT") {
            self.web.port = port
                .parse()
                .with_context(|| format!("Invalid PORT value '{}'", port))?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.phabricator.token.as_deref().is_none_or(str::is_empty) {
            warnings.push(
                "Missing phabricator.token (or PHABRICATOR_TOKEN): visibility checks will fail"
                    .to_string(),
            );
        }
        if self.phabricator.retries == 0 {
            warnings.push(
                "phabricator.retries is 0: every build will be dropped without a check".to_string(),
            );
        }
        if self.hook.hook_id.is_empty() {
            warnings.push("Missing hook.hook_id: no task can be triggered".to_string());
        }
        if self.monitoring.period_secs == 0 {
            warnings.push("monitoring.period_secs must be above 0".to_string());
        }
        if self.monitoring.emails.is_empty() {
            warnings.push("No monitoring.emails configured: reports will not be sent".to_string());
        }
        for email in &self.monitoring.emails {
            if !email.contains('@') {
                warnings.push(format!("Invalid email address '{}' in monitoring.emails", email));
            }
        }
        if let Some(namespace) = &self.monitoring.restart_index_namespace
            && !namespace.contains("{task_id}")
        {
            warnings.push(format!(
                "monitoring.restart_index_namespace '{}' does not contain {{task_id}}",
                namespace
            ));
        }

        warnings
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            retries: self.phabricator.retries,
            sleep_interval: Duration::from_secs(self.phabricator.sleep_secs),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            period: Duration::from_secs(self.monitoring.period_secs),
            poll_interval: Duration::from_secs(self.monitoring.poll_interval_secs),
            emails: self.monitoring.emails.clone(),
            subject: self.monitoring.report_subject.clone(),
            restart_namespace: self.monitoring.restart_index_namespace.clone(),
            tasks_url: format!("{}/tasks", self.taskcluster.root_url.trim_end_matches('/')),
        }
    }
}
