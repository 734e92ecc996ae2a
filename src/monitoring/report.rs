//! Per-period task statistics and their markdown report.

use crate::taskcluster::TaskState;
use std::collections::BTreeMap;

/// Something that renders itself as a report fragment.
pub trait Reportable {
    fn summarize(&self) -> String;
}

/// Terminal outcomes of one hook's tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookStats {
    pub completed: Vec<String>,
    pub exception: Vec<String>,
    pub failed: Vec<String>,
}

impl HookStats {
    /// Record a terminal outcome. Non-terminal states are ignored.
    pub fn record(&mut self, state: TaskState, task_id: impl Into<String>) {
        match state {
            TaskState::Completed => self.completed.push(task_id.into()),
            TaskState::Exception => self.exception.push(task_id.into()),
            TaskState::Failed => self.failed.push(task_id.into()),
            TaskState::Unscheduled | TaskState::Pending | TaskState::Running => {}
        }
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.exception.len() + self.failed.len()
    }

    pub fn all_completed(&self) -> bool {
        self.completed.len() == self.total()
    }

    /// Outcome groups in report order.
    fn groups(&self) -> [(TaskState, &[String]); 3] {
        [
            (TaskState::Completed, self.completed.as_slice()),
            (TaskState::Exception, self.exception.as_slice()),
            (TaskState::Failed, self.failed.as_slice()),
        ]
    }
}

/// Tasks of one hook that ended in the same state.
pub struct OutcomeGroup<'a> {
    pub state: TaskState,
    pub task_ids: &'a [String],
    /// Number of tasks of the hook across all states
    pub total: usize,
    pub tasks_url: &'a str,
}

impl Reportable for OutcomeGroup<'_> {
    fn summarize(&self) -> String {
        let percent = if self.total == 0 {
            0.0
        } else {
            100.0 * self.task_ids.len() as f64 / self.total as f64
        };
        let links: Vec<String> = self
            .task_ids
            .iter()
            .map(|id| format!("* [{id}]({}/{id})", self.tasks_url))
            .collect();
        format!(
            "\n\n## {}\n\n{:.2}% of all tasks ({}/{})\n\n{}",
            self.state,
            percent,
            self.task_ids.len(),
            self.total,
            links.join("\n")
        )
    }
}

/// Report section for one hook.
pub struct HookSection<'a> {
    pub hook_id: &'a str,
    pub stats: &'a HookStats,
    pub tasks_url: &'a str,
}

impl Reportable for HookSection<'_> {
    fn summarize(&self) -> String {
        let total = self.stats.total();
        let mut content = format!("# {} tasks for the last period\n", self.hook_id);
        for (state, task_ids) in self.stats.groups() {
            content.push_str(
                &OutcomeGroup {
                    state,
                    task_ids,
                    total,
                    tasks_url: self.tasks_url,
                }
                .summarize(),
            );
        }
        content
    }
}

/// Outcomes accumulated since the last report, keyed by hook id.
#[derive(Debug, Clone, Default)]
pub struct PeriodStats {
    hooks: BTreeMap<String, HookStats>,
}

impl PeriodStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, hook_id: &str, state: TaskState, task_id: &str) {
        if !state.is_terminal() {
            return;
        }
        self.hooks
            .entry(hook_id.to_string())
            .or_default()
            .record(state, task_id);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn hook(&self, hook_id: &str) -> Option<&HookStats> {
        self.hooks.get(hook_id)
    }

    pub fn clear(&mut self) {
        self.hooks.clear();
    }

    /// Markdown report body, or `None` when every hook only completed tasks.
    pub fn render(&self, tasks_url: &str) -> Option<String> {
        let sections: Vec<String> = self
            .hooks
            .iter()
            .filter(|(_, stats)| !stats.all_completed())
            .map(|(hook_id, stats)| {
                HookSection {
                    hook_id,
                    stats,
                    tasks_url,
                }
                .summarize()
            })
            .collect();

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }
}
