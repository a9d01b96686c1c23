//! Domain data model: Machine, Job, JobRun, Command, NotificationConfig.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A machine participating in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: String,
    pub hostname: String,
    #[serde(default)]
    pub order_value: i64,
    pub last_online_minute: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// One `{hour?, minute}` entry inside a job's `schedules` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub hour: Option<u32>,
    #[serde(default)]
    pub minute: u32,
}

/// The `when` predicate gating a step.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct When {
    pub hour_in: Option<Vec<u32>>,
    pub minute_in: Option<Vec<u32>>,
}

impl When {
    /// True iff every present predicate matches `local`.
    pub fn matches(&self, hour: u32, minute: u32) -> bool {
        if let Some(hours) = &self.hour_in {
            if !hours.contains(&hour) {
                return false;
            }
        }
        if let Some(minutes) = &self.minute_in {
            if !minutes.contains(&minute) {
                return false;
            }
        }
        true
    }
}

/// Retry override at the job or step level (all fields optional; merged
/// against config-level defaults by the HTTP Step Runner).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryOverride {
    pub retries: Option<u32>,
    pub delay_sec: Option<f64>,
    pub backoff: Option<f64>,
}

/// One HTTP action within a job's action chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "type", default = "default_step_type")]
    pub step_type: String,
    pub name: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    pub body: Option<Value>,
    pub timeout_sec: Option<u64>,
    pub retry: Option<RetryOverride>,
    pub when: Option<When>,
    #[serde(default)]
    pub continue_on_failure: bool,
    #[serde(default)]
    pub use_curl: bool,
    #[serde(default)]
    pub use_cloudscraper: bool,
}

fn default_step_type() -> String {
    "http".to_string()
}
fn default_method() -> String {
    "GET".to_string()
}

impl Step {
    /// The label used in logs and notifications: `name`, falling back to `url`.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.url.clone())
            .unwrap_or_else(|| "(unnamed action)".to_string())
    }
}

/// A scheduled job. Either `actions` (a chain) or the flat single-HTTP
/// fields are populated; `as_steps()` normalizes both into one Vec<Step>.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedules: Option<Vec<Schedule>>,
    pub hour: Option<u32>,
    #[serde(default)]
    pub minute: u32,
    pub actions: Option<Vec<Step>>,
    #[serde(default)]
    pub method: String,
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    pub body: Option<Value>,
    pub timeout_sec: Option<u64>,
    pub retry: Option<RetryOverride>,
    #[serde(default)]
    pub use_curl: bool,
    #[serde(default)]
    pub use_cloudscraper: bool,
}

fn default_true() -> bool {
    true
}

impl Job {
    /// The job's schedule entries, normalized to a flat list: either the
    /// explicit `schedules`, or a single entry built from `hour`/`minute`.
    pub fn schedule_entries(&self) -> Vec<Schedule> {
        match &self.schedules {
            Some(s) if !s.is_empty() => s.clone(),
            _ => vec![Schedule {
                hour: self.hour,
                minute: self.minute,
            }],
        }
    }

    /// Normalize `actions` or the flat single-HTTP fields into one ordered
    /// step list. A flat job is treated as a one-step chain.
    pub fn as_steps(&self) -> Vec<Step> {
        if let Some(actions) = &self.actions {
            return actions.clone();
        }
        vec![Step {
            step_type: "http".to_string(),
            name: Some(self.name.clone()),
            method: if self.method.is_empty() {
                "GET".to_string()
            } else {
                self.method.clone()
            },
            url: self.url.clone(),
            headers: self.headers.clone(),
            params: self.params.clone(),
            body: self.body.clone(),
            timeout_sec: self.timeout_sec,
            retry: self.retry.clone(),
            when: None,
            continue_on_failure: false,
            use_curl: self.use_curl,
            use_cloudscraper: self.use_cloudscraper,
        }]
    }
}

/// Outcome of one executed (or skipped) step, as persisted in `JobRun.steps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLog {
    pub index: usize,
    pub name: String,
    pub status: String,
    pub status_code: Option<u16>,
    pub elapsed_ms: Option<u64>,
    pub attempts: Option<u32>,
    pub response_sample: Option<String>,
    pub error: Option<String>,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Ok,
    Error,
}

/// The claim/result record for one `(job_id, scheduled_for)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub job_id: String,
    pub scheduled_for: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub executed_order_value: Option<i64>,
    pub executed_order_position: Option<usize>,
    pub status: RunStatus,
    #[serde(default)]
    pub steps: Vec<StepLog>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

/// Command type consumed by the Command Watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    ReloadJobs,
    ReloadConfig,
}

/// One row in the `commands` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub target: String,
    pub created_at: DateTime<Utc>,
}

/// Singleton Telegram notification settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub chat_id_silent: Option<String>,
    pub chat_id_alert: Option<String>,
    pub default_parse_mode: Option<String>,
}

/// A fresh machine identity, generated on first run.
pub fn new_machine_id() -> String {
    Uuid::new_v4().to_string()
}
