//! In-memory `StoreGateway` fake, for exercising coordination logic
//! (order, claim, heartbeat) without a live MongoDB server.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::types::{Command, Job, JobRun, Machine, NotificationConfig};

use super::StoreGateway;

#[derive(Default)]
struct State {
    machines: HashMap<String, Machine>,
    runs: HashMap<(String, DateTime<Utc>), JobRun>,
    jobs: Vec<Job>,
    commands: Vec<Command>,
    notification_config: Option<NotificationConfig>,
}

/// A `StoreGateway` backed entirely by process memory. Seed jobs and
/// commands directly through the public fields for test setup.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_jobs(&self, jobs: Vec<Job>) {
        self.state.lock().jobs = jobs;
    }

    pub fn seed_commands(&self, commands: Vec<Command>) {
        self.state.lock().commands = commands;
    }

    pub fn seed_notification_config(&self, config: NotificationConfig) {
        self.state.lock().notification_config = Some(config);
    }

    pub fn run_for(&self, job_id: &str, scheduled_for: DateTime<Utc>) -> Option<JobRun> {
        self.state
            .lock()
            .runs
            .get(&(job_id.to_string(), scheduled_for))
            .cloned()
    }
}

#[async_trait]
impl StoreGateway for InMemoryStore {
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_machine(
        &self,
        machine_id: &str,
        hostname: &str,
        default_order_value: i64,
    ) -> Result<Machine, StoreError> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let entry = state
            .machines
            .entry(machine_id.to_string())
            .or_insert_with(|| Machine {
                machine_id: machine_id.to_string(),
                hostname: hostname.to_string(),
                order_value: default_order_value,
                last_online_minute: None,
                last_seen: None,
            });
        entry.hostname = hostname.to_string();
        entry.last_seen = Some(now);
        Ok(entry.clone())
    }

    async fn update_heartbeat(&self, machine_id: &str, minute: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(m) = state.machines.get_mut(machine_id) {
            m.last_online_minute = Some(minute);
            m.last_seen = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_machines_sorted(&self) -> Result<Vec<Machine>, StoreError> {
        let state = self.state.lock();
        let mut machines: Vec<Machine> = state.machines.values().cloned().collect();
        machines.sort_by(|a, b| a.order_value.cmp(&b.order_value).then(a.machine_id.cmp(&b.machine_id)));
        Ok(machines)
    }

    async fn claim_run(
        &self,
        job_id: &str,
        scheduled_for: DateTime<Utc>,
        machine_id: &str,
        order_value: i64,
        order_position: usize,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let key = (job_id.to_string(), scheduled_for);
        let now = Utc::now();

        match state.runs.get(&key) {
            Some(existing) if existing.claimed_by.as_deref() != Some(machine_id) => {
                return Ok(false);
            }
            _ => {}
        }

        let run = state.runs.entry(key).or_insert_with(|| JobRun {
            job_id: job_id.to_string(),
            scheduled_for,
            claimed_by: None,
            claimed_at: None,
            executed_order_value: None,
            executed_order_position: None,
            status: crate::types::RunStatus::Running,
            steps: Vec::new(),
            start_at: None,
            end_at: None,
        });
        run.claimed_by = Some(machine_id.to_string());
        run.claimed_at = Some(now);
        run.executed_order_value = Some(order_value);
        run.executed_order_position = Some(order_position);
        run.status = crate::types::RunStatus::Running;

        Ok(true)
    }

    async fn finalize_run(&self, run: &JobRun) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state
            .runs
            .insert((run.job_id.clone(), run.scheduled_for), run.clone());
        Ok(())
    }

    async fn list_enabled_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .state
            .lock()
            .jobs
            .iter()
            .filter(|j| j.enabled)
            .cloned()
            .collect())
    }

    async fn poll_commands_since(
        &self,
        machine_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Command>, StoreError> {
        let state = self.state.lock();
        let mut commands: Vec<Command> = state
            .commands
            .iter()
            .filter(|c| c.target == machine_id || c.target == "all")
            .filter(|c| since.map(|ts| c.created_at > ts).unwrap_or(true))
            .cloned()
            .collect();
        commands.sort_by_key(|c| c.created_at);
        Ok(commands)
    }

    async fn submit_command(&self, command: &Command) -> Result<(), StoreError> {
        self.state.lock().commands.push(command.clone());
        Ok(())
    }

    async fn get_notification_config(&self) -> Result<Option<NotificationConfig>, StoreError> {
        Ok(self.state.lock().notification_config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_run_is_first_writer_wins() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        assert!(store.claim_run("job1", now, "machine-a", 1, 1).await.unwrap());
        assert!(!store.claim_run("job1", now, "machine-b", 2, 2).await.unwrap());
        // The original claimant may re-claim (idempotent retry of its own write).
        assert!(store.claim_run("job1", now, "machine-a", 1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn ensure_machine_upserts_and_preserves_order_value() {
        let store = InMemoryStore::new();
        let m1 = store.ensure_machine("m1", "host-a", 9999).await.unwrap();
        assert_eq!(m1.order_value, 9999);
        let m2 = store.ensure_machine("m1", "host-a-renamed", 9999).await.unwrap();
        assert_eq!(m2.hostname, "host-a-renamed");
    }

    #[tokio::test]
    async fn list_machines_sorted_orders_by_order_value_then_id() {
        let store = InMemoryStore::new();
        store.ensure_machine("zzz", "h", 1).await.unwrap();
        store.ensure_machine("aaa", "h", 1).await.unwrap();
        store.ensure_machine("mmm", "h", 0).await.unwrap();
        let machines = store.list_machines_sorted().await.unwrap();
        let ids: Vec<&str> = machines.iter().map(|m| m.machine_id.as_str()).collect();
        assert_eq!(ids, vec!["mmm", "aaa", "zzz"]);
    }

    #[tokio::test]
    async fn poll_commands_since_excludes_watermark_and_earlier() {
        use crate::types::CommandType;
        let store = InMemoryStore::new();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        store.seed_commands(vec![
            Command {
                command_type: CommandType::ReloadJobs,
                target: "all".into(),
                created_at: t0,
            },
            Command {
                command_type: CommandType::ReloadConfig,
                target: "all".into(),
                created_at: t1,
            },
        ]);
        let since_t0 = store.poll_commands_since("any-machine", Some(t0)).await.unwrap();
        assert_eq!(since_t0.len(), 1);
        assert_eq!(since_t0[0].created_at, t1);
    }

    #[tokio::test]
    async fn poll_commands_since_excludes_other_machines() {
        use crate::types::CommandType;
        let store = InMemoryStore::new();
        let t0 = Utc::now();
        store.seed_commands(vec![
            Command {
                command_type: CommandType::ReloadJobs,
                target: "machine-a".into(),
                created_at: t0,
            },
            Command {
                command_type: CommandType::ReloadJobs,
                target: "machine-b".into(),
                created_at: t0,
            },
            Command {
                command_type: CommandType::ReloadConfig,
                target: "all".into(),
                created_at: t0,
            },
        ]);
        let for_b = store.poll_commands_since("machine-b", None).await.unwrap();
        assert_eq!(for_b.len(), 2);
        assert!(for_b.iter().all(|c| c.target == "machine-b" || c.target == "all"));
    }
}
