//! Store Gateway: the abstract persistence boundary over the shared
//! document database, plus a Mongo-backed implementation and an in-memory
//! fake for coordination-logic tests.

mod mongo;
mod memory;

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::types::{Command, Job, JobRun, Machine, NotificationConfig};

/// Abstract persistence boundary every coordination component talks to.
/// Mirrors the original agent's Mongo collections: `machines`, `jobs`,
/// `job_runs`, `commands`, `notification_configs`.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Create any indexes the backend needs (unique `(job_id, scheduled_for)`
    /// on `job_runs`, etc.). Safe to call on every startup.
    async fn ensure_indexes(&self) -> Result<(), StoreError>;

    /// Upsert this machine's record, creating it with `order_value` on first
    /// sight and refreshing `last_seen`/`hostname` on every call. Returns the
    /// record as it stands immediately after the write (Mongo's
    /// `find_one_and_update` with `ReturnDocument::After` semantics).
    async fn ensure_machine(
        &self,
        machine_id: &str,
        hostname: &str,
        default_order_value: i64,
    ) -> Result<Machine, StoreError>;

    /// Stamp `last_online_minute` for this machine's current heartbeat.
    async fn update_heartbeat(&self, machine_id: &str, minute: DateTime<Utc>) -> Result<(), StoreError>;

    /// All known machines, ordered by ascending `order_value` then
    /// `machine_id` (stable tiebreak for equal order values).
    async fn list_machines_sorted(&self) -> Result<Vec<Machine>, StoreError>;

    /// Atomically claim `(job_id, scheduled_for)` for `machine_id`. Returns
    /// `true` iff this call performed the insert (i.e. the claimant is us);
    /// `false` if another machine already holds the claim.
    async fn claim_run(
        &self,
        job_id: &str,
        scheduled_for: DateTime<Utc>,
        machine_id: &str,
        order_value: i64,
        order_position: usize,
    ) -> Result<bool, StoreError>;

    /// Append a step log and advance the run's status/timestamps.
    async fn finalize_run(&self, run: &JobRun) -> Result<(), StoreError>;

    /// Every enabled job definition.
    async fn list_enabled_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Commands targeted at `machine_id` or `"all"`, created strictly after
    /// `since` (or all such commands, if `since` is `None`), ordered by
    /// `created_at` ascending.
    async fn poll_commands_since(
        &self,
        machine_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Command>, StoreError>;

    /// Insert a command for the fleet's Command Watchers to pick up.
    async fn submit_command(&self, command: &Command) -> Result<(), StoreError>;

    /// The singleton Telegram notification settings, if configured.
    async fn get_notification_config(&self) -> Result<Option<NotificationConfig>, StoreError>;
}
