//! Tick scheduler: sleeps until the next scheduled minute, then drives the
//! Order Coordinator's Phase A/B/C sequence for that minute.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Timelike, Utc};
use tracing::{error, info, warn};

use crate::action_chain;
use crate::clock::Clock;
use crate::config::Config;
use crate::job_index::JobIndex;
use crate::notify::Notifier;
use crate::order_coordinator::{self, Decision};
use crate::run_claimer;
use crate::store::StoreGateway;
use crate::types::JobRun;

const MAX_SLEEP: Duration = Duration::from_secs(30 * 60);

pub struct Agent {
    pub store: Arc<dyn StoreGateway>,
    pub config: Arc<ArcSwap<Config>>,
    pub index: Arc<JobIndex>,
    pub notifier: Arc<Notifier>,
    pub machine_id: String,
    pub hostname: String,
}

impl Agent {
    /// Run forever (until `shutdown` fires), one tick per scheduled minute.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            let clock = Clock::new(&self.config.load().tz);
            let now_local = clock.now_local();

            let Some(next_schedule) = self.index.next_fire_after(now_local) else {
                let next_check = next_half_hour_boundary(now_local);
                let sleep_dur = duration_until(now_local, next_check);
                info!(next = %next_check, "no jobs scheduled, sleeping to next half hour");
                if sleep_cancellable(sleep_dur, &mut shutdown).await {
                    return;
                }
                self.reload_jobs().await;
                continue;
            };

            let sleep_dur = duration_until(now_local, next_schedule);
            if sleep_dur > MAX_SLEEP {
                info!(next = %next_schedule, "long wait before next job, sleeping in bounded increments");
                if sleep_cancellable(MAX_SLEEP, &mut shutdown).await {
                    return;
                }
                self.reload_jobs().await;
                continue;
            }

            if sleep_dur > Duration::ZERO {
                if sleep_cancellable(sleep_dur, &mut shutdown).await {
                    return;
                }
            }

            if let Err(e) = self.process_minute(next_schedule).await {
                error!(error = %e, "tick processing failed");
            }
        }
    }

    async fn reload_jobs(&self) {
        match self.store.list_enabled_jobs().await {
            Ok(jobs) => self.index.reload(jobs),
            Err(e) => error!(error = %e, "failed to reload jobs"),
        }
    }

    /// Phase A, conditionally Phase B, then Phase C for one scheduled minute.
    async fn process_minute(
        &self,
        tick_local: DateTime<chrono::FixedOffset>,
    ) -> Result<(), crate::error::StoreError> {
        let cfg = self.config.load();
        let scheduled_utc = order_coordinator::to_utc_minute(tick_local);

        self.store.update_heartbeat(&self.machine_id, scheduled_utc).await?;
        self.reload_jobs().await;

        let ctx = order_coordinator::get_order_context(
            self.store.as_ref(),
            &self.machine_id,
            &self.hostname,
            cfg.default_order,
        )
        .await?;

        let decision = order_coordinator::phase_a_decision(ctx.position, ctx.order_value, cfg.max_order);

        let final_decision = match decision {
            Decision::BeyondLimit => {
                warn!(position = ctx.position, "beyond active machine limit, skipping minute");
                return Ok(());
            }
            Decision::Execute { .. } => decision,
            Decision::Wait { wait_seconds, .. } => {
                tokio::time::sleep(Duration::from_secs(wait_seconds)).await;
                let recheck_ctx = order_coordinator::get_order_context(
                    self.store.as_ref(),
                    &self.machine_id,
                    &self.hostname,
                    cfg.default_order,
                )
                .await?;
                order_coordinator::phase_b_decision(
                    &recheck_ctx.machines,
                    recheck_ctx.position,
                    recheck_ctx.order_value,
                    scheduled_utc,
                    cfg.max_order,
                )
            }
            Decision::StandDown => decision,
        };

        let (position, order_value) = match final_decision {
            Decision::Execute { position, order_value } => (position, order_value),
            Decision::StandDown => {
                info!("earlier machine reported this minute, standing down");
                return Ok(());
            }
            Decision::BeyondLimit => {
                warn!("beyond active machine limit on recheck, skipping minute");
                return Ok(());
            }
            Decision::Wait { .. } => unreachable!("phase B never returns Wait"),
        };

        let jobs = self.index.list_for(tick_local.hour(), tick_local.minute());
        if jobs.is_empty() {
            info!(time = %tick_local.format("%H:%M"), "no jobs scheduled for this minute");
            return Ok(());
        }

        for job in jobs.iter() {
            if !run_claimer::try_claim(
                self.store.as_ref(),
                &job.job_id,
                scheduled_utc,
                &self.machine_id,
                order_value,
                position,
            )
            .await
            {
                info!(job_id = %job.job_id, "already claimed, skipping");
                continue;
            }

            let start = std::time::Instant::now();
            let start_at = Utc::now();
            let result = action_chain::run_chain(job, tick_local, &cfg.http_defaults, &cfg.secrets).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            let run = JobRun {
                job_id: job.job_id.clone(),
                scheduled_for: scheduled_utc,
                claimed_by: Some(self.machine_id.clone()),
                claimed_at: Some(start_at),
                executed_order_value: Some(order_value),
                executed_order_position: Some(position),
                status: result.status,
                steps: result.steps.clone(),
                start_at: Some(start_at),
                end_at: Some(Utc::now()),
            };
            self.store.finalize_run(&run).await?;

            self.notifier
                .notify_job_result(
                    &job.name,
                    result.status,
                    tick_local,
                    elapsed_ms,
                    &self.machine_id,
                    &self.hostname,
                    order_value,
                    position,
                    &result.steps,
                )
                .await;

            info!(job_id = %job.job_id, status = ?result.status, elapsed_ms, "job run finished");
        }

        Ok(())
    }
}

fn next_half_hour_boundary(now_local: DateTime<chrono::FixedOffset>) -> DateTime<chrono::FixedOffset> {
    let base = crate::clock::floor_to_minute(now_local);
    if now_local.minute() < 30 {
        base.with_minute(30).unwrap_or(base)
    } else {
        (base + chrono::Duration::hours(1))
            .with_minute(0)
            .unwrap_or(base)
    }
}

fn duration_until(now: DateTime<chrono::FixedOffset>, target: DateTime<chrono::FixedOffset>) -> Duration {
    let delta = target.signed_duration_since(now);
    delta.to_std().unwrap_or(Duration::ZERO)
}

/// Sleep for `dur`, returning early (with `true`) if shutdown fires first.
async fn sleep_cancellable(dur: Duration, shutdown: &mut tokio::sync::watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => false,
        _ = shutdown.changed() => *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(h: u32, m: u32) -> DateTime<chrono::FixedOffset> {
        chrono::FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 7, 27, h, m, 0)
            .unwrap()
    }

    #[test]
    fn next_half_hour_boundary_before_30_rounds_to_xx30() {
        assert_eq!(next_half_hour_boundary(local(8, 5)), local(8, 30));
    }

    #[test]
    fn next_half_hour_boundary_after_30_rounds_to_next_hour() {
        assert_eq!(next_half_hour_boundary(local(8, 45)), local(9, 0));
    }

    #[test]
    fn duration_until_is_zero_for_past_targets() {
        assert_eq!(duration_until(local(9, 0), local(8, 0)), Duration::ZERO);
    }
}
