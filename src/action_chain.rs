//! Runs a job's ordered step chain, recording a `StepLog` per step.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use tracing::info;

use crate::config::HttpDefaults;
use crate::http_step::{self, Outcome};
use crate::types::{Job, RunStatus, Step, StepLog};

/// Result of executing a job's whole action chain.
#[derive(Debug, Clone)]
pub struct ChainResult {
    pub status: RunStatus,
    pub steps: Vec<StepLog>,
}

/// Execute every step of `job` in order against `local_now`, honoring each
/// step's `when` predicate and `continue_on_failure` flag. Stops at the
/// first hard failure unless that step tolerates it.
pub async fn run_chain(
    job: &Job,
    local_now: DateTime<FixedOffset>,
    defaults: &HttpDefaults,
    secrets: &HashMap<String, String>,
) -> ChainResult {
    use chrono::Timelike;
    let hour = local_now.hour();
    let minute = local_now.minute();

    let steps = job.as_steps();
    let mut logs = Vec::with_capacity(steps.len());
    let mut overall = RunStatus::Ok;

    for (index, step) in steps.iter().enumerate() {
        if step.step_type != "http" {
            logs.push(skipped_log(index, step, "skipped_unsupported"));
            continue;
        }

        if let Some(when) = &step.when {
            if !when.matches(hour, minute) {
                logs.push(skipped_log(index, step, "skipped_when"));
                continue;
            }
        }

        let job_retry = job.retry.as_ref();
        let retry = http_step::merged_retry(step.retry.as_ref(), job_retry, &defaults.retry);
        let timeout_sec = http_step::merged_timeout_sec(step, job.timeout_sec, defaults);

        let (outcome, info) = http_step::run_step(step, timeout_sec, &retry, secrets).await;

        let log = StepLog {
            index,
            name: step.display_name(),
            status: match outcome {
                Outcome::Ok => "ok".to_string(),
                Outcome::Error => "error".to_string(),
            },
            status_code: info.status_code,
            elapsed_ms: Some(info.elapsed_ms),
            attempts: Some(info.attempts),
            response_sample: info.response_sample,
            error: info.error.clone(),
        };
        logs.push(log);

        if outcome == Outcome::Error {
            info!(job_id = %job.job_id, step = index, error = ?info.error, "step failed");
            if !step.continue_on_failure {
                overall = RunStatus::Error;
                break;
            }
        }
    }

    ChainResult {
        status: overall,
        steps: logs,
    }
}

fn skipped_log(index: usize, step: &Step, status: &str) -> StepLog {
    StepLog {
        index,
        name: step.display_name(),
        status: status.to_string(),
        status_code: None,
        elapsed_ms: None,
        attempts: None,
        response_sample: None,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RetryOverride, Schedule, When};
    use chrono::TimeZone;

    fn base_job() -> Job {
        Job {
            job_id: "j1".into(),
            name: "job".into(),
            enabled: true,
            schedules: Some(vec![Schedule { hour: None, minute: 0 }]),
            hour: None,
            minute: 0,
            actions: None,
            method: "GET".into(),
            url: Some("http://127.0.0.1:1/unreachable".into()),
            headers: HashMap::new(),
            params: HashMap::new(),
            body: None,
            timeout_sec: Some(1),
            retry: Some(RetryOverride {
                retries: Some(0),
                delay_sec: Some(0.0),
                backoff: None,
            }),
            use_curl: false,
            use_cloudscraper: false,
        }
    }

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 7, 27, 9, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn unsupported_step_type_is_skipped_without_error() {
        let mut job = base_job();
        job.actions = Some(vec![Step {
            step_type: "shell".into(),
            name: Some("noop".into()),
            method: "GET".into(),
            url: None,
            headers: HashMap::new(),
            params: HashMap::new(),
            body: None,
            timeout_sec: None,
            retry: None,
            when: None,
            continue_on_failure: false,
            use_curl: false,
            use_cloudscraper: false,
        }]);
        let result = run_chain(&job, now(), &HttpDefaults::default(), &HashMap::new()).await;
        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.steps[0].status, "skipped_unsupported");
    }

    #[tokio::test]
    async fn when_predicate_mismatch_skips_step() {
        let mut job = base_job();
        job.actions = Some(vec![Step {
            step_type: "http".into(),
            name: Some("only at 3am".into()),
            method: "GET".into(),
            url: Some("http://127.0.0.1:1/x".into()),
            headers: HashMap::new(),
            params: HashMap::new(),
            body: None,
            timeout_sec: Some(1),
            retry: None,
            when: Some(When {
                hour_in: Some(vec![3]),
                minute_in: None,
            }),
            continue_on_failure: false,
            use_curl: false,
            use_cloudscraper: false,
        }]);
        let result = run_chain(&job, now(), &HttpDefaults::default(), &HashMap::new()).await;
        assert_eq!(result.steps[0].status, "skipped_when");
        assert_eq!(result.status, RunStatus::Ok);
    }

    #[tokio::test]
    async fn chain_aborts_on_first_hard_failure() {
        let mut job = base_job();
        job.actions = Some(vec![
            Step {
                step_type: "http".into(),
                name: Some("step1".into()),
                method: "GET".into(),
                url: Some("http://127.0.0.1:1/fails".into()),
                headers: HashMap::new(),
                params: HashMap::new(),
                body: None,
                timeout_sec: Some(1),
                retry: Some(RetryOverride {
                    retries: Some(0),
                    delay_sec: Some(0.0),
                    backoff: None,
                }),
                when: None,
                continue_on_failure: false,
                use_curl: false,
                use_cloudscraper: false,
            },
            Step {
                step_type: "http".into(),
                name: Some("step2 never runs".into()),
                method: "GET".into(),
                url: Some("http://127.0.0.1:1/never".into()),
                headers: HashMap::new(),
                params: HashMap::new(),
                body: None,
                timeout_sec: Some(1),
                retry: None,
                when: None,
                continue_on_failure: false,
                use_curl: false,
                use_cloudscraper: false,
            },
        ]);
        let result = run_chain(&job, now(), &HttpDefaults::default(), &HashMap::new()).await;
        assert_eq!(result.status, RunStatus::Error);
        assert_eq!(result.steps.len(), 1);
    }

    #[tokio::test]
    async fn continue_on_failure_runs_remaining_steps() {
        let mut job = base_job();
        job.actions = Some(vec![
            Step {
                step_type: "http".into(),
                name: Some("step1".into()),
                method: "GET".into(),
                url: Some("http://127.0.0.1:1/fails".into()),
                headers: HashMap::new(),
                params: HashMap::new(),
                body: None,
                timeout_sec: Some(1),
                retry: Some(RetryOverride {
                    retries: Some(0),
                    delay_sec: Some(0.0),
                    backoff: None,
                }),
                when: None,
                continue_on_failure: true,
                use_curl: false,
                use_cloudscraper: false,
            },
            Step {
                step_type: "shell".into(),
                name: Some("step2".into()),
                method: "GET".into(),
                url: None,
                headers: HashMap::new(),
                params: HashMap::new(),
                body: None,
                timeout_sec: None,
                retry: None,
                when: None,
                continue_on_failure: false,
                use_curl: false,
                use_cloudscraper: false,
            },
        ]);
        let result = run_chain(&job, now(), &HttpDefaults::default(), &HashMap::new()).await;
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[1].status, "skipped_unsupported");
    }
}
