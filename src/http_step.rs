//! Executes one HTTP step with retry/backoff/timeout.
//!
//! Grounded on the teacher's webhook delivery loop (`scheduler/delivery.rs`):
//! a bounded `for attempt in 0..=retries` loop building a fresh client per
//! attempt, matching status against success, and widening the delay between
//! attempts by a backoff multiplier.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{HttpDefaults, RetryConfig};
use crate::template;
use crate::types::{RetryOverride, Step};

const RESPONSE_SAMPLE_MAX_CHARS: usize = 2000;

/// Outcome of running one step to completion (after retries are exhausted
/// or a success is observed).
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok,
    Error,
}

/// Everything about the run worth persisting or notifying on.
#[derive(Debug, Clone, Default)]
pub struct StepInfo {
    pub status_code: Option<u16>,
    pub elapsed_ms: u64,
    pub response_sample: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Merge global, job-level, and step-level retry/timeout settings, step
/// taking precedence over job, job over global.
pub fn merged_timeout_sec(step: &Step, job_timeout_sec: Option<u64>, defaults: &HttpDefaults) -> u64 {
    step.timeout_sec
        .or(job_timeout_sec)
        .unwrap_or(defaults.timeout_sec)
}

/// Merge retry overrides the same way, falling back field-by-field.
pub fn merged_retry(
    step_retry: Option<&RetryOverride>,
    job_retry: Option<&RetryOverride>,
    defaults: &RetryConfig,
) -> RetryConfig {
    let retries = step_retry
        .and_then(|r| r.retries)
        .or_else(|| job_retry.and_then(|r| r.retries))
        .unwrap_or(defaults.retries);
    let delay_sec = step_retry
        .and_then(|r| r.delay_sec)
        .or_else(|| job_retry.and_then(|r| r.delay_sec))
        .unwrap_or(defaults.delay_sec);
    let backoff = step_retry
        .and_then(|r| r.backoff)
        .or_else(|| job_retry.and_then(|r| r.backoff))
        .unwrap_or(defaults.backoff);
    RetryConfig {
        retries,
        delay_sec,
        backoff,
    }
}

/// Run one step against its merged configuration. Never panics on transport
/// failure; always returns an `Outcome` with attempt accounting.
pub async fn run_step(
    step: &Step,
    timeout_sec: u64,
    retry: &RetryConfig,
    secrets: &HashMap<String, String>,
) -> (Outcome, StepInfo) {
    let url = step
        .url
        .as_deref()
        .map(|u| template::resolve_string(u, secrets))
        .unwrap_or_default();
    let mut headers = template::resolve_map(&step.headers, secrets);
    let params = template::resolve_map(&step.params, secrets);
    let body = step.body.as_ref().map(|b| template::resolve(b, secrets));
    let method = step.method.to_uppercase();

    if step.use_cloudscraper || url.contains("render.com") {
        apply_challenge_headers(&mut headers);
    }

    let mut delay = retry.delay_sec;
    let total_attempts = retry.retries + 1;
    let mut last_info = StepInfo::default();

    for attempt in 1..=total_attempts {
        let start = Instant::now();
        let result = if step.use_curl && method == "GET" {
            send_via_curl(&url, &headers, timeout_sec, retry.retries).await
        } else {
            send_via_reqwest(&method, &url, &headers, &params, body.as_ref(), timeout_sec).await
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((status, text)) => {
                let sample = truncate_chars(&text, RESPONSE_SAMPLE_MAX_CHARS);
                if (200..300).contains(&status) {
                    debug!(url = %url, status, attempt, "step succeeded");
                    return (
                        Outcome::Ok,
                        StepInfo {
                            status_code: Some(status),
                            elapsed_ms,
                            response_sample: Some(sample),
                            attempts: attempt,
                            error: None,
                        },
                    );
                }
                last_info = StepInfo {
                    status_code: Some(status),
                    elapsed_ms,
                    response_sample: Some(sample),
                    attempts: attempt,
                    error: Some(format!("HTTP {status}")),
                };
            }
            Err(e) => {
                warn!(url = %url, attempt, error = %e, "step attempt failed");
                last_info = StepInfo {
                    status_code: None,
                    elapsed_ms,
                    response_sample: None,
                    attempts: attempt,
                    error: Some(e),
                };
            }
        }

        if attempt < total_attempts {
            if delay > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }
            if retry.backoff > 1.0 {
                delay *= retry.backoff;
            }
        }
    }

    (Outcome::Error, last_info)
}

/// Add browser-like headers for challenge-protected endpoints (the
/// `use_cloudscraper` / render.com path), without overriding headers the
/// step already set explicitly.
fn apply_challenge_headers(headers: &mut HashMap<String, String>) {
    headers.entry("User-Agent".to_string()).or_insert_with(|| {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/124.0.0.0 Safari/537.36"
            .to_string()
    });
    headers
        .entry("Accept".to_string())
        .or_insert_with(|| "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string());
    headers
        .entry("Accept-Language".to_string())
        .or_insert_with(|| "en-US,en;q=0.9".to_string());
}

async fn send_via_reqwest(
    method: &str,
    url: &str,
    headers: &HashMap<String, String>,
    params: &HashMap<String, String>,
    body: Option<&Value>,
    timeout_sec: u64,
) -> Result<(u16, String), String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_sec))
        .build()
        .map_err(|e| e.to_string())?;

    let m = reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| e.to_string())?;
    let mut req = client.request(m, url).query(params);

    for (k, v) in headers {
        req = req.header(k, v);
    }

    if matches!(method, "POST" | "PUT" | "PATCH" | "DELETE") {
        if let Some(b) = body {
            req = match b {
                Value::Object(_) | Value::Array(_) => req.json(b),
                Value::String(s) => req.body(s.clone()),
                other => req.body(other.to_string()),
            };
        }
    }

    let resp = req.send().await.map_err(|e| e.to_string())?;
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    Ok((status, text))
}

/// Subprocess transport used when `use_curl` is set on a GET step. Shells
/// out to the system `curl` binary and parses the first status line.
async fn send_via_curl(
    url: &str,
    headers: &HashMap<String, String>,
    timeout_sec: u64,
    retries: u32,
) -> Result<(u16, String), String> {
    let curl_path = which_curl().ok_or_else(|| "curl not found in system".to_string())?;

    let mut cmd = tokio::process::Command::new(curl_path);
    cmd.arg("-v").arg("-i").arg(url);
    for (k, v) in headers {
        cmd.arg("-H").arg(format!("{k}: {v}"));
    }
    cmd.arg("-m")
        .arg(timeout_sec.to_string())
        .arg("--retry")
        .arg(retries.to_string())
        .arg("--retry-all-errors");

    let output = cmd.output().await.map_err(|e| e.to_string())?;
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let status = parse_curl_status(&combined).unwrap_or(0);
    Ok((status, combined))
}

fn which_curl() -> Option<std::path::PathBuf> {
    for candidate in ["/usr/bin/curl", "/opt/homebrew/bin/curl", "/usr/local/bin/curl"] {
        let p = std::path::PathBuf::from(candidate);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn parse_curl_status(output: &str) -> Option<u16> {
    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("< HTTP/") {
            if let Some(code_str) = rest.split_whitespace().nth(1) {
                if let Ok(code) = code_str.parse() {
                    return Some(code);
                }
            }
        }
    }
    None
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
