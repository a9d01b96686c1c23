//! Telegram notifications for job run results.
//!
//! Grounded on the original agent's `NotificationManager`: the config is a
//! single `notification_configs` document, re-read on `reload_config`, and
//! successes are sent silently while failures page loudly.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::warn;

use crate::error::NotifyError;
use crate::store::StoreGateway;
use crate::types::{NotificationConfig, RunStatus, StepLog};

/// Telegram sender, holding an atomically-swappable copy of its config so
/// `reload_config` can refresh it without restarting the watcher.
pub struct Notifier {
    config: ArcSwap<Option<NotificationConfig>>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: Option<NotificationConfig>) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            client: reqwest::Client::new(),
        }
    }

    pub async fn load_from_store(store: &dyn StoreGateway) -> Self {
        let config = store.get_notification_config().await.unwrap_or(None);
        Self::new(config)
    }

    pub async fn reload(&self, store: &dyn StoreGateway) {
        let config = store.get_notification_config().await.unwrap_or(None);
        self.config.store(Arc::new(config));
    }

    pub fn is_configured(&self) -> bool {
        let cfg = self.config.load();
        match cfg.as_ref() {
            Some(c) => {
                c.bot_token.is_some()
                    && (c.chat_id.is_some() || c.chat_id_silent.is_some() || c.chat_id_alert.is_some())
            }
            None => false,
        }
    }

    fn select_chat_id(cfg: &NotificationConfig, silent: bool) -> Option<String> {
        if silent {
            cfg.chat_id_silent.clone().or_else(|| cfg.chat_id.clone())
        } else {
            cfg.chat_id_alert.clone().or_else(|| cfg.chat_id.clone())
        }
    }

    pub async fn send_message(&self, text: &str, silent: bool) -> Result<(), NotifyError> {
        let cfg = self.config.load();
        let cfg = cfg.as_ref().as_ref().ok_or(NotifyError::NotConfigured)?;
        let token = cfg.bot_token.as_deref().ok_or(NotifyError::NotConfigured)?;
        let chat_id = Self::select_chat_id(cfg, silent).ok_or(NotifyError::NotConfigured)?;

        let parse_mode = cfg.default_parse_mode.clone();
        let payload_text = if parse_mode.as_deref() == Some("MarkdownV2") {
            escape_markdown_v2(text)
        } else {
            text.to_string()
        };

        let mut payload = serde_json::json!({
            "chat_id": chat_id,
            "text": payload_text,
        });
        if let Some(mode) = &parse_mode {
            payload["parse_mode"] = serde_json::Value::String(mode.clone());
        }
        if silent {
            payload["disable_notification"] = serde_json::Value::Bool(true);
        }

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!("http {}", resp.status())));
        }
        Ok(())
    }

    /// Build and send the job-result summary. Never propagates failure to
    /// the caller; a failed Telegram send is logged and swallowed.
    #[allow(clippy::too_many_arguments)]
    pub async fn notify_job_result(
        &self,
        job_name: &str,
        status: RunStatus,
        scheduled_local: chrono::DateTime<chrono::FixedOffset>,
        elapsed_ms: u64,
        machine_id: &str,
        hostname: &str,
        order_value: i64,
        order_position: usize,
        steps: &[StepLog],
    ) {
        if !self.is_configured() {
            return;
        }
        let silent = status == RunStatus::Ok;
        let header = if silent {
            "FleetCron Job Succeeded"
        } else {
            "FleetCron Job Failed"
        };
        let total = steps.len();
        let successful = steps.iter().filter(|s| s.status == "ok").count();
        let short_id: String = machine_id.chars().take(8).collect();

        let mut lines = vec![
            header.to_string(),
            format!("- Job: {job_name}"),
            format!("- Scheduled: {}", scheduled_local.format("%Y-%m-%d %H:%M %z")),
            format!("- Host: {hostname} (id {short_id}...)"),
            format!("- Order: {order_value} (position #{order_position})"),
            format!("- Duration: {elapsed_ms} ms"),
        ];
        if total > 0 {
            lines.push(format!("- Actions: {successful}/{total} ok"));
        }
        if !silent {
            if let Some(failure) = steps
                .iter()
                .find(|s| !matches!(s.status.as_str(), "ok" | "skipped" | "skipped_when" | "skipped_unsupported"))
                .or_else(|| steps.iter().find(|s| s.status == "error"))
            {
                let err = failure.error.clone().unwrap_or_else(|| failure.status.clone());
                lines.push(format!("- Error: {err}"));
                if let Some(attempts) = failure.attempts {
                    lines.push(format!("- Attempts: {attempts}"));
                }
            }
        }

        let message = lines.join("\n");
        if let Err(e) = self.send_message(&message, silent).await {
            warn!(error = %e, "telegram notification failed");
        }
    }
}

/// Escape Telegram MarkdownV2 reserved characters.
fn escape_markdown_v2(text: &str) -> String {
    const RESERVED: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    ];
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_with(bot_token: Option<&str>, chat_id: Option<&str>) -> NotificationConfig {
        NotificationConfig {
            bot_token: bot_token.map(String::from),
            chat_id: chat_id.map(String::from),
            chat_id_silent: None,
            chat_id_alert: None,
            default_parse_mode: None,
        }
    }

    #[test]
    fn is_configured_requires_token_and_some_chat_id() {
        let n = Notifier::new(Some(cfg_with(Some("t"), Some("c"))));
        assert!(n.is_configured());
        let n2 = Notifier::new(Some(cfg_with(Some("t"), None)));
        assert!(!n2.is_configured());
        let n3 = Notifier::new(None);
        assert!(!n3.is_configured());
    }

    #[test]
    fn select_chat_id_prefers_silent_or_alert_over_default() {
        let cfg = NotificationConfig {
            bot_token: Some("t".into()),
            chat_id: Some("default".into()),
            chat_id_silent: Some("silent".into()),
            chat_id_alert: Some("alert".into()),
            default_parse_mode: None,
        };
        assert_eq!(Notifier::select_chat_id(&cfg, true), Some("silent".into()));
        assert_eq!(Notifier::select_chat_id(&cfg, false), Some("alert".into()));
    }

    #[test]
    fn select_chat_id_falls_back_to_default() {
        let cfg = cfg_with(Some("t"), Some("default"));
        assert_eq!(Notifier::select_chat_id(&cfg, true), Some("default".into()));
    }

    #[test]
    fn escape_markdown_v2_escapes_reserved_characters() {
        assert_eq!(escape_markdown_v2("a.b-c!"), "a\\.b\\-c\\!");
        assert_eq!(escape_markdown_v2("plain text"), "plain text");
    }
}
