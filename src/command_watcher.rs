//! Background poll loop for `reload_jobs` / `reload_config` commands
//! targeted at this machine or "all". Mirrors the original agent's
//! `commands_watcher` thread: a 5-second poll against a watermark cursor
//! that never stops on a transient store error.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::config::Config;
use crate::job_index::JobIndex;
use crate::notify::Notifier;
use crate::store::StoreGateway;
use crate::types::CommandType;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Run the poll loop until `shutdown` resolves. `machine_id` is this
/// machine's id; only commands addressed to it or to "all" are acted on,
/// filtered by the store query itself.
pub async fn run(
    store: Arc<dyn StoreGateway>,
    config: Arc<ArcSwap<Config>>,
    index: Arc<JobIndex>,
    notifier: Arc<Notifier>,
    machine_id: String,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut watermark: Option<DateTime<Utc>> = Some(Utc::now() - chrono::Duration::seconds(1));

    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }

        match store.poll_commands_since(&machine_id, watermark).await {
            Ok(commands) => {
                for cmd in commands {
                    watermark = Some(cmd.created_at);
                    match cmd.command_type {
                        CommandType::ReloadJobs => {
                            reload_jobs(&store, &index).await;
                            info!("jobs reloaded via command");
                        }
                        CommandType::ReloadConfig => {
                            reload_config(&config);
                            reload_jobs(&store, &index).await;
                            notifier.reload(store.as_ref()).await;
                            info!("config reloaded via command");
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "command watcher poll failed");
            }
        }
    }
}

async fn reload_jobs(store: &Arc<dyn StoreGateway>, index: &JobIndex) {
    match store.list_enabled_jobs().await {
        Ok(jobs) => index.reload(jobs),
        Err(e) => error!(error = %e, "failed to reload jobs"),
    }
}

fn reload_config(config: &ArcSwap<Config>) {
    match Config::load() {
        Ok(fresh) => config.store(Arc::new(fresh)),
        Err(e) => error!(error = %e, "failed to reload config, keeping previous snapshot"),
    }
}
