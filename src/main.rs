use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use chrono::Utc;
use clap::{Arg, ArgAction, Command as ClapCommand};
use tracing::{error, info};

use fleetcron::command_watcher;
use fleetcron::config::Config;
use fleetcron::job_index::JobIndex;
use fleetcron::lock;
use fleetcron::main_loop::Agent;
use fleetcron::notify::Notifier;
use fleetcron::store::{MongoStore, StoreGateway};
use fleetcron::types::{Command, CommandType};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn cli() -> ClapCommand {
    let target_arg = Arg::new("target")
        .value_name("TARGET")
        .help("machine_id, or \"all\" (default)")
        .default_value("all");

    ClapCommand::new("fleetcron")
        .version(VERSION)
        .about("Distributed cron agent coordinating exactly-once scheduled HTTP jobs across a fleet")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable debug-level logging"),
        )
        .subcommand(ClapCommand::new("run").about("Run the agent in the foreground (default)"))
        .subcommand(
            ClapCommand::new("reload")
                .alias("refresh")
                .about("Broadcast a reload_jobs command to the fleet")
                .arg(target_arg.clone()),
        )
        .subcommand(
            ClapCommand::new("reload-config")
                .alias("rc")
                .about("Broadcast a reload_config command to the fleet")
                .arg(target_arg),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    let verbose = matches.get_flag("verbose");
    init_logging(verbose);

    let result = match matches.subcommand() {
        Some(("reload", sub)) => {
            let target = sub.get_one::<String>("target").map(String::as_str).unwrap_or("all");
            send_command(CommandType::ReloadJobs, target).await
        }
        Some(("reload-config", sub)) => {
            let target = sub.get_one::<String>("target").map(String::as_str).unwrap_or("all");
            send_command(CommandType::ReloadConfig, target).await
        }
        _ => run_agent().await,
    };

    let exit_code = match result {
        Ok(()) => 0,
        Err(e) if e.is::<LockHeld>() => {
            error!(error = %e, "another fleetcron instance is already running");
            2
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            error!(error = %e, "fatal error");
            1
        }
    };

    std::process::exit(exit_code);
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Marker wrapped around a lock-acquisition failure, so `main` can map it to
/// exit code 2 instead of the generic fatal-error code 1.
#[derive(Debug, thiserror::Error)]
#[error("lock already held")]
struct LockHeld;

async fn send_command(command_type: CommandType, target: &str) -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let store = MongoStore::connect(&config.mongodb_uri, &config.db_name, config.order_field_aliases())
        .await
        .context("failed to connect to store")?;
    let command = Command {
        command_type,
        target: target.to_string(),
        created_at: Utc::now(),
    };
    store.submit_command(&command).await.context("failed to send command")?;
    info!(target, "command sent");
    Ok(())
}

async fn run_agent() -> Result<()> {
    let _guard = lock::acquire_single_instance_lock().map_err(|_| LockHeld)?;

    let machine_id = lock::load_or_create_machine_id().context("failed to load machine identity")?;
    let hostname = hostname_or_unknown();

    let config = Config::load().context("failed to load configuration")?;

    let store: Arc<dyn StoreGateway> = Arc::new(
        MongoStore::connect(&config.mongodb_uri, &config.db_name, config.order_field_aliases())
            .await
            .context("failed to connect to store")?,
    );
    store.ensure_indexes().await.context("failed to ensure indexes")?;

    let initial_machine = store
        .ensure_machine(&machine_id, &hostname, config.default_order)
        .await
        .context("failed to register machine")?;

    info!(
        machine_id = %machine_id,
        hostname = %hostname,
        order_value = initial_machine.order_value,
        tz = %config.tz,
        "fleetcron agent started"
    );

    let notifier = Arc::new(Notifier::load_from_store(store.as_ref()).await);
    let index = Arc::new(JobIndex::new());
    match store.list_enabled_jobs().await {
        Ok(jobs) => index.reload(jobs),
        Err(e) => error!(error = %e, "initial job load failed"),
    }

    let config_swap = Arc::new(ArcSwap::from_pointee(config));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let watcher_handle = tokio::spawn(command_watcher::run(
        store.clone(),
        config_swap.clone(),
        index.clone(),
        notifier.clone(),
        machine_id.clone(),
        shutdown_rx.clone(),
    ));

    let agent = Agent {
        store: store.clone(),
        config: config_swap,
        index,
        notifier,
        machine_id,
        hostname,
    };

    tokio::select! {
        _ = agent.run(shutdown_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    }

    let _ = watcher_handle.await;
    Ok(())
}

fn hostname_or_unknown() -> String {
    hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}
