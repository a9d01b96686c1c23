//! Machine identity persistence and the single-instance file lock.
//!
//! `~/.fleetcron/machine.json` holds this host's generated `machine_id`
//! across restarts; `~/.fleetcron/agent.lock` is held exclusively for the
//! process lifetime so two agent instances never run on the same host.

use std::fs;
use std::path::PathBuf;

use fd_lock::RwLock as FileLock;
use serde::{Deserialize, Serialize};

use crate::config::home_dir;
use crate::types::new_machine_id;

#[derive(Debug, Serialize, Deserialize)]
struct MachineIdentity {
    machine_id: String,
}

fn identity_path() -> PathBuf {
    home_dir().join("machine.json")
}

fn lock_path() -> PathBuf {
    home_dir().join("agent.lock")
}

/// Load this host's persisted machine id, generating and saving a fresh
/// one on first run.
pub fn load_or_create_machine_id() -> std::io::Result<String> {
    let path = identity_path();
    if let Ok(raw) = fs::read_to_string(&path) {
        if let Ok(identity) = serde_json::from_str::<MachineIdentity>(&raw) {
            return Ok(identity.machine_id);
        }
    }
    let machine_id = new_machine_id();
    let identity = MachineIdentity {
        machine_id: machine_id.clone(),
    };
    fs::write(&path, serde_json::to_string_pretty(&identity)?)?;
    Ok(machine_id)
}

/// Holds the exclusive lock for the process lifetime; dropping it releases
/// the lock. The backing `FileLock` is deliberately leaked for `'static`
/// so the write guard can outlive the function that acquires it.
pub struct SingleInstanceGuard {
    _guard: fd_lock::RwLockWriteGuard<'static, fs::File>,
}

/// Acquire the single-instance lock, failing fast if another instance
/// already holds it.
pub fn acquire_single_instance_lock() -> std::io::Result<SingleInstanceGuard> {
    let path = lock_path();
    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&path)?;
    let lock: &'static mut FileLock<fs::File> = Box::leak(Box::new(FileLock::new(file)));
    let guard = lock.try_write().map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            "another fleetcron agent instance already holds the lock",
        )
    })?;
    Ok(SingleInstanceGuard { _guard: guard })
}
