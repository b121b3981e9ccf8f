use crate::config::WorkerSpec;
use crate::error::{PoolError, Result};
use crate::process::types::WorkerHandle;
use std::process::Stdio;
use tokio::process::Command;

/// Slot index of the worker
pub const SLOT_ENV: &str = "POOLKEEPER_SLOT";
/// Worker name from `WorkerSpec::name`
pub const NAME_ENV: &str = "POOLKEEPER_WORKER_NAME";
/// Worker payload, serialized as JSON
pub const PAYLOAD_ENV: &str = "POOLKEEPER_PAYLOAD";

/// Spawn one worker process for `slot`
///
/// The worker is a separate OS process so a crash in it cannot take the
/// supervisor or its siblings down. It gets:
/// - the configured arguments, working directory and environment
/// - `POOLKEEPER_SLOT`, `POOLKEEPER_WORKER_NAME` and `POOLKEEPER_PAYLOAD`
/// - its own process group, so a terminal Ctrl-C only reaches the supervisor
///
/// Returns as soon as the OS has created the process; readiness to serve is
/// the worker's own business.
pub async fn spawn_worker(slot: usize, spec: &WorkerSpec, generation: u32) -> Result<WorkerHandle> {
    let program = spec.resolve_command().ok_or_else(|| {
        PoolError::SpawnError(format!(
            "Command does not exist: {}",
            spec.command.display()
        ))
    })?;

    let payload = serde_json::to_string(&spec.payload)
        .map_err(|e| PoolError::SerializationError(e.to_string()))?;

    let mut command = Command::new(&program);
    command.args(&spec.args);

    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    command.envs(&spec.env);
    command.env(SLOT_ENV, slot.to_string());
    command.env(NAME_ENV, &spec.name);
    command.env(PAYLOAD_ENV, payload);

    command.stdin(Stdio::null());
    command.stdout(Stdio::inherit());
    command.stderr(Stdio::inherit());
    command.kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(|e| {
        PoolError::SpawnError(format!(
            "Failed to spawn worker '{}' in slot {}: {}",
            spec.name, slot, e
        ))
    })?;

    let pid = child.id().ok_or_else(|| {
        PoolError::SpawnError(format!(
            "Failed to get PID for worker '{}' in slot {}",
            spec.name, slot
        ))
    })?;

    tracing::debug!(slot, pid, generation, "Spawned worker '{}'", spec.name);

    Ok(WorkerHandle::new(slot, generation, pid, child))
}
