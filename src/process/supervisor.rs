use crate::config::{PoolConfig, WorkerSpec};
use crate::error::{PoolError, Result};
use crate::process::sampler::ResourceSampler;
use crate::process::shutdown::{wait_for_stop, ShutdownHandle};
use crate::process::spawner::spawn_worker;
use crate::process::types::{exit_code, WorkerHandle, WorkerState};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// How long to wait for the kernel to hand back a SIGKILLed process
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// What one monitoring pass observed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Slots whose worker exited and was replaced
    pub replaced: Vec<usize>,
    /// Slots whose worker exited but could not be respawned yet
    pub failed_respawns: Vec<usize>,
    /// Slots whose worker disappeared between the liveness check and sampling
    pub vanished: Vec<usize>,
    /// Number of resource warnings logged
    pub resource_warnings: usize,
}

/// Outcome of tearing the pool down
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that exited within the grace period
    pub terminated: usize,
    /// Workers that had to be SIGKILLed
    pub killed: usize,
    /// Workers that were already gone when shutdown began
    pub already_exited: usize,
}

enum SlotStatus {
    Alive(u32),
    Exited,
    Unknown,
}

enum Replacement {
    Replaced,
    Failed,
    Interrupted,
}

/// Keeps a fixed number of worker processes alive
///
/// Workers live in a slot arena: slot `i` is always `slots[i]`, and a restart
/// overwrites that element rather than inserting or removing. All mutation
/// goes through `&mut self`, so the monitor loop and shutdown cannot race;
/// outside parties (signal handlers) only talk to it through a
/// [`ShutdownHandle`].
pub struct ProcessSupervisor {
    config: PoolConfig,
    spec: WorkerSpec,
    slots: Vec<WorkerHandle>,
    running: bool,
    sampler: ResourceSampler,
    shutdown: ShutdownHandle,
}

impl ProcessSupervisor {
    pub fn new(config: PoolConfig, spec: WorkerSpec) -> Result<Self> {
        config.validate()?;
        spec.validate()?;

        Ok(Self {
            config,
            spec,
            slots: Vec::new(),
            running: false,
            sampler: ResourceSampler::new(),
            shutdown: ShutdownHandle::new(),
        })
    }

    /// Start the pool, supervise it until a stop is requested, then tear it down
    pub async fn run(&mut self) -> Result<ShutdownReport> {
        self.start_pool().await?;
        self.monitor_loop().await;
        self.stop_all().await
    }

    /// Spawn one worker per slot
    ///
    /// If any spawn fails, the workers started so far are torn down again and
    /// the pool stays stopped.
    pub async fn start_pool(&mut self) -> Result<()> {
        if self.running {
            return Err(PoolError::AlreadyRunning);
        }

        info!(
            "Starting pool of {} '{}' worker(s)",
            self.config.worker_count, self.spec.name
        );

        let mut slots = Vec::with_capacity(self.config.worker_count);

        for slot in 0..self.config.worker_count {
            match spawn_worker(slot, &self.spec, 0).await {
                Ok(mut handle) => {
                    handle.mark_running();
                    info!(slot, pid = handle.pid, "Worker started");
                    slots.push(handle);
                }
                Err(e) => {
                    error!("Failed to start worker in slot {}: {}", slot, e);

                    let (_, failures) =
                        terminate_workers(&mut slots, self.config.terminate_grace).await;
                    for failure in failures {
                        error!("Cleanup after failed start: {}", failure);
                    }

                    return Err(PoolError::StartupFailure {
                        slot,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.slots = slots;
        self.running = true;

        Ok(())
    }

    /// Poll every slot each `check_interval` until a stop is requested
    pub async fn monitor_loop(&mut self) {
        let mut shutdown = self.shutdown.subscribe();

        info!(
            "Starting worker monitor (check interval: {:?})",
            self.config.check_interval
        );

        while self.running && !self.shutdown.is_stop_requested() {
            let report = self.check_workers().await;

            if !report.replaced.is_empty() {
                info!("Replaced worker(s) in slot(s) {:?}", report.replaced);
            }

            tokio::select! {
                _ = sleep(self.config.check_interval) => {}
                _ = wait_for_stop(&mut shutdown) => break,
            }
        }

        info!("Worker monitor stopped");
    }

    /// Run a single monitoring pass over all slots
    pub async fn check_workers(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let mut shutdown = self.shutdown.subscribe();

        for slot in 0..self.slots.len() {
            if self.shutdown.is_stop_requested() {
                debug!("Stop requested, cutting health check short");
                break;
            }

            match self.poll_slot(slot) {
                SlotStatus::Alive(pid) => self.sample_slot(slot, pid, &mut report),
                SlotStatus::Exited => match self.replace_slot(slot, &mut shutdown).await {
                    Replacement::Replaced => report.replaced.push(slot),
                    Replacement::Failed => report.failed_respawns.push(slot),
                    Replacement::Interrupted => break,
                },
                SlotStatus::Unknown => {}
            }
        }

        report
    }

    /// Check whether the worker in `slot` is still running, reaping it if not
    fn poll_slot(&mut self, slot: usize) -> SlotStatus {
        let worker = &mut self.slots[slot];

        // Left over from a respawn that failed last cycle
        if worker.state == WorkerState::Exited {
            return SlotStatus::Exited;
        }

        match worker.child.try_wait() {
            Ok(None) => SlotStatus::Alive(worker.pid),
            Ok(Some(status)) => {
                let code = exit_code(status);
                worker.mark_exited(code);
                sweep_group(slot, worker.pid);
                warn!(
                    slot,
                    pid = worker.pid,
                    exit_code = code,
                    "Worker exited after {:?}",
                    worker.uptime()
                );
                SlotStatus::Exited
            }
            Err(e) => {
                warn!(slot, pid = worker.pid, "Failed to poll worker: {}", e);
                SlotStatus::Unknown
            }
        }
    }

    fn sample_slot(&mut self, slot: usize, pid: u32, report: &mut CycleReport) {
        match self.sampler.sample(pid) {
            Ok(sample) if sample.breaches(&self.config) => {
                warn!(
                    slot,
                    pid,
                    cpu_percent = sample.cpu_percent,
                    mem_percent = sample.mem_percent,
                    "Worker resource usage high: CPU {:.1}% (limit {}%), memory {:.1}% (limit {}%)",
                    sample.cpu_percent,
                    self.config.cpu_warn_threshold,
                    sample.mem_percent,
                    self.config.mem_warn_threshold
                );
                report.resource_warnings += 1;
            }
            Ok(sample) => {
                debug!(
                    slot,
                    pid,
                    cpu_percent = sample.cpu_percent,
                    mem_percent = sample.mem_percent,
                    "Worker healthy"
                );
            }
            Err(PoolError::NoSuchProcess(_)) => {
                debug!(slot, pid, "Worker vanished while sampling, replacing on next check");
                report.vanished.push(slot);
            }
            Err(e) => {
                warn!(slot, pid, "Resource sampling failed: {}", e);
            }
        }
    }

    /// Wait out the settle delay and put a fresh worker into `slot`
    async fn replace_slot(
        &mut self,
        slot: usize,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Replacement {
        tokio::select! {
            _ = sleep(self.config.settle_delay) => {}
            _ = wait_for_stop(shutdown) => {
                debug!(slot, "Stop requested during settle delay, not respawning");
                return Replacement::Interrupted;
            }
        }

        let (old_pid, last_exit_code, generation) = {
            let previous = &self.slots[slot];
            (previous.pid, previous.last_exit_code, previous.generation + 1)
        };

        match spawn_worker(slot, &self.spec, generation).await {
            Ok(mut handle) => {
                handle.mark_running();
                handle.last_exit_code = last_exit_code;
                info!(
                    slot,
                    old_pid,
                    pid = handle.pid,
                    generation,
                    "Replacement worker started"
                );
                self.sampler.forget(old_pid);
                self.slots[slot] = handle;
                Replacement::Replaced
            }
            Err(e) => {
                error!(slot, "Failed to respawn worker, retrying next check: {}", e);
                Replacement::Failed
            }
        }
    }

    /// Terminate every worker and reap it
    ///
    /// SIGTERM first, then SIGKILL for anything still alive after
    /// `terminate_grace`. Safe to call more than once; later calls do nothing.
    /// A failed forced kill is reported after all other workers were handled.
    pub async fn stop_all(&mut self) -> Result<ShutdownReport> {
        self.shutdown.request_stop();

        if !self.running && self.slots.is_empty() {
            debug!("Pool already stopped");
            return Ok(ShutdownReport::default());
        }

        self.running = false;

        info!(
            "Stopping {} worker(s) (grace period {:?})",
            self.slots.len(),
            self.config.terminate_grace
        );

        let (report, failures) =
            terminate_workers(&mut self.slots, self.config.terminate_grace).await;

        for worker in &self.slots {
            self.sampler.forget(worker.pid);
        }
        self.slots.clear();

        if failures.is_empty() {
            info!(
                terminated = report.terminated,
                killed = report.killed,
                already_exited = report.already_exited,
                "All workers stopped"
            );
            Ok(report)
        } else {
            for failure in &failures {
                error!("{}", failure);
            }
            Err(PoolError::ShutdownIncomplete(failures))
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.slots
    }

    pub fn worker(&self, slot: usize) -> Option<&WorkerHandle> {
        self.slots.get(slot)
    }

    /// Process ids by slot
    pub fn pids(&self) -> Vec<u32> {
        self.slots.iter().map(|w| w.pid).collect()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    /// A handle that can ask this supervisor to stop from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}

/// Signal the worker's whole process group; the worker leads it, so pgid == pid
fn send_signal(pid: u32, sig: Signal) -> nix::Result<()> {
    signal::killpg(Pid::from_raw(pid as i32), sig)
}

/// SIGKILL whatever is left in an exited worker's process group
fn sweep_group(slot: usize, pid: u32) {
    match send_signal(pid, Signal::SIGKILL) {
        Ok(()) => debug!(slot, pid, "Killed leftover processes in worker group"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(slot, pid, "Failed to clean up worker group: {}", e),
    }
}

/// SIGTERM every live worker, wait up to `grace`, SIGKILL the rest, reap all.
///
/// Returns the tally plus one message per worker that could not be killed.
async fn terminate_workers(
    workers: &mut [WorkerHandle],
    grace: Duration,
) -> (ShutdownReport, Vec<String>) {
    let mut report = ShutdownReport::default();
    let mut failures = Vec::new();

    for worker in workers.iter_mut() {
        if worker.state.is_terminal() {
            worker.mark_terminated(None);
            report.already_exited += 1;
            continue;
        }

        if let Ok(Some(status)) = worker.child.try_wait() {
            worker.mark_terminated(Some(exit_code(status)));
            report.already_exited += 1;
            continue;
        }

        worker.mark_terminating();
        debug!(slot = worker.slot, pid = worker.pid, "Sending SIGTERM");

        match send_signal(worker.pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(
                slot = worker.slot,
                pid = worker.pid,
                "Failed to send SIGTERM: {}",
                e
            ),
        }
    }

    let deadline = Instant::now() + grace;

    for worker in workers
        .iter_mut()
        .filter(|w| w.state == WorkerState::Terminating)
    {
        match timeout_at(deadline, worker.child.wait()).await {
            Ok(Ok(status)) => {
                let code = exit_code(status);
                worker.mark_terminated(Some(code));
                report.terminated += 1;
                info!(
                    slot = worker.slot,
                    pid = worker.pid,
                    exit_code = code,
                    "Worker exited gracefully"
                );
                continue;
            }
            Ok(Err(e)) => {
                warn!(
                    slot = worker.slot,
                    pid = worker.pid,
                    "Waiting for worker failed, forcing kill: {}",
                    e
                );
            }
            Err(_) => {
                warn!(
                    slot = worker.slot,
                    pid = worker.pid,
                    "Worker did not exit within {:?}, sending SIGKILL",
                    grace
                );
            }
        }

        if let Err(e) = send_signal(worker.pid, Signal::SIGKILL) {
            if e != Errno::ESRCH {
                failures.push(
                    PoolError::StopError(
                        format!("slot {} (pid {})", worker.slot, worker.pid),
                        format!("Failed to send SIGKILL: {}", e),
                    )
                    .to_string(),
                );
                continue;
            }
        }

        match timeout(KILL_REAP_TIMEOUT, worker.child.wait()).await {
            Ok(Ok(status)) => {
                worker.mark_terminated(Some(exit_code(status)));
                report.killed += 1;
            }
            Ok(Err(e)) => failures.push(
                PoolError::StopError(
                    format!("slot {} (pid {})", worker.slot, worker.pid),
                    format!("Wait after SIGKILL failed: {}", e),
                )
                .to_string(),
            ),
            Err(_) => failures.push(
                PoolError::StopError(
                    format!("slot {} (pid {})", worker.slot, worker.pid),
                    format!("Still alive {:?} after SIGKILL", KILL_REAP_TIMEOUT),
                )
                .to_string(),
            ),
        }
    }

    for worker in workers.iter() {
        sweep_group(worker.slot, worker.pid);
    }

    (report, failures)
}

#[cfg(test)]
mod tests;
