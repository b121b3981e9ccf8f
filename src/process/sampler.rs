use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

/// One CPU/memory reading for a worker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// CPU usage since the previous sample of this pid (100 = one full core)
    pub cpu_percent: f32,
    /// Resident memory as a share of total system memory
    pub mem_percent: f32,
    /// Resident memory in bytes
    pub memory_bytes: u64,
}

impl ResourceSample {
    /// Whether either reading reaches its warning threshold
    pub fn breaches(&self, config: &PoolConfig) -> bool {
        self.cpu_percent >= config.cpu_warn_threshold
            || self.mem_percent >= config.mem_warn_threshold
    }
}

/// Reads per-process resource usage for the monitor loop
///
/// Only the requested pid is refreshed on each call, so a sample costs a
/// couple of `/proc` reads and never blocks for long.
pub struct ResourceSampler {
    system: System,
    total_memory: u64,
}

impl ResourceSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let total_memory = system.total_memory();

        Self {
            system,
            total_memory,
        }
    }

    /// Sample CPU and memory for `pid`
    ///
    /// Returns [`PoolError::NoSuchProcess`] if the process has already gone
    /// away (including zombies waiting to be reaped).
    pub fn sample(&mut self, pid: u32) -> Result<ResourceSample> {
        let sys_pid = Pid::from_u32(pid);

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );

        let process = self
            .system
            .process(sys_pid)
            .ok_or(PoolError::NoSuchProcess(pid))?;

        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return Err(PoolError::NoSuchProcess(pid));
        }

        if self.total_memory == 0 {
            return Err(PoolError::SamplingError(
                "total system memory is unknown".to_string(),
            ));
        }

        let memory_bytes = process.memory();
        let mem_percent = (memory_bytes as f64 / self.total_memory as f64 * 100.0) as f32;

        Ok(ResourceSample {
            cpu_percent: process.cpu_usage(),
            mem_percent,
            memory_bytes,
        })
    }

    /// Drop cached state for a pid that is no longer supervised
    pub fn forget(&mut self, pid: u32) {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new(),
        );
    }

    pub fn total_memory(&self) -> u64 {
        self.total_memory
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}
