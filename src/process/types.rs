use std::process::ExitStatus;
use std::time::{Duration, SystemTime};
use tokio::process::Child;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Exited,
    Terminating,
    Terminated,
}

impl WorkerState {
    /// The OS process behind the handle is gone
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Exited | WorkerState::Terminated)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Exited => write!(f, "exited"),
            WorkerState::Terminating => write!(f, "terminating"),
            WorkerState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Live handle to the worker process occupying one pool slot
#[derive(Debug)]
pub struct WorkerHandle {
    pub slot: usize,
    pub pid: u32,
    pub started_at: SystemTime,
    pub state: WorkerState,
    /// Exit code of the most recent process in this slot; negative for a signal
    pub last_exit_code: Option<i32>,
    /// How many processes occupied this slot before this one
    pub generation: u32,
    pub(crate) child: Child,
}

impl WorkerHandle {
    pub(crate) fn new(slot: usize, generation: u32, pid: u32, child: Child) -> Self {
        Self {
            slot,
            pid,
            started_at: SystemTime::now(),
            state: WorkerState::Starting,
            last_exit_code: None,
            generation,
            child,
        }
    }

    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.started_at)
            .unwrap_or(Duration::from_secs(0))
    }

    pub fn mark_running(&mut self) {
        self.state = WorkerState::Running;
    }

    pub(crate) fn mark_exited(&mut self, code: i32) {
        self.state = WorkerState::Exited;
        self.last_exit_code = Some(code);
    }

    pub(crate) fn mark_terminating(&mut self) {
        self.state = WorkerState::Terminating;
    }

    pub(crate) fn mark_terminated(&mut self, code: Option<i32>) {
        self.state = WorkerState::Terminated;
        if code.is_some() {
            self.last_exit_code = code;
        }
    }
}

/// Exit code of a reaped process, or the negated signal number if it was killed
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}
