use crate::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on pool size; anything larger is almost certainly a typo.
pub const MAX_WORKERS: usize = 128;

/// Fully resolved pool parameters, immutable once the supervisor is built
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Target steady-state number of workers
    pub worker_count: usize,

    /// Polling period of the monitor loop
    pub check_interval: Duration,

    /// CPU usage (percent of one core) at which a resource warning is logged
    pub cpu_warn_threshold: f32,

    /// Memory usage (percent of system memory) at which a resource warning is logged
    pub mem_warn_threshold: f32,

    /// Time between SIGTERM and SIGKILL during shutdown
    pub terminate_grace: Duration,

    /// Pause after a worker exit before its replacement is spawned
    pub settle_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            check_interval: Duration::from_secs(5),
            cpu_warn_threshold: 80.0,
            mem_warn_threshold: 90.0,
            terminate_grace: Duration::from_secs(5),
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(PoolError::ConfigValidationError(
                "workers must be at least 1".to_string(),
            ));
        }

        if self.worker_count > MAX_WORKERS {
            return Err(PoolError::ConfigValidationError(format!(
                "workers cannot exceed {}",
                MAX_WORKERS
            )));
        }

        if self.check_interval.is_zero() {
            return Err(PoolError::ConfigValidationError(
                "check interval must be greater than zero".to_string(),
            ));
        }

        validate_percentage("cpu_warn_threshold", self.cpu_warn_threshold)?;
        validate_percentage("mem_warn_threshold", self.mem_warn_threshold)?;

        Ok(())
    }
}

fn validate_percentage(field: &str, value: f32) -> Result<()> {
    // Written so that NaN fails too
    if !(value > 0.0 && value <= 100.0) {
        return Err(PoolError::ConfigValidationError(format!(
            "{} must be in (0, 100], got {}",
            field, value
        )));
    }
    Ok(())
}

/// Everything needed to start one worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSpec {
    /// Label used in logs and passed to the worker
    pub name: String,

    /// Executable to run; bare names are looked up on PATH
    pub command: PathBuf,

    /// Command-line arguments
    pub args: Vec<String>,

    /// Working directory for the worker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables
    pub env: HashMap<String, String>,

    /// Configuration handed to the worker as JSON
    pub payload: serde_json::Value,
}

impl Default for WorkerSpec {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            command: PathBuf::new(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            payload: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

impl WorkerSpec {
    /// Convenience constructor used by tests and embedders
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(PoolError::MissingConfigField("worker.name".to_string()));
        }

        if self.command.as_os_str().is_empty() {
            return Err(PoolError::MissingConfigField("worker.command".to_string()));
        }

        if let Some(ref cwd) = self.cwd {
            if !cwd.is_dir() {
                return Err(PoolError::ConfigValidationError(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    /// Locate the executable, searching PATH for bare command names
    pub fn resolve_command(&self) -> Option<PathBuf> {
        if self.command.components().count() > 1 || self.command.is_absolute() {
            return self.command.is_file().then(|| self.command.clone());
        }

        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(&self.command))
            .find(|candidate| candidate.is_file())
    }

    /// Resolve a relative working directory against `base`
    pub(crate) fn anchor_cwd(&mut self, base: &Path) {
        if let Some(ref cwd) = self.cwd {
            if cwd.is_relative() {
                self.cwd = Some(base.join(cwd));
            }
        }
    }

    /// Expand `$VAR` and `${VAR}` references in command, args, cwd and env values
    pub(crate) fn expand_env_vars(&mut self) {
        self.command = expand_env_in_path(&self.command);

        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(expand_env_in_path(cwd));
        }

        self.args = self
            .args
            .iter()
            .map(|arg| expand_env_in_string(arg))
            .collect();

        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

fn expand_env_in_string(s: &str) -> String {
    if !s.contains('$') {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(dollar) = rest.find('$') {
        result.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];

        // `${NAME}` or `$NAME`; `consumed` covers everything after the `$`
        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        let value = is_var_name(name)
            .then(|| std::env::var(name).ok())
            .flatten();

        match value {
            Some(value) => {
                result.push_str(&value);
                rest = &after[consumed..];
            }
            None => {
                // Unset or not a reference: keep the text for the worker's own shell
                result.push('$');
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

fn is_var_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_env_in_string(&path_str))
}
