// Launch configuration - file loading and resolution into pool parameters

mod pool;

pub use pool::{PoolConfig, WorkerSpec, MAX_WORKERS};

use crate::error::{PoolError, Result};
use crate::logging::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File names probed in a workspace, in order of preference
pub const CONFIG_FILE_NAMES: [&str; 2] = ["launch.toml", "launch.json"];

/// On-disk launch configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    #[serde(default)]
    pub pool: PoolSection,

    #[serde(default)]
    pub worker: WorkerSpec,

    #[serde(default)]
    pub log: LogSection,
}

/// `[pool]` section; durations are whole seconds like the rest of the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSection {
    /// Number of worker processes
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between health checks
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// CPU warning threshold in percent
    #[serde(default = "default_cpu_warn")]
    pub cpu_warn_threshold: f32,

    /// Memory warning threshold in percent
    #[serde(default = "default_mem_warn")]
    pub mem_warn_threshold: f32,

    /// Seconds between SIGTERM and SIGKILL on shutdown
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_secs: u64,

    /// Seconds to wait before replacing an exited worker
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
}

// Default value functions for serde
fn default_workers() -> usize {
    1
}

fn default_check_interval() -> u64 {
    5
}

fn default_cpu_warn() -> f32 {
    80.0
}

fn default_mem_warn() -> f32 {
    90.0
}

fn default_terminate_grace() -> u64 {
    5
}

fn default_settle_delay() -> u64 {
    2
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            check_interval_secs: default_check_interval(),
            cpu_warn_threshold: default_cpu_warn(),
            mem_warn_threshold: default_mem_warn(),
            terminate_grace_secs: default_terminate_grace(),
            settle_delay_secs: default_settle_delay(),
        }
    }
}

impl From<&PoolSection> for PoolConfig {
    fn from(section: &PoolSection) -> Self {
        PoolConfig {
            worker_count: section.workers,
            check_interval: Duration::from_secs(section.check_interval_secs),
            cpu_warn_threshold: section.cpu_warn_threshold,
            mem_warn_threshold: section.mem_warn_threshold,
            terminate_grace: Duration::from_secs(section.terminate_grace_secs),
            settle_delay: Duration::from_secs(section.settle_delay_secs),
        }
    }
}

/// `[log]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// error, warn, info, debug or trace
    pub level: String,
    /// pretty, compact or json
    pub format: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LaunchConfig {
    /// The configuration written by `poolkeeper init`
    pub fn template() -> Self {
        let mut worker = WorkerSpec::new("http-server", "python3")
            .with_args(["-m", "http.server", "8000", "--bind", "0.0.0.0"]);
        worker.payload = serde_json::json!({ "host": "0.0.0.0", "port": 8000 });

        Self {
            pool: PoolSection::default(),
            worker,
            log: LogSection::default(),
        }
    }

    /// Find the configuration file in a workspace directory
    pub fn locate(workspace: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| workspace.join(name))
            .find(|path| path.is_file())
    }

    /// Load a configuration file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PoolError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(PoolError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.worker.expand_env_vars();
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.worker.anchor_cwd(base);

        config.validate()?;

        Ok(config)
    }

    /// Load the workspace configuration, writing the template first if none exists.
    ///
    /// Returns the loaded configuration, its path and whether it was just created.
    pub fn load_or_init(workspace: &Path) -> Result<(Self, PathBuf, bool)> {
        match Self::locate(workspace) {
            Some(path) => {
                let config = Self::from_file(&path)?;
                Ok((config, path, false))
            }
            None => {
                let path = Self::write_template(workspace, false)?;
                let config = Self::from_file(&path)?;
                Ok((config, path, true))
            }
        }
    }

    /// Write the template to `<workspace>/launch.toml`
    pub fn write_template(workspace: &Path, force: bool) -> Result<PathBuf> {
        let path = workspace.join(CONFIG_FILE_NAMES[0]);

        if path.exists() && !force {
            return Err(PoolError::ConfigError(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }

        std::fs::create_dir_all(workspace)?;

        let contents = toml::to_string_pretty(&Self::template())
            .map_err(|e| PoolError::SerializationError(e.to_string()))?;
        std::fs::write(&path, contents)?;

        Ok(path)
    }

    fn parse_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| PoolError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| PoolError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.pool_config().validate()?;
        self.worker.validate()?;
        self.log_config()?;
        Ok(())
    }

    /// Override the worker count (CLI `--workers`)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.pool.workers = workers;
        self
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::from(&self.pool)
    }

    pub fn log_config(&self) -> Result<LogConfig> {
        let level = crate::logging::parse_level(&self.log.level).ok_or_else(|| {
            PoolError::ConfigValidationError(format!("Invalid log level: {}", self.log.level))
        })?;
        let format: LogFormat = self
            .log
            .format
            .parse()
            .map_err(PoolError::ConfigValidationError)?;

        Ok(LogConfig::default().with_level(level).with_format(format))
    }

    /// Produce the validated parameters the supervisor is built from
    pub fn resolve(&self) -> Result<(PoolConfig, WorkerSpec)> {
        let pool = self.pool_config();
        pool.validate()?;
        self.worker.validate()?;
        Ok((pool, self.worker.clone()))
    }
}
