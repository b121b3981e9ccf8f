use thiserror::Error;

/// Main error type for the poolkeeper supervisor
#[derive(Debug, Error)]
pub enum PoolError {
    // Pool lifecycle errors
    #[error("Worker pool is already running")]
    AlreadyRunning,

    #[error("Failed to start worker pool at slot {slot}: {reason}")]
    StartupFailure { slot: usize, reason: String },

    #[error("Failed to spawn worker: {0}")]
    SpawnError(String),

    #[error("Failed to stop worker {0}: {1}")]
    StopError(String, String),

    #[error("Shutdown left {} worker(s) unaccounted for: {}", .0.len(), .0.join("; "))]
    ShutdownIncomplete(Vec<String>),

    // Resource sampling errors
    #[error("No such process: {0}")]
    NoSuchProcess(u32),

    #[error("Resource sampling failed: {0}")]
    SamplingError(String),

    // Signal errors
    #[error("Signal error: {0}")]
    SignalError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for poolkeeper operations
pub type Result<T> = std::result::Result<T, PoolError>;
