// Process module - worker pool lifecycle, monitoring and shutdown

pub mod sampler;
pub mod shutdown;
pub mod spawner;
mod supervisor;
mod types;

pub use sampler::{ResourceSample, ResourceSampler};
pub use shutdown::ShutdownHandle;
pub use spawner::spawn_worker;
pub use supervisor::{CycleReport, ProcessSupervisor, ShutdownReport};
pub use types::{exit_code, WorkerHandle, WorkerState};
