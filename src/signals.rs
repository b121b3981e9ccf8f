// Signal bridge - turns SIGINT/SIGTERM into shutdown requests

use crate::error::{PoolError, Result};
use crate::process::ShutdownHandle;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Forwards termination signals to a [`ShutdownHandle`]
///
/// The listening task never touches worker handles. It only posts a stop
/// request that the supervisor picks up in its own loop. Dropping the bridge
/// stops listening.
pub struct SignalBridge {
    task: JoinHandle<()>,
}

impl SignalBridge {
    /// Register SIGINT and SIGTERM listeners and start forwarding them
    ///
    /// Registration happens before this returns, so a signal delivered right
    /// after `install` is never lost to the default disposition.
    pub fn install(shutdown: ShutdownHandle) -> Result<Self> {
        let sigint = listen(SignalKind::interrupt(), "SIGINT")?;
        let sigterm = listen(SignalKind::terminate(), "SIGTERM")?;

        let task = tokio::spawn(forward_signals(sigint, sigterm, shutdown));

        Ok(Self { task })
    }

    pub fn is_listening(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn listen(kind: SignalKind, name: &str) -> Result<Signal> {
    signal(kind).map_err(|e| {
        PoolError::SignalError(format!("Failed to install {} handler: {}", name, e))
    })
}

async fn forward_signals(mut sigint: Signal, mut sigterm: Signal, shutdown: ShutdownHandle) {
    loop {
        let name = tokio::select! {
            received = sigint.recv() => match received {
                Some(()) => "SIGINT",
                None => break,
            },
            received = sigterm.recv() => match received {
                Some(()) => "SIGTERM",
                None => break,
            },
        };

        if shutdown.request_stop() {
            info!("Received {}, stopping worker pool", name);
        } else {
            debug!("Received {} while already stopping", name);
        }
    }
}
