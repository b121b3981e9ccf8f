use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable request line into the supervisor's own loop
///
/// Holders can only ask for a stop; the supervisor observes the request and
/// does the actual teardown itself, so worker handles are never touched from
/// a signal context.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the supervisor to stop. Returns `true` only for the first request.
    pub fn request_stop(&self) -> bool {
        self.tx.send_if_modified(|stopping| {
            if *stopping {
                false
            } else {
                *stopping = true;
                true
            }
        })
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.subscribe();
        wait_for_stop(&mut rx).await;
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until the flag behind `rx` flips to `true`
pub(crate) async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // Sender gone: nobody can ask for a stop any more
            std::future::pending::<()>().await;
        }
    }
}
