// Listener pool: N competing listener loops with a shared shutdown

use crate::worker::listener::QueueListener;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Runs listeners on their own tasks
pub struct ListenerPool {
    listeners: Vec<Arc<QueueListener>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ListenerPool {
    pub fn new(listeners: Vec<QueueListener>) -> Self {
        Self {
            listeners: listeners.into_iter().map(Arc::new).collect(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Spawn every listener loop
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        for listener in &self.listeners {
            let listener = Arc::clone(listener);
            handles.push(tokio::spawn(async move { listener.run().await }));
        }
        info!(listeners = self.listeners.len(), "Listener pool started");
    }

    /// Ask every listener to stop after its current message
    pub fn shutdown(&self) {
        for listener in &self.listeners {
            listener.shutdown();
        }
    }

    /// Wait for every listener loop to end
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Listener task ended abnormally");
            }
        }
        info!("Listener pool stopped");
    }

    pub async fn shutdown_and_join(&self) {
        self.shutdown();
        self.join().await;
    }
}

impl fmt::Debug for ListenerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self
            .handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("ListenerPool")
            .field(
                "listeners",
                &self.listeners.iter().map(|l| l.id()).collect::<Vec<_>>(),
            )
            .field("running", &running)
            .finish()
    }
}
