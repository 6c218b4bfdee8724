use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

/// Tracks the cancellation channel of each in-flight request by session id.
///
/// Registering a session that already has an in-flight request cancels the
/// previous one first, so each session carries at most one live transport
/// call at a time.
pub struct CancelRegistry {
    senders: Mutex<HashMap<String, broadcast::Sender<()>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, id: &str) -> broadcast::Receiver<()> {
        let (tx, rx) = broadcast::channel(1);
        let previous = self.senders.lock().unwrap().insert(id.to_string(), tx);
        if let Some(previous) = previous {
            let _ = previous.send(());
        }
        rx
    }

    /// Cancel the in-flight request for `id`. Returns whether one existed.
    pub fn cancel(&self, id: &str) -> bool {
        if let Some(tx) = self.senders.lock().unwrap().remove(id) {
            let _ = tx.send(());
            return true;
        }
        false
    }

    /// Drop the channel without signalling, once a request completed.
    pub fn remove(&self, id: &str) {
        self.senders.lock().unwrap().remove(id);
    }
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
