//! Count of in-flight relay activity

use std::sync::Arc;
use tokio::sync::watch;

/// Synchronized counter of running accept loops and relay pairs.
///
/// Each unit of activity holds a [`RelayPermit`]; dropping the permit
/// decrements the count, so a task that panics or returns early still
/// releases its slot.
#[derive(Clone)]
pub struct ActiveRelays {
    count: Arc<watch::Sender<usize>>,
}

impl Default for ActiveRelays {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveRelays {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            count: Arc::new(tx),
        }
    }

    pub fn acquire(&self) -> RelayPermit {
        self.count.send_modify(|count| *count += 1);
        RelayPermit {
            count: self.count.clone(),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolve once the count reaches zero.
    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

/// One unit of activity
#[must_use = "the activity ends when the permit is dropped"]
pub struct RelayPermit {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for RelayPermit {
    fn drop(&mut self) {
        self.count
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}
