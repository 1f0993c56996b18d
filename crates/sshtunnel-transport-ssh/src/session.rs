//! Shared access to a session handle
//!
//! Channel opens, keepalives and disconnects only need `&Handle`, so they
//! run side by side under read guards. Forward requests need `&mut Handle`
//! and take an exclusive guard by polling, never by queueing: a queued
//! writer would block every new reader behind a stalled one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::{self, Instant};

const EXCLUSIVE_POLL: Duration = Duration::from_millis(10);

pub(crate) struct SessionLock<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for SessionLock<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> SessionLock<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Never waits while only readers hold the session.
    pub(crate) async fn shared(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().await
    }

    /// `None` if readers still hold the session after `within`.
    pub(crate) async fn exclusive(&self, within: Duration) -> Option<RwLockWriteGuard<'_, T>> {
        let deadline = Instant::now() + within;
        loop {
            if let Ok(guard) = self.inner.try_write() {
                return Some(guard);
            }
            if Instant::now() >= deadline {
                return None;
            }
            time::sleep(EXCLUSIVE_POLL).await;
        }
    }
}
