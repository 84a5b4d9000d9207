//! Run-wide admission gate for pushes.
//!
//! The gate's permits are the one piece of mutable state every push in a
//! run shares. Waiters are served in FIFO order.

use std::sync::Arc;

use rosforge_core::error::{ForgeError, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore bounding in-flight pushes.
#[derive(Debug, Clone)]
pub struct PublishGate {
    semaphore: Arc<Semaphore>,
}

impl PublishGate {
    /// `limit` comes from a validated [`RunConfig`](rosforge_core::RunConfig)
    /// and is at least 1.
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
        }
    }

    /// Wait for a permit. Capacity returns when the permit is dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ForgeError::Cancelled("publish gate closed".to_string()))
    }
}
