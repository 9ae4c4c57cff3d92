//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Counting rendezvous parking the construction task."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use tokio::sync::Semaphore;
use tracing::{debug, trace};

/// Counting gate between the owner and a single waiting task.
///
/// A release recorded before the wait is kept, so the waiter never misses
/// it. Only one task may wait at a time.
#[derive(Debug)]
pub struct SuspendGate {
    permits: Semaphore,
}

impl Default for SuspendGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SuspendGate {
    /// Closed gate.
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
        }
    }

    /// Record one release.
    pub fn release(&self) {
        self.permits.add_permits(1);
        debug!(pending = self.pending(), "suspend gate released");
    }

    /// Wait for a release and consume it.
    pub async fn wait(&self) {
        trace!(pending = self.pending(), "waiting at suspend gate");
        // The semaphore is never closed.
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
        debug!("suspend gate passed");
    }

    /// Releases not yet consumed by a waiter.
    pub fn pending(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn release_before_wait_is_not_lost() {
        let gate = SuspendGate::new();
        gate.release();
        tokio::time::timeout(Duration::from_secs(1), gate.wait())
            .await
            .expect("gate should be open");
        assert_eq!(gate.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wait_before_release_progresses() {
        let gate = Arc::new(SuspendGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        gate.release();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .expect("join");
    }

    #[tokio::test]
    async fn extra_releases_are_absorbed() {
        let gate = SuspendGate::new();
        gate.release();
        gate.release();
        gate.wait().await;
        assert_eq!(gate.pending(), 1);
    }
}
