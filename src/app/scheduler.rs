//! Coalesce sync requests into single reconciliation passes

use crate::mods::{Reconciler, SyncReport};
use anyhow::{Context, Result};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Debounces sync requests and makes sure only one pass runs at a time
pub struct SyncScheduler {
    reconciler: Reconciler,
    pending_until: Mutex<Option<Instant>>,
    running: tokio::sync::Mutex<()>,
}

impl SyncScheduler {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler,
            pending_until: Mutex::new(None),
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Arm (or re-arm) the pending pass to run `delay` from now
    pub fn request(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        *self.pending_until.lock().unwrap() = Some(deadline);
        tracing::trace!("Sync requested in {:?}", delay);
    }

    pub fn is_pending(&self) -> bool {
        self.pending_until.lock().unwrap().is_some()
    }

    /// When the pending pass becomes due
    pub fn deadline(&self) -> Option<Instant> {
        *self.pending_until.lock().unwrap()
    }

    /// Run the pending pass if its deadline has passed.
    ///
    /// A due pass stays pending while another pass is still running.
    pub async fn poll(&self, now: Instant) -> Result<Option<SyncReport>> {
        let due = matches!(self.deadline(), Some(deadline) if deadline <= now);
        if !due {
            return Ok(None);
        }

        let Ok(guard) = self.running.try_lock() else {
            tracing::debug!("Sync due but a pass is still running");
            return Ok(None);
        };
        self.pending_until.lock().unwrap().take();

        let report = self.execute().await;
        drop(guard);
        report.map(Some)
    }

    /// Cancel any pending pass and run one immediately
    pub async fn run_now(&self) -> Result<SyncReport> {
        let _guard = self.running.lock().await;
        self.pending_until.lock().unwrap().take();
        self.execute().await
    }

    /// Wait for the pending pass (if any) and run it
    pub async fn flush(&self) -> Result<Option<SyncReport>> {
        let Some(deadline) = self.deadline() else {
            return Ok(None);
        };
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        self.run_now().await.map(Some)
    }

    async fn execute(&self) -> Result<SyncReport> {
        let reconciler = self.reconciler.clone();
        tokio::task::spawn_blocking(move || reconciler.sync())
            .await
            .context("Sync task panicked")?
    }
}
