//! Main scheduling loop.
//!
//! Each iteration polls every slot, then hands spool files to idle slots in
//! scan order. No iteration waits on network I/O; the loop sleeps for the
//! poll interval between iterations. Once shutdown is requested no new files
//! are attached and the loop exits when every slot has drained.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use indexer_types::Settings;

use crate::error::PipelineError;
use crate::fetcher::{ContentServiceConfig, HttpContentSource};
use crate::pool::{PollOutcome, PoolManager, PoolOptions};
use crate::spool::SpoolDirectory;
use crate::writer::{SearchWriter, WriterConfig};

/// Counts from one scheduling iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationSummary {
    /// Files newly attached to a slot
    pub attached: usize,
    /// Files delivered and removed
    pub completed: usize,
    /// Files moved to the dead-letter folder
    pub dead_lettered: usize,
    /// Files left in the spool because of shutdown
    pub released: usize,
    /// Files still attached after the iteration
    pub in_flight: usize,
}

/// Drives the pool manager over the spool directory.
pub struct Orchestrator {
    pools: PoolManager,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator over an existing pool manager.
    pub fn new(pools: PoolManager, poll_interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            pools,
            poll_interval,
            cancel,
        }
    }

    /// Wire up the HTTP content source and search writer from settings.
    pub fn from_settings(
        settings: &Settings,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let source = HttpContentSource::new(ContentServiceConfig::from_settings(settings))
            .map_err(|e| PipelineError::Setup(e.to_string()))?;
        let writer = SearchWriter::new(WriterConfig::from_settings(settings))?;

        let pools = PoolManager::new(
            SpoolDirectory::from_settings(settings),
            Arc::new(source),
            Arc::new(writer),
            PoolOptions::from_settings(settings),
            cancel.child_token(),
        );

        info!(
            root = %pools.spool().root().display(),
            pools = pools.len(),
            processes = settings.num_processes,
            update_url = %settings.solr_update_url,
            "Orchestrator configured"
        );
        Ok(Self::new(pools, settings.poll_interval(), cancel))
    }

    /// The managed pool slots.
    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    /// Run one scheduling pass without blocking.
    pub fn run_iteration(&mut self) -> IterationSummary {
        let mut summary = IterationSummary::default();

        for index in 0..self.pools.len() {
            match self.pools.poll(index) {
                PollOutcome::Completed(_) => summary.completed += 1,
                PollOutcome::DeadLettered(_) => summary.dead_lettered += 1,
                PollOutcome::Released(_) => summary.released += 1,
                PollOutcome::Idle | PollOutcome::Extracting | PollOutcome::Loading => {}
            }
        }

        if !self.cancel.is_cancelled() {
            self.fill_idle_slots(&mut summary);
        }

        summary.in_flight = self.pools.in_flight();
        summary
    }

    fn fill_idle_slots(&mut self, summary: &mut IterationSummary) {
        if self.pools.idle_slot().is_none() {
            return;
        }

        let candidates = match self.pools.spool().candidates() {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(
                    root = %self.pools.spool().root().display(),
                    error = %e,
                    "Could not scan spool root"
                );
                return;
            }
        };

        for path in candidates {
            let Some(slot) = self.pools.idle_slot() else {
                break;
            };
            if self.pools.is_attached(&path) {
                continue;
            }

            match self.pools.attach(slot, path.clone()) {
                Ok(()) => summary.attached += 1,
                Err(PipelineError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                    debug!(file = %path.display(), "File vanished before it could be read");
                }
                Err(e @ (PipelineError::SlotUnavailable(_) | PipelineError::AlreadyAttached(_))) => {
                    warn!(file = %path.display(), error = %e, "Could not attach file");
                }
                Err(e) => {
                    self.pools.dead_letter(&path, &e);
                    summary.dead_lettered += 1;
                }
            }
        }
    }

    /// Loop until cancelled and drained.
    pub async fn run(&mut self) {
        info!("Starting spool scan loop");
        loop {
            let summary = self.run_iteration();
            if summary != IterationSummary::default() {
                debug!(
                    attached = summary.attached,
                    completed = summary.completed,
                    dead_lettered = summary.dead_lettered,
                    released = summary.released,
                    in_flight = summary.in_flight,
                    "Iteration finished"
                );
            }

            if self.cancel.is_cancelled() && self.pools.is_idle() {
                info!("All pools drained, stopping");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.cancel.cancelled(), if !self.cancel.is_cancelled() => {
                    info!(in_flight = self.pools.in_flight(), "Shutdown requested, draining pools");
                }
            }
        }
    }
}
