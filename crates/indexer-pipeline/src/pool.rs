//! Pool slots and per-file task state.
//!
//! Each slot owns a worker pool and at most one [`FileTask`]. Attaching a
//! file parses it and fans its host slices out over the pool's workers;
//! polling checks the pending handle without blocking and advances the task
//! from extraction to loading, or finishes it.
//!
//! A file is removed only after the search writer reports success. Any
//! other terminal outcome moves it to the dead-letter folder, except a
//! shutdown, which leaves it in place for the next run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use indexer_types::document::indexed_timestamp;
use indexer_types::{ExtractResult, HostSlice, Settings, SliceFailurePolicy};

use crate::aggregator::aggregate;
use crate::error::{PipelineError, WriterError};
use crate::fetcher::{log_fetch_failure, ContentSource};
use crate::parser::parse_event_file;
use crate::spool::SpoolDirectory;
use crate::writer::{DeliveryReport, SearchWriter};

type ExtractOutput = Result<Vec<Option<ExtractResult>>, PipelineError>;
type LoadOutput = Result<DeliveryReport, WriterError>;

/// Options shared by every slot.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Number of slots
    pub num_pools: usize,
    /// Concurrent fetches per slot
    pub num_processes: usize,
    /// Stamp add documents with an `indexed` timestamp
    pub add_last_indexed: bool,
    /// Handling of failed slices
    pub on_slice_failure: SliceFailurePolicy,
}

impl PoolOptions {
    /// Build from daemon settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            num_pools: settings.num_pools,
            num_processes: settings.num_processes,
            add_last_indexed: settings.add_last_indexed,
            on_slice_failure: settings.on_slice_failure,
        }
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Bounded set of workers fetching slices for one file.
pub struct WorkerPool {
    workers: usize,
    source: Arc<dyn ContentSource>,
    policy: SliceFailurePolicy,
}

impl WorkerPool {
    /// Create a pool running up to `workers` fetches at once.
    pub fn new(workers: usize, source: Arc<dyn ContentSource>, policy: SliceFailurePolicy) -> Self {
        Self {
            workers: workers.max(1),
            source,
            policy,
        }
    }

    /// Fetch every slice and collect the results in slice order.
    ///
    /// The returned handle resolves once all slices have finished.
    pub fn dispatch(
        &self,
        slices: Vec<HostSlice>,
        indexed_at: Option<String>,
        cancel: CancellationToken,
        span: Span,
    ) -> JoinHandle<ExtractOutput> {
        let source = self.source.clone();
        let workers = self.workers;
        let policy = self.policy;

        tokio::spawn(
            async move {
                let outcomes: Vec<Result<Option<ExtractResult>, PipelineError>> =
                    stream::iter(slices)
                        .map(|slice| {
                            let source = source.clone();
                            let indexed_at = indexed_at.clone();
                            let cancel = cancel.clone();
                            async move {
                                fetch_slice(
                                    source.as_ref(),
                                    &slice,
                                    indexed_at.as_deref(),
                                    policy,
                                    &cancel,
                                )
                                .await
                            }
                        })
                        .buffered(workers)
                        .collect()
                        .await;
                outcomes.into_iter().collect()
            }
            .instrument(span),
        )
    }
}

async fn fetch_slice(
    source: &dyn ContentSource,
    slice: &HostSlice,
    indexed_at: Option<&str>,
    policy: SliceFailurePolicy,
    cancel: &CancellationToken,
) -> Result<Option<ExtractResult>, PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    match source.fetch(slice, indexed_at).await {
        Ok(result) => Ok(Some(result)),
        Err(e) => {
            log_fetch_failure(slice, &e);
            if e.is_expected() || policy == SliceFailurePolicy::Drop {
                Ok(None)
            } else {
                Err(PipelineError::SliceFailed {
                    host: slice.server_name.clone(),
                    source: e,
                })
            }
        }
    }
}

/// Processing stage of a file task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStage {
    /// Slices are being fetched
    Extracting,
    /// Combined documents are being delivered
    Loading,
}

enum PendingHandle {
    Extracting(JoinHandle<ExtractOutput>),
    Loading(JoinHandle<LoadOutput>),
}

enum Ready {
    Extracted(Result<ExtractOutput, JoinError>),
    Delivered(Result<LoadOutput, JoinError>),
}

/// Progress of one spool file attached to a slot.
pub struct FileTask {
    /// Spool file being processed
    pub path: PathBuf,
    /// When the file was attached
    pub started: Instant,
    /// Non-blank lines in the file
    pub line_count: usize,
    /// Valid events in the file
    pub event_count: usize,
    span: Span,
    pending: PendingHandle,
}

impl FileTask {
    /// Current stage.
    pub fn stage(&self) -> TaskStage {
        match self.pending {
            PendingHandle::Extracting(_) => TaskStage::Extracting,
            PendingHandle::Loading(_) => TaskStage::Loading,
        }
    }
}

/// One unit of bounded concurrency.
pub struct PoolSlot {
    pool: WorkerPool,
    task: Option<FileTask>,
}

impl PoolSlot {
    /// The attached task, if any.
    pub fn task(&self) -> Option<&FileTask> {
        self.task.as_ref()
    }
}

/// Result of polling one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing attached
    Idle,
    /// Slices still being fetched
    Extracting,
    /// Delivery in progress
    Loading,
    /// Delivered and removed from the spool
    Completed(PathBuf),
    /// Moved to the dead-letter folder
    DeadLettered(PathBuf),
    /// Abandoned on shutdown, left in the spool
    Released(PathBuf),
}

/// Owns the fixed set of slots.
pub struct PoolManager {
    slots: Vec<PoolSlot>,
    spool: SpoolDirectory,
    writer: Arc<SearchWriter>,
    options: PoolOptions,
    cancel: CancellationToken,
}

impl PoolManager {
    /// Create `options.num_pools` idle slots.
    pub fn new(
        spool: SpoolDirectory,
        source: Arc<dyn ContentSource>,
        writer: Arc<SearchWriter>,
        options: PoolOptions,
        cancel: CancellationToken,
    ) -> Self {
        let slots = (0..options.num_pools.max(1))
            .map(|_| PoolSlot {
                pool: WorkerPool::new(
                    options.num_processes,
                    source.clone(),
                    options.on_slice_failure,
                ),
                task: None,
            })
            .collect();

        Self {
            slots,
            spool,
            writer,
            options,
            cancel,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the manager has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The spool this manager reads from.
    pub fn spool(&self) -> &SpoolDirectory {
        &self.spool
    }

    /// Slot by index.
    pub fn slot(&self, index: usize) -> Option<&PoolSlot> {
        self.slots.get(index)
    }

    /// First slot without a task.
    pub fn idle_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.task.is_none())
    }

    /// Whether every slot is idle.
    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(|slot| slot.task.is_none())
    }

    /// Number of attached files.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|slot| slot.task.is_some()).count()
    }

    /// Whether `path` is attached to any slot.
    pub fn is_attached(&self, path: &Path) -> bool {
        self.slots
            .iter()
            .filter_map(|slot| slot.task.as_ref())
            .any(|task| task.path == path)
    }

    /// Attach a file to an idle slot and start fetching its slices.
    ///
    /// Returns without waiting for any fetch. A file with no usable events
    /// yields [`PipelineError::NoEvents`]; the caller dead-letters it.
    pub fn attach(&mut self, index: usize, path: PathBuf) -> Result<(), PipelineError> {
        if self.is_attached(&path) {
            return Err(PipelineError::AlreadyAttached(path));
        }
        let slot = match self.slots.get_mut(index) {
            Some(slot) if slot.task.is_none() => slot,
            _ => return Err(PipelineError::SlotUnavailable(index)),
        };

        let span = info_span!("file_task", slot = index, file = %path.display());
        let started = Instant::now();
        let parsed = {
            let _entered = span.enter();
            debug!("Attaching");
            let parsed = parse_event_file(&path)?;
            if parsed.is_empty() {
                error!("No events found");
                return Err(PipelineError::NoEvents(path));
            }
            parsed
        };

        let indexed_at = self
            .options
            .add_last_indexed
            .then(|| indexed_timestamp(Utc::now()));
        let slices = parsed.slices();
        debug!(
            parent: &span,
            events = parsed.event_count,
            hosts = parsed.by_host.len(),
            slices = slices.len(),
            "Dispatching slices"
        );

        let handle = slot
            .pool
            .dispatch(slices, indexed_at, self.cancel.clone(), span.clone());

        slot.task = Some(FileTask {
            path,
            started,
            line_count: parsed.line_count,
            event_count: parsed.event_count,
            span,
            pending: PendingHandle::Extracting(handle),
        });
        Ok(())
    }

    /// Check a slot's pending work without blocking.
    pub fn poll(&mut self, index: usize) -> PollOutcome {
        let Some(task) = self.slots.get_mut(index).and_then(|slot| slot.task.as_mut()) else {
            return PollOutcome::Idle;
        };

        let ready = match &mut task.pending {
            PendingHandle::Extracting(handle) => handle.now_or_never().map(Ready::Extracted),
            PendingHandle::Loading(handle) => handle.now_or_never().map(Ready::Delivered),
        };

        let Some(ready) = ready else {
            return match task.stage() {
                TaskStage::Extracting => PollOutcome::Extracting,
                TaskStage::Loading => PollOutcome::Loading,
            };
        };

        match ready {
            Ready::Extracted(Ok(Ok(results))) => {
                self.start_loading(index, results);
                PollOutcome::Loading
            }
            Ready::Extracted(Ok(Err(PipelineError::Cancelled)))
            | Ready::Delivered(Ok(Err(WriterError::Cancelled))) => self.release(index),
            Ready::Extracted(Ok(Err(e))) => self.fail(index, &e),
            Ready::Extracted(Err(e)) => self.fail(index, &PipelineError::from(e)),
            Ready::Delivered(Ok(Ok(report))) if report.success => self.complete(index, report),
            Ready::Delivered(Ok(Ok(report))) => self.fail(
                index,
                &PipelineError::Delivery(format!(
                    "{} of {} add batches rejected, {} deletes accepted",
                    report.failed_add_batches, report.add_batches, report.deletes_sent
                )),
            ),
            Ready::Delivered(Ok(Err(e))) => self.fail(index, &PipelineError::from(e)),
            Ready::Delivered(Err(e)) => self.fail(index, &PipelineError::from(e)),
        }
    }

    /// Move a file to the dead-letter folder, logging why.
    pub fn dead_letter(&self, path: &Path, reason: &PipelineError) {
        match self.spool.dead_letter(path) {
            Ok(destination) => {
                error!(
                    file = %path.display(),
                    moved_to = %destination.display(),
                    error = %reason,
                    "File was not successful, moved to failures"
                );
            }
            Err(e) => {
                error!(
                    file = %path.display(),
                    error = %reason,
                    move_error = %e,
                    "File was not successful and could not be moved to failures"
                );
            }
        }
    }

    fn start_loading(&mut self, index: usize, results: Vec<Option<ExtractResult>>) {
        let Some(task) = self.slots.get_mut(index).and_then(|slot| slot.task.as_mut()) else {
            return;
        };

        let dropped = results.iter().filter(|r| r.is_none()).count();
        let docs = aggregate(results);
        info!(
            parent: &task.span,
            adds = docs.adds.len(),
            deletes = docs.deletes.len(),
            dropped_slices = dropped,
            "Extraction finished, delivering"
        );

        let writer = self.writer.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(
            async move { writer.deliver(&docs, &cancel).await }.instrument(task.span.clone()),
        );
        task.pending = PendingHandle::Loading(handle);
    }

    fn complete(&mut self, index: usize, report: DeliveryReport) -> PollOutcome {
        let Some(task) = self.slots.get_mut(index).and_then(|slot| slot.task.take()) else {
            return PollOutcome::Idle;
        };

        if let Err(e) = self.spool.remove(&task.path) {
            warn!(file = %task.path.display(), error = %e, "Could not remove delivered file");
        }
        info!(
            file = %task.path.display(),
            elapsed_secs = task.started.elapsed().as_secs_f64(),
            lines = task.line_count,
            events = task.event_count,
            adds = report.adds_sent,
            deletes = report.deletes_sent,
            "Finished file"
        );
        PollOutcome::Completed(task.path)
    }

    fn fail(&mut self, index: usize, reason: &PipelineError) -> PollOutcome {
        let Some(task) = self.slots.get_mut(index).and_then(|slot| slot.task.take()) else {
            return PollOutcome::Idle;
        };
        self.dead_letter(&task.path, reason);
        PollOutcome::DeadLettered(task.path)
    }

    fn release(&mut self, index: usize) -> PollOutcome {
        let Some(task) = self.slots.get_mut(index).and_then(|slot| slot.task.take()) else {
            return PollOutcome::Idle;
        };
        info!(file = %task.path.display(), "Shutdown requested, leaving file in spool");
        PollOutcome::Released(task.path)
    }
}
