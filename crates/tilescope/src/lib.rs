use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tiles::{
    CommitOutcome, PixelSource, TileDirtyBitset, TileLayout, TileStore, TileStoreError,
    TileTaskError,
};
use view::{Camera, Generation, ViewError, ViewRequest, Viewport};
use work_queue::{DedupPolicy, WorkItem, WorkQueue, WorkQueueConfig};
use worker_pool::{DispatchError, WorkerPool, WorkerPoolConfig, WorkerPoolError};

mod display;

pub use display::{DisplayLayer, DisplayLayers};

pub const DEFAULT_ITERATION_BUDGET: u32 = 2000;
const DEFAULT_TASK_REPORT_CAPACITY: usize = 4096;
const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    #[default]
    Streaming,
    Synchronous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub viewport: Viewport,
    pub columns: u32,
    pub rows: u32,
    pub max_workers: usize,
    pub dedup: DedupPolicy,
    pub staging_depth: usize,
    pub dispatch_mode: DispatchMode,
    /// Reports beyond this many undrained entries are dropped; counters still advance.
    pub task_report_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            columns: tiles::DEFAULT_COLUMNS,
            rows: tiles::DEFAULT_ROWS,
            max_workers: WorkerPoolConfig::default().max_workers,
            dedup: DedupPolicy::default(),
            staging_depth: tiles::DEFAULT_STAGING_DEPTH,
            dispatch_mode: DispatchMode::default(),
            task_report_capacity: DEFAULT_TASK_REPORT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    View(ViewError),
    Tiles(TileStoreError),
    Pool(WorkerPoolError),
}

impl From<ViewError> for SchedulerError {
    fn from(value: ViewError) -> Self {
        Self::View(value)
    }
}

impl From<TileStoreError> for SchedulerError {
    fn from(value: TileStoreError) -> Self {
        Self::Tiles(value)
    }
}

impl From<WorkerPoolError> for SchedulerError {
    fn from(value: WorkerPoolError) -> Self {
        Self::Pool(value)
    }
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::View(error) => write!(formatter, "scheduler view error: {error}"),
            SchedulerError::Tiles(error) => write!(formatter, "scheduler tile error: {error}"),
            SchedulerError::Pool(error) => write!(formatter, "scheduler pool error: {error}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Committed,
    Rejected { committed: Generation },
    Failed(TileTaskError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskReport {
    pub tile_index: usize,
    pub generation: Generation,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchSummary {
    pub dispatched: usize,
    pub skipped_stale: usize,
    /// Items still pending when the cycle stopped.
    pub deferred: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub generation: Generation,
    pub pending: usize,
    pub running: usize,
    pub spawned_workers: usize,
    pub dispatched: u64,
    pub skipped_stale: u64,
    pub committed: u64,
    pub rejected: u64,
    pub failed: u64,
    pub panicked_jobs: usize,
}

#[derive(Debug, Default)]
struct TaskCounters {
    committed: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone)]
struct TaskReportSink {
    sender: Sender<TaskReport>,
    counters: Arc<TaskCounters>,
}

impl TaskReportSink {
    fn record(&self, report: TaskReport) {
        let counter = match report.outcome {
            TaskOutcome::Committed => &self.counters.committed,
            TaskOutcome::Rejected { .. } => &self.counters.rejected,
            TaskOutcome::Failed(error) => {
                tracing::warn!(
                    target: "tilescope.task",
                    tile_index = report.tile_index,
                    generation = report.generation.0,
                    %error,
                    "tile_task_failed"
                );
                &self.counters.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        match self.sender.try_send(report) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(target: "tilescope.task", "task_report_dropped");
            }
        }
    }
}

fn execute_tile_task<S>(store: &TileStore, source: &S, item: WorkItem, reports: &TaskReportSink)
where
    S: PixelSource + ?Sized,
{
    let outcome = match tiles::run_tile_task(store, item.tile_index, &item.request, source) {
        Ok(CommitOutcome::Committed) => TaskOutcome::Committed,
        Ok(CommitOutcome::Rejected { committed }) => TaskOutcome::Rejected { committed },
        Err(error) => TaskOutcome::Failed(error),
    };
    reports.record(TaskReport {
        tile_index: item.tile_index,
        generation: item.generation(),
        outcome,
    });
}

pub struct TileScheduler<S> {
    config: SchedulerConfig,
    layout: TileLayout,
    store: Arc<TileStore>,
    source: Arc<S>,
    queue: WorkQueue,
    pool: WorkerPool,
    generation: Generation,
    last_request: Option<ViewRequest>,
    display: display::DisplaySnapshot,
    reports: TaskReportSink,
    report_receiver: Receiver<TaskReport>,
    dispatched: u64,
    skipped_stale: u64,
}

impl<S> TileScheduler<S>
where
    S: PixelSource + 'static,
{
    pub fn new(config: SchedulerConfig, source: S) -> Result<Self, SchedulerError> {
        Self::with_shared_source(config, Arc::new(source))
    }

    pub fn with_shared_source(config: SchedulerConfig, source: Arc<S>) -> Result<Self, SchedulerError> {
        let pool = WorkerPool::new(WorkerPoolConfig {
            max_workers: config.max_workers,
            thread_name: "tile_worker".to_owned(),
        })?;
        Self::with_pool(config, source, pool)
    }

    /// `config.max_workers` is ignored; the pool's own bound applies.
    pub fn with_pool(
        mut config: SchedulerConfig,
        source: Arc<S>,
        pool: WorkerPool,
    ) -> Result<Self, SchedulerError> {
        config.max_workers = pool.max_workers();
        let viewport = Viewport::new(config.viewport.width, config.viewport.height)?;
        let layout = TileLayout::new(viewport, config.columns, config.rows)?;
        let store = Arc::new(TileStore::new(layout, config.staging_depth)?);
        let queue = WorkQueue::new(WorkQueueConfig {
            dedup: config.dedup,
        });
        let (sender, report_receiver) =
            crossbeam_channel::bounded(config.task_report_capacity.max(1));
        Ok(Self {
            display: display::DisplaySnapshot::new(layout.tile_count()),
            config,
            layout,
            store,
            source,
            queue,
            pool,
            generation: Generation::ZERO,
            last_request: None,
            reports: TaskReportSink {
                sender,
                counters: Arc::new(TaskCounters::default()),
            },
            report_receiver,
            dispatched: 0,
            skipped_stale: 0,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<TileStore> {
        &self.store
    }

    pub fn current_generation(&self) -> Generation {
        self.generation
    }

    pub fn last_request(&self) -> Option<ViewRequest> {
        self.last_request
    }

    pub fn on_view_changed(
        &mut self,
        camera: Camera,
        iteration_budget: u32,
    ) -> Result<ViewRequest, SchedulerError> {
        let camera = Camera::new(camera.center_x(), camera.center_y(), camera.scale())?;
        let (motion_x, motion_y) = match self.last_request {
            Some(previous) => (
                camera.center_x() - previous.camera.center_x(),
                camera.center_y() - previous.camera.center_y(),
            ),
            None => (0.0, 0.0),
        };
        self.generation = self.generation.next();
        let request = ViewRequest {
            camera,
            iteration_budget,
            generation: self.generation,
        };
        self.last_request = Some(request);
        let order = work_queue::order(self.layout.columns(), self.layout.rows(), motion_x, motion_y);
        tracing::debug!(
            target: "tilescope.view",
            generation = request.generation.0,
            center_x = camera.center_x(),
            center_y = camera.center_y(),
            scale = camera.scale(),
            iteration_budget,
            tiles = order.len(),
            "view_changed"
        );

        match self.config.dispatch_mode {
            DispatchMode::Streaming => self.queue.schedule(request, &order),
            DispatchMode::Synchronous => self.run_synchronous(request, &order),
        }
        Ok(request)
    }

    /// Move pending items into the pool while it has capacity. Never blocks.
    pub fn dispatch_pending(&mut self) -> Result<DispatchSummary, SchedulerError> {
        let mut summary = DispatchSummary::default();
        while self.pool.has_capacity() {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            let generations = self.store.generations(item.tile_index)?;
            if item.generation() < generations.highest_requested {
                summary.skipped_stale += 1;
                tracing::trace!(
                    target: "tilescope.dispatch",
                    tile_index = item.tile_index,
                    generation = item.generation().0,
                    highest_requested = generations.highest_requested.0,
                    "skipped_stale_item"
                );
                continue;
            }
            let job = self.tile_job(item);
            match self.pool.try_dispatch(job) {
                Ok(()) => summary.dispatched += 1,
                Err(error) => {
                    if matches!(error, DispatchError::SpawnFailed(_)) {
                        tracing::warn!(
                            target: "tilescope.dispatch",
                            tile_index = item.tile_index,
                            generation = item.generation().0,
                            "dispatch_deferred_after_spawn_failure"
                        );
                    }
                    self.queue.requeue_front(item);
                    break;
                }
            }
        }
        summary.deferred = self.queue.len();
        self.dispatched += summary.dispatched as u64;
        self.skipped_stale += summary.skipped_stale as u64;
        Ok(summary)
    }

    pub fn promote_committed_results(&mut self) -> Result<TileDirtyBitset, SchedulerError> {
        let mut dirty = TileDirtyBitset::for_layout(&self.layout);
        for tile_index in 0..self.layout.tile_count() {
            if let Some(layers) = self.store.take_display_update(tile_index)? {
                self.display.replace(tile_index, layers);
                dirty.set(tile_index)?;
            }
        }
        if !dirty.is_empty() {
            tracing::debug!(
                target: "tilescope.display",
                promoted = dirty.dirty_count(),
                "promoted_committed_results"
            );
        }
        Ok(dirty)
    }

    /// Staged layers of one tile placed under `camera`, oldest first.
    pub fn displayable_layers(
        &self,
        tile_index: usize,
        camera: &Camera,
    ) -> Result<DisplayLayers, SchedulerError> {
        Ok(self.display.layers(&self.layout, tile_index, camera)?)
    }

    pub fn for_each_displayable_layer(
        &self,
        camera: &Camera,
        mut visit: impl FnMut(usize, &DisplayLayer),
    ) -> Result<(), SchedulerError> {
        for tile_index in 0..self.layout.tile_count() {
            for layer in self.displayable_layers(tile_index, camera)? {
                visit(tile_index, &layer);
            }
        }
        Ok(())
    }

    pub fn drain_task_reports(&self) -> Vec<TaskReport> {
        self.report_receiver.try_iter().collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.reports.counters;
        SchedulerStats {
            generation: self.generation,
            pending: self.queue.len(),
            running: self.pool.running(),
            spawned_workers: self.pool.spawned_workers(),
            dispatched: self.dispatched,
            skipped_stale: self.skipped_stale,
            committed: counters.committed.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            panicked_jobs: self.pool.panicked_jobs(),
        }
    }

    pub fn wait_until_idle(&mut self, timeout: Duration) -> Result<bool, SchedulerError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.dispatch_pending()?;
            if self.queue.is_empty() && self.pool.running() == 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(IDLE_SLEEP_DURATION);
        }
    }

    pub fn snapshot_rgba8(&self) -> Result<Vec<u8>, SchedulerError> {
        Ok(self.display.export_rgba8(&self.layout)?)
    }

    fn tile_job(&self, item: WorkItem) -> impl FnOnce() + Send + use<S> {
        let store = Arc::clone(&self.store);
        let source = Arc::clone(&self.source);
        let reports = self.reports.clone();
        move || execute_tile_task(&store, source.as_ref(), item, &reports)
    }

    fn run_synchronous(&mut self, request: ViewRequest, order: &[usize]) {
        let jobs = order
            .iter()
            .map(|&tile_index| self.tile_job(WorkItem { tile_index, request }))
            .collect::<Vec<_>>();
        let report = self.pool.run_batch(jobs);
        self.dispatched += order.len() as u64;
        tracing::debug!(
            target: "tilescope.dispatch",
            generation = request.generation.0,
            completed = report.completed,
            panicked = report.panicked,
            ran_inline = report.ran_inline,
            "synchronous_batch_finished"
        );
    }
}

#[cfg(test)]
mod tests;
