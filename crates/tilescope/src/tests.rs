use std::sync::atomic::AtomicBool;
use std::thread::Builder;

use tiles::Rgba8;

use super::*;

const WAIT: Duration = Duration::from_secs(10);

fn budget_marker(_x: f64, _y: f64, budget: u32) -> Rgba8 {
    Rgba8::opaque(budget as u8, 7, 9)
}

fn small_config(dispatch_mode: DispatchMode) -> SchedulerConfig {
    SchedulerConfig {
        viewport: Viewport::new(24, 18).expect("viewport"),
        columns: 4,
        rows: 3,
        max_workers: 3,
        dispatch_mode,
        ..SchedulerConfig::default()
    }
}

fn camera(center_x: f64, center_y: f64, scale: f64) -> Camera {
    Camera::new(center_x, center_y, scale).expect("camera")
}

#[test]
fn invalid_configs_are_rejected() {
    let zero_depth = SchedulerConfig {
        staging_depth: 0,
        ..small_config(DispatchMode::Streaming)
    };
    assert!(matches!(
        TileScheduler::new(zero_depth, budget_marker),
        Err(SchedulerError::Tiles(TileStoreError::StagingDepthZero))
    ));

    let zero_workers = SchedulerConfig {
        max_workers: 0,
        ..small_config(DispatchMode::Streaming)
    };
    assert!(matches!(
        TileScheduler::new(zero_workers, budget_marker),
        Err(SchedulerError::Pool(WorkerPoolError::ZeroWorkers))
    ));

    let empty_viewport = SchedulerConfig {
        viewport: Viewport {
            width: 0,
            height: 10,
        },
        ..small_config(DispatchMode::Streaming)
    };
    assert!(matches!(
        TileScheduler::new(empty_viewport, budget_marker),
        Err(SchedulerError::View(ViewError::InvalidViewport))
    ));
}

#[test]
fn generations_start_at_one_and_increase() {
    let mut scheduler =
        TileScheduler::new(small_config(DispatchMode::Streaming), budget_marker).expect("scheduler");
    assert_eq!(scheduler.current_generation(), Generation::ZERO);
    let first = scheduler
        .on_view_changed(camera(0.0, 0.0, 10.0), 50)
        .expect("first view");
    let second = scheduler
        .on_view_changed(camera(1.0, 0.0, 10.0), 50)
        .expect("second view");
    assert_eq!(first.generation, Generation(1));
    assert_eq!(second.generation, Generation(2));
    assert_eq!(scheduler.last_request(), Some(second));
    // Dedup keeps one pending item per tile.
    assert_eq!(scheduler.stats().pending, scheduler.layout().tile_count());
}

#[test]
fn streaming_scheduler_converges_to_the_last_generation() {
    let mut scheduler =
        TileScheduler::new(small_config(DispatchMode::Streaming), budget_marker).expect("scheduler");
    scheduler
        .on_view_changed(camera(0.0, 0.0, 10.0), 10)
        .expect("view 1");
    scheduler.dispatch_pending().expect("dispatch 1");
    scheduler
        .on_view_changed(camera(0.5, -0.25, 10.0), 20)
        .expect("view 2");
    scheduler.dispatch_pending().expect("dispatch 2");
    let last = scheduler
        .on_view_changed(camera(0.5, -0.25, 40.0), 30)
        .expect("view 3");
    assert!(scheduler.wait_until_idle(WAIT).expect("wait"));

    for tile_index in 0..scheduler.layout().tile_count() {
        let generations = scheduler
            .store()
            .generations(tile_index)
            .expect("generations");
        assert_eq!(generations.committed, last.generation);
        assert!(generations.committed <= generations.highest_requested);
    }

    let dirty = scheduler.promote_committed_results().expect("promote");
    assert!(dirty.is_full());
    let newest_camera = last.camera;
    scheduler
        .for_each_displayable_layer(&newest_camera, |_tile_index, layer| {
            assert!(layer.generation <= last.generation);
            if layer.age == 0 {
                assert_eq!(layer.generation, last.generation);
                assert_eq!(layer.pixels[0], Rgba8::opaque(30, 7, 9));
            }
        })
        .expect("visit layers");
    assert_eq!(scheduler.stats().failed, 0);
}

#[test]
fn dispatch_skips_items_older_than_the_tile_intent() {
    let mut scheduler =
        TileScheduler::new(small_config(DispatchMode::Streaming), budget_marker).expect("scheduler");
    scheduler
        .store()
        .record_intent(0, Generation(10))
        .expect("intent");
    scheduler
        .on_view_changed(camera(0.0, 0.0, 10.0), 10)
        .expect("view");
    assert!(scheduler.wait_until_idle(WAIT).expect("wait"));

    let stats = scheduler.stats();
    assert_eq!(stats.skipped_stale, 1);
    assert_eq!(stats.dispatched, (scheduler.layout().tile_count() - 1) as u64);
    assert_eq!(
        scheduler.store().generations(0).expect("generations").committed,
        Generation::ZERO
    );
    assert_eq!(
        scheduler.store().generations(1).expect("generations").committed,
        Generation(1)
    );
}

#[test]
fn busy_pool_leaves_items_queued() {
    let released = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&released);
    let source = move |_x: f64, _y: f64, _budget: u32| {
        while !gate.load(Ordering::Acquire) {
            std::thread::sleep(IDLE_SLEEP_DURATION);
        }
        Rgba8::BLACK
    };
    let config = SchedulerConfig {
        viewport: Viewport::new(4, 2).expect("viewport"),
        columns: 2,
        rows: 1,
        max_workers: 1,
        ..SchedulerConfig::default()
    };
    let mut scheduler = TileScheduler::new(config, source).expect("scheduler");
    scheduler
        .on_view_changed(camera(0.0, 0.0, 1.0), 1)
        .expect("view");

    let summary = scheduler.dispatch_pending().expect("dispatch");
    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.deferred, 1);
    assert_eq!(scheduler.stats().pending, 1);

    let summary = scheduler.dispatch_pending().expect("dispatch while busy");
    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.deferred, 1);

    released.store(true, Ordering::Release);
    assert!(scheduler.wait_until_idle(WAIT).expect("wait"));
    assert_eq!(scheduler.stats().committed, 2);
}

#[test]
fn failed_worker_spawn_keeps_the_item_at_the_head() {
    let refuse_spawn = Arc::new(AtomicBool::new(true));
    let refuse = Arc::clone(&refuse_spawn);
    let pool = WorkerPool::with_spawner(
        WorkerPoolConfig {
            max_workers: 2,
            thread_name: "tile_worker".to_owned(),
        },
        Box::new(move |builder: Builder, body: Box<dyn FnOnce() + Send + 'static>| {
            if refuse.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("thread limit reached"));
            }
            builder.spawn(body)
        }),
    )
    .expect("worker pool");
    let mut scheduler = TileScheduler::with_pool(
        small_config(DispatchMode::Streaming),
        Arc::new(budget_marker),
        pool,
    )
    .expect("scheduler");
    assert_eq!(scheduler.config().max_workers, 2);
    scheduler
        .on_view_changed(camera(0.0, 0.0, 10.0), 12)
        .expect("view");
    let tile_count = scheduler.layout().tile_count();
    let head = scheduler.queue.iter().next().copied().expect("queued head");

    let summary = scheduler.dispatch_pending().expect("dispatch");
    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.deferred, tile_count);
    let stats = scheduler.stats();
    assert_eq!(stats.pending, tile_count);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.spawned_workers, 0);
    assert_eq!(scheduler.queue.iter().next().copied(), Some(head));
    assert_eq!(
        scheduler
            .store()
            .generations(head.tile_index)
            .expect("generations")
            .highest_requested,
        Generation::ZERO
    );

    refuse_spawn.store(false, Ordering::SeqCst);
    assert!(scheduler.wait_until_idle(WAIT).expect("wait"));
    assert_eq!(scheduler.stats().committed, tile_count as u64);
}

#[test]
fn synchronous_mode_commits_every_tile_before_returning() {
    let mut scheduler =
        TileScheduler::new(small_config(DispatchMode::Synchronous), budget_marker)
            .expect("scheduler");
    let request = scheduler
        .on_view_changed(camera(0.0, 0.0, 10.0), 42)
        .expect("view");

    let stats = scheduler.stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.running, 0);
    assert_eq!(stats.committed, scheduler.layout().tile_count() as u64);

    let reports = scheduler.drain_task_reports();
    assert_eq!(reports.len(), scheduler.layout().tile_count());
    assert!(reports.iter().all(|report| {
        report.generation == request.generation && report.outcome == TaskOutcome::Committed
    }));
    assert!(scheduler.drain_task_reports().is_empty());

    assert!(scheduler.promote_committed_results().expect("promote").is_full());
    assert!(scheduler.promote_committed_results().expect("promote again").is_empty());
}

#[test]
fn stale_layers_are_reprojected_under_the_live_camera() {
    let mut scheduler =
        TileScheduler::new(small_config(DispatchMode::Synchronous), budget_marker)
            .expect("scheduler");
    let first = scheduler
        .on_view_changed(camera(0.0, 0.0, 2.0), 1)
        .expect("first view");
    let second = scheduler
        .on_view_changed(camera(0.0, 0.0, 4.0), 2)
        .expect("second view");
    scheduler.promote_committed_results().expect("promote");

    // Tile 0 covers screen pixels (0, 0)..(6, 6) of a 24x18 viewport.
    let layers = scheduler
        .displayable_layers(0, &second.camera)
        .expect("layers");
    assert_eq!(layers.len(), 2);
    assert_eq!(layers[0].generation, first.generation);
    assert_eq!(layers[0].age, 1);
    assert_eq!(layers[1].generation, second.generation);
    assert_eq!(layers[1].age, 0);

    let newest = layers[1].placement;
    assert!(newest.x.abs() < 1e-4 && newest.y.abs() < 1e-4);
    assert!((newest.width - 6.0).abs() < 1e-4);

    // Computed at half the live zoom, so it covers twice the area around the center.
    let stale = layers[0].placement;
    assert!((stale.x + 12.0).abs() < 1e-4);
    assert!((stale.y + 9.0).abs() < 1e-4);
    assert!((stale.width - 12.0).abs() < 1e-4);
    assert!((stale.height - 12.0).abs() < 1e-4);

    assert!(matches!(
        scheduler.displayable_layers(99, &second.camera),
        Err(SchedulerError::Tiles(TileStoreError::TileIndexOutOfBounds { index: 99, .. }))
    ));
}

#[test]
fn staged_history_is_capped_at_configured_depth() {
    let config = SchedulerConfig {
        staging_depth: 2,
        ..small_config(DispatchMode::Synchronous)
    };
    let mut scheduler = TileScheduler::new(config, budget_marker).expect("scheduler");
    for budget in 1..=3 {
        scheduler
            .on_view_changed(camera(0.0, 0.0, 10.0), budget)
            .expect("view");
    }
    scheduler.promote_committed_results().expect("promote");
    let layers = scheduler
        .displayable_layers(5, &camera(0.0, 0.0, 10.0))
        .expect("layers");
    let generations = layers.iter().map(|layer| layer.generation).collect::<Vec<_>>();
    assert_eq!(generations, vec![Generation(2), Generation(3)]);
}

#[test]
fn snapshot_exports_promoted_pixels() {
    let mut scheduler =
        TileScheduler::new(small_config(DispatchMode::Synchronous), budget_marker)
            .expect("scheduler");
    let empty = scheduler.snapshot_rgba8().expect("empty snapshot");
    assert!(empty.iter().all(|&byte| byte == 0));

    scheduler
        .on_view_changed(camera(0.0, 0.0, 10.0), 77)
        .expect("view");
    // Not promoted yet: the snapshot still shows the previous frame.
    assert!(scheduler.snapshot_rgba8().expect("snapshot").iter().all(|&byte| byte == 0));

    scheduler.promote_committed_results().expect("promote");
    let frame = scheduler.snapshot_rgba8().expect("snapshot");
    assert_eq!(frame.len(), 24 * 18 * 4);
    assert!(frame.chunks_exact(4).all(|pixel| pixel == [77, 7, 9, 255]));
}
