use std::path::PathBuf;
use std::time::Instant;

use escape_time::FractalSet;
use tilescope::{DEFAULT_ITERATION_BUDGET, DispatchMode, SchedulerConfig, TileScheduler};
use tracing_subscriber::EnvFilter;
use view::Camera;

const DEFAULT_OUTPUT_PATH: &str = "tilescope.png";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let output_path = parse_output_path();
    let config = SchedulerConfig {
        dispatch_mode: DispatchMode::Synchronous,
        ..SchedulerConfig::default()
    };
    let mut scheduler =
        TileScheduler::new(config, FractalSet::Mandelbrot).expect("create tile scheduler");

    let started = Instant::now();
    let request = scheduler
        .on_view_changed(Camera::default(), DEFAULT_ITERATION_BUDGET)
        .expect("render default view");
    scheduler
        .promote_committed_results()
        .expect("promote committed tiles");
    let frame = scheduler.snapshot_rgba8().expect("export frame");

    let layout = scheduler.layout();
    let image = image::RgbaImage::from_raw(layout.frame_width(), layout.frame_height(), frame)
        .expect("frame buffer matches layout dimensions");
    image
        .save(&output_path)
        .unwrap_or_else(|error| panic!("write {}: {error}", output_path.display()));

    let stats = scheduler.stats();
    println!(
        "[tilescope] generation={} tiles={} committed={} failed={} elapsed_ms={} output={}",
        request.generation,
        layout.tile_count(),
        stats.committed,
        stats.failed,
        started.elapsed().as_millis(),
        output_path.display(),
    );
}

fn parse_output_path() -> PathBuf {
    let mut args = std::env::args_os();
    let _program = args.next();

    let Some(first_arg) = args.next() else {
        return PathBuf::from(DEFAULT_OUTPUT_PATH);
    };
    assert!(
        args.next().is_none(),
        "too many arguments; usage: tilescope [<output.png>]"
    );
    PathBuf::from(first_arg)
}
