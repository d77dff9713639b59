use std::sync::Arc;

use view::ViewRequest;

use crate::{
    CommitOutcome, PixelSource, Rgba8, TileComputeError, TileLayout, TileStore, TileTaskError,
};

pub(crate) fn allocate_tile_buffer(pixels: usize) -> Result<Vec<Rgba8>, TileComputeError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(pixels)
        .map_err(|_| TileComputeError::AllocationFailed { pixels })?;
    Ok(buffer)
}

pub fn render_tile<S>(
    layout: &TileLayout,
    tile_index: usize,
    request: &ViewRequest,
    source: &S,
) -> Result<Arc<[Rgba8]>, TileTaskError>
where
    S: PixelSource + ?Sized,
{
    let (origin_x, origin_y) = layout.tile_pixel_origin(tile_index)?;
    let mut pixels = allocate_tile_buffer(layout.pixels_per_tile())?;
    let viewport = layout.viewport();
    let camera = request.camera;
    for y in 0..layout.tile_height() {
        let screen_y = f64::from(origin_y + y);
        for x in 0..layout.tile_width() {
            let screen_x = f64::from(origin_x + x);
            let (world_x, world_y) = camera.screen_to_world(viewport, screen_x, screen_y);
            pixels.push(source.color_at(world_x, world_y, request.iteration_budget));
        }
    }
    Ok(pixels.into())
}

/// Record intent, compute, then try to commit one tile.
///
/// A compute failure returns before the commit step, leaving the tile's
/// committed state as it was.
pub fn run_tile_task<S>(
    store: &TileStore,
    tile_index: usize,
    request: &ViewRequest,
    source: &S,
) -> Result<CommitOutcome, TileTaskError>
where
    S: PixelSource + ?Sized,
{
    store.record_intent(tile_index, request.generation)?;
    let pixels = render_tile(store.layout(), tile_index, request, source)?;
    Ok(store.commit(tile_index, pixels, *request)?)
}
