use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use smallvec::SmallVec;
use view::{Generation, ScreenRect, ViewRequest, WorldRect};

use crate::{DEFAULT_STAGING_DEPTH, Rgba8, TileLayout, TileStoreError};

#[derive(Debug, Clone)]
pub struct TileLayer {
    pixels: Arc<[Rgba8]>,
    source_view: ViewRequest,
}

impl TileLayer {
    pub fn new(pixels: Arc<[Rgba8]>, source_view: ViewRequest) -> Self {
        Self {
            pixels,
            source_view,
        }
    }

    pub fn pixels(&self) -> &Arc<[Rgba8]> {
        &self.pixels
    }

    pub fn source_view(&self) -> &ViewRequest {
        &self.source_view
    }

    pub fn generation(&self) -> Generation {
        self.source_view.generation
    }

    /// Where this layer lands on screen under `live_camera`.
    ///
    /// The tile's fixed pixel rectangle is mapped to world space with the
    /// layer's own source view, then back to screen space with the live one.
    pub fn placement(
        &self,
        layout: &TileLayout,
        tile_index: usize,
        live_camera: &view::Camera,
    ) -> Result<ScreenRect, TileStoreError> {
        let (origin_x, origin_y) = layout.tile_pixel_origin(tile_index)?;
        let world = WorldRect::from_pixel_rect(
            &self.source_view.camera,
            layout.viewport(),
            origin_x,
            origin_y,
            layout.tile_width(),
            layout.tile_height(),
        );
        Ok(world.project(live_camera, layout.viewport()))
    }
}

/// Staged history of one tile, oldest first.
pub type StagedLayers = SmallVec<[TileLayer; DEFAULT_STAGING_DEPTH]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGenerations {
    pub highest_requested: Generation,
    pub committed: Generation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    Rejected { committed: Generation },
}

#[derive(Debug)]
struct TileSlot {
    highest_requested: Generation,
    committed: Generation,
    // Newest at the back; the back entry is the tile's current result.
    layers: VecDeque<TileLayer>,
    display_dirty: bool,
}

#[derive(Debug)]
pub struct TileStore {
    layout: TileLayout,
    staging_depth: usize,
    slots: Box<[Mutex<TileSlot>]>,
}

impl TileStore {
    pub fn new(layout: TileLayout, staging_depth: usize) -> Result<Self, TileStoreError> {
        if staging_depth == 0 {
            return Err(TileStoreError::StagingDepthZero);
        }
        let slots = (0..layout.tile_count())
            .map(|_| {
                Mutex::new(TileSlot {
                    highest_requested: Generation::ZERO,
                    committed: Generation::ZERO,
                    layers: VecDeque::with_capacity(staging_depth + 1),
                    display_dirty: false,
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            layout,
            staging_depth,
            slots,
        })
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    pub fn staging_depth(&self) -> usize {
        self.staging_depth
    }

    pub fn tile_count(&self) -> usize {
        self.slots.len()
    }

    pub fn record_intent(
        &self,
        tile_index: usize,
        generation: Generation,
    ) -> Result<Generation, TileStoreError> {
        let mut slot = self.lock_slot(tile_index)?;
        slot.highest_requested = slot.highest_requested.max(generation);
        Ok(slot.highest_requested)
    }

    /// Compare-and-commit: accepted iff `source_view.generation >= committed`.
    pub fn commit(
        &self,
        tile_index: usize,
        pixels: Arc<[Rgba8]>,
        source_view: ViewRequest,
    ) -> Result<CommitOutcome, TileStoreError> {
        if pixels.len() != self.layout.pixels_per_tile() {
            return Err(TileStoreError::TileLengthMismatch { index: tile_index });
        }
        let generation = source_view.generation;
        let mut slot = self.lock_slot(tile_index)?;
        if generation < slot.committed {
            let committed = slot.committed;
            drop(slot);
            tracing::trace!(
                target: "tiles.commit",
                tile_index,
                generation = generation.0,
                committed = committed.0,
                "commit_rejected"
            );
            return Ok(CommitOutcome::Rejected { committed });
        }

        slot.layers.push_back(TileLayer::new(pixels, source_view));
        while slot.layers.len() > self.staging_depth {
            slot.layers.pop_front();
        }
        slot.committed = generation;
        slot.highest_requested = slot.highest_requested.max(generation);
        slot.display_dirty = true;
        Ok(CommitOutcome::Committed)
    }

    pub fn generations(&self, tile_index: usize) -> Result<TileGenerations, TileStoreError> {
        let slot = self.lock_slot(tile_index)?;
        Ok(TileGenerations {
            highest_requested: slot.highest_requested,
            committed: slot.committed,
        })
    }

    pub fn current_layer(&self, tile_index: usize) -> Result<Option<TileLayer>, TileStoreError> {
        let slot = self.lock_slot(tile_index)?;
        Ok(slot.layers.back().cloned())
    }

    pub fn staged_layers(&self, tile_index: usize) -> Result<StagedLayers, TileStoreError> {
        let slot = self.lock_slot(tile_index)?;
        Ok(slot.layers.iter().cloned().collect())
    }

    pub fn take_display_update(
        &self,
        tile_index: usize,
    ) -> Result<Option<StagedLayers>, TileStoreError> {
        let mut slot = self.lock_slot(tile_index)?;
        if !slot.display_dirty {
            return Ok(None);
        }
        slot.display_dirty = false;
        Ok(Some(slot.layers.iter().cloned().collect()))
    }

    fn lock_slot(&self, tile_index: usize) -> Result<MutexGuard<'_, TileSlot>, TileStoreError> {
        let slot = self
            .slots
            .get(tile_index)
            .ok_or(TileStoreError::TileIndexOutOfBounds {
                index: tile_index,
                tile_count: self.slots.len(),
            })?;
        // Slot updates never panic midway, so a poisoned lock still holds a consistent slot.
        Ok(slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}
