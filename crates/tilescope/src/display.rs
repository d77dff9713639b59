use std::sync::Arc;

use smallvec::SmallVec;
use tiles::{Rgba8, StagedLayers, TileLayout, TileStoreError};
use view::{Camera, Generation, ScreenRect};

#[derive(Debug, Clone)]
pub struct DisplayLayer {
    pub pixels: Arc<[Rgba8]>,
    pub placement: ScreenRect,
    pub generation: Generation,
    /// 0 for the newest layer.
    pub age: usize,
}

pub type DisplayLayers = SmallVec<[DisplayLayer; tiles::DEFAULT_STAGING_DEPTH]>;

#[derive(Debug)]
pub(crate) struct DisplaySnapshot {
    tiles: Vec<StagedLayers>,
}

impl DisplaySnapshot {
    pub(crate) fn new(tile_count: usize) -> Self {
        Self {
            tiles: vec![StagedLayers::new(); tile_count],
        }
    }

    pub(crate) fn replace(&mut self, tile_index: usize, layers: StagedLayers) {
        if let Some(slot) = self.tiles.get_mut(tile_index) {
            *slot = layers;
        }
    }

    pub(crate) fn layers(
        &self,
        layout: &TileLayout,
        tile_index: usize,
        camera: &Camera,
    ) -> Result<DisplayLayers, TileStoreError> {
        let staged = self
            .tiles
            .get(tile_index)
            .ok_or(TileStoreError::TileIndexOutOfBounds {
                index: tile_index,
                tile_count: self.tiles.len(),
            })?;
        let newest = staged.len().saturating_sub(1);
        staged
            .iter()
            .enumerate()
            .map(|(position, layer)| {
                Ok(DisplayLayer {
                    pixels: Arc::clone(layer.pixels()),
                    placement: layer.placement(layout, tile_index, camera)?,
                    generation: layer.generation(),
                    age: newest - position,
                })
            })
            .collect()
    }

    pub(crate) fn export_rgba8(&self, layout: &TileLayout) -> Result<Vec<u8>, TileStoreError> {
        tiles::export_rgba8(layout, |tile_index| {
            self.tiles
                .get(tile_index)
                .and_then(|layers| layers.last())
                .map(|layer| Arc::clone(layer.pixels()))
        })
    }
}
