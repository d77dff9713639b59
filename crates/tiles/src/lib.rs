use std::fmt;

use bitvec::prelude::{BitVec, Lsb0};
use bytemuck::{Pod, Zeroable};
use static_assertions::{assert_eq_size, const_assert};
use view::Viewport;

pub const DEFAULT_COLUMNS: u32 = 16;
pub const DEFAULT_ROWS: u32 = 9;
pub const DEFAULT_STAGING_DEPTH: usize = 3;

const_assert!(DEFAULT_STAGING_DEPTH >= 1);
const_assert!(DEFAULT_COLUMNS > 0 && DEFAULT_ROWS > 0);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

assert_eq_size!(Rgba8, [u8; 4]);

impl Rgba8 {
    pub const TRANSPARENT: Rgba8 = Rgba8::new(0, 0, 0, 0);
    pub const BLACK: Rgba8 = Rgba8::new(0, 0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }
}

/// Per-pixel coloring strategy.
///
/// Implementations must be pure: identical inputs yield identical colors, and
/// numerical trouble maps to a sentinel color instead of panicking.
pub trait PixelSource: Send + Sync {
    fn color_at(&self, world_x: f64, world_y: f64, iteration_budget: u32) -> Rgba8;
}

impl<F> PixelSource for F
where
    F: Fn(f64, f64, u32) -> Rgba8 + Send + Sync,
{
    fn color_at(&self, world_x: f64, world_y: f64, iteration_budget: u32) -> Rgba8 {
        self(world_x, world_y, iteration_budget)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStoreError {
    TileIndexOutOfBounds { index: usize, tile_count: usize },
    StagingDepthZero,
    EmptyTileGrid,
    TileGridExceedsViewport,
    PixelCountOverflow,
    TileLengthMismatch { index: usize },
}

impl fmt::Display for TileStoreError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileStoreError::TileIndexOutOfBounds { index, tile_count } => {
                write!(
                    formatter,
                    "tile index {index} is out of bounds for {tile_count} tiles"
                )
            }
            TileStoreError::StagingDepthZero => {
                write!(formatter, "tile staging depth must be at least 1")
            }
            TileStoreError::EmptyTileGrid => {
                write!(formatter, "tile grid columns/rows must be at least 1")
            }
            TileStoreError::TileGridExceedsViewport => {
                write!(
                    formatter,
                    "tile grid has more columns/rows than the viewport has pixels"
                )
            }
            TileStoreError::PixelCountOverflow => write!(formatter, "tile pixel count overflow"),
            TileStoreError::TileLengthMismatch { index } => {
                write!(formatter, "tile {index} pixel buffer length does not match layout")
            }
        }
    }
}

impl std::error::Error for TileStoreError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileComputeError {
    AllocationFailed { pixels: usize },
}

impl fmt::Display for TileComputeError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileComputeError::AllocationFailed { pixels } => {
                write!(formatter, "failed to allocate tile buffer of {pixels} pixels")
            }
        }
    }
}

impl std::error::Error for TileComputeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileTaskError {
    Store(TileStoreError),
    Compute(TileComputeError),
}

impl From<TileStoreError> for TileTaskError {
    fn from(value: TileStoreError) -> Self {
        Self::Store(value)
    }
}

impl From<TileComputeError> for TileTaskError {
    fn from(value: TileComputeError) -> Self {
        Self::Compute(value)
    }
}

impl fmt::Display for TileTaskError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileTaskError::Store(error) => write!(formatter, "tile task store error: {error}"),
            TileTaskError::Compute(error) => write!(formatter, "tile task compute error: {error}"),
        }
    }
}

impl std::error::Error for TileTaskError {}

/// Tile sizes use integer division, so a few pixels on the right/bottom edge
/// may fall outside every tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    viewport: Viewport,
    columns: u32,
    rows: u32,
    tile_width: u32,
    tile_height: u32,
}

impl TileLayout {
    pub fn new(viewport: Viewport, columns: u32, rows: u32) -> Result<Self, TileStoreError> {
        if columns == 0 || rows == 0 {
            return Err(TileStoreError::EmptyTileGrid);
        }
        let tile_width = viewport.width / columns;
        let tile_height = viewport.height / rows;
        if tile_width == 0 || tile_height == 0 {
            return Err(TileStoreError::TileGridExceedsViewport);
        }
        (tile_width as usize)
            .checked_mul(tile_height as usize)
            .and_then(|pixels| pixels.checked_mul(columns as usize))
            .and_then(|pixels| pixels.checked_mul(rows as usize))
            .and_then(|pixels| pixels.checked_mul(std::mem::size_of::<Rgba8>()))
            .ok_or(TileStoreError::PixelCountOverflow)?;
        Ok(Self {
            viewport,
            columns,
            rows,
            tile_width,
            tile_height,
        })
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub fn tile_count(&self) -> usize {
        (self.columns as usize) * (self.rows as usize)
    }

    pub fn pixels_per_tile(&self) -> usize {
        (self.tile_width as usize) * (self.tile_height as usize)
    }

    pub fn tile_coords(&self, index: usize) -> Result<(u32, u32), TileStoreError> {
        self.check_index(index)?;
        let columns = self.columns as usize;
        Ok(((index % columns) as u32, (index / columns) as u32))
    }

    pub fn tile_pixel_origin(&self, index: usize) -> Result<(u32, u32), TileStoreError> {
        let (tile_x, tile_y) = self.tile_coords(index)?;
        Ok((tile_x * self.tile_width, tile_y * self.tile_height))
    }

    pub fn frame_width(&self) -> u32 {
        self.columns * self.tile_width
    }

    pub fn frame_height(&self) -> u32 {
        self.rows * self.tile_height
    }

    pub(crate) fn check_index(&self, index: usize) -> Result<(), TileStoreError> {
        if index >= self.tile_count() {
            return Err(TileStoreError::TileIndexOutOfBounds {
                index,
                tile_count: self.tile_count(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileDirtyBitset {
    columns: u32,
    bits: BitVec<usize, Lsb0>,
    dirty_count: usize,
}

impl TileDirtyBitset {
    pub fn new(columns: u32, rows: u32) -> Self {
        let tile_count = (columns as usize) * (rows as usize);
        Self {
            columns,
            bits: BitVec::repeat(false, tile_count),
            dirty_count: 0,
        }
    }

    pub fn for_layout(layout: &TileLayout) -> Self {
        Self::new(layout.columns(), layout.rows())
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_count == 0
    }

    pub fn is_full(&self) -> bool {
        self.dirty_count == self.bits.len() && !self.bits.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty_count
    }

    pub fn contains(&self, index: usize) -> bool {
        self.bits.get(index).is_some_and(|bit| *bit)
    }

    pub fn set(&mut self, index: usize) -> Result<(), TileStoreError> {
        let tile_count = self.bits.len();
        let Some(mut slot) = self.bits.get_mut(index) else {
            return Err(TileStoreError::TileIndexOutOfBounds { index, tile_count });
        };
        if !*slot {
            *slot = true;
            self.dirty_count += 1;
        }
        Ok(())
    }

    pub fn iter_dirty_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    pub fn iter_dirty_tiles(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let columns = self.columns as usize;
        self.bits
            .iter_ones()
            .map(move |index| ((index % columns) as u32, (index / columns) as u32))
    }
}

pub fn export_rgba8<P>(
    layout: &TileLayout,
    mut load_tile: impl FnMut(usize) -> Option<P>,
) -> Result<Vec<u8>, TileStoreError>
where
    P: AsRef<[Rgba8]>,
{
    let frame_width = layout.frame_width() as usize;
    let frame_height = layout.frame_height() as usize;
    let out_len = frame_width
        .checked_mul(frame_height)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or(TileStoreError::PixelCountOverflow)?;
    let mut out = vec![0u8; out_len];
    let tile_width = layout.tile_width() as usize;
    let tile_height = layout.tile_height() as usize;

    for index in 0..layout.tile_count() {
        let Some(tile) = load_tile(index) else {
            continue;
        };
        let tile = tile.as_ref();
        if tile.len() != layout.pixels_per_tile() {
            return Err(TileStoreError::TileLengthMismatch { index });
        }
        let (origin_x, origin_y) = layout.tile_pixel_origin(index)?;
        let tile_bytes: &[u8] = bytemuck::cast_slice(tile);
        let row_bytes = tile_width * 4;
        for row in 0..tile_height {
            let dst_offset = ((origin_y as usize + row) * frame_width + origin_x as usize) * 4;
            let src = &tile_bytes[row * row_bytes..(row + 1) * row_bytes];
            out[dst_offset..dst_offset + row_bytes].copy_from_slice(src);
        }
    }

    Ok(out)
}

mod compute;
mod store;

pub use compute::{render_tile, run_tile_task};
pub use store::{CommitOutcome, StagedLayers, TileGenerations, TileLayer, TileStore};
