//! Tile operators and the cache-backed images built on them.
//!
//! Every tile is a pure function of the operator parameters and the source
//! tiles covering the same rectangle, so tiles can be computed in any order
//! and on any thread. Two threads asking for the same uncached tile may both
//! compute it; the cache only ever receives complete tiles.

use std::sync::Arc;

use crate::core::tile_layout::ImageLayout;
use crate::io::tile_cache::{TileCache, TileKey};
use crate::types::{RasterError, RasterResult, Rect, Tile};

/// Raster whose samples can be read by rectangle
pub trait RasterImage: Send + Sync {
    fn layout(&self) -> &ImageLayout;

    /// Samples of `rect`, which must lie inside the image bounds
    fn get_data(&self, rect: Rect) -> RasterResult<Tile>;
}

/// Producer of derived tiles
pub trait TileOperator: Send + Sync {
    fn layout(&self) -> &ImageLayout;

    /// Compute a fully populated tile covering `rect`
    fn compute_tile(&self, rect: Rect) -> RasterResult<Tile>;
}

/// An operator bound to a tile cache under a raster identity
pub struct TiledImage<O: TileOperator> {
    raster_id: Arc<str>,
    operator: O,
    cache: Arc<dyn TileCache>,
}

impl<O: TileOperator> TiledImage<O> {
    pub fn new(raster_id: &str, operator: O, cache: Arc<dyn TileCache>) -> Self {
        Self {
            raster_id: Arc::from(raster_id),
            operator,
            cache,
        }
    }

    pub fn raster_id(&self) -> &str {
        &self.raster_id
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    /// Replace the operator; cached tiles of this raster are discarded
    pub fn set_operator(&mut self, operator: O) {
        self.operator = operator;
        self.invalidate();
    }

    /// Discard every cached tile of this raster
    pub fn invalidate(&self) {
        log::debug!("Invalidating cached tiles of '{}'", self.raster_id);
        self.cache.remove_raster(&self.raster_id);
    }

    fn key(&self, tile_x: usize, tile_y: usize) -> TileKey {
        TileKey {
            raster_id: Arc::clone(&self.raster_id),
            tile_x,
            tile_y,
        }
    }

    /// Tile (tx, ty) from the cache, computing and storing it on a miss
    pub fn tile(&self, tile_x: usize, tile_y: usize) -> RasterResult<Arc<Tile>> {
        let key = self.key(tile_x, tile_y);
        if let Some(tile) = self.cache.get(&key) {
            return Ok(tile);
        }
        let rect = self.operator.layout().tile_rect(tile_x, tile_y)?;
        let tile = Arc::new(self.operator.compute_tile(rect)?);
        self.cache.put(key, Arc::clone(&tile));
        Ok(tile)
    }

    /// Compute every tile of the raster in row-major order
    pub fn compute_all_tiles(&self) -> RasterResult<usize> {
        let indices = self.operator.layout().tile_indices();
        log::info!("Computing {} tiles of '{}'", indices.len(), self.raster_id);
        for &(tx, ty) in &indices {
            self.tile(tx, ty)?;
        }
        Ok(indices.len())
    }

    /// Compute every tile of the raster on the rayon thread pool
    #[cfg(feature = "parallel")]
    pub fn compute_all_tiles_parallel(&self) -> RasterResult<usize> {
        use rayon::prelude::*;

        let indices = self.operator.layout().tile_indices();
        log::info!(
            "Computing {} tiles of '{}' on {} threads",
            indices.len(),
            self.raster_id,
            rayon::current_num_threads()
        );
        indices
            .par_iter()
            .map(|&(tx, ty)| self.tile(tx, ty).map(|_| ()))
            .collect::<RasterResult<Vec<()>>>()?;
        Ok(indices.len())
    }
}

impl<O: TileOperator> RasterImage for TiledImage<O> {
    fn layout(&self) -> &ImageLayout {
        self.operator.layout()
    }

    /// Tile-aligned requests are served from the cache, others are computed directly
    fn get_data(&self, rect: Rect) -> RasterResult<Tile> {
        let layout = self.operator.layout();
        if !layout.bounds().contains_rect(&rect) {
            return Err(RasterError::InvalidLayout(format!(
                "Rectangle {} outside image bounds {}",
                rect,
                layout.bounds()
            )));
        }
        let tx = rect.x as usize / layout.tile_width();
        let ty = rect.y as usize / layout.tile_height();
        if layout.tile_rect(tx, ty)? == rect {
            return Ok(self.tile(tx, ty)?.as_ref().clone());
        }
        self.operator.compute_tile(rect)
    }
}

/// Check that `rect` lies inside the operator's bounds
pub(crate) fn check_bounds(layout: &ImageLayout, rect: Rect) -> RasterResult<()> {
    if rect.is_empty() || !layout.bounds().contains_rect(&rect) {
        return Err(RasterError::InvalidLayout(format!(
            "Tile rectangle {} outside image bounds {}",
            rect,
            layout.bounds()
        )));
    }
    Ok(())
}
