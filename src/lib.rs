//! rastertile: tile-wise raster compute for image display and analysis
//!
//! Each operator turns a source raster (or several) into an output tile on
//! demand: RGB compositing, bitmask overlays, valid-pixel and ROI masks, and
//! polynomial rectification. Tiles are computed independently, so a
//! [`TiledImage`] can fill its cache in parallel.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{DataBuffer, Mask, RasterError, RasterResult, Rect, SampleLayout, SampleType, Tile};

pub use crate::core::{
    BitmaskLayer, BitmaskOverlayOperator, Color, ImageLayout, MaskEvaluator, RasterImage, RectificationGrid,
    RectificationWarp, RectifyOperator, RgbCompositeOperator, RoiDefinition, RoiMaskOperator, TileOperator,
    TileSizePolicy, TiledImage, ValidityMaskOperator,
};
pub use io::{ArrayRaster, ExpressionEvaluator, MemoryTileCache, PredicateEvaluator, TileCache};
