//! Tile operators and the tiling model they run on

pub mod tile_accessor;
pub mod tile_layout;
pub mod operator;
pub mod rgb_composite;
pub mod bitmask_overlay;
pub mod valid_mask;
pub mod roi_mask;
pub mod rectification;

// Re-export main types
pub use tile_accessor::{ByteAccessor, ByteAccessorMut};
pub use tile_layout::{ImageLayout, TileSizePolicy};
pub use operator::{RasterImage, TileOperator, TiledImage};
pub use rgb_composite::{composite_rgb, rgb_sample_layout, RgbCompositeOperator};
pub use bitmask_overlay::{alpha_weight, blend_layer, blend_sample, BitmaskLayer, BitmaskOverlayOperator, Color};
pub use valid_mask::ValidityMaskOperator;
pub use roi_mask::{MaskEvaluator, RoiDefinition, RoiMaskOperator};
pub use rectification::{
    LeastSquaresFitter, PolynomialWarp, RectificationGrid, RectificationWarp, RectifyOperator, WarpFitter,
};
