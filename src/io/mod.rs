//! Boundary contracts with external collaborators and in-memory implementations

pub mod expression;
pub mod raster_source;
pub mod shape;
pub mod tile_cache;

pub use expression::{BooleanTerm, ExpressionEvaluator, PredicateEvaluator};
pub use raster_source::{ArrayRaster, RasterDataSource, Sample};
pub use shape::{Pin, ScanlineRasterizer, Shape, ShapeRasterizer};
pub use tile_cache::{CacheStats, DiagnosticTileCache, MemoryTileCache, TileCache, TileCacheConfig, TileKey};
