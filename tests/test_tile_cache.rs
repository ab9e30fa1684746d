use std::sync::Arc;

use rastertile::core::{ImageLayout, TiledImage, ValidityMaskOperator};
use rastertile::io::{DiagnosticTileCache, MemoryTileCache, PredicateEvaluator, TileCache, TileKey};
use rastertile::types::SampleType;

fn mask_operator(predicate: fn(i32, i32) -> bool) -> ValidityMaskOperator {
    let layout = ImageLayout::new(10, 6, 4, 4, 1, SampleType::Float).expect("Failed to create layout");
    let evaluator = PredicateEvaluator::new().with("valid", predicate);
    ValidityMaskOperator::new(&layout, "valid", &evaluator).expect("Failed to create operator")
}

#[test]
fn test_tiles_served_from_cache() {
    let _ = env_logger::builder().is_test(true).try_init();
    let cache = Arc::new(DiagnosticTileCache::new(MemoryTileCache::default()));
    let image = TiledImage::new("mask", mask_operator(|x, _| x % 2 == 0), cache.clone());

    assert_eq!(image.compute_all_tiles().expect("Failed to compute tiles"), 6);
    let first = cache.stats();
    assert_eq!((first.hits, first.misses, first.puts), (0, 6, 6));
    assert_eq!(cache.inner().len(), 6);

    image.compute_all_tiles().expect("Failed to compute tiles");
    let second = cache.stats();
    assert_eq!((second.hits, second.misses, second.puts), (6, 6, 6));
    assert!((second.hit_ratio() - 0.5).abs() < 1e-12);
    println!("Cache stats after two passes: {:?}", second);
}

#[test]
fn test_set_operator_invalidates_only_its_raster() {
    let cache = Arc::new(MemoryTileCache::default());
    let mut left = TiledImage::new("left", mask_operator(|_, _| true), cache.clone());
    let right = TiledImage::new("right", mask_operator(|_, _| false), cache.clone());
    left.compute_all_tiles().expect("Failed to compute tiles");
    right.compute_all_tiles().expect("Failed to compute tiles");
    assert_eq!(cache.len(), 12);

    left.set_operator(mask_operator(|_, _| false));
    assert_eq!(cache.len(), 6);

    let tile = left.tile(0, 0).expect("Failed to get tile");
    assert_eq!(tile.band_bytes(0).expect("mask band"), vec![0; 16]);
    assert_eq!(cache.len(), 7);
}

#[test]
fn test_byte_budget_evicts_least_recent() {
    // full 4x4 byte tiles take 16 bytes, the clipped bottom row 8
    let cache = Arc::new(MemoryTileCache::with_capacity(32));
    let shared: Arc<dyn TileCache> = cache.clone();
    let image = TiledImage::new("mask", mask_operator(|_, _| true), shared);

    image.tile(0, 0).expect("Failed to get tile");
    image.tile(1, 0).expect("Failed to get tile");
    image.tile(0, 0).expect("Failed to get tile");
    image.tile(0, 1).expect("Failed to get tile");

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.current_bytes(), 24);
    assert!(cache.get(&TileKey::new("mask", 1, 0)).is_none());
    assert!(cache.get(&TileKey::new("mask", 0, 0)).is_some());

    cache.clear();
    assert!(cache.is_empty());
}
