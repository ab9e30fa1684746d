//! Region-of-interest masks combined from up to four independent sources.
//!
//! Sources are visited in a fixed order: expression, value range, pins,
//! shape. The first enabled source seeds the mask; every later one is merged
//! into it with a single OR/AND mode. Inversion is applied last and only when
//! at least one source contributed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::operator::{check_bounds, TileOperator};
use crate::core::tile_layout::ImageLayout;
use crate::io::expression::ExpressionEvaluator;
use crate::io::raster_source::RasterDataSource;
use crate::io::shape::{Pin, ScanlineRasterizer, Shape, ShapeRasterizer};
use crate::types::{Mask, RasterError, RasterResult, Rect, SampleType, Tile};

/// Sub-criteria of a region of interest and how they combine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiDefinition {
    pub expression_enabled: bool,
    /// Bitmask expression; an empty string disables the source
    pub expression: String,
    pub value_range_enabled: bool,
    pub value_range_min: f64,
    pub value_range_max: f64,
    pub pins_enabled: bool,
    pub shape_enabled: bool,
    pub shape: Option<Shape>,
    /// OR-combine sources instead of AND
    pub or_combined: bool,
    pub inverted: bool,
}

impl Default for RoiDefinition {
    fn default() -> Self {
        Self {
            expression_enabled: false,
            expression: String::new(),
            value_range_enabled: false,
            value_range_min: 0.0,
            value_range_max: 1.0,
            pins_enabled: false,
            shape_enabled: false,
            shape: None,
            or_combined: false,
            inverted: false,
        }
    }
}

impl RoiDefinition {
    fn expression_active(&self) -> bool {
        self.expression_enabled && !self.expression.trim().is_empty()
    }

    fn shape_active(&self) -> Option<&Shape> {
        if self.shape_enabled {
            self.shape.as_ref()
        } else {
            None
        }
    }

    /// Whether any source would contribute to the mask
    pub fn is_usable(&self) -> bool {
        self.expression_active()
            || self.value_range_enabled
            || self.pins_enabled
            || self.shape_active().is_some()
    }
}

#[inline]
fn combine(old: bool, new: bool, or_combined: bool) -> bool {
    if or_combined {
        old || new
    } else {
        old && new
    }
}

/// Evaluates a [`RoiDefinition`] against its product context
pub struct MaskEvaluator {
    definition: RoiDefinition,
    expressions: Option<Arc<dyn ExpressionEvaluator>>,
    raster: Option<Arc<dyn RasterDataSource>>,
    pins: Vec<Pin>,
    rasterizer: Arc<dyn ShapeRasterizer>,
}

impl MaskEvaluator {
    pub fn new(definition: RoiDefinition) -> Self {
        Self {
            definition,
            expressions: None,
            raster: None,
            pins: Vec::new(),
            rasterizer: Arc::new(ScanlineRasterizer),
        }
    }

    pub fn with_expression_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.expressions = Some(evaluator);
        self
    }

    /// Raster whose samples feed the value-range test
    pub fn with_raster(mut self, raster: Arc<dyn RasterDataSource>) -> Self {
        self.raster = Some(raster);
        self
    }

    pub fn with_pins(mut self, pins: Vec<Pin>) -> Self {
        self.pins = pins;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn ShapeRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn definition(&self) -> &RoiDefinition {
        &self.definition
    }

    pub fn definition_mut(&mut self) -> &mut RoiDefinition {
        &mut self.definition
    }

    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// Combined mask over `rect`, `None` when no source is enabled
    pub fn compute_mask(&self, rect: Rect) -> RasterResult<Option<Mask>> {
        let def = &self.definition;
        let or_combined = def.or_combined;
        let (width, height) = (rect.width, rect.height);
        let mut mask = vec![false; rect.area()];
        let mut data_valid = false;

        if def.expression_active() {
            let evaluator = self.expressions.as_ref().ok_or_else(|| {
                RasterError::MissingProduct("ROI expression needs an expression evaluator".to_string())
            })?;
            let bytes = evaluator.evaluate_boolean(&def.expression, rect, 1, 0)?;
            for (m, &b) in mask.iter_mut().zip(bytes.iter()) {
                *m = b != 0;
            }
            data_valid = true;
        }

        if def.value_range_enabled {
            let raster = self.raster.as_ref().ok_or_else(|| {
                RasterError::MissingProduct("ROI value range needs a raster".to_string())
            })?;
            let samples = raster.read_samples(rect)?;
            if samples.len() != mask.len() {
                return Err(RasterError::InvalidLayout(format!(
                    "Raster returned {} samples for {}",
                    samples.len(),
                    rect
                )));
            }
            let (min, max) = (def.value_range_min, def.value_range_max);
            for row in 0..height {
                let y = rect.y + row as i32;
                for col in 0..width {
                    let x = rect.x + col as i32;
                    // invalid pixels keep whatever the mask already holds
                    if !raster.is_pixel_valid(x, y) {
                        continue;
                    }
                    let i = row * width + col;
                    let inside = min <= samples[i] && samples[i] <= max;
                    mask[i] = if data_valid {
                        combine(mask[i], inside, or_combined)
                    } else {
                        inside
                    };
                }
            }
            data_valid = true;
        }

        // an empty pin set contributes nothing
        if def.pins_enabled && !self.pins.is_empty() {
            let mut pinned = vec![false; mask.len()];
            for pin in &self.pins {
                let (px, py) = pin.pixel();
                if rect.contains(px, py) {
                    pinned[(py - rect.y as i64) as usize * width + (px - rect.x as i64) as usize] = true;
                }
            }
            for (m, &p) in mask.iter_mut().zip(pinned.iter()) {
                *m = if data_valid { combine(*m, p, or_combined) } else { p };
            }
            data_valid = true;
        }

        if let Some(shape) = def.shape_active() {
            let raster = self.rasterizer.rasterize(shape, rect)?;
            if raster.len() != mask.len() {
                return Err(RasterError::InvalidLayout(format!(
                    "Shape rasterizer returned {} pixels for {}",
                    raster.len(),
                    rect
                )));
            }
            for (m, &b) in mask.iter_mut().zip(raster.iter()) {
                *m = if data_valid {
                    combine(*m, b != 0, or_combined)
                } else {
                    b != 0
                };
            }
            data_valid = true;
        }

        if !data_valid {
            return Ok(None);
        }
        if def.inverted {
            mask.iter_mut().for_each(|m| *m = !*m);
        }

        Mask::from_shape_vec((height, width), mask)
            .map(Some)
            .map_err(|e| RasterError::Processing(format!("Mask shape error: {}", e)))
    }
}

/// Tile operator rendering a ROI as a one-band byte image (1 inside, 0 outside)
pub struct RoiMaskOperator {
    evaluator: MaskEvaluator,
    layout: ImageLayout,
}

impl RoiMaskOperator {
    pub fn new(raster_layout: &ImageLayout, evaluator: MaskEvaluator) -> Self {
        if !evaluator.definition().is_usable() {
            log::warn!("ROI definition has no enabled source; every pixel is inside");
        }
        if evaluator.definition().pins_enabled {
            let bounds = raster_layout.bounds();
            for pin in evaluator.pins() {
                let (px, py) = pin.pixel();
                if !bounds.contains(px, py) {
                    log::warn!("Pin '{}' at ({}, {}) lies outside the raster", pin.name, pin.x, pin.y);
                }
            }
        }
        Self {
            evaluator,
            layout: raster_layout.derive(1, SampleType::Byte),
        }
    }

    pub fn evaluator(&self) -> &MaskEvaluator {
        &self.evaluator
    }
}

impl TileOperator for RoiMaskOperator {
    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn compute_tile(&self, rect: Rect) -> RasterResult<Tile> {
        check_bounds(&self.layout, rect)?;
        let data = match self.evaluator.compute_mask(rect)? {
            Some(mask) => mask.iter().map(|&inside| inside as u8).collect(),
            None => vec![1u8; rect.area()],
        };
        Tile::from_bytes(rect, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::expression::PredicateEvaluator;
    use crate::io::raster_source::ArrayRaster;
    use ndarray::Array2;

    const RECT: Rect = Rect { x: 0, y: 0, width: 4, height: 1 };

    fn expressions() -> Arc<dyn ExpressionEvaluator> {
        Arc::new(
            PredicateEvaluator::new()
                .with("first_two", |x, _| x < 2)
                .with("odd", |x, _| x % 2 == 1),
        )
    }

    /// values 0.0, 0.5, 2.0, -999 (no-data)
    fn raster() -> Arc<dyn RasterDataSource> {
        let band = Array2::from_shape_vec((1, 4), vec![0.0f32, 0.5, 2.0, -999.0]).unwrap();
        Arc::new(ArrayRaster::from_band("chl", band, 4, 1).unwrap().with_no_data(-999.0))
    }

    fn row(mask: &Mask) -> Vec<bool> {
        mask.iter().copied().collect()
    }

    #[test]
    fn test_no_source_gives_no_mask() {
        let def = RoiDefinition {
            inverted: true,
            expression_enabled: true, // empty expression does not count
            ..Default::default()
        };
        let evaluator = MaskEvaluator::new(def);
        assert!(evaluator.compute_mask(RECT).unwrap().is_none());
    }

    #[test]
    fn test_expression_alone_is_passed_through() {
        let def = RoiDefinition {
            expression_enabled: true,
            expression: "odd".to_string(),
            or_combined: true,
            ..Default::default()
        };
        let mask = MaskEvaluator::new(def)
            .with_expression_evaluator(expressions())
            .compute_mask(RECT)
            .unwrap()
            .unwrap();
        assert_eq!(row(&mask), vec![false, true, false, true]);
        assert_eq!(mask.dim(), (1, 4));
    }

    #[test]
    fn test_value_range_skips_invalid_pixels() {
        let def = RoiDefinition {
            expression_enabled: true,
            expression: "!first_two".to_string(),
            value_range_enabled: true,
            value_range_min: 0.0,
            value_range_max: 1.0,
            or_combined: false,
            ..Default::default()
        };
        // AND: [F, F, T, T] && [T, T, F, skip] = [F, F, F, T]
        let mask = MaskEvaluator::new(def)
            .with_expression_evaluator(expressions())
            .with_raster(raster())
            .compute_mask(RECT)
            .unwrap()
            .unwrap();
        assert_eq!(row(&mask), vec![false, false, false, true]);
    }

    #[test]
    fn test_value_range_as_seed() {
        let def = RoiDefinition {
            value_range_enabled: true,
            value_range_min: 0.25,
            value_range_max: 5.0,
            ..Default::default()
        };
        let mask = MaskEvaluator::new(def).with_raster(raster()).compute_mask(RECT).unwrap().unwrap();
        assert_eq!(row(&mask), vec![false, true, true, false]);
    }

    #[test]
    fn test_pins_touch_single_pixels() {
        let def = RoiDefinition {
            pins_enabled: true,
            ..Default::default()
        };
        let pins = vec![Pin::new("a", 2.7, 0.2), Pin::new("outside", 9.0, 0.0)];
        let mask = MaskEvaluator::new(def).with_pins(pins).compute_mask(RECT).unwrap().unwrap();
        assert_eq!(row(&mask), vec![false, false, true, false]);
    }

    #[test]
    fn test_shape_or_combined_and_inverted() {
        let def = RoiDefinition {
            expression_enabled: true,
            expression: "odd".to_string(),
            shape_enabled: true,
            shape: Some(Shape::Rectangle { x: 0.0, y: 0.0, width: 1.0, height: 1.0 }),
            or_combined: true,
            inverted: true,
            ..Default::default()
        };
        // odd [F, T, F, T] || shape [T, F, F, F] = [T, T, F, T], inverted
        let mask = MaskEvaluator::new(def)
            .with_expression_evaluator(expressions())
            .compute_mask(RECT)
            .unwrap()
            .unwrap();
        assert_eq!(row(&mask), vec![false, false, true, false]);
    }

    #[test]
    fn test_pins_and_combined_clear_other_pixels() {
        let def = RoiDefinition {
            expression_enabled: true,
            expression: "true".to_string(),
            pins_enabled: true,
            or_combined: false,
            ..Default::default()
        };
        let mask = MaskEvaluator::new(def)
            .with_expression_evaluator(expressions())
            .with_pins(vec![Pin::new("p", 1.5, 0.5)])
            .compute_mask(RECT)
            .unwrap()
            .unwrap();
        assert_eq!(row(&mask), vec![false, true, false, false]);
    }

    #[test]
    fn test_empty_pin_set_contributes_nothing() {
        let pins_only = RoiDefinition {
            pins_enabled: true,
            ..Default::default()
        };
        assert!(MaskEvaluator::new(pins_only.clone()).compute_mask(RECT).unwrap().is_none());

        let with_shape = RoiDefinition {
            shape_enabled: true,
            shape: Some(Shape::Rectangle { x: 0.0, y: 0.0, width: 2.0, height: 1.0 }),
            or_combined: false,
            ..pins_only
        };
        let mask = MaskEvaluator::new(with_shape).compute_mask(RECT).unwrap().unwrap();
        assert_eq!(row(&mask), vec![true, true, false, false]);
    }

    #[test]
    fn test_value_range_or_combined_skips_invalid_pixels() {
        let def = RoiDefinition {
            expression_enabled: true,
            expression: "odd".to_string(),
            value_range_enabled: true,
            value_range_min: 0.0,
            value_range_max: 1.0,
            or_combined: true,
            ..Default::default()
        };
        // OR: [F, T, F, T] || [T, T, F, skip] = [T, T, F, T]
        let mask = MaskEvaluator::new(def)
            .with_expression_evaluator(expressions())
            .with_raster(raster())
            .compute_mask(RECT)
            .unwrap()
            .unwrap();
        assert_eq!(row(&mask), vec![true, true, false, true]);
    }

    #[test]
    fn test_missing_context() {
        let def = RoiDefinition {
            value_range_enabled: true,
            ..Default::default()
        };
        assert!(matches!(
            MaskEvaluator::new(def).compute_mask(RECT),
            Err(RasterError::MissingProduct(_))
        ));
    }

    #[test]
    fn test_roi_operator_without_sources_is_unconstrained() {
        let layout = ImageLayout::new(4, 1, 4, 1, 1, SampleType::Float).unwrap();
        let op = RoiMaskOperator::new(&layout, MaskEvaluator::new(RoiDefinition::default()));
        let tile = op.compute_tile(RECT).unwrap();
        assert_eq!(tile.band_bytes(0).unwrap(), vec![1, 1, 1, 1]);
    }
}
