use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::operator::{check_bounds, RasterImage, TileOperator};
use crate::core::tile_accessor::ByteAccessorMut;
use crate::core::tile_layout::ImageLayout;
use crate::io::expression::ExpressionEvaluator;
use crate::types::{RasterError, RasterResult, Rect, SampleType, Tile};

/// 8-bit RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Component blended into band `band` (red, green, blue, alpha)
    pub fn component(&self, band: usize) -> Option<u8> {
        match band {
            0 => Some(self.r),
            1 => Some(self.g),
            2 => Some(self.b),
            3 => Some(self.a),
            _ => None,
        }
    }
}

/// Expression-driven overlay with a display color and opacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitmaskLayer {
    pub name: String,
    pub expression: String,
    pub color: Color,
    /// Opacity in [0, 1]
    pub alpha: f32,
}

impl BitmaskLayer {
    pub fn new(name: &str, expression: &str, color: Color, alpha: f32) -> Self {
        Self {
            name: name.to_string(),
            expression: expression.to_string(),
            color,
            alpha,
        }
    }
}

/// Fixed-point weight of the overlay color, `round(256 * alpha)`
pub fn alpha_weight(alpha: f32) -> u32 {
    (256.0 * alpha.clamp(0.0, 1.0)).round() as u32
}

/// `(a * color + (256 - a) * old) >> 8`, saturated to 255
#[inline]
pub fn blend_sample(old: u8, color: u8, weight: u32) -> u8 {
    let value = (weight * color as u32 + (256 - weight) * old as u32) >> 8;
    value.min(255) as u8
}

/// Blend `color` over every pixel of `dest` where `mask` (row-major, one byte
/// per pixel) is non-zero
pub fn blend_layer(dest: &mut Tile, mask: &[u8], color: Color, alpha: f32) -> RasterResult<()> {
    let rect = dest.rect();
    if mask.len() != rect.area() {
        return Err(RasterError::InvalidLayout(format!(
            "Mask of {} pixels for tile {}",
            mask.len(),
            rect
        )));
    }
    if rect.is_empty() {
        return Ok(());
    }
    let weight = alpha_weight(alpha);
    let mut acc = ByteAccessorMut::new(dest)?;
    let (pixel_stride, scanline_stride) = (acc.pixel_stride(), acc.scanline_stride());

    for band in 0..acc.num_bands() {
        let component = color.component(band).ok_or_else(|| {
            RasterError::InvalidLayout(format!("Cannot blend RGBA color into band {}", band))
        })?;
        let mut line = acc.band_offset(band);
        let data = acc.band_data_mut(band);
        for mask_row in mask.chunks_exact(rect.width) {
            let mut idx = line;
            for &m in mask_row {
                if m != 0 {
                    data[idx] = blend_sample(data[idx], component, weight);
                }
                idx += pixel_stride;
            }
            line += scanline_stride;
        }
    }
    Ok(())
}

/// Copies a byte image and paints bitmask layers over it.
///
/// Layers are painted from the end of the list to the front, so the first
/// layer ends up on top. Callers must not issue `compute_tile` after
/// [`Self::dispose`].
pub struct BitmaskOverlayOperator {
    source: Arc<dyn RasterImage>,
    layers: Vec<BitmaskLayer>,
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    layout: ImageLayout,
}

impl BitmaskOverlayOperator {
    pub fn new(
        source: Arc<dyn RasterImage>,
        layers: Vec<BitmaskLayer>,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> RasterResult<Self> {
        let layout = source.layout().clone();
        if layout.sample_type() != SampleType::Byte {
            return Err(RasterError::UnsupportedSampleType(layout.sample_type()));
        }
        if layout.num_bands() > 4 {
            return Err(RasterError::InvalidLayout(format!(
                "Bitmask overlay supports up to 4 bands, source has {}",
                layout.num_bands()
            )));
        }
        log::info!("Bitmask overlay with {} layers", layers.len());
        Ok(Self {
            source,
            layers,
            evaluator: Some(evaluator),
            layout,
        })
    }

    pub fn layers(&self) -> &[BitmaskLayer] {
        &self.layers
    }

    /// Replace the layer list; tiles computed afterwards use the new layers
    pub fn set_layers(&mut self, layers: Vec<BitmaskLayer>) {
        self.layers = layers;
    }

    /// Release the evaluator context
    pub fn dispose(&mut self) {
        log::debug!("Disposing bitmask overlay");
        self.evaluator = None;
    }

    /// Paint the layers over a copy of `source`
    pub fn overlay(&self, source: &Tile) -> RasterResult<Tile> {
        let evaluator = self
            .evaluator
            .as_ref()
            .ok_or_else(|| RasterError::MissingContext("bitmask overlay has been disposed".to_string()))?;
        if source.sample_type() != SampleType::Byte {
            return Err(RasterError::UnsupportedSampleType(source.sample_type()));
        }

        let mut dest = source.clone();
        if self.layers.is_empty() {
            return Ok(dest);
        }

        let rect = source.rect();
        // all masks are evaluated before the first write
        let masks = self
            .layers
            .iter()
            .rev()
            .map(|layer| evaluator.evaluate_boolean(&layer.expression, rect, 1, 0))
            .collect::<RasterResult<Vec<Vec<u8>>>>()?;

        for (layer, mask) in self.layers.iter().rev().zip(masks.iter()) {
            blend_layer(&mut dest, mask, layer.color, layer.alpha)?;
        }
        log::debug!("Blended {} bitmask layers into tile {}", masks.len(), rect);
        Ok(dest)
    }
}

impl TileOperator for BitmaskOverlayOperator {
    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn compute_tile(&self, rect: Rect) -> RasterResult<Tile> {
        check_bounds(&self.layout, rect)?;
        let source = self.source.get_data(rect)?;
        self.overlay(&source)
    }
}
