use std::sync::Arc;

use crate::core::operator::{check_bounds, RasterImage, TileOperator};
use crate::core::tile_accessor::{ByteAccessor, ByteAccessorMut};
use crate::core::tile_layout::ImageLayout;
use crate::types::{RasterError, RasterResult, Rect, SampleLayout, SampleType, Tile};

/// Pixel layout of an RGB(A) destination tile: band k holds source k, stored
/// blue-first in memory (B, G, R[, A]) to match a BGR(A) framebuffer.
pub fn rgb_sample_layout(width: usize, num_bands: usize) -> RasterResult<SampleLayout> {
    let offsets = match num_bands {
        1 => vec![0],
        3 => vec![2, 1, 0],
        4 => vec![2, 1, 0, 3],
        n => {
            return Err(RasterError::InvalidLayout(format!(
                "RGB composite needs 1, 3 or 4 sources, got {}",
                n
            )))
        }
    };
    Ok(SampleLayout::interleaved_with_offsets(width, offsets))
}

/// Copy band 0 of each single-band byte source into band k of `dest`.
///
/// All tiles must be byte tiles covering the same rectangle. Every source and
/// the destination are checked before anything is written.
pub fn composite_rgb(sources: &[&Tile], dest: &mut Tile) -> RasterResult<()> {
    if sources.len() != dest.num_bands() {
        return Err(RasterError::InvalidLayout(format!(
            "{} sources for a {}-band destination",
            sources.len(),
            dest.num_bands()
        )));
    }
    let rect = dest.rect();
    let accessors = sources
        .iter()
        .map(|tile| ByteAccessor::with_rect(tile, rect))
        .collect::<RasterResult<Vec<_>>>()?;
    let mut dst = ByteAccessorMut::new(dest)?;

    let (width, height) = (rect.width, rect.height);
    let dst_pixel_stride = dst.pixel_stride();
    let dst_scanline_stride = dst.scanline_stride();

    for (band, src) in accessors.iter().enumerate() {
        let src_data = src.band_data(0);
        let src_pixel_stride = src.pixel_stride();
        let src_scanline_stride = src.scanline_stride();
        let mut src_line = src.band_offset(0);
        let mut dst_line = dst.band_offset(band);
        let dst_data = dst.band_data_mut(band);

        for _ in 0..height {
            let mut s = src_line;
            let mut d = dst_line;
            for _ in 0..width {
                dst_data[d] = src_data[s];
                s += src_pixel_stride;
                d += dst_pixel_stride;
            }
            src_line += src_scanline_stride;
            dst_line += dst_scanline_stride;
        }
    }
    Ok(())
}

/// Interleaves 1, 3 or 4 single-band byte images into one RGB(A) image
pub struct RgbCompositeOperator {
    sources: Vec<Arc<dyn RasterImage>>,
    layout: ImageLayout,
}

impl RgbCompositeOperator {
    /// Sources are given in (red, green, blue[, alpha]) order
    pub fn new(sources: Vec<Arc<dyn RasterImage>>) -> RasterResult<Self> {
        let first = sources
            .first()
            .ok_or_else(|| RasterError::InvalidLayout("RGB composite needs at least one source".to_string()))?
            .layout()
            .clone();
        rgb_sample_layout(first.tile_width(), sources.len())?;

        for (i, source) in sources.iter().enumerate() {
            let layout = source.layout();
            if layout.width() != first.width() || layout.height() != first.height() {
                return Err(RasterError::InvalidLayout(format!(
                    "Source {} is {}x{}, expected {}x{}",
                    i,
                    layout.width(),
                    layout.height(),
                    first.width(),
                    first.height()
                )));
            }
            if layout.sample_type() != SampleType::Byte {
                return Err(RasterError::UnsupportedSampleType(layout.sample_type()));
            }
        }

        log::info!(
            "RGB composite of {} sources, {}x{} pixels",
            sources.len(),
            first.width(),
            first.height()
        );
        let layout = first.derive(sources.len(), SampleType::Byte);
        Ok(Self { sources, layout })
    }
}

impl TileOperator for RgbCompositeOperator {
    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn compute_tile(&self, rect: Rect) -> RasterResult<Tile> {
        check_bounds(&self.layout, rect)?;
        let source_tiles = self
            .sources
            .iter()
            .map(|source| source.get_data(rect))
            .collect::<RasterResult<Vec<Tile>>>()?;
        let refs: Vec<&Tile> = source_tiles.iter().collect();

        let mut dest = Tile::new(rect, rgb_sample_layout(rect.width, refs.len())?, SampleType::Byte);
        composite_rgb(&refs, &mut dest)?;
        Ok(dest)
    }
}
