use serde::{Deserialize, Serialize};

use crate::types::{RasterError, RasterResult, Rect, SampleType};

/// Tile size selection parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSizePolicy {
    /// Step used when looking for an exact divisor
    pub step: usize,
    /// Smallest tile size considered for large rasters
    pub min_tile_size: usize,
    /// Largest tile size; rasters up to this size form a single tile
    pub max_tile_size: usize,
}

impl Default for TileSizePolicy {
    fn default() -> Self {
        let step = 64;
        Self {
            step,
            min_tile_size: 4 * step,  // 256
            max_tile_size: 10 * step, // 640
        }
    }
}

impl TileSizePolicy {
    /// Preferred tile size along one axis of `raster_size` pixels.
    ///
    /// Rasters no larger than `max_tile_size` are not split. Otherwise the
    /// largest exact divisor in `[min, max]` on the fixed step grid wins, and
    /// failing that the candidate (stepping by `granularity`) that leaves the
    /// least padding after `ceil(raster_size / candidate)` tiles.
    pub fn preferred_tile_size(&self, raster_size: usize, granularity: usize) -> usize {
        if raster_size <= self.max_tile_size {
            return raster_size;
        }

        let step = self.step.max(1);
        let mut candidate = self.max_tile_size;
        while candidate >= self.min_tile_size && candidate > 0 {
            if raster_size % candidate == 0 {
                return candidate;
            }
            if candidate < step {
                break;
            }
            candidate -= step;
        }

        let granularity = granularity.max(1);
        let mut best: Option<(usize, usize)> = None;
        let mut candidate = self.max_tile_size;
        while candidate >= self.min_tile_size && candidate > 0 {
            let n = (raster_size + candidate - 1) / candidate;
            let delta = n * candidate - raster_size;
            if delta == 0 {
                return candidate;
            }
            if best.map_or(true, |(_, min_delta)| delta < min_delta) {
                best = Some((candidate, delta));
            }
            if candidate < granularity {
                break;
            }
            candidate -= granularity;
        }

        assert!(
            best.is_some(),
            "no tile size candidate in [{}, {}]",
            self.min_tile_size,
            self.max_tile_size
        );
        best.map_or(self.max_tile_size, |(size, _)| size)
    }

    /// Preferred (tile_width, tile_height) for a raster
    pub fn preferred_tile_dims(&self, width: usize, height: usize, granularity: usize) -> (usize, usize) {
        (
            self.preferred_tile_size(width, granularity),
            self.preferred_tile_size(height, granularity),
        )
    }
}

/// Geometry and sample format of a tiled raster.
///
/// Tile dimensions and the band count are always positive; deserialized
/// layouts go through the same check as [`ImageLayout::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LayoutFields")]
pub struct ImageLayout {
    width: usize,
    height: usize,
    tile_width: usize,
    tile_height: usize,
    num_bands: usize,
    sample_type: SampleType,
}

/// Unchecked serialized form of [`ImageLayout`]
#[derive(Deserialize)]
struct LayoutFields {
    width: usize,
    height: usize,
    tile_width: usize,
    tile_height: usize,
    num_bands: usize,
    sample_type: SampleType,
}

impl TryFrom<LayoutFields> for ImageLayout {
    type Error = RasterError;

    fn try_from(f: LayoutFields) -> RasterResult<Self> {
        Self::new(f.width, f.height, f.tile_width, f.tile_height, f.num_bands, f.sample_type)
    }
}

impl ImageLayout {
    pub fn new(
        width: usize,
        height: usize,
        tile_width: usize,
        tile_height: usize,
        num_bands: usize,
        sample_type: SampleType,
    ) -> RasterResult<Self> {
        if tile_width == 0 || tile_height == 0 {
            return Err(RasterError::InvalidLayout(format!(
                "Tile size {}x{} must be positive",
                tile_width, tile_height
            )));
        }
        if num_bands == 0 {
            return Err(RasterError::InvalidLayout("Image needs at least one band".to_string()));
        }
        Ok(Self {
            width,
            height,
            tile_width,
            tile_height,
            num_bands,
            sample_type,
        })
    }

    /// Layout with tile dimensions chosen by `policy`
    pub fn with_preferred_tiles(
        width: usize,
        height: usize,
        num_bands: usize,
        sample_type: SampleType,
        policy: &TileSizePolicy,
        granularity: usize,
    ) -> RasterResult<Self> {
        let (tile_width, tile_height) = policy.preferred_tile_dims(width, height, granularity);
        log::debug!(
            "Preferred tile size for {}x{} raster: {}x{}",
            width,
            height,
            tile_width,
            tile_height
        );
        Self::new(
            width,
            height,
            tile_width.max(1),
            tile_height.max(1),
            num_bands,
            sample_type,
        )
    }

    /// Same geometry with a different band count and sample type
    pub fn derive(&self, num_bands: usize, sample_type: SampleType) -> Self {
        Self {
            num_bands,
            sample_type,
            ..self.clone()
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn tile_width(&self) -> usize {
        self.tile_width
    }

    pub fn tile_height(&self) -> usize {
        self.tile_height
    }

    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn num_x_tiles(&self) -> usize {
        (self.width + self.tile_width - 1) / self.tile_width
    }

    pub fn num_y_tiles(&self) -> usize {
        (self.height + self.tile_height - 1) / self.tile_height
    }

    pub fn num_tiles(&self) -> usize {
        self.num_x_tiles() * self.num_y_tiles()
    }

    /// Rectangle of tile (tx, ty), clipped to the image bounds
    pub fn tile_rect(&self, tile_x: usize, tile_y: usize) -> RasterResult<Rect> {
        if tile_x >= self.num_x_tiles() || tile_y >= self.num_y_tiles() {
            return Err(RasterError::InvalidLayout(format!(
                "Tile ({}, {}) outside {}x{} tile grid",
                tile_x,
                tile_y,
                self.num_x_tiles(),
                self.num_y_tiles()
            )));
        }
        let x = tile_x * self.tile_width;
        let y = tile_y * self.tile_height;
        Ok(Rect::new(
            x as i32,
            y as i32,
            self.tile_width.min(self.width - x),
            self.tile_height.min(self.height - y),
        ))
    }

    /// All tile indices in row-major order
    pub fn tile_indices(&self) -> Vec<(usize, usize)> {
        let nx = self.num_x_tiles();
        (0..self.num_y_tiles())
            .flat_map(|ty| (0..nx).map(move |tx| (tx, ty)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_rasters_are_not_split() {
        let policy = TileSizePolicy::default();
        for d in [1, 63, 256, 500, 640] {
            assert_eq!(policy.preferred_tile_size(d, 1), d);
        }
    }

    #[test]
    fn test_exact_divisor_preferred() {
        let policy = TileSizePolicy::default();
        assert_eq!(policy.preferred_tile_size(1280, 1), 640);
        assert_eq!(policy.preferred_tile_size(1152, 1), 576);
        assert_eq!(policy.preferred_tile_size(2048, 1), 512);
        assert_eq!(policy.preferred_tile_size(768, 1), 384);
    }

    #[test]
    fn test_minimal_padding_fallback() {
        let policy = TileSizePolicy::default();
        // 1000 has no divisor among 640, 576, ..., 256; with granularity 1 the
        // scan reaches 500 which divides exactly
        assert_eq!(policy.preferred_tile_size(1000, 1), 500);
        // with granularity 64 the candidates are the step grid; 512 pads by 24,
        // 256 pads by 24 too but comes later
        assert_eq!(policy.preferred_tile_size(1000, 64), 512);
    }

    #[test]
    fn test_layout_tile_grid_clips_edges() {
        let layout = ImageLayout::new(1000, 700, 512, 512, 1, SampleType::Byte).unwrap();
        assert_eq!(layout.num_x_tiles(), 2);
        assert_eq!(layout.num_y_tiles(), 2);
        assert_eq!(layout.tile_rect(1, 1).unwrap(), Rect::new(512, 512, 488, 188));
        assert!(layout.tile_rect(2, 0).is_err());
        assert_eq!(layout.tile_indices().len(), 4);
    }

    #[test]
    fn test_zero_tile_size_rejected_when_deserialized() {
        let fields = LayoutFields {
            width: 100,
            height: 100,
            tile_width: 0,
            tile_height: 64,
            num_bands: 1,
            sample_type: SampleType::Byte,
        };
        assert!(matches!(
            ImageLayout::try_from(fields),
            Err(RasterError::InvalidLayout(_))
        ));
        assert!(ImageLayout::new(100, 100, 64, 64, 0, SampleType::Byte).is_err());
    }
}
