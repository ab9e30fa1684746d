use ndarray::{s, Array2, Array3, Axis};
use num_traits::ToPrimitive;

use crate::core::operator::RasterImage;
use crate::core::tile_layout::ImageLayout;
use crate::types::{DataBuffer, RasterError, RasterResult, Rect, SampleLayout, SampleType, Tile};

/// Numeric raster addressable by rectangle
pub trait RasterDataSource: Send + Sync {
    /// Raw geophysical samples of the rectangle, row-major
    fn read_samples(&self, rect: Rect) -> RasterResult<Vec<f64>>;

    /// Whether the pixel carries a valid (non no-data) value
    fn is_pixel_valid(&self, x: i32, y: i32) -> bool;
}

/// Primitive sample types that can back a tile
pub trait Sample: Copy + Default + ToPrimitive + Send + Sync + 'static {
    const SAMPLE_TYPE: SampleType;

    fn into_buffer(banks: Vec<Vec<Self>>) -> DataBuffer;
}

macro_rules! impl_sample {
    ($t:ty, $variant:ident) => {
        impl Sample for $t {
            const SAMPLE_TYPE: SampleType = SampleType::$variant;

            fn into_buffer(banks: Vec<Vec<Self>>) -> DataBuffer {
                DataBuffer::$variant(banks)
            }
        }
    };
}

impl_sample!(u8, Byte);
impl_sample!(u16, UShort);
impl_sample!(i16, Short);
impl_sample!(i32, Int);
impl_sample!(f32, Float);
impl_sample!(f64, Double);

/// In-memory multi-band raster, shaped (bands, rows, cols)
#[derive(Debug, Clone)]
pub struct ArrayRaster<T: Sample> {
    name: String,
    data: Array3<T>,
    layout: ImageLayout,
    no_data: Option<f64>,
}

impl<T: Sample> ArrayRaster<T> {
    /// Create a raster served in tiles of `tile_width x tile_height`
    pub fn new(name: &str, data: Array3<T>, tile_width: usize, tile_height: usize) -> RasterResult<Self> {
        let (bands, rows, cols) = data.dim();
        let layout = ImageLayout::new(cols, rows, tile_width, tile_height, bands, T::SAMPLE_TYPE)?;
        Ok(Self {
            name: name.to_string(),
            data,
            layout,
            no_data: None,
        })
    }

    /// Single-band raster
    pub fn from_band(name: &str, band: Array2<T>, tile_width: usize, tile_height: usize) -> RasterResult<Self> {
        Self::new(name, band.insert_axis(Axis(0)), tile_width, tile_height)
    }

    /// Treat samples equal to `value` as invalid
    pub fn with_no_data(mut self, value: f64) -> Self {
        self.no_data = Some(value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    fn check_inside(&self, rect: Rect) -> RasterResult<()> {
        if !self.layout.bounds().contains_rect(&rect) {
            return Err(RasterError::InvalidLayout(format!(
                "Rectangle {} outside raster '{}' bounds {}",
                rect,
                self.name,
                self.layout.bounds()
            )));
        }
        Ok(())
    }

    fn window(&self, band: usize, rect: Rect) -> ndarray::ArrayView2<'_, T> {
        let (x0, y0) = (rect.x as usize, rect.y as usize);
        self.data.slice(s![band, y0..y0 + rect.height, x0..x0 + rect.width])
    }
}

impl<T: Sample> RasterImage for ArrayRaster<T> {
    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn get_data(&self, rect: Rect) -> RasterResult<Tile> {
        self.check_inside(rect)?;
        let banks: Vec<Vec<T>> = (0..self.layout.num_bands())
            .map(|band| self.window(band, rect).iter().copied().collect())
            .collect();
        let layout = SampleLayout::banded(rect.width, self.layout.num_bands());
        Tile::from_parts(rect, layout, T::into_buffer(banks))
    }
}

impl<T: Sample> RasterDataSource for ArrayRaster<T> {
    fn read_samples(&self, rect: Rect) -> RasterResult<Vec<f64>> {
        self.check_inside(rect)?;
        Ok(self
            .window(0, rect)
            .iter()
            .map(|v| v.to_f64().unwrap_or(f64::NAN))
            .collect())
    }

    fn is_pixel_valid(&self, x: i32, y: i32) -> bool {
        if !self.layout.bounds().contains(x as i64, y as i64) {
            return false;
        }
        let value = self.data[[0, y as usize, x as usize]].to_f64().unwrap_or(f64::NAN);
        if !value.is_finite() {
            return false;
        }
        self.no_data.map_or(true, |nd| value != nd)
    }
}
