use ndarray::Array2;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Boolean mask over a tile rectangle, shaped (height, width)
pub type Mask = Array2<bool>;

/// Rectangle in raster-global pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Number of pixels covered
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge
    pub fn max_x(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge
    pub fn max_y(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Whether the pixel (px, py) lies inside this rectangle
    pub fn contains(&self, px: i64, py: i64) -> bool {
        px >= self.x as i64 && py >= self.y as i64 && px < self.max_x() && py < self.max_y()
    }

    /// Whether `other` lies completely inside this rectangle
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.max_x() <= self.max_x()
            && other.max_y() <= self.max_y()
    }

    /// Overlap of two rectangles, `None` if they are disjoint
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());
        if x1 <= x0 as i64 || y1 <= y0 as i64 {
            return None;
        }
        Some(Rect::new(x0, y0, (x1 - x0 as i64) as usize, (y1 - y0 as i64) as usize))
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{} {}x{}]", self.x, self.y, self.width, self.height)
    }
}

/// Sample data type of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    Byte,
    UShort,
    Short,
    Int,
    Float,
    Double,
}

impl SampleType {
    /// Size of one sample in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            SampleType::Byte => 1,
            SampleType::UShort | SampleType::Short => 2,
            SampleType::Int | SampleType::Float => 4,
            SampleType::Double => 8,
        }
    }
}

/// Backing storage of a tile: one or more banks of a single sample type
#[derive(Debug, Clone, PartialEq)]
pub enum DataBuffer {
    Byte(Vec<Vec<u8>>),
    UShort(Vec<Vec<u16>>),
    Short(Vec<Vec<i16>>),
    Int(Vec<Vec<i32>>),
    Float(Vec<Vec<f32>>),
    Double(Vec<Vec<f64>>),
}

impl DataBuffer {
    /// Allocate `num_banks` zero-filled banks of `bank_len` samples
    pub fn zeros(sample_type: SampleType, num_banks: usize, bank_len: usize) -> Self {
        match sample_type {
            SampleType::Byte => DataBuffer::Byte(vec![vec![0; bank_len]; num_banks]),
            SampleType::UShort => DataBuffer::UShort(vec![vec![0; bank_len]; num_banks]),
            SampleType::Short => DataBuffer::Short(vec![vec![0; bank_len]; num_banks]),
            SampleType::Int => DataBuffer::Int(vec![vec![0; bank_len]; num_banks]),
            SampleType::Float => DataBuffer::Float(vec![vec![0.0; bank_len]; num_banks]),
            SampleType::Double => DataBuffer::Double(vec![vec![0.0; bank_len]; num_banks]),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            DataBuffer::Byte(_) => SampleType::Byte,
            DataBuffer::UShort(_) => SampleType::UShort,
            DataBuffer::Short(_) => SampleType::Short,
            DataBuffer::Int(_) => SampleType::Int,
            DataBuffer::Float(_) => SampleType::Float,
            DataBuffer::Double(_) => SampleType::Double,
        }
    }

    pub fn num_banks(&self) -> usize {
        match self {
            DataBuffer::Byte(b) => b.len(),
            DataBuffer::UShort(b) => b.len(),
            DataBuffer::Short(b) => b.len(),
            DataBuffer::Int(b) => b.len(),
            DataBuffer::Float(b) => b.len(),
            DataBuffer::Double(b) => b.len(),
        }
    }

    pub fn bank_len(&self, bank: usize) -> Option<usize> {
        match self {
            DataBuffer::Byte(b) => b.get(bank).map(Vec::len),
            DataBuffer::UShort(b) => b.get(bank).map(Vec::len),
            DataBuffer::Short(b) => b.get(bank).map(Vec::len),
            DataBuffer::Int(b) => b.get(bank).map(Vec::len),
            DataBuffer::Float(b) => b.get(bank).map(Vec::len),
            DataBuffer::Double(b) => b.get(bank).map(Vec::len),
        }
    }

    /// Read one sample as `f64`, `None` when the bank or index is out of range
    pub fn get_f64(&self, bank: usize, index: usize) -> Option<f64> {
        fn read<T: ToPrimitive>(banks: &[Vec<T>], bank: usize, index: usize) -> Option<f64> {
            banks.get(bank)?.get(index)?.to_f64()
        }
        match self {
            DataBuffer::Byte(b) => read(b, bank, index),
            DataBuffer::UShort(b) => read(b, bank, index),
            DataBuffer::Short(b) => read(b, bank, index),
            DataBuffer::Int(b) => read(b, bank, index),
            DataBuffer::Float(b) => read(b, bank, index),
            DataBuffer::Double(b) => read(b, bank, index),
        }
    }

    /// Total storage in bytes
    pub fn size_bytes(&self) -> usize {
        let samples: usize = (0..self.num_banks()).filter_map(|b| self.bank_len(b)).sum();
        samples * self.sample_type().size_bytes()
    }
}

/// How band samples are laid out inside the banks of a [`DataBuffer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleLayout {
    /// Distance between two horizontally adjacent samples of a band
    pub pixel_stride: usize,
    /// Distance between two vertically adjacent samples of a band
    pub scanline_stride: usize,
    /// Bank holding each band
    pub bank_indices: Vec<usize>,
    /// Offset of the first sample of each band within its bank
    pub band_offsets: Vec<usize>,
}

impl SampleLayout {
    /// All bands in one bank, samples of a pixel stored next to each other
    pub fn pixel_interleaved(width: usize, num_bands: usize) -> Self {
        Self::interleaved_with_offsets(width, (0..num_bands).collect())
    }

    /// All bands in one bank with explicit per-band offsets within a pixel,
    /// e.g. `[2, 1, 0]` stores band 0 in the third byte of each pixel
    pub fn interleaved_with_offsets(width: usize, band_offsets: Vec<usize>) -> Self {
        let num_bands = band_offsets.len();
        Self {
            pixel_stride: num_bands,
            scanline_stride: width * num_bands,
            bank_indices: vec![0; num_bands],
            band_offsets,
        }
    }

    /// One bank per band
    pub fn banded(width: usize, num_bands: usize) -> Self {
        Self {
            pixel_stride: 1,
            scanline_stride: width,
            bank_indices: (0..num_bands).collect(),
            band_offsets: vec![0; num_bands],
        }
    }

    pub fn num_bands(&self) -> usize {
        self.band_offsets.len()
    }

    /// Number of banks referenced by this layout
    pub fn num_banks(&self) -> usize {
        self.bank_indices.iter().max().map_or(0, |m| m + 1)
    }

    /// Smallest bank length able to hold every band of a `width x height` tile
    pub fn required_bank_len(&self, width: usize, height: usize) -> usize {
        if width == 0 || height == 0 {
            return 0;
        }
        let extent = (height - 1) * self.scanline_stride + (width - 1) * self.pixel_stride + 1;
        self.band_offsets.iter().map(|off| off + extent).max().unwrap_or(0)
    }
}

/// Rectangular window of raster samples, the unit of computation and caching
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    rect: Rect,
    layout: SampleLayout,
    buffer: DataBuffer,
}

impl Tile {
    /// Zero-filled tile with the given layout
    pub fn new(rect: Rect, layout: SampleLayout, sample_type: SampleType) -> Self {
        let bank_len = layout.required_bank_len(rect.width, rect.height);
        let buffer = DataBuffer::zeros(sample_type, layout.num_banks(), bank_len);
        Self { rect, layout, buffer }
    }

    /// Zero-filled pixel-interleaved tile
    pub fn interleaved(rect: Rect, num_bands: usize, sample_type: SampleType) -> Self {
        Self::new(rect, SampleLayout::pixel_interleaved(rect.width, num_bands), sample_type)
    }

    /// Zero-filled banded tile
    pub fn banded(rect: Rect, num_bands: usize, sample_type: SampleType) -> Self {
        Self::new(rect, SampleLayout::banded(rect.width, num_bands), sample_type)
    }

    /// Assemble a tile from existing storage, checking that every band fits its bank
    pub fn from_parts(rect: Rect, layout: SampleLayout, buffer: DataBuffer) -> RasterResult<Self> {
        if layout.bank_indices.len() != layout.band_offsets.len() {
            return Err(RasterError::InvalidLayout(format!(
                "{} bank indices for {} band offsets",
                layout.bank_indices.len(),
                layout.band_offsets.len()
            )));
        }
        if !rect.is_empty() {
            let extent = (rect.height - 1) * layout.scanline_stride
                + (rect.width - 1) * layout.pixel_stride
                + 1;
            for (band, (&bank, &offset)) in layout
                .bank_indices
                .iter()
                .zip(layout.band_offsets.iter())
                .enumerate()
            {
                let len = buffer.bank_len(bank).ok_or_else(|| {
                    RasterError::InvalidLayout(format!("Band {} refers to missing bank {}", band, bank))
                })?;
                if len < offset + extent {
                    return Err(RasterError::InvalidLayout(format!(
                        "Band {} needs {} samples but bank {} holds {}",
                        band,
                        offset + extent,
                        bank,
                        len
                    )));
                }
            }
        }
        Ok(Self { rect, layout, buffer })
    }

    /// Single-band byte tile from a row-major buffer of `width * height` samples
    pub fn from_bytes(rect: Rect, data: Vec<u8>) -> RasterResult<Self> {
        Self::from_parts(rect, SampleLayout::banded(rect.width, 1), DataBuffer::Byte(vec![data]))
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn width(&self) -> usize {
        self.rect.width
    }

    pub fn height(&self) -> usize {
        self.rect.height
    }

    pub fn num_bands(&self) -> usize {
        self.layout.num_bands()
    }

    pub fn sample_type(&self) -> SampleType {
        self.buffer.sample_type()
    }

    pub fn layout(&self) -> &SampleLayout {
        &self.layout
    }

    pub fn buffer(&self) -> &DataBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut DataBuffer {
        &mut self.buffer
    }

    /// Approximate memory footprint, used for cache accounting
    pub fn size_bytes(&self) -> usize {
        self.buffer.size_bytes()
    }

    /// Bank index and position of a sample at global coordinates
    fn sample_position(&self, x: i32, y: i32, band: usize) -> Option<(usize, usize)> {
        if !self.rect.contains(x as i64, y as i64) || band >= self.num_bands() {
            return None;
        }
        let col = (x - self.rect.x) as usize;
        let row = (y - self.rect.y) as usize;
        let index = self.layout.band_offsets[band]
            + row * self.layout.scanline_stride
            + col * self.layout.pixel_stride;
        Some((self.layout.bank_indices[band], index))
    }

    /// Sample at global coordinates converted to `f64`
    pub fn sample_f64(&self, x: i32, y: i32, band: usize) -> Option<f64> {
        let (bank, index) = self.sample_position(x, y, band)?;
        self.buffer.get_f64(bank, index)
    }

    /// Byte sample at global coordinates, `None` for non-byte tiles
    pub fn byte_sample(&self, x: i32, y: i32, band: usize) -> Option<u8> {
        let (bank, index) = self.sample_position(x, y, band)?;
        match &self.buffer {
            DataBuffer::Byte(banks) => banks.get(bank)?.get(index).copied(),
            _ => None,
        }
    }

    /// Copy one band of a byte tile into a row-major `Vec`
    pub fn band_bytes(&self, band: usize) -> RasterResult<Vec<u8>> {
        let banks = match &self.buffer {
            DataBuffer::Byte(banks) => banks,
            other => return Err(RasterError::UnsupportedSampleType(other.sample_type())),
        };
        if band >= self.num_bands() {
            return Err(RasterError::InvalidLayout(format!(
                "Band {} requested from a {}-band tile",
                band,
                self.num_bands()
            )));
        }
        let data = &banks[self.layout.bank_indices[band]];
        let mut out = Vec::with_capacity(self.rect.area());
        for row in 0..self.rect.height {
            let mut idx = self.layout.band_offsets[band] + row * self.layout.scanline_stride;
            for _ in 0..self.rect.width {
                out.push(data[idx]);
                idx += self.layout.pixel_stride;
            }
        }
        Ok(out)
    }
}

/// Error types for tile computation
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("Unsupported sample type: {0:?} (only byte samples are supported)")]
    UnsupportedSampleType(SampleType),

    #[error("Invalid expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },

    #[error("Missing product: {0}")]
    MissingProduct(String),

    #[error("Missing context: {0}")]
    MissingContext(String),

    #[error("Invalid tile layout: {0}")]
    InvalidLayout(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl RasterError {
    pub fn invalid_expression(expression: &str, message: impl Into<String>) -> Self {
        RasterError::InvalidExpression {
            expression: expression.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for tile operations
pub type RasterResult<T> = Result<T, RasterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 8, 10, 10);
        assert_eq!(a.intersection(&b), Some(Rect::new(5, 8, 5, 2)));
        assert_eq!(a.intersection(&Rect::new(10, 0, 4, 4)), None);
        assert!(a.contains_rect(&Rect::new(2, 2, 8, 8)));
        assert!(!a.contains_rect(&Rect::new(2, 2, 9, 8)));
    }

    #[test]
    fn test_from_parts_checks_bank_length() {
        let rect = Rect::new(0, 0, 4, 3);
        let layout = SampleLayout::pixel_interleaved(4, 3);
        // 3 bands * 12 pixels = 36 samples needed
        let short = DataBuffer::Byte(vec![vec![0; 35]]);
        assert!(matches!(
            Tile::from_parts(rect, layout.clone(), short),
            Err(RasterError::InvalidLayout(_))
        ));

        let exact = DataBuffer::Byte(vec![vec![0; 36]]);
        assert!(Tile::from_parts(rect, layout, exact).is_ok());
    }

    #[test]
    fn test_sample_access_uses_global_coordinates() {
        let rect = Rect::new(100, 200, 2, 2);
        let tile = Tile::from_bytes(rect, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(tile.byte_sample(101, 201, 0), Some(4));
        assert_eq!(tile.sample_f64(100, 201, 0), Some(3.0));
        assert_eq!(tile.byte_sample(0, 0, 0), None);
    }

    #[test]
    fn test_band_bytes_respects_band_offsets() {
        let rect = Rect::new(0, 0, 2, 1);
        let layout = SampleLayout::interleaved_with_offsets(2, vec![2, 1, 0]);
        let buffer = DataBuffer::Byte(vec![vec![10, 20, 30, 40, 50, 60]]);
        let tile = Tile::from_parts(rect, layout, buffer).unwrap();
        assert_eq!(tile.band_bytes(0).unwrap(), vec![30, 60]);
        assert_eq!(tile.band_bytes(2).unwrap(), vec![10, 40]);
    }
}
