//! Byte views onto tile storage.
//!
//! An accessor resolves a rectangle of a tile into per-band offsets and the
//! tile's strides, so operators can walk `width x height x bands` samples with
//! plain index arithmetic. Only byte tiles are handled; anything else fails with
//! [`RasterError::UnsupportedSampleType`].

use crate::types::{DataBuffer, RasterError, RasterResult, Rect, Tile};

fn resolve_offsets(tile: &Tile, rect: Rect) -> RasterResult<Vec<usize>> {
    if !tile.rect().contains_rect(&rect) {
        return Err(RasterError::InvalidLayout(format!(
            "Rectangle {} is not inside tile {}",
            rect,
            tile.rect()
        )));
    }
    let layout = tile.layout();
    let dx = (rect.x - tile.rect().x) as usize;
    let dy = (rect.y - tile.rect().y) as usize;
    Ok(layout
        .band_offsets
        .iter()
        .map(|off| off + dy * layout.scanline_stride + dx * layout.pixel_stride)
        .collect())
}

/// Read-only byte view of a tile rectangle
#[derive(Debug)]
pub struct ByteAccessor<'a> {
    rect: Rect,
    banks: &'a [Vec<u8>],
    bank_indices: &'a [usize],
    band_offsets: Vec<usize>,
    pixel_stride: usize,
    scanline_stride: usize,
}

impl<'a> ByteAccessor<'a> {
    /// View the whole tile
    pub fn new(tile: &'a Tile) -> RasterResult<Self> {
        Self::with_rect(tile, tile.rect())
    }

    /// View a sub-rectangle of the tile
    pub fn with_rect(tile: &'a Tile, rect: Rect) -> RasterResult<Self> {
        let banks = match tile.buffer() {
            DataBuffer::Byte(banks) => banks.as_slice(),
            other => return Err(RasterError::UnsupportedSampleType(other.sample_type())),
        };
        let band_offsets = resolve_offsets(tile, rect)?;
        let layout = tile.layout();
        Ok(Self {
            rect,
            banks,
            bank_indices: &layout.bank_indices,
            band_offsets,
            pixel_stride: layout.pixel_stride,
            scanline_stride: layout.scanline_stride,
        })
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn num_bands(&self) -> usize {
        self.band_offsets.len()
    }

    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }

    pub fn scanline_stride(&self) -> usize {
        self.scanline_stride
    }

    /// Backing array holding `band`
    pub fn band_data(&self, band: usize) -> &'a [u8] {
        &self.banks[self.bank_indices[band]]
    }

    /// Index of the first sample of `band` inside [`Self::band_data`]
    pub fn band_offset(&self, band: usize) -> usize {
        self.band_offsets[band]
    }
}

/// Writable byte view of a tile rectangle.
///
/// Several bands may share one bank, so bands are handed out one at a time.
#[derive(Debug)]
pub struct ByteAccessorMut<'a> {
    rect: Rect,
    banks: &'a mut [Vec<u8>],
    bank_indices: Vec<usize>,
    band_offsets: Vec<usize>,
    pixel_stride: usize,
    scanline_stride: usize,
}

impl<'a> ByteAccessorMut<'a> {
    pub fn new(tile: &'a mut Tile) -> RasterResult<Self> {
        let rect = tile.rect();
        Self::with_rect(tile, rect)
    }

    pub fn with_rect(tile: &'a mut Tile, rect: Rect) -> RasterResult<Self> {
        if !matches!(tile.buffer(), DataBuffer::Byte(_)) {
            return Err(RasterError::UnsupportedSampleType(tile.sample_type()));
        }
        let band_offsets = resolve_offsets(tile, rect)?;
        let layout = tile.layout();
        let bank_indices = layout.bank_indices.clone();
        let pixel_stride = layout.pixel_stride;
        let scanline_stride = layout.scanline_stride;
        let banks = match tile.buffer_mut() {
            DataBuffer::Byte(banks) => banks.as_mut_slice(),
            other => return Err(RasterError::UnsupportedSampleType(other.sample_type())),
        };
        Ok(Self {
            rect,
            banks,
            bank_indices,
            band_offsets,
            pixel_stride,
            scanline_stride,
        })
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn num_bands(&self) -> usize {
        self.band_offsets.len()
    }

    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }

    pub fn scanline_stride(&self) -> usize {
        self.scanline_stride
    }

    pub fn band_offset(&self, band: usize) -> usize {
        self.band_offsets[band]
    }

    /// Mutable backing array holding `band`
    pub fn band_data_mut(&mut self, band: usize) -> &mut [u8] {
        &mut self.banks[self.bank_indices[band]]
    }

    /// Whether `band` occupies its own bank as one contiguous row-major block,
    /// i.e. a `width * height` scratch buffer can be used in place
    pub fn is_contiguous(&self, band: usize) -> bool {
        let bank_len = self.banks[self.bank_indices[band]].len();
        self.pixel_stride == 1
            && self.scanline_stride == self.rect.width
            && self.band_offsets[band] == 0
            && bank_len == self.rect.area()
    }

    /// Copy a row-major `width * height` buffer into `band`, honouring offset and strides
    pub fn copy_from_contiguous(&mut self, band: usize, src: &[u8]) -> RasterResult<()> {
        let (width, height) = (self.rect.width, self.rect.height);
        if src.len() != width * height {
            return Err(RasterError::InvalidLayout(format!(
                "Source buffer holds {} samples, expected {}",
                src.len(),
                width * height
            )));
        }
        let offset = self.band_offsets[band];
        let (pixel_stride, scanline_stride) = (self.pixel_stride, self.scanline_stride);
        let data = self.band_data_mut(band);
        for (row, src_row) in src.chunks_exact(width.max(1)).enumerate().take(height) {
            let mut idx = offset + row * scanline_stride;
            for &value in src_row {
                data[idx] = value;
                idx += pixel_stride;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SampleLayout, SampleType};

    #[test]
    fn test_rejects_non_byte_tiles() {
        let tile = Tile::banded(Rect::new(0, 0, 2, 2), 1, SampleType::UShort);
        assert!(matches!(
            ByteAccessor::new(&tile),
            Err(RasterError::UnsupportedSampleType(SampleType::UShort))
        ));

        let mut tile = Tile::banded(Rect::new(0, 0, 2, 2), 1, SampleType::Float);
        assert!(matches!(
            ByteAccessorMut::new(&mut tile),
            Err(RasterError::UnsupportedSampleType(SampleType::Float))
        ));
    }

    #[test]
    fn test_sub_rect_offsets() {
        let tile = Tile::interleaved(Rect::new(10, 20, 4, 4), 3, SampleType::Byte);
        let acc = ByteAccessor::with_rect(&tile, Rect::new(11, 22, 2, 2)).unwrap();
        // row 2 * (4 * 3) + col 1 * 3
        assert_eq!(acc.band_offset(0), 27);
        assert_eq!(acc.band_offset(2), 29);
        assert_eq!(acc.pixel_stride(), 3);
        assert_eq!(acc.scanline_stride(), 12);

        assert!(ByteAccessor::with_rect(&tile, Rect::new(12, 22, 3, 2)).is_err());
    }

    #[test]
    fn test_copy_from_contiguous_into_interleaved_band() {
        let rect = Rect::new(0, 0, 2, 2);
        let mut tile = Tile::new(rect, SampleLayout::pixel_interleaved(2, 2), SampleType::Byte);
        {
            let mut acc = ByteAccessorMut::new(&mut tile).unwrap();
            assert!(!acc.is_contiguous(1));
            acc.copy_from_contiguous(1, &[1, 2, 3, 4]).unwrap();
        }
        assert_eq!(tile.band_bytes(0).unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(tile.band_bytes(1).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_banded_single_tile_is_contiguous() {
        let mut tile = Tile::banded(Rect::new(5, 5, 3, 2), 1, SampleType::Byte);
        let acc = ByteAccessorMut::new(&mut tile).unwrap();
        assert!(acc.is_contiguous(0));
    }
}
