use std::sync::Arc;

use crate::core::operator::{check_bounds, TileOperator};
use crate::core::tile_accessor::ByteAccessorMut;
use crate::core::tile_layout::ImageLayout;
use crate::io::expression::{BooleanTerm, ExpressionEvaluator};
use crate::types::{RasterError, RasterResult, Rect, SampleType, Tile};

/// Valid-pixel mask of a raster: 1 where the validity expression holds, 0 elsewhere
pub struct ValidityMaskOperator {
    expression: String,
    term: Arc<dyn BooleanTerm>,
    layout: ImageLayout,
}

impl ValidityMaskOperator {
    /// Parse `expression` once; the operator is reused for every tile of the raster
    pub fn new(
        raster_layout: &ImageLayout,
        expression: &str,
        evaluator: &dyn ExpressionEvaluator,
    ) -> RasterResult<Self> {
        let term = evaluator.parse(expression)?;
        log::info!("Valid mask operator for expression '{}'", expression);
        Ok(Self {
            expression: expression.to_string(),
            term,
            layout: raster_layout.derive(1, SampleType::Byte),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Evaluate the mask into band 0 of `dest`.
    ///
    /// A contiguous `width * height` destination is written in place; any
    /// other layout goes through a scratch buffer copied row by row.
    pub fn compute_into(&self, dest: &mut Tile) -> RasterResult<()> {
        let rect = dest.rect();
        if dest.num_bands() != 1 {
            return Err(RasterError::InvalidLayout(format!(
                "Valid mask destination must have one band, has {}",
                dest.num_bands()
            )));
        }
        let mut acc = ByteAccessorMut::new(dest)?;
        if acc.is_contiguous(0) {
            log::debug!("Valid mask {}: direct write", rect);
            self.term.evaluate_into(rect, 1, 0, acc.band_data_mut(0))
        } else {
            log::debug!("Valid mask {}: scratch buffer", rect);
            let mut scratch = vec![0u8; rect.area()];
            self.term.evaluate_into(rect, 1, 0, &mut scratch)?;
            acc.copy_from_contiguous(0, &scratch)
        }
    }
}

impl TileOperator for ValidityMaskOperator {
    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn compute_tile(&self, rect: Rect) -> RasterResult<Tile> {
        check_bounds(&self.layout, rect)?;
        let mut tile = Tile::banded(rect, 1, SampleType::Byte);
        self.compute_into(&mut tile)?;
        Ok(tile)
    }
}
