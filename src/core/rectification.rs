use std::sync::Arc;

use crate::core::operator::{check_bounds, RasterImage, TileOperator};
use crate::core::tile_accessor::{ByteAccessor, ByteAccessorMut};
use crate::core::tile_layout::ImageLayout;
use crate::types::{RasterError, RasterResult, Rect, SampleType, Tile};

/// Paired source/destination coordinates, flattened as x0, y0, x1, y1, ...
#[derive(Debug, Clone, PartialEq)]
pub struct RectificationGrid {
    pub source_coords: Vec<f32>,
    pub dest_coords: Vec<f32>,
    pub num_coords: usize,
}

/// 0, step, 2*step, ... below `size`, always ending at `size - 1`
fn grid_positions(size: usize, step: usize) -> RasterResult<Vec<usize>> {
    if step == 0 || size == 0 {
        return Err(RasterError::InvalidLayout(format!(
            "Grid of size {} with step {}",
            size, step
        )));
    }
    let mut positions: Vec<usize> = (0..size).step_by(step).collect();
    if positions.last() != Some(&(size - 1)) {
        positions.push(size - 1);
    }
    Ok(positions)
}

impl RectificationGrid {
    fn build<F>(width: usize, height: usize, step: usize, dest_of: F) -> RasterResult<Self>
    where
        F: Fn(f64, f64) -> (f64, f64),
    {
        let xs = grid_positions(width, step)?;
        let ys = grid_positions(height, step)?;
        let num_coords = xs.len() * ys.len();
        let mut source_coords = Vec::with_capacity(2 * num_coords);
        let mut dest_coords = Vec::with_capacity(2 * num_coords);
        for &y in &ys {
            for &x in &xs {
                let (x, y) = (x as f64, y as f64);
                let (dx, dy) = dest_of(x, y);
                source_coords.push(x as f32);
                source_coords.push(y as f32);
                dest_coords.push(dx as f32);
                dest_coords.push(dy as f32);
            }
        }
        Ok(Self {
            source_coords,
            dest_coords,
            num_coords,
        })
    }

    /// Identity correspondence sampled every `step` pixels
    pub fn regular(width: usize, height: usize, step: usize) -> RasterResult<Self> {
        Self::build(width, height, step, |x, y| (x, y))
    }

    /// Synthetic distortion for test fixtures: the destination is rotated by
    /// 20 degrees about the image centre and then stretched vertically by
    /// `0.6 + 0.2 * (y / height)^2`
    pub fn test_grid(width: usize, height: usize, step: usize) -> RasterResult<Self> {
        let (sin, cos) = 20.0f64.to_radians().sin_cos();
        let (cx, cy) = (0.5 * width as f64, 0.5 * height as f64);
        let h = height as f64;
        Self::build(width, height, step, move |x, y| {
            let (dx, dy) = (x - cx, y - cy);
            let xr = cx + dx * cos - dy * sin;
            let yr = cy + dx * sin + dy * cos;
            let stretch = 0.6 + 0.2 * (y / h) * (y / h);
            (xr, yr * stretch)
        })
    }
}

/// Number of terms of a full 2D polynomial of `degree`
pub fn num_terms(degree: usize) -> usize {
    (degree + 1) * (degree + 2) / 2
}

/// Terms 1, x, y, x^2, xy, y^2, x^3, ...
fn polynomial_terms(x: f64, y: f64, degree: usize, out: &mut Vec<f64>) {
    out.clear();
    for i in 0..=degree {
        for j in 0..=i {
            out.push(x.powi((i - j) as i32) * y.powi(j as i32));
        }
    }
}

/// 2D polynomial mapping evaluated on pre-scaled coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialWarp {
    pub degree: usize,
    /// Input pre-scale factors (x, y)
    pub pre_scale: (f64, f64),
    pub x_coeffs: Vec<f64>,
    pub y_coeffs: Vec<f64>,
}

impl PolynomialWarp {
    pub fn map(&self, x: f64, y: f64) -> (f64, f64) {
        let (u, v) = (x * self.pre_scale.0, y * self.pre_scale.1);
        let mut terms = Vec::with_capacity(self.x_coeffs.len());
        polynomial_terms(u, v, self.degree, &mut terms);
        let mx = terms.iter().zip(&self.x_coeffs).map(|(t, c)| t * c).sum();
        let my = terms.iter().zip(&self.y_coeffs).map(|(t, c)| t * c).sum();
        (mx, my)
    }
}

/// Fits a polynomial through point correspondences
pub trait WarpFitter: Send + Sync {
    /// Polynomial of `degree` mapping `from` points onto `to` points
    fn fit(&self, from: &[f32], to: &[f32], degree: usize) -> RasterResult<PolynomialWarp>;
}

/// Least-squares fit via the normal equations
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastSquaresFitter;

/// Solve `left * X = right` in place by Gaussian elimination with partial
/// pivoting; `right` holds the right-hand side columns row by row
fn solve_linear(mut left: Vec<Vec<f64>>, mut right: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let n = left.len();
    let cols = right.first().map_or(0, Vec::len);

    for k in 0..n {
        let pivot = (k..n).max_by(|&a, &b| left[a][k].abs().total_cmp(&left[b][k].abs()))?;
        if left[pivot][k].abs() < 1e-12 {
            return None;
        }
        left.swap(pivot, k);
        right.swap(pivot, k);

        let a1 = left[k][k];
        for j in k..n {
            left[k][j] /= a1;
        }
        for c in 0..cols {
            right[k][c] /= a1;
        }

        for i in (k + 1)..n {
            let f = left[i][k];
            if f == 0.0 {
                continue;
            }
            for j in k..n {
                left[i][j] -= f * left[k][j];
            }
            for c in 0..cols {
                right[i][c] -= f * right[k][c];
            }
        }
    }

    let mut result = vec![vec![0.0; cols]; n];
    for c in 0..cols {
        for m in (0..n).rev() {
            let mut value = right[m][c];
            for j in (m + 1)..n {
                value -= left[m][j] * result[j][c];
            }
            result[m][c] = value;
        }
    }
    Some(result)
}

impl WarpFitter for LeastSquaresFitter {
    fn fit(&self, from: &[f32], to: &[f32], degree: usize) -> RasterResult<PolynomialWarp> {
        if from.len() != to.len() || from.len() % 2 != 0 {
            return Err(RasterError::Processing(format!(
                "Coordinate arrays of length {} and {} do not pair up",
                from.len(),
                to.len()
            )));
        }
        let count = from.len() / 2;
        let n = num_terms(degree);
        if count < n {
            return Err(RasterError::Processing(format!(
                "Degree {} warp needs {} correspondences, got {}",
                degree, n, count
            )));
        }

        let max_abs = |offset: usize| {
            from.iter()
                .skip(offset)
                .step_by(2)
                .fold(1.0f64, |m, &v| m.max((v as f64).abs()))
        };
        let pre_scale = (1.0 / max_abs(0), 1.0 / max_abs(1));

        let mut normal = vec![vec![0.0; n]; n];
        let mut rhs = vec![vec![0.0; 2]; n];
        let mut terms = Vec::with_capacity(n);
        for (p, q) in from.chunks_exact(2).zip(to.chunks_exact(2)) {
            polynomial_terms(p[0] as f64 * pre_scale.0, p[1] as f64 * pre_scale.1, degree, &mut terms);
            for i in 0..n {
                for j in 0..n {
                    normal[i][j] += terms[i] * terms[j];
                }
                rhs[i][0] += terms[i] * q[0] as f64;
                rhs[i][1] += terms[i] * q[1] as f64;
            }
        }

        let solution = solve_linear(normal, rhs).ok_or_else(|| {
            RasterError::Processing(format!("Singular system fitting degree {} warp", degree))
        })?;
        Ok(PolynomialWarp {
            degree,
            pre_scale,
            x_coeffs: solution.iter().map(|row| row[0]).collect(),
            y_coeffs: solution.iter().map(|row| row[1]).collect(),
        })
    }
}

/// Geometric transform fitted from a rectification grid
#[derive(Debug, Clone)]
pub struct RectificationWarp {
    /// Destination pixel -> source pixel
    pub forward: PolynomialWarp,
    /// Source pixel -> destination pixel
    pub inverse: PolynomialWarp,
}

impl RectificationWarp {
    pub fn from_grid(grid: &RectificationGrid, degree: usize, fitter: &dyn WarpFitter) -> RasterResult<Self> {
        log::debug!(
            "Fitting degree {} warp through {} correspondences",
            degree,
            grid.num_coords
        );
        Ok(Self {
            forward: fitter.fit(&grid.dest_coords, &grid.source_coords, degree)?,
            inverse: fitter.fit(&grid.source_coords, &grid.dest_coords, degree)?,
        })
    }

    pub fn map_to_source(&self, x: f64, y: f64) -> (f64, f64) {
        self.forward.map(x, y)
    }

    pub fn map_to_dest(&self, x: f64, y: f64) -> (f64, f64) {
        self.inverse.map(x, y)
    }
}

/// Nearest-neighbour resampling of a byte image through a [`RectificationWarp`]
pub struct RectifyOperator {
    source: Arc<dyn RasterImage>,
    warp: RectificationWarp,
    background: u8,
    layout: ImageLayout,
}

impl RectifyOperator {
    /// `dest_layout` gives the output geometry; bands follow the source
    pub fn new(
        source: Arc<dyn RasterImage>,
        warp: RectificationWarp,
        dest_layout: &ImageLayout,
        background: u8,
    ) -> RasterResult<Self> {
        let src_layout = source.layout();
        if src_layout.sample_type() != SampleType::Byte {
            return Err(RasterError::UnsupportedSampleType(src_layout.sample_type()));
        }
        let layout = dest_layout.derive(src_layout.num_bands(), SampleType::Byte);
        Ok(Self {
            source,
            warp,
            background,
            layout,
        })
    }

    pub fn warp(&self) -> &RectificationWarp {
        &self.warp
    }
}

impl TileOperator for RectifyOperator {
    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn compute_tile(&self, rect: Rect) -> RasterResult<Tile> {
        check_bounds(&self.layout, rect)?;
        let src_bounds = self.source.layout().bounds();

        // source pixel of every destination pixel centre, None outside the source
        let positions: Vec<Option<(i64, i64)>> = (0..rect.height)
            .flat_map(|row| (0..rect.width).map(move |col| (col, row)))
            .map(|(col, row)| {
                let x = rect.x as f64 + col as f64 + 0.5;
                let y = rect.y as f64 + row as f64 + 0.5;
                let (sx, sy) = self.warp.map_to_source(x, y);
                if !(sx.is_finite() && sy.is_finite()) {
                    return None;
                }
                let (px, py) = (sx.floor() as i64, sy.floor() as i64);
                src_bounds.contains(px, py).then_some((px, py))
            })
            .collect();

        let bbox = positions
            .iter()
            .flatten()
            .fold(None, |acc: Option<(i64, i64, i64, i64)>, &(px, py)| {
                Some(match acc {
                    None => (px, py, px, py),
                    Some((x0, y0, x1, y1)) => (x0.min(px), y0.min(py), x1.max(px), y1.max(py)),
                })
            });
        let source_tile = match bbox {
            Some((x0, y0, x1, y1)) => {
                let src_rect = Rect::new(
                    x0 as i32,
                    y0 as i32,
                    (x1 - x0 + 1) as usize,
                    (y1 - y0 + 1) as usize,
                );
                Some(self.source.get_data(src_rect)?)
            }
            None => None,
        };

        let mut dest = Tile::banded(rect, self.layout.num_bands(), SampleType::Byte);
        let mut dst = ByteAccessorMut::new(&mut dest)?;
        for band in 0..dst.num_bands() {
            let offset = dst.band_offset(band);
            dst.band_data_mut(band)[offset..offset + rect.area()].fill(self.background);
        }

        if let Some(source_tile) = &source_tile {
            let src = ByteAccessor::new(source_tile)?;
            let origin = source_tile.rect();
            let (x0, y0) = (origin.x as i64, origin.y as i64);
            for band in 0..dst.num_bands() {
                let src_data = src.band_data(band);
                let src_offset = src.band_offset(band);
                let dst_offset = dst.band_offset(band);
                let dst_data = dst.band_data_mut(band);
                for (i, pos) in positions.iter().enumerate() {
                    if let Some((px, py)) = pos {
                        let s = src_offset
                            + (py - y0) as usize * src.scanline_stride()
                            + (px - x0) as usize * src.pixel_stride();
                        dst_data[dst_offset + i] = src_data[s];
                    }
                }
            }
        }
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::raster_source::ArrayRaster;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    #[test]
    fn test_grid_positions_include_last_pixel() {
        assert_eq!(grid_positions(10, 4).unwrap(), vec![0, 4, 8, 9]);
        assert_eq!(grid_positions(9, 4).unwrap(), vec![0, 4, 8]);
        assert!(grid_positions(10, 0).is_err());
    }

    #[test]
    fn test_regular_grid_is_identity() {
        let grid = RectificationGrid::regular(100, 50, 25).unwrap();
        assert_eq!(grid.num_coords, 5 * 3);
        assert_eq!(grid.source_coords, grid.dest_coords);
    }

    #[test]
    fn test_test_grid_math() {
        let grid = RectificationGrid::test_grid(200, 100, 50).unwrap();
        // first point (0, 0): rotate about (100, 50), stretch factor 0.6
        let a = 20.0f64.to_radians();
        let xr = 100.0 + (-100.0) * a.cos() - (-50.0) * a.sin();
        let yr = 50.0 + (-100.0) * a.sin() + (-50.0) * a.cos();
        assert_abs_diff_eq!(grid.dest_coords[0] as f64, xr, epsilon = 1e-3);
        assert_abs_diff_eq!(grid.dest_coords[1] as f64, yr * 0.6, epsilon = 1e-3);
        // centre point (100, 50) stays put horizontally, stretch 0.65
        let centre = 5 + 2; // row y=50, column x=100
        assert_abs_diff_eq!(grid.dest_coords[2 * centre] as f64, 100.0, epsilon = 1e-4);
        assert_abs_diff_eq!(grid.dest_coords[2 * centre + 1] as f64, 50.0 * 0.65, epsilon = 1e-4);
    }

    #[test]
    fn test_solve_linear() {
        // 2x + y = 5, x + 3y = 10
        let solution = solve_linear(vec![vec![2.0, 1.0], vec![1.0, 3.0]], vec![vec![5.0], vec![10.0]]).unwrap();
        assert_abs_diff_eq!(solution[0][0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(solution[1][0], 3.0, epsilon = 1e-12);
        assert!(solve_linear(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![vec![1.0], vec![2.0]]).is_none());
    }

    #[test]
    fn test_cubic_fit_reproduces_test_grid() {
        // rotation then y-dependent stretch is a cubic in (x, y)
        let grid = RectificationGrid::test_grid(512, 512, 64).unwrap();
        let warp = RectificationWarp::from_grid(&grid, 3, &LeastSquaresFitter).unwrap();
        for (s, d) in grid.source_coords.chunks_exact(2).zip(grid.dest_coords.chunks_exact(2)) {
            let (x, y) = warp.map_to_dest(s[0] as f64, s[1] as f64);
            assert_abs_diff_eq!(x, d[0] as f64, epsilon = 1e-2);
            assert_abs_diff_eq!(y, d[1] as f64, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_too_few_correspondences() {
        let grid = RectificationGrid::regular(2, 2, 1).unwrap();
        assert!(matches!(
            RectificationWarp::from_grid(&grid, 2, &LeastSquaresFitter),
            Err(RasterError::Processing(_))
        ));
    }

    #[test]
    fn test_rectify_identity_and_shift() {
        let band = Array2::from_shape_fn((8, 8), |(r, c)| (r * 8 + c) as u8);
        let source: Arc<dyn RasterImage> = Arc::new(ArrayRaster::from_band("b", band, 8, 8).unwrap());
        let layout = source.layout().clone();

        let identity = RectificationWarp::from_grid(
            &RectificationGrid::regular(8, 8, 2).unwrap(),
            1,
            &LeastSquaresFitter,
        )
        .unwrap();
        let op = RectifyOperator::new(Arc::clone(&source), identity, &layout, 0).unwrap();
        let tile = op.compute_tile(Rect::new(2, 2, 4, 4)).unwrap();
        assert_eq!(tile.byte_sample(3, 4, 0), Some(4 * 8 + 3));

        // destination x maps to source x + 6: the right half falls outside
        let mut shifted = op.warp().clone();
        shifted.forward.x_coeffs[0] += 6.0;
        let op = RectifyOperator::new(source, shifted, &layout, 255).unwrap();
        let tile = op.compute_tile(Rect::new(0, 0, 4, 1)).unwrap();
        assert_eq!(tile.band_bytes(0).unwrap(), vec![6, 7, 255, 255]);
    }

    #[test]
    fn test_rectify_non_finite_positions_get_background() {
        let band = Array2::from_elem((4, 4), 9u8);
        let source: Arc<dyn RasterImage> = Arc::new(ArrayRaster::from_band("b", band, 4, 4).unwrap());
        let layout = source.layout().clone();
        let mut warp = RectificationWarp::from_grid(
            &RectificationGrid::regular(4, 4, 1).unwrap(),
            1,
            &LeastSquaresFitter,
        )
        .unwrap();
        warp.forward.x_coeffs[0] = f64::NAN;
        let op = RectifyOperator::new(source, warp, &layout, 42).unwrap();
        let tile = op.compute_tile(Rect::new(0, 0, 4, 1)).unwrap();
        assert_eq!(tile.band_bytes(0).unwrap(), vec![42; 4]);
    }
}
