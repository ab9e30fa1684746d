//! Vector shapes, pins and their rasterization onto tile rectangles.

use serde::{Deserialize, Serialize};

use crate::types::{RasterResult, Rect};

/// Named point with floating-point pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

impl Pin {
    pub fn new(name: &str, x: f64, y: f64) -> Self {
        Self {
            name: name.to_string(),
            x,
            y,
        }
    }

    /// Integer pixel holding this pin
    pub fn pixel(&self) -> (i64, i64) {
        (self.x.floor() as i64, self.y.floor() as i64)
    }
}

/// Vector shape in pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Rectangle { x: f64, y: f64, width: f64, height: f64 },
    Ellipse { x: f64, y: f64, width: f64, height: f64 },
    Line { x1: f64, y1: f64, x2: f64, y2: f64 },
    /// Closed polygon
    Polygon(Vec<(f64, f64)>),
    /// Open path
    Polyline(Vec<(f64, f64)>),
}

impl Shape {
    /// Lines and open paths enclose no area and are drawn as outlines
    pub fn is_one_dimensional(&self) -> bool {
        matches!(self, Shape::Line { .. } | Shape::Polyline(_))
    }

    /// Vertices of the shape; ellipses are approximated by a polygon
    pub fn vertices(&self) -> Vec<(f64, f64)> {
        match self {
            Shape::Rectangle { x, y, width, height } => vec![
                (*x, *y),
                (x + width, *y),
                (x + width, y + height),
                (*x, y + height),
            ],
            Shape::Ellipse { x, y, width, height } => {
                let (rx, ry) = (width / 2.0, height / 2.0);
                let (cx, cy) = (x + rx, y + ry);
                let steps = ((rx.abs() + ry.abs()) * 2.0).ceil().clamp(16.0, 720.0) as usize;
                (0..steps)
                    .map(|i| {
                        let a = 2.0 * std::f64::consts::PI * i as f64 / steps as f64;
                        (cx + rx * a.cos(), cy + ry * a.sin())
                    })
                    .collect()
            }
            Shape::Line { x1, y1, x2, y2 } => vec![(*x1, *y1), (*x2, *y2)],
            Shape::Polygon(points) | Shape::Polyline(points) => points.clone(),
        }
    }
}

/// Rasterizes a shape into a tile-sized byte buffer (1 inside, 0 outside)
pub trait ShapeRasterizer: Send + Sync {
    fn rasterize(&self, shape: &Shape, rect: Rect) -> RasterResult<Vec<u8>>;
}

/// Scanline rasterizer: even-odd fill sampled at pixel centres for areas,
/// one-pixel DDA outline for one-dimensional shapes
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanlineRasterizer;

impl ScanlineRasterizer {
    fn fill_polygon(points: &[(f64, f64)], rect: Rect, out: &mut [u8]) {
        if points.len() < 3 {
            return;
        }
        let mut crossings: Vec<f64> = Vec::with_capacity(points.len());
        for row in 0..rect.height {
            let sy = rect.y as f64 + row as f64 + 0.5;
            crossings.clear();
            for i in 0..points.len() {
                let (x0, y0) = points[i];
                let (x1, y1) = points[(i + 1) % points.len()];
                // half-open in y so shared vertices are counted once
                if (y0 <= sy && sy < y1) || (y1 <= sy && sy < y0) {
                    crossings.push(x0 + (sy - y0) * (x1 - x0) / (y1 - y0));
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));
            for span in crossings.chunks_exact(2) {
                // pixel centres cx + 0.5 within [span[0], span[1])
                let first = (span[0] - 0.5).ceil() as i64;
                let last = (span[1] - 0.5).ceil() as i64 - 1;
                for px in first.max(rect.x as i64)..=last.min(rect.max_x() - 1) {
                    out[row * rect.width + (px - rect.x as i64) as usize] = 1;
                }
            }
        }
    }

    fn draw_segment(p0: (f64, f64), p1: (f64, f64), rect: Rect, out: &mut [u8]) {
        let (dx, dy) = (p1.0 - p0.0, p1.1 - p0.1);
        let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as usize;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let px = (p0.0 + t * dx).floor() as i64;
            let py = (p0.1 + t * dy).floor() as i64;
            if rect.contains(px, py) {
                let idx = (py - rect.y as i64) as usize * rect.width + (px - rect.x as i64) as usize;
                out[idx] = 1;
            }
        }
    }
}

impl ShapeRasterizer for ScanlineRasterizer {
    fn rasterize(&self, shape: &Shape, rect: Rect) -> RasterResult<Vec<u8>> {
        let mut out = vec![0u8; rect.area()];
        let points = shape.vertices();
        if shape.is_one_dimensional() {
            for pair in points.windows(2) {
                Self::draw_segment(pair[0], pair[1], rect, &mut out);
            }
            if points.len() == 1 {
                Self::draw_segment(points[0], points[0], rect, &mut out);
            }
        } else {
            Self::fill_polygon(&points, rect, &mut out);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangle_fill() {
        let shape = Shape::Rectangle { x: 1.0, y: 1.0, width: 2.0, height: 2.0 };
        let out = ScanlineRasterizer.rasterize(&shape, Rect::new(0, 0, 4, 4)).unwrap();
        #[rustfmt::skip]
        let expected = vec![
            0, 0, 0, 0,
            0, 1, 1, 0,
            0, 1, 1, 0,
            0, 0, 0, 0,
        ];
        assert_eq!(out, expected);
    }

    #[test]
    fn test_fill_is_clipped_to_tile() {
        let shape = Shape::Rectangle { x: 0.0, y: 0.0, width: 10.0, height: 10.0 };
        let out = ScanlineRasterizer.rasterize(&shape, Rect::new(8, 8, 4, 4)).unwrap();
        assert_eq!(out.iter().filter(|&&v| v == 1).count(), 4);
        assert_eq!(out[0], 1);
        assert_eq!(out[15], 0);
    }

    #[test]
    fn test_line_outline() {
        let shape = Shape::Line { x1: 0.5, y1: 0.5, x2: 3.5, y2: 0.5 };
        assert!(shape.is_one_dimensional());
        let out = ScanlineRasterizer.rasterize(&shape, Rect::new(0, 0, 4, 2)).unwrap();
        assert_eq!(out, vec![1, 1, 1, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_pin_pixel_floors_coordinates() {
        assert_eq!(Pin::new("p", 2.9, 0.1).pixel(), (2, 0));
        assert_eq!(Pin::new("q", -0.5, 3.0).pixel(), (-1, 3));
    }
}
