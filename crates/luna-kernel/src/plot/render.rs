//! Headless PNG rasteriser for figures.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageResult, Rgb, RgbImage};

use super::style::ResolvedStyle;
use super::{Figure, SeriesKind};

/// Grid divisions per axis.
const GRID_DIVISIONS: u32 = 4;

/// Render a figure and encode it as PNG.
pub(crate) fn render_png(figure: &Figure, style: &ResolvedStyle) -> ImageResult<Vec<u8>> {
    let canvas = rasterize(figure, style);
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        canvas.as_raw(),
        canvas.width(),
        canvas.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(bytes)
}

/// Pixel rectangle of the axes area.
struct Frame {
    left: i64,
    right: i64,
    top: i64,
    bottom: i64,
}

/// Data-space bounds.
struct Bounds {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

impl Bounds {
    fn of(figure: &Figure) -> Self {
        let mut b = Bounds {
            x_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_min: f64::INFINITY,
            y_max: f64::NEG_INFINITY,
        };

        for series in &figure.series {
            for (&x, &y) in series.xs.iter().zip(&series.ys) {
                if !x.is_finite() || !y.is_finite() {
                    continue;
                }
                b.x_min = b.x_min.min(x);
                b.x_max = b.x_max.max(x);
                b.y_min = b.y_min.min(y);
                b.y_max = b.y_max.max(y);
            }
            if series.kind == SeriesKind::Bar {
                b.y_min = b.y_min.min(0.0);
                b.y_max = b.y_max.max(0.0);
                b.x_min -= 0.5;
                b.x_max += 0.5;
            }
        }

        if !b.x_min.is_finite() || !b.x_max.is_finite() {
            b.x_min = 0.0;
            b.x_max = 1.0;
        }
        if !b.y_min.is_finite() || !b.y_max.is_finite() {
            b.y_min = 0.0;
            b.y_max = 1.0;
        }
        if b.x_max - b.x_min < f64::EPSILON {
            b.x_min -= 1.0;
            b.x_max += 1.0;
        }
        if b.y_max - b.y_min < f64::EPSILON {
            b.y_min -= 1.0;
            b.y_max += 1.0;
        }
        b
    }
}

fn rasterize(figure: &Figure, style: &ResolvedStyle) -> RgbImage {
    let (w, h) = (style.width, style.height);
    let mut img = RgbImage::from_pixel(w, h, style.figure_bg);

    let frame = Frame {
        left: (w as f64 * 0.10) as i64,
        right: (w as f64 * 0.95) as i64,
        top: (h as f64 * 0.05) as i64,
        bottom: (h as f64 * 0.90) as i64,
    };
    fill_rect(&mut img, frame.left, frame.top, frame.right, frame.bottom, style.axes_bg);

    for i in 1..GRID_DIVISIONS {
        let fx = frame.left + (frame.right - frame.left) * i as i64 / GRID_DIVISIONS as i64;
        let fy = frame.top + (frame.bottom - frame.top) * i as i64 / GRID_DIVISIONS as i64;
        draw_line(&mut img, (fx, frame.top), (fx, frame.bottom), 1, style.grid);
        draw_line(&mut img, (frame.left, fy), (frame.right, fy), 1, style.grid);
    }

    // Left and bottom spines.
    draw_line(&mut img, (frame.left, frame.top), (frame.left, frame.bottom), 1, style.edge);
    draw_line(&mut img, (frame.left, frame.bottom), (frame.right, frame.bottom), 1, style.edge);

    let bounds = Bounds::of(figure);
    let to_px = |x: f64, y: f64| -> (i64, i64) {
        let px = frame.left as f64
            + (x - bounds.x_min) / (bounds.x_max - bounds.x_min) * (frame.right - frame.left) as f64;
        let py = frame.bottom as f64
            - (y - bounds.y_min) / (bounds.y_max - bounds.y_min) * (frame.bottom - frame.top) as f64;
        (px.round() as i64, py.round() as i64)
    };

    for (index, series) in figure.series.iter().enumerate() {
        let color = style.palette[index % style.palette.len()];
        let points: Vec<(i64, i64)> = series
            .xs
            .iter()
            .zip(&series.ys)
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|(&x, &y)| to_px(x, y))
            .collect();

        match series.kind {
            SeriesKind::Line => {
                for pair in points.windows(2) {
                    draw_line(&mut img, pair[0], pair[1], style.line_width, color);
                }
                if let [only] = points.as_slice() {
                    stamp(&mut img, *only, style.line_width.max(3), color);
                }
            }
            SeriesKind::Scatter => {
                for &point in &points {
                    stamp(&mut img, point, style.marker_size, color);
                }
            }
            SeriesKind::Bar => {
                let slots = series.xs.len().max(1) as i64;
                let half = ((frame.right - frame.left) / slots * 4 / 10).max(1);
                let (_, baseline) = to_px(0.0, 0.0_f64.clamp(bounds.y_min, bounds.y_max));
                for &(px, py) in &points {
                    fill_rect(&mut img, px - half, py.min(baseline), px + half, py.max(baseline), color);
                }
            }
        }
    }

    img
}

/// Fill an inclusive rectangle, clipped to the canvas.
fn fill_rect(img: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let (xa, xb) = (x0.min(x1).max(0), x0.max(x1).min(w - 1));
    let (ya, yb) = (y0.min(y1).max(0), y0.max(y1).min(h - 1));
    for y in ya..=yb {
        for x in xa..=xb {
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Square brush centred on a point.
fn stamp(img: &mut RgbImage, (x, y): (i64, i64), size: u32, color: Rgb<u8>) {
    let size = size.max(1) as i64;
    let lo = (size - 1) / 2;
    let hi = size / 2;
    fill_rect(img, x - lo, y - lo, x + hi, y + hi, color);
}

/// Bresenham line with a square brush of `width` pixels.
fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), width: u32, color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        stamp(img, (x, y), width, color);
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::Series;

    fn small_style() -> ResolvedStyle {
        ResolvedStyle {
            width: 100,
            height: 80,
            ..ResolvedStyle::default()
        }
    }

    #[test]
    fn test_render_png_decodes_with_expected_size() {
        let figure = Figure {
            series: vec![Series {
                kind: SeriesKind::Line,
                xs: vec![0.0, 1.0, 2.0],
                ys: vec![0.0, 1.0, 4.0],
            }],
        };

        let bytes = render_png(&figure, &small_style()).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (100, 80));
        // Corner pixel is outside the axes and keeps the figure background.
        assert_eq!(*decoded.get_pixel(0, 0), small_style().figure_bg);
    }

    #[test]
    fn test_series_color_reaches_canvas() {
        let style = small_style();
        let figure = Figure {
            series: vec![Series {
                kind: SeriesKind::Bar,
                xs: vec![0.0],
                ys: vec![5.0],
            }],
        };

        let img = rasterize(&figure, &style);
        assert!(img.pixels().any(|p| *p == style.palette[0]));
    }

    #[test]
    fn test_non_finite_points_are_skipped() {
        let figure = Figure {
            series: vec![Series {
                kind: SeriesKind::Scatter,
                xs: vec![f64::NAN, 1.0],
                ys: vec![1.0, f64::INFINITY],
            }],
        };

        // Degenerate bounds must not panic.
        let img = rasterize(&figure, &small_style());
        assert_eq!(img.dimensions(), (100, 80));
    }
}
