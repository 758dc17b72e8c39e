//! Plotting buffer for cell code.
//!
//! Cells call `figure()`, `plot(..)`, `scatter(..)` and `bar(..)` to build
//! figures in a per-kernel buffer. After a run the worker drains the buffer
//! with [`FigureBuffer::take_png`], which rasterises every figure to PNG and
//! leaves the buffer empty so images are never re-emitted by the next run.

mod render;
mod style;

use std::sync::OnceLock;

pub use style::{PlotStyle, parse_hex_color};

/// Environment variable that selects the plot backend for the process.
pub const PLOT_BACKEND_ENV: &str = "LUNA_PLOT_BACKEND";

/// How figures are turned into output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotBackend {
    /// Headless PNG rasterisation.
    Png,
    /// Figures are discarded.
    Disabled,
}

impl PlotBackend {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" | "agg" | "raster" => Some(Self::Png),
            "none" | "off" | "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

static BACKEND: OnceLock<PlotBackend> = OnceLock::new();

/// Select the process-wide plot backend.
///
/// A backend chosen externally through `LUNA_PLOT_BACKEND` wins over
/// `default`. Only the first call has an effect; later calls return the
/// backend already in force.
pub fn init_backend(default: PlotBackend) -> PlotBackend {
    *BACKEND.get_or_init(|| {
        let external = std::env::var(PLOT_BACKEND_ENV)
            .ok()
            .and_then(|v| PlotBackend::from_env_value(&v));
        let backend = external.unwrap_or(default);
        tracing::debug!("Plot backend: {:?}", backend);
        backend
    })
}

/// The backend in force, initialising it with [`PlotBackend::Png`] if needed.
pub fn backend() -> PlotBackend {
    init_backend(PlotBackend::Png)
}

/// How a series is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Line,
    Scatter,
    Bar,
}

/// One data series within a figure.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub kind: SeriesKind,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

/// A figure: a set of series sharing one pair of axes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Figure {
    pub series: Vec<Series>,
}

/// Figures produced by the current namespace and not yet collected.
#[derive(Debug, Default)]
pub struct FigureBuffer {
    figures: Vec<Figure>,
}

impl FigureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new, empty figure.
    pub fn new_figure(&mut self) {
        self.figures.push(Figure::default());
    }

    /// Add a series to the current figure, opening one if none exists.
    pub fn add_series(&mut self, series: Series) {
        if self.figures.is_empty() {
            self.new_figure();
        }
        if let Some(current) = self.figures.last_mut() {
            current.series.push(series);
        }
    }

    pub fn len(&self) -> usize {
        self.figures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }

    pub fn clear(&mut self) {
        self.figures.clear();
    }

    /// Render every non-empty figure to PNG and clear the buffer.
    ///
    /// Figures that fail to encode are logged and skipped.
    pub fn take_png(&mut self, style: &PlotStyle) -> Vec<Vec<u8>> {
        let figures = std::mem::take(&mut self.figures);
        if backend() == PlotBackend::Disabled {
            return Vec::new();
        }

        let resolved = style.resolve();
        figures
            .iter()
            .filter(|figure| !figure.series.is_empty())
            .filter_map(|figure| match render::render_png(figure, &resolved) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!("Failed to render figure: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(ys: &[f64]) -> Series {
        Series {
            kind: SeriesKind::Line,
            xs: (0..ys.len()).map(|i| i as f64).collect(),
            ys: ys.to_vec(),
        }
    }

    #[test]
    fn test_add_series_opens_figure() {
        let mut buffer = FigureBuffer::new();
        buffer.add_series(line(&[1.0, 2.0]));
        buffer.add_series(line(&[3.0, 4.0]));
        assert_eq!(buffer.len(), 1);

        buffer.new_figure();
        buffer.add_series(line(&[5.0]));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_take_png_clears_buffer() {
        let mut buffer = FigureBuffer::new();
        buffer.add_series(line(&[1.0, 4.0, 9.0]));
        buffer.new_figure();

        let images = buffer.take_png(&PlotStyle::default());
        assert!(buffer.is_empty());
        // The trailing empty figure is not rendered.
        if backend() == PlotBackend::Png {
            assert_eq!(images.len(), 1);
            assert_eq!(&images[0][..8], b"\x89PNG\r\n\x1a\n");
        }

        assert!(buffer.take_png(&PlotStyle::default()).is_empty());
    }

    #[test]
    fn test_backend_env_values() {
        assert_eq!(PlotBackend::from_env_value("PNG"), Some(PlotBackend::Png));
        assert_eq!(PlotBackend::from_env_value(" off "), Some(PlotBackend::Disabled));
        assert_eq!(PlotBackend::from_env_value("qt"), None);
    }
}
