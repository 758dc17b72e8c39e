//! Plot style overrides, keyed like matplotlib rcParams.

use std::collections::BTreeMap;

use image::Rgb;

/// A set of `key -> value` style overrides applied while a request runs.
///
/// Unknown keys are kept but ignored by the renderer; malformed values fall
/// back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlotStyle {
    entries: BTreeMap<String, String>,
}

impl PlotStyle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Light theme preset.
    pub fn light() -> Self {
        Self::from_pairs(&[
            ("figure.facecolor", "#ffffff"),
            ("axes.facecolor", "#ffffff"),
            ("axes.edgecolor", "#000000"),
            ("grid.color", "#d4d4d4"),
            ("lines.linewidth", "1.5"),
            ("lines.markersize", "6"),
            ("savefig.dpi", "100"),
        ])
    }

    /// Dark theme preset.
    pub fn dark() -> Self {
        Self::from_pairs(&[
            ("figure.facecolor", "#1e1e1e"),
            ("axes.facecolor", "#1e1e1e"),
            ("axes.edgecolor", "#f0f0f0"),
            ("grid.color", "#3c3c3c"),
            ("lines.linewidth", "1.5"),
            ("lines.markersize", "6"),
            ("savefig.dpi", "100"),
        ])
    }

    fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Resolve into concrete rendering parameters.
    pub(crate) fn resolve(&self) -> ResolvedStyle {
        let mut resolved = ResolvedStyle::default();

        if let Some(c) = self.color("figure.facecolor") {
            resolved.figure_bg = c;
        }
        if let Some(c) = self.color("axes.facecolor") {
            resolved.axes_bg = c;
        }
        if let Some(c) = self.color("axes.edgecolor") {
            resolved.edge = c;
        }
        if let Some(c) = self.color("grid.color") {
            resolved.grid = c;
        }
        if let Some(c) = self.color("lines.color") {
            resolved.palette[0] = c;
        }
        if let Some(w) = self.number("lines.linewidth") {
            resolved.line_width = (w.round() as u32).clamp(1, 16);
        }
        if let Some(m) = self.number("lines.markersize") {
            resolved.marker_size = (m.round() as u32).clamp(1, 32);
        }

        let dpi = self
            .number("figure.dpi")
            .or_else(|| self.number("savefig.dpi"))
            .unwrap_or(100.0)
            .clamp(10.0, 600.0);
        let (w_in, h_in) = self.figsize().unwrap_or((6.4, 4.8));
        resolved.width = ((w_in * dpi).round() as u32).clamp(16, 4096);
        resolved.height = ((h_in * dpi).round() as u32).clamp(16, 4096);

        resolved
    }

    fn color(&self, key: &str) -> Option<Rgb<u8>> {
        let raw = self.get(key)?;
        let parsed = parse_hex_color(raw);
        if parsed.is_none() {
            tracing::debug!("Ignoring unparseable color for {}: {}", key, raw);
        }
        parsed
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
    }

    fn figsize(&self) -> Option<(f64, f64)> {
        let raw = self.get("figure.figsize")?;
        let mut parts = raw
            .trim_matches(|c| c == '(' || c == ')' || c == '[' || c == ']')
            .split(',')
            .map(|p| p.trim().parse::<f64>().ok());
        match (parts.next().flatten(), parts.next().flatten(), parts.next()) {
            (Some(w), Some(h), None) if w > 0.0 && h > 0.0 => Some((w, h)),
            _ => None,
        }
    }
}

impl FromIterator<(String, String)> for PlotStyle {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (alpha is dropped).
pub fn parse_hex_color(raw: &str) -> Option<Rgb<u8>> {
    let hex = raw.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 | 8 => hex[..6].to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(expanded.get(i..i + 2)?, 16).ok();
    Some(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

/// Concrete parameters consumed by the rasteriser.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedStyle {
    pub figure_bg: Rgb<u8>,
    pub axes_bg: Rgb<u8>,
    pub edge: Rgb<u8>,
    pub grid: Rgb<u8>,
    pub palette: [Rgb<u8>; 6],
    pub line_width: u32,
    pub marker_size: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for ResolvedStyle {
    fn default() -> Self {
        Self {
            figure_bg: Rgb([255, 255, 255]),
            axes_bg: Rgb([255, 255, 255]),
            edge: Rgb([0, 0, 0]),
            grid: Rgb([212, 212, 212]),
            palette: [
                Rgb([0x1f, 0x77, 0xb4]),
                Rgb([0xff, 0x7f, 0x0e]),
                Rgb([0x2c, 0xa0, 0x2c]),
                Rgb([0xd6, 0x27, 0x28]),
                Rgb([0x94, 0x67, 0xbd]),
                Rgb([0x8c, 0x56, 0x4b]),
            ],
            line_width: 2,
            marker_size: 6,
            width: 640,
            height: 480,
        }
    }
}
