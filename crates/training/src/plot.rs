//! Minimal metric chart: one panel per series, raw values faint, smoothed solid.
//! Each panel is keyed by a color swatch and the metric name.

use std::path::Path;

use image::{Rgb, RgbImage};

use crate::metrics::{smooth, MetricLog};

const PANEL_W: u32 = 640;
const PANEL_H: u32 = 180;
const MARGIN: u32 = 16;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([96, 96, 96]);
const TICK: Rgb<u8> = Rgb([220, 220, 220]);
const PALETTE: [[u8; 3]; 6] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
];

/// Label glyphs are 3x5 cells drawn at this many pixels per cell.
const GLYPH_SCALE: u32 = 2;
const LABEL_TOP: u32 = 3;
const SWATCH: u32 = 8;

/// Render every series of `logs` into a PNG at `path`.
///
/// The x axis is measured in epochs (`steps_per_epoch` values per epoch, one
/// faint tick per epoch); `smoothing` is the moving-average window.
pub fn pretty_plot(
    logs: &MetricLog,
    steps_per_epoch: usize,
    smoothing: usize,
    path: &Path,
) -> anyhow::Result<()> {
    let series: Vec<(&str, &[f64])> = logs.iter().filter(|(_, v)| !v.is_empty()).collect();
    let panels = series.len().max(1) as u32;
    let mut img = RgbImage::from_pixel(PANEL_W, panels * PANEL_H, BACKGROUND);

    for (i, (name, values)) in series.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let top = i as u32 * PANEL_H;
        label(&mut img, top, name, Rgb(color));
        let frame = Frame::new(top, values, steps_per_epoch.max(1));
        frame.axes(&mut img);
        frame.polyline(&mut img, values, faint(color));
        frame.polyline(&mut img, &smooth(values, smoothing), Rgb(color));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    img.save(path)?;
    Ok(())
}

/// Swatch in the series color followed by the metric name, above the plot area.
fn label(img: &mut RgbImage, panel_top: u32, name: &str, color: Rgb<u8>) {
    let y0 = panel_top + LABEL_TOP;
    for dy in 0..SWATCH {
        for dx in 0..SWATCH {
            img.put_pixel(MARGIN + dx, y0 + 1 + dy, color);
        }
    }
    let mut x0 = MARGIN + SWATCH + 4;
    for ch in name.chars() {
        if x0 + 3 * GLYPH_SCALE > PANEL_W - MARGIN {
            break;
        }
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..3u32 {
                if bits & (4 >> col) == 0 {
                    continue;
                }
                for dy in 0..GLYPH_SCALE {
                    for dx in 0..GLYPH_SCALE {
                        let x = x0 + col * GLYPH_SCALE + dx;
                        let y = y0 + row as u32 * GLYPH_SCALE + dy;
                        img.put_pixel(x, y, AXIS);
                    }
                }
            }
        }
        x0 += 4 * GLYPH_SCALE;
    }
}

/// Rows of a 3x5 bitmap glyph, bit 2 being the left column.
fn glyph(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        'A' => [2, 5, 7, 5, 5],
        'B' => [6, 5, 6, 5, 6],
        'C' => [3, 4, 4, 4, 3],
        'D' => [6, 5, 5, 5, 6],
        'E' => [7, 4, 6, 4, 7],
        'F' => [7, 4, 6, 4, 4],
        'G' => [3, 4, 5, 5, 3],
        'H' => [5, 5, 7, 5, 5],
        'I' => [7, 2, 2, 2, 7],
        'J' => [1, 1, 1, 5, 2],
        'K' => [5, 5, 6, 5, 5],
        'L' => [4, 4, 4, 4, 7],
        'M' => [5, 7, 7, 5, 5],
        'N' => [6, 5, 5, 5, 5],
        'O' => [2, 5, 5, 5, 2],
        'P' => [6, 5, 6, 4, 4],
        'Q' => [2, 5, 5, 6, 3],
        'R' => [6, 5, 6, 5, 5],
        'S' => [3, 4, 2, 1, 6],
        'T' => [7, 2, 2, 2, 2],
        'U' => [5, 5, 5, 5, 7],
        'V' => [5, 5, 5, 5, 2],
        'W' => [5, 5, 7, 7, 5],
        'X' => [5, 5, 2, 5, 5],
        'Y' => [5, 5, 2, 2, 2],
        'Z' => [7, 1, 2, 4, 7],
        '0' => [7, 5, 5, 5, 7],
        '1' => [2, 6, 2, 2, 7],
        '2' => [6, 1, 2, 4, 7],
        '3' => [6, 1, 2, 1, 6],
        '4' => [5, 5, 7, 1, 1],
        '5' => [7, 4, 6, 1, 6],
        '6' => [3, 4, 6, 5, 2],
        '7' => [7, 1, 2, 2, 2],
        '8' => [2, 5, 2, 5, 2],
        '9' => [2, 5, 3, 1, 6],
        '_' => [0, 0, 0, 0, 7],
        '-' => [0, 0, 7, 0, 0],
        '.' => [0, 0, 0, 0, 2],
        ' ' => [0; 5],
        _ => [6, 1, 2, 0, 2],
    }
}

/// Blend towards white, three parts background to one part color.
fn faint(color: [u8; 3]) -> Rgb<u8> {
    Rgb(color.map(|c| ((c as u16 + 3 * 255) / 4) as u8))
}

struct Frame {
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
    lo: f64,
    hi: f64,
    len: usize,
    steps_per_epoch: usize,
}

impl Frame {
    fn new(panel_top: u32, values: &[f64], steps_per_epoch: usize) -> Self {
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let lo = finite.clone().fold(f64::INFINITY, f64::min);
        let hi = finite.fold(f64::NEG_INFINITY, f64::max);
        let (lo, hi) = if lo.is_finite() && hi > lo {
            (lo, hi)
        } else if lo.is_finite() {
            (lo - 0.5, lo + 0.5)
        } else {
            (0.0, 1.0)
        };
        Self {
            left: MARGIN as f64,
            right: (PANEL_W - MARGIN) as f64,
            top: (panel_top + MARGIN) as f64,
            bottom: (panel_top + PANEL_H - MARGIN) as f64,
            lo,
            hi,
            len: values.len(),
            steps_per_epoch,
        }
    }

    fn x(&self, step: usize) -> f64 {
        let span = self.len.saturating_sub(1).max(1) as f64;
        self.left + (self.right - self.left) * step as f64 / span
    }

    fn y(&self, value: f64) -> f64 {
        let t = (value - self.lo) / (self.hi - self.lo);
        self.bottom - (self.bottom - self.top) * t.clamp(0.0, 1.0)
    }

    fn axes(&self, img: &mut RgbImage) {
        let epochs = self.len / self.steps_per_epoch;
        for epoch in 1..=epochs {
            let x = self.x(epoch * self.steps_per_epoch - 1);
            line(img, (x, self.top), (x, self.bottom), TICK);
        }
        line(img, (self.left, self.bottom), (self.right, self.bottom), AXIS);
        line(img, (self.left, self.top), (self.left, self.bottom), AXIS);
    }

    fn polyline(&self, img: &mut RgbImage, values: &[f64], color: Rgb<u8>) {
        let points: Vec<(f64, f64)> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, v)| (self.x(i), self.y(*v)))
            .collect();
        match points.as_slice() {
            [] => {}
            [only] => line(img, *only, *only, color),
            _ => {
                for pair in points.windows(2) {
                    line(img, pair[0], pair[1], color);
                }
            }
        }
    }
}

/// Straight segment by uniform sampling along the longer axis.
fn line(img: &mut RgbImage, from: (f64, f64), to: (f64, f64), color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs()).ceil().max(1.0) as usize;
    for s in 0..=steps {
        let t = s as f64 / steps as f64;
        let x = (from.0 + (to.0 - from.0) * t).round();
        let y = (from.1 + (to.1 - from.1) * t).round();
        if x >= 0.0 && y >= 0.0 && (x as u32) < w && (y as u32) < h {
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}
