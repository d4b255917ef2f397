//! Image grids for eyeballing batches: tile `[N, C, H, W]` into one picture.

use std::path::Path;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use image::{GrayImage, RgbImage};

pub const DEFAULT_NROW: usize = 8;
pub const DEFAULT_PADDING: usize = 2;

/// One tiled image in CHW layout, values in `[0, 1]` when normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

/// Tile `n` images of shape `[c, h, w]` into rows of `nrow`, separated by `padding` zeros.
///
/// With `normalize`, values are min-max scaled over the whole batch first.
pub fn make_grid(
    images: &[f32],
    shape: [usize; 4],
    nrow: usize,
    padding: usize,
    normalize: bool,
) -> Grid {
    let [n, c, h, w] = shape;
    let cols = nrow.max(1).min(n.max(1));
    let rows = n.div_ceil(cols);
    let cell_h = h + padding;
    let cell_w = w + padding;
    let height = rows * cell_h + padding;
    let width = cols * cell_w + padding;
    let mut data = vec![0.0f32; c * height * width];

    let (lo, scale) = if normalize {
        let lo = images.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = images.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (lo, 1.0 / (hi - lo).max(1e-5))
    } else {
        (0.0, 1.0)
    };

    let plane = h * w;
    for k in 0..n {
        let top = (k / cols) * cell_h + padding;
        let left = (k % cols) * cell_w + padding;
        for ch in 0..c {
            let src = &images[(k * c + ch) * plane..(k * c + ch + 1) * plane];
            for y in 0..h {
                let dst = ch * height * width + (top + y) * width + left;
                for x in 0..w {
                    data[dst + x] = (src[y * w + x] - lo) * scale;
                }
            }
        }
    }

    Grid {
        channels: c,
        height,
        width,
        data,
    }
}

/// `make_grid` with the default layout applied to a tensor batch.
pub fn tensor_grid<B: Backend>(images: Tensor<B, 4>) -> anyhow::Result<Grid> {
    let dims = images.dims();
    let values = images
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("image batch is not readable as f32: {e:?}"))?;
    Ok(make_grid(&values, dims, DEFAULT_NROW, DEFAULT_PADDING, true))
}

/// Write a grid as PNG: one channel as grayscale, otherwise the first three as RGB.
pub fn save_image(grid: &Grid, path: &Path) -> anyhow::Result<()> {
    let (w, h) = (grid.width as u32, grid.height as u32);
    let plane = grid.height * grid.width;
    let px = |ch: usize, i: usize| -> u8 { (grid.data[ch * plane + i].clamp(0.0, 1.0) * 255.0).round() as u8 };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    match grid.channels {
        0 => anyhow::bail!("cannot save an image with zero channels"),
        1 | 2 => {
            let img = GrayImage::from_fn(w, h, |x, y| {
                image::Luma([px(0, y as usize * grid.width + x as usize)])
            });
            img.save(path)?;
        }
        _ => {
            let img = RgbImage::from_fn(w, h, |x, y| {
                let i = y as usize * grid.width + x as usize;
                image::Rgb([px(0, i), px(1, i), px(2, i)])
            });
            img.save(path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_layout_matches_rows_and_padding() {
        // 10 images of 1x2x3 -> 8 columns, 2 rows
        let images = vec![0.5f32; 10 * 6];
        let grid = make_grid(&images, [10, 1, 2, 3], 8, 2, false);
        assert_eq!(grid.width, 8 * (3 + 2) + 2);
        assert_eq!(grid.height, 2 * (2 + 2) + 2);
        // padding corner stays zero, first pixel of the first tile is filled
        assert_eq!(grid.data[0], 0.0);
        assert_eq!(grid.data[2 * grid.width + 2], 0.5);
    }

    #[test]
    fn normalize_spans_unit_range() {
        let images = vec![-2.0, 0.0, 2.0, 6.0];
        let grid = make_grid(&images, [1, 1, 2, 2], 8, 0, true);
        assert_eq!(grid.data, vec![0.0, 0.25, 0.5, 1.0]);
    }

    #[test]
    fn saves_gray_and_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let gray = make_grid(&[0.0, 1.0], [2, 1, 1, 1], 8, 1, true);
        let gray_path = dir.path().join("gray.png");
        save_image(&gray, &gray_path).unwrap();
        assert_eq!(image::open(&gray_path).unwrap().color(), image::ColorType::L8);

        let rgb = make_grid(&[0.2; 12], [1, 3, 2, 2], 8, 2, false);
        let rgb_path = dir.path().join("sub").join("rgb.png");
        save_image(&rgb, &rgb_path).unwrap();
        let img = image::open(&rgb_path).unwrap();
        assert_eq!((img.width(), img.height()), (6, 6));
    }
}
