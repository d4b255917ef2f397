//! Training-time augmentation and the fixed distortion used to shift a dataset.

use crate::types::ImageItem;
use rand::{Rng, SeedableRng};

/// Light photometric/geometric augmentation applied to training samples only.
#[derive(Debug, Clone)]
pub struct Augment {
    /// Probability of applying a horizontal flip.
    pub flip_horizontal_prob: f32,
    /// Probability of applying a brightness/contrast jitter.
    pub color_jitter_prob: f32,
    /// Max jitter scale for brightness/contrast.
    pub color_jitter_strength: f32,
    /// Seed for deterministic augmentation per (sample, epoch); thread RNG when None.
    pub seed: Option<u64>,
}

impl Default for Augment {
    fn default() -> Self {
        Self {
            flip_horizontal_prob: 0.5,
            color_jitter_prob: 0.3,
            color_jitter_strength: 0.1,
            seed: None,
        }
    }
}

impl Augment {
    pub fn describe(&self) -> String {
        format!(
            "flip_p={:.2} color_jitter_p={:.2} strength={:.2} seed={}",
            self.flip_horizontal_prob,
            self.color_jitter_prob,
            self.color_jitter_strength,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    /// Seeded with the run seed, so it stays reproducible yet varies per epoch.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub fn apply(&self, item: &mut ImageItem, index: usize, epoch: u64) {
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.seed {
            seeded_rng = rand::rngs::StdRng::seed_from_u64(sample_seed(seed, index, epoch));
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };
        maybe_hflip(item, self.flip_horizontal_prob, rng);
        maybe_jitter(
            item,
            self.color_jitter_prob,
            self.color_jitter_strength,
            rng,
        );
    }
}

fn sample_seed(seed: u64, index: usize, epoch: u64) -> u64 {
    seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ epoch.wrapping_mul(0xD1B5_4A32_D192_ED03)
}

pub(crate) fn maybe_hflip(item: &mut ImageItem, prob: f32, rng: &mut dyn rand::RngCore) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let (h, w) = (item.height, item.width);
    for plane in item.image_chw.chunks_exact_mut(h * w) {
        for row in plane.chunks_exact_mut(w) {
            row.reverse();
        }
    }
}

pub(crate) fn maybe_jitter(
    item: &mut ImageItem,
    prob: f32,
    strength: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    for v in item.image_chw.iter_mut() {
        *v = (((*v - 0.5) * contrast + 0.5) * bright).clamp(0.0, 1.0);
    }
}

/// A fixed, seeded input distortion: channel mixing, gamma, then a box blur.
///
/// Applied to every split of a dataset it produces a shifted input
/// distribution over the same labels, which is what the transfer stage
/// is meant to undo.
#[derive(Debug, Clone, PartialEq)]
pub struct Distortion {
    pub mix: [[f32; 3]; 3],
    pub gamma: f32,
    pub blur_radius: usize,
}

impl Distortion {
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut mix = [[0.0f32; 3]; 3];
        for (r, row) in mix.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                let base = if r == c { 0.6 } else { 0.0 };
                *v = base + rng.random_range(0.0..0.4);
            }
            let total: f32 = row.iter().sum();
            for v in row.iter_mut() {
                *v /= total;
            }
        }
        Self {
            mix,
            gamma: rng.random_range(0.5..2.0),
            blur_radius: 1,
        }
    }

    pub fn apply(&self, item: &mut ImageItem) {
        let plane = item.height * item.width;
        if item.channels == 3 {
            let src = item.image_chw.clone();
            for p in 0..plane {
                for (r, row) in self.mix.iter().enumerate() {
                    item.image_chw[r * plane + p] =
                        row[0] * src[p] + row[1] * src[plane + p] + row[2] * src[2 * plane + p];
                }
            }
        }
        for v in item.image_chw.iter_mut() {
            *v = v.clamp(0.0, 1.0).powf(self.gamma);
        }
        if self.blur_radius > 0 {
            box_blur(item, self.blur_radius);
        }
    }
}

fn box_blur(item: &mut ImageItem, radius: usize) {
    let (h, w) = (item.height, item.width);
    let r = radius as isize;
    for plane in item.image_chw.chunks_exact_mut(h * w) {
        let src = plane.to_vec();
        for y in 0..h as isize {
            for x in 0..w as isize {
                let mut acc = 0.0f32;
                let mut n = 0u32;
                for dy in -r..=r {
                    for dx in -r..=r {
                        let (yy, xx) = (y + dy, x + dx);
                        if yy < 0 || xx < 0 || yy >= h as isize || xx >= w as isize {
                            continue;
                        }
                        acc += src[yy as usize * w + xx as usize];
                        n += 1;
                    }
                }
                plane[y as usize * w + x as usize] = acc / n as f32;
            }
        }
    }
}
