//! Class-per-directory image folders (`<split>/<class>/<image>`).

use crate::aug::{Augment, Distortion};
use crate::types::{DatasetError, DatasetResult, ImageItem, ImageSource};
use image::imageops::FilterType;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Labelled images discovered under a split directory.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    entries: Vec<(PathBuf, usize)>,
    classes: Vec<String>,
    /// Output shape (C, H, W); images are converted and resized to it on load.
    shape: [usize; 3],
    augment: Option<Augment>,
    distortion: Option<Distortion>,
    epoch: Arc<AtomicU64>,
}

impl ImageFolder {
    /// Scan `dir/<class>/*` for images. Classes are the sorted sub-directory names.
    pub fn open(dir: &Path, shape: [usize; 3]) -> DatasetResult<Self> {
        let classes = list_classes(dir)?;
        if classes.is_empty() {
            return Err(DatasetError::NoClasses {
                path: dir.to_path_buf(),
            });
        }
        let mut entries = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let class_dir = dir.join(class);
            let mut files = read_dir_sorted(&class_dir)?
                .into_iter()
                .filter(|p| is_image(p))
                .collect::<Vec<_>>();
            files.sort();
            entries.extend(files.into_iter().map(|p| (p, label)));
        }
        tracing::debug!(
            "indexed {} images in {} classes under {}",
            entries.len(),
            classes.len(),
            dir.display()
        );
        Ok(Self {
            entries,
            classes,
            shape,
            augment: None,
            distortion: None,
            epoch: Arc::default(),
        })
    }

    pub fn from_entries(
        entries: Vec<(PathBuf, usize)>,
        classes: Vec<String>,
        shape: [usize; 3],
    ) -> Self {
        Self {
            entries,
            classes,
            shape,
            augment: None,
            distortion: None,
            epoch: Arc::default(),
        }
    }

    pub fn with_augment(mut self, augment: Option<Augment>) -> Self {
        self.augment = augment;
        self
    }

    pub fn with_distortion(mut self, distortion: Option<Distortion>) -> Self {
        self.distortion = distortion;
        self
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn entries(&self) -> &[(PathBuf, usize)] {
        &self.entries
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }
}

impl ImageSource for ImageFolder {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, index: usize) -> DatasetResult<ImageItem> {
        let (path, label) = self.entries.get(index).ok_or(DatasetError::OutOfRange {
            index,
            len: self.entries.len(),
        })?;
        let mut item = load_image(path, self.shape, *label)?;
        if let Some(distortion) = &self.distortion {
            distortion.apply(&mut item);
        }
        if let Some(augment) = &self.augment {
            augment.apply(&mut item, index, self.epoch.load(Ordering::Relaxed));
        }
        Ok(item)
    }

    fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }
}

/// Decode an image file into CHW floats in `[0, 1]`, converting channels and size.
pub fn load_image(path: &Path, shape: [usize; 3], label: usize) -> DatasetResult<ImageItem> {
    let [channels, height, width] = shape;
    let img = image::open(path).map_err(|source| DatasetError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let img = if img.width() as usize != width || img.height() as usize != height {
        img.resize_exact(width as u32, height as u32, FilterType::Triangle)
    } else {
        img
    };
    let plane = height * width;
    let mut image_chw = vec![0.0f32; channels * plane];
    if channels == 1 {
        let gray = img.to_luma8();
        for (x, y, pixel) in gray.enumerate_pixels() {
            image_chw[y as usize * width + x as usize] = pixel[0] as f32 / 255.0;
        }
    } else {
        let rgb = img.to_rgb8();
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let base = y as usize * width + x as usize;
            for c in 0..channels.min(3) {
                image_chw[c * plane + base] = pixel[c] as f32 / 255.0;
            }
        }
    }
    Ok(ImageItem {
        image_chw,
        channels,
        height,
        width,
        label,
    })
}

fn list_classes(dir: &Path) -> DatasetResult<Vec<String>> {
    let mut classes = read_dir_sorted(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .filter_map(|p| p.file_name().and_then(|s| s.to_str()).map(str::to_string))
        .collect::<Vec<_>>();
    classes.sort();
    Ok(classes)
}

fn read_dir_sorted(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let io_err = |source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        out.push(entry.map_err(io_err)?.path());
    }
    out.sort();
    Ok(out)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}
