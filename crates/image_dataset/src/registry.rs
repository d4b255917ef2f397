//! Named dataset registry: resolves a `DatasetKind` to train/valid/test sources.

use crate::aug::{Augment, Distortion};
use crate::folder::ImageFolder;
use crate::shapes::ShapesSource;
use crate::types::{DatasetKind, DatasetResult, ImageSource};
use rand::{seq::SliceRandom, SeedableRng};
use std::path::Path;
use std::sync::Arc;

const HOLDOUT_SEED: u64 = 0;
const HOLDOUT_FRACTION: f32 = 0.1;
const DISTORTION_SEED: u64 = 1234;
const SHAPES_TRAIN_LEN: usize = 2048;
const SHAPES_EVAL_LEN: usize = 512;

/// Train/valid/test splits of one classification dataset plus its metadata.
#[derive(Clone)]
pub struct ClassificationDataset {
    pub kind: DatasetKind,
    pub train_set: Arc<dyn ImageSource>,
    pub valid_set: Arc<dyn ImageSource>,
    pub test_set: Arc<dyn ImageSource>,
    pub in_channels: usize,
    pub num_classes: usize,
    /// (C, H, W)
    pub input_shape: [usize; 3],
    pub classes: Vec<String>,
}

impl std::fmt::Debug for ClassificationDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassificationDataset")
            .field("kind", &self.kind)
            .field("train", &self.train_set.len())
            .field("valid", &self.valid_set.len())
            .field("test", &self.test_set.len())
            .field("input_shape", &self.input_shape)
            .field("classes", &self.classes)
            .finish()
    }
}

/// Load a named dataset from `root/<folder>/{train,valid,test}`.
///
/// A missing `valid/` split is carved out of `train/` deterministically; a
/// missing `test/` split reuses the validation images. Train augmentation,
/// when enabled, is seeded from `seed`.
pub fn get_dataset(
    kind: DatasetKind,
    root: &Path,
    train_augmentation: bool,
    seed: u64,
) -> DatasetResult<ClassificationDataset> {
    let shape = kind.input_shape();
    let augment = train_augmentation.then(|| Augment::seeded(seed));
    if let Some(augment) = &augment {
        tracing::debug!("{kind} train augmentation: {}", augment.describe());
    }

    if kind == DatasetKind::Shapes {
        let classes = ShapesSource::classes();
        return Ok(ClassificationDataset {
            kind,
            train_set: Arc::new(ShapesSource::new(SHAPES_TRAIN_LEN, 1, shape)),
            valid_set: Arc::new(ShapesSource::new(SHAPES_EVAL_LEN, 2, shape)),
            test_set: Arc::new(ShapesSource::new(SHAPES_EVAL_LEN, 3, shape)),
            in_channels: shape[0],
            num_classes: classes.len(),
            input_shape: shape,
            classes,
        });
    }

    let distortion =
        (kind == DatasetKind::Cifar10Distorted).then(|| Distortion::from_seed(DISTORTION_SEED));
    let base = root.join(kind.folder());
    let train_full = ImageFolder::open(&base.join("train"), shape)?;
    let classes = train_full.classes().to_vec();

    let valid_dir = base.join("valid");
    let (train, valid) = if valid_dir.is_dir() {
        (train_full, ImageFolder::open(&valid_dir, shape)?)
    } else {
        tracing::info!(
            "{} has no valid/ split; holding out {:.0}% of train",
            base.display(),
            HOLDOUT_FRACTION * 100.0
        );
        holdout_split(train_full)
    };

    let test_dir = base.join("test");
    let test = if test_dir.is_dir() {
        Some(ImageFolder::open(&test_dir, shape)?)
    } else {
        None
    };

    let train: Arc<dyn ImageSource> = Arc::new(
        train
            .with_distortion(distortion.clone())
            .with_augment(augment),
    );
    let valid: Arc<dyn ImageSource> = Arc::new(valid.with_distortion(distortion.clone()));
    let test: Arc<dyn ImageSource> = match test {
        Some(t) => Arc::new(t.with_distortion(distortion)),
        None => valid.clone(),
    };

    Ok(ClassificationDataset {
        kind,
        train_set: train,
        valid_set: valid,
        test_set: test,
        in_channels: shape[0],
        num_classes: classes.len(),
        input_shape: shape,
        classes,
    })
}

fn holdout_split(folder: ImageFolder) -> (ImageFolder, ImageFolder) {
    let mut entries = folder.entries().to_vec();
    let mut rng = rand::rngs::StdRng::seed_from_u64(HOLDOUT_SEED);
    entries.shuffle(&mut rng);
    let n_valid = ((entries.len() as f32) * HOLDOUT_FRACTION).round() as usize;
    let n_valid = n_valid.min(entries.len());
    let valid = entries.split_off(entries.len() - n_valid);
    let classes = folder.classes().to_vec();
    let shape = folder.shape();
    (
        ImageFolder::from_entries(entries, classes.clone(), shape),
        ImageFolder::from_entries(valid, classes, shape),
    )
}
