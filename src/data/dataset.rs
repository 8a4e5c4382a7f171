use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Result, SpillError};
use crate::math::tensor::Tensor;
use crate::pipeline::preprocess::{load_image, to_model_input};

/// File extensions treated as training images.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// One (image, pseudo-mask) pair, both `1 × height × width`.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub image: Tensor,
    pub mask: Tensor,
}

/// Pseudo label: 1.0 where the normalized intensity is below `threshold`
/// (dark, water-like pixels), 0.0 elsewhere.
///
/// This is derived from the input itself, not from an annotation. Anything
/// trained or scored against it measures agreement with a brightness rule,
/// not real spill detection accuracy.
pub fn pseudo_mask(image: &Tensor, threshold: f32) -> Tensor {
    image.map(|v| if v < threshold { 1.0 } else { 0.0 })
}

/// The image files of one directory. Samples are re-read and re-derived on
/// every [`Dataset::get`]; nothing is cached.
#[derive(Debug, Clone)]
pub struct Dataset {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl Dataset {
    /// Lists the directory (non-recursively). Fails if it is missing or holds
    /// no image files.
    pub fn open(dir: &Path) -> Result<Dataset> {
        if !dir.is_dir() {
            return Err(SpillError::DatasetDirNotFound { path: dir.to_path_buf() });
        }
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| has_image_extension(e.path()))
            .map(|e| e.into_path())
            .collect();
        if paths.is_empty() {
            return Err(SpillError::EmptyDataset { path: dir.to_path_buf() });
        }
        // Stable base order; epochs shuffle on top of it.
        paths.sort();
        Ok(Dataset { dir: dir.to_path_buf(), paths })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn path(&self, index: usize) -> &Path {
        &self.paths[index]
    }

    /// Decodes sample `index`, converts it to the `width × height` model
    /// input and derives its pseudo-mask at `threshold`.
    pub fn get(&self, index: usize, width: u32, height: u32, threshold: f32) -> Result<TrainingSample> {
        let decoded = load_image(&self.paths[index])?;
        let image = to_model_input(&decoded.to_luma8(), width, height);
        let mask = pseudo_mask(&image, threshold);
        Ok(TrainingSample { image, mask })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}
