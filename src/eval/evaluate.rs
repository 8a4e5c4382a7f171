use std::path::Path;

use image::{DynamicImage, GrayImage, Luma};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::data::dataset::pseudo_mask;
use crate::error::{check_threshold, Result, SpillError};
use crate::eval::metrics::{dice_coefficient, iou_score};
use crate::math::tensor::Tensor;
use crate::network::spec::UNetSpec;
use crate::network::state_dict::load_weights;
use crate::network::unet::UNet;
use crate::pipeline::postprocess::binarize;
use crate::pipeline::preprocess::{load_image, to_model_input};

/// Scores and rasters from scoring one image.
///
/// `ground_truth` is the pseudo label thresholded from the input itself (the
/// same rule training uses), so `dice` and `iou` measure how well the model
/// reproduces that brightness rule. They say nothing about real spill
/// detection quality.
///
/// # Fields
/// - `dice`, `iou`   : overlap scores in [0, 1]
/// - `input_image`   : the decoded input at its original resolution
/// - `ground_truth`  : pseudo label, 0/255, at model resolution
/// - `prediction`    : binarized model output, 0/255, at model resolution
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub dice: f64,
    pub iou: f64,
    pub input_image: DynamicImage,
    pub ground_truth: GrayImage,
    pub prediction: GrayImage,
}

/// Loads `weights_path` into a fresh model built for `spec` and scores
/// `image_path` against its own pseudo label at `threshold`.
pub fn evaluate(
    image_path: &Path,
    weights_path: &Path,
    spec: &UNetSpec,
    threshold: f32,
) -> Result<EvaluationResult> {
    check_threshold(threshold)?;
    for path in [image_path, weights_path] {
        if !path.is_file() {
            return Err(SpillError::NotFound { path: path.to_path_buf() });
        }
    }
    spec.validate()?;
    let mut model = UNet::new(spec, &mut StdRng::seed_from_u64(0));
    load_weights(&mut model, weights_path)?;
    evaluate_with_model(&model, image_path, threshold)
}

/// Same as [`evaluate`] with an already loaded model.
pub fn evaluate_with_model(model: &UNet, image_path: &Path, threshold: f32) -> Result<EvaluationResult> {
    check_threshold(threshold)?;
    let spec = model.spec();
    let input_image = load_image(image_path)?;
    let input = to_model_input(&input_image.to_luma8(), spec.input_width, spec.input_height);

    let target = pseudo_mask(&input, threshold);
    let prob = model.predict(&input)?;
    let prediction = binarize(&prob, threshold);
    let predicted: Vec<f32> = prediction.as_raw().iter().map(|&v| if v > 0 { 1.0 } else { 0.0 }).collect();

    let dice = dice_coefficient(&predicted, &target.data);
    let iou = iou_score(&predicted, &target.data);
    warn!("evaluation ground truth is a pseudo label derived from the input image");
    info!(path = %image_path.display(), dice, iou, "evaluation done");

    Ok(EvaluationResult {
        dice,
        iou,
        input_image,
        ground_truth: mask_image(&target),
        prediction,
    })
}

fn mask_image(mask: &Tensor) -> GrayImage {
    let plane = mask.plane(0);
    GrayImage::from_fn(mask.width as u32, mask.height as u32, |x, y| {
        Luma([if plane[y as usize * mask.width + x as usize] > 0.5 { 255 } else { 0 }])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::network::state_dict::save_weights;
    use tempfile::TempDir;

    fn spec() -> UNetSpec {
        UNetSpec { input_width: 16, input_height: 8, base_channels: 2, depth: 2, ..UNetSpec::default() }
    }

    fn fixture(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let image = dir.join("scene.png");
        GrayImage::from_fn(40, 20, |x, y| Luma([((x * 6 + y * 3) % 256) as u8])).save(&image).unwrap();
        let weights = dir.join("weights.json");
        save_weights(&UNet::new(&spec(), &mut StdRng::seed_from_u64(3)), &weights).unwrap();
        (image, weights)
    }

    #[test]
    fn returns_bounded_scores_and_model_sized_masks() {
        let dir = TempDir::new().unwrap();
        let (image, weights) = fixture(dir.path());
        let result = evaluate(&image, &weights, &spec(), 0.5).unwrap();

        assert!((0.0..=1.0).contains(&result.dice));
        assert!((0.0..=1.0).contains(&result.iou));
        assert_eq!(result.ground_truth.dimensions(), (16, 8));
        assert_eq!(result.prediction.dimensions(), (16, 8));
        assert_eq!((result.input_image.width(), result.input_image.height()), (40, 20));
        assert!(result.ground_truth.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn ground_truth_raster_matches_the_pseudo_label() {
        let mut mask = Tensor::zeros(1, 2, 3);
        mask.data[3 + 2] = 1.0; // row 1, column 2
        let raster = mask_image(&mask);
        assert_eq!(raster.dimensions(), (3, 2));
        assert_eq!(raster.into_raw(), vec![0, 0, 0, 0, 0, 255]);
    }

    #[test]
    fn is_deterministic() {
        let dir = TempDir::new().unwrap();
        let (image, weights) = fixture(dir.path());
        let a = evaluate(&image, &weights, &spec(), 0.4).unwrap();
        let b = evaluate(&image, &weights, &spec(), 0.4).unwrap();
        assert_eq!(a.dice, b.dice);
        assert_eq!(a.prediction, b.prediction);
    }

    #[test]
    fn missing_inputs_are_input_errors() {
        let dir = TempDir::new().unwrap();
        let (image, _) = fixture(dir.path());
        let err = evaluate(&image, &dir.path().join("none.json"), &spec(), 0.5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }
}
