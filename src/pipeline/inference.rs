use std::path::{Path, PathBuf};

use image::RgbImage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::error::{check_threshold, Result, SpillError};
use crate::math::tensor::Tensor;
use crate::network::spec::UNetSpec;
use crate::network::state_dict::load_weights;
use crate::network::unet::UNet;
use crate::pipeline::postprocess::annotate;
use crate::pipeline::preprocess::prepare_image;

/// Default probability cutoff for foreground pixels.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Whether the engine currently holds a usable model.
#[derive(Debug)]
pub enum EngineState {
    /// No weights loaded yet.
    Idle,
    /// Weights loaded, model in evaluation mode, accepting inference calls.
    Ready { weights_path: PathBuf, model: UNet },
}

/// An explicit model handle for inference. Each engine owns its model, so a
/// training run elsewhere can never mutate the weights an inference call is
/// reading.
#[derive(Debug)]
pub struct InferenceEngine {
    spec: UNetSpec,
    state: EngineState,
}

impl InferenceEngine {
    pub fn new(spec: UNetSpec) -> InferenceEngine {
        InferenceEngine { spec, state: EngineState::Idle }
    }

    pub fn spec(&self) -> &UNetSpec {
        &self.spec
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, EngineState::Ready { .. })
    }

    pub fn loaded_weights(&self) -> Option<&Path> {
        match &self.state {
            EngineState::Ready { weights_path, .. } => Some(weights_path),
            EngineState::Idle => None,
        }
    }

    pub fn model(&self) -> Option<&UNet> {
        match &self.state {
            EngineState::Ready { model, .. } => Some(model),
            EngineState::Idle => None,
        }
    }

    /// Loads `weights_path` unless it is already the loaded file. On failure
    /// the previous state (and model) is kept.
    pub fn load(&mut self, weights_path: &Path) -> Result<()> {
        if self.loaded_weights() == Some(weights_path) {
            debug!(path = %weights_path.display(), "weights already loaded");
            return Ok(());
        }
        self.spec.validate()?;
        // Initial values are overwritten by the weights file.
        let mut model = UNet::new(&self.spec, &mut StdRng::seed_from_u64(0));
        load_weights(&mut model, weights_path)?;
        info!(path = %weights_path.display(), parameters = model.parameter_count(), "model ready");
        self.state = EngineState::Ready { weights_path: weights_path.to_path_buf(), model };
        Ok(())
    }

    /// Runs the loaded model on an already prepared input tensor.
    pub fn predict(&self, input: &Tensor) -> Result<Tensor> {
        self.model().ok_or(SpillError::ModelNotLoaded)?.predict(input)
    }

    /// Loads `weights_path` if needed, then annotates `image_path`.
    pub fn analyze(&mut self, image_path: &Path, weights_path: &Path, threshold: f32) -> Result<RgbImage> {
        check_threshold(threshold)?;
        for path in [image_path, weights_path] {
            if !path.is_file() {
                return Err(SpillError::NotFound { path: path.to_path_buf() });
            }
        }
        self.load(weights_path)?;
        self.analyze_loaded(image_path, threshold)
    }

    /// Annotates `image_path` with the model already loaded.
    ///
    /// preprocess → forward pass → threshold → resize → contours → overlay.
    /// The returned image has the decoded image's dimensions.
    pub fn analyze_loaded(&self, image_path: &Path, threshold: f32) -> Result<RgbImage> {
        check_threshold(threshold)?;
        let model = self.model().ok_or(SpillError::ModelNotLoaded)?;
        let spec = model.spec();
        let prepared = prepare_image(image_path, spec.input_width, spec.input_height)?;
        let prob = model.predict(&prepared.input)?;
        debug!(path = %image_path.display(), "inference done");
        Ok(annotate(&prepared.color, &prob, threshold))
    }
}

/// Single-call entry point: load `weights_path` into a fresh engine built for
/// `spec` and annotate `image_path`.
pub fn analyze_image(
    image_path: &Path,
    weights_path: &Path,
    spec: &UNetSpec,
    threshold: f32,
) -> Result<RgbImage> {
    InferenceEngine::new(spec.clone()).analyze(image_path, weights_path, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::network::state_dict::save_weights;

    fn spec(base_channels: usize) -> UNetSpec {
        UNetSpec { input_width: 16, input_height: 8, base_channels, depth: 2, ..UNetSpec::default() }
    }

    #[test]
    fn starts_idle_and_refuses_to_predict() {
        let engine = InferenceEngine::new(spec(2));
        assert!(!engine.is_ready());
        let err = engine.predict(&Tensor::zeros(1, 8, 16)).unwrap_err();
        assert!(matches!(err, SpillError::ModelNotLoaded));
    }

    #[test]
    fn failed_load_keeps_the_previous_model() {
        let dir = tempfile::TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        save_weights(&UNet::new(&spec(2), &mut StdRng::seed_from_u64(1)), &good).unwrap();
        save_weights(&UNet::new(&spec(4), &mut StdRng::seed_from_u64(1)), &bad).unwrap();

        let mut engine = InferenceEngine::new(spec(2));
        engine.load(&good).unwrap();
        assert!(engine.load(&good).is_ok());

        let err = engine.load(&bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Model);
        assert_eq!(engine.loaded_weights(), Some(good.as_path()));
    }

    #[test]
    fn bad_threshold_is_rejected_before_loading() {
        let mut engine = InferenceEngine::new(spec(2));
        let err = engine.analyze(Path::new("a.png"), Path::new("w.json"), 2.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(!engine.is_ready());
    }
}
