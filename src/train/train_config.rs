use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, atomic::AtomicBool};

use crate::error::{check_threshold, Result, SpillError};
use crate::network::spec::UNetSpec;
use crate::train::epoch_stats::TrainingEvent;

pub const DEFAULT_LEARNING_RATE: f32 = 1e-4;
pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_BATCH_SIZE: usize = 4;
pub const DEFAULT_EPOCHS: usize = 25;

/// What to do when a sample cannot be decoded mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleErrorPolicy {
    /// The whole run fails with the decode error.
    #[default]
    Abort,
    /// The sample is logged, reported as `TrainingEvent::SampleSkipped`, and
    /// left out of its batch.
    Skip,
}

/// Configuration for a `train_model` run.
///
/// # Fields
/// - `dataset_dir`  : directory whose image files are the training samples
/// - `output_path`  : weights file written when the run ends (overwritten)
/// - `epochs`       : total number of full passes over the dataset
/// - `batch_size`   : samples per optimizer step
/// - `learning_rate`: Adam step size
/// - `threshold`    : pseudo-mask cutoff: intensity below it is foreground
/// - `spec`         : architecture to build and train
/// - `seed`         : fixes weight init and shuffling when set
/// - `on_bad_sample`: abort or skip on undecodable images
/// - `progress_tx`  : optional channel receiving every `TrainingEvent`. If
///                     the receiver is dropped the loop stops after the
///                     current batch.
/// - `stop_flag`    : optional atomic flag; when set to `true` from another
///                     thread the loop stops after the current batch.
pub struct TrainConfig {
    pub dataset_dir: PathBuf,
    pub output_path: PathBuf,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub threshold: f32,
    pub spec: UNetSpec,
    pub seed: Option<u64>,
    pub on_bad_sample: SampleErrorPolicy,
    pub progress_tx: Option<mpsc::Sender<TrainingEvent>>,
    pub stop_flag: Option<Arc<AtomicBool>>,
}

impl TrainConfig {
    /// Creates a `TrainConfig` with default hyperparameters, the default
    /// architecture, no progress channel and no stop flag.
    pub fn new(dataset_dir: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        TrainConfig {
            dataset_dir: dataset_dir.into(),
            output_path: output_path.into(),
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            threshold: DEFAULT_THRESHOLD,
            spec: UNetSpec::default(),
            seed: None,
            on_bad_sample: SampleErrorPolicy::Abort,
            progress_tx: None,
            stop_flag: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(SpillError::invalid("epochs", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(SpillError::invalid("batch_size", "must be at least 1"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(SpillError::invalid(
                "learning_rate",
                format!("{} is not a positive finite number", self.learning_rate),
            ));
        }
        check_threshold(self.threshold)?;
        self.spec.validate()
    }
}
