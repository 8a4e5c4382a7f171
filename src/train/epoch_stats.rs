use std::path::PathBuf;

use serde::{Serialize, Deserialize};

/// Per-epoch training statistics emitted by `train_loop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Total epochs requested for this run.
    pub total_epochs: usize,
    /// Mean of the batch losses in this epoch.
    pub average_loss: f64,
    /// Batches that took an optimizer step.
    pub batches: usize,
    /// Samples left out under `SampleErrorPolicy::Skip`.
    pub skipped_samples: usize,
    /// Wall-clock duration of this single epoch in milliseconds.
    pub elapsed_ms: u64,
}

/// Outcome of a finished (or stopped) training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs_completed: usize,
    /// Average loss of every completed epoch, in order.
    pub loss_history: Vec<f64>,
    pub final_loss: Option<f64>,
    pub skipped_samples: usize,
    /// Set when the stop flag or a dropped progress receiver ended the run
    /// before the last epoch. The weights trained so far are still saved.
    pub stopped_early: bool,
    pub weights_path: PathBuf,
    pub elapsed_ms: u64,
}

/// Progress notifications sent over `TrainConfig::progress_tx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrainingEvent {
    EpochStarted {
        epoch: usize,
        total_epochs: usize,
    },
    BatchProgress {
        epoch: usize,
        /// 1-based batch index within the epoch.
        batch: usize,
        total_batches: usize,
        loss: f64,
    },
    SampleSkipped {
        path: PathBuf,
        reason: String,
    },
    EpochCompleted(EpochStats),
    TrainingCompleted(TrainingReport),
}
