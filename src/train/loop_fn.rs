use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Instant;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::data::dataset::Dataset;
use crate::error::{Result, SpillError};
use crate::loss::bce::BceLoss;
use crate::math::tensor::Tensor;
use crate::network::unet::UNet;
use crate::optim::adam::Adam;
use crate::train::epoch_stats::{EpochStats, TrainingEvent};
use crate::train::train_config::{SampleErrorPolicy, TrainConfig};

/// What `train_loop` hands back to the caller.
#[derive(Debug, Clone, Default)]
pub struct LoopOutcome {
    /// One entry per fully completed epoch.
    pub history: Vec<EpochStats>,
    pub skipped_samples: usize,
    pub stopped_early: bool,
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Trains `model` on `dataset` for `config.epochs` epochs.
///
/// Each epoch reshuffles the sample order, then for every mini-batch runs a
/// forward and backward pass per sample, averages the accumulated gradients
/// over the batch and takes one Adam step.
///
/// # Early termination
/// The loop stops before the next batch if:
/// - the `progress_tx` receiver has been dropped, **or**
/// - `config.stop_flag` is set to `true`.
///
/// A partially finished epoch is not added to the history.
///
/// # Errors
/// Any sample that fails to load is fatal under `SampleErrorPolicy::Abort`.
/// Under `Skip`, an epoch in which no sample could be loaded fails with
/// `EmptyDataset`.
pub fn train_loop<R: Rng + ?Sized>(
    model: &mut UNet,
    dataset: &Dataset,
    optimizer: &mut Adam,
    config: &TrainConfig,
    rng: &mut R,
) -> Result<LoopOutcome> {
    let n = dataset.len();
    let batch_size = config.batch_size.max(1);
    let total_batches = n.div_ceil(batch_size);
    let mut outcome = LoopOutcome::default();
    let mut indices: Vec<usize> = (0..n).collect();

    'epochs: for epoch in 1..=config.epochs {
        if should_stop(config) || !emit(&config.progress_tx, TrainingEvent::EpochStarted {
            epoch,
            total_epochs: config.epochs,
        }) {
            outcome.stopped_early = true;
            break;
        }

        let t_start = Instant::now();
        indices.shuffle(rng);

        let mut loss_sum = 0.0;
        let mut batches = 0;
        let mut skipped = 0;

        for (b, chunk) in indices.chunks(batch_size).enumerate() {
            if should_stop(config) {
                outcome.stopped_early = true;
                outcome.skipped_samples += skipped;
                break 'epochs;
            }

            let Some(batch_loss) = run_one_batch(model, dataset, chunk, optimizer, config, &mut skipped)? else {
                continue;
            };
            loss_sum += batch_loss;
            batches += 1;
            debug!(epoch, batch = b + 1, total_batches, loss = batch_loss, "batch done");

            if !emit(&config.progress_tx, TrainingEvent::BatchProgress {
                epoch,
                batch: b + 1,
                total_batches,
                loss: batch_loss,
            }) {
                outcome.stopped_early = true;
                outcome.skipped_samples += skipped;
                break 'epochs;
            }
        }
        outcome.skipped_samples += skipped;

        if batches == 0 {
            return Err(SpillError::EmptyDataset { path: dataset.dir().to_path_buf() });
        }

        let stats = EpochStats {
            epoch,
            total_epochs: config.epochs,
            average_loss: loss_sum / batches as f64,
            batches,
            skipped_samples: skipped,
            elapsed_ms: t_start.elapsed().as_millis() as u64,
        };
        info!(epoch, total = config.epochs, avg_loss = stats.average_loss, "epoch completed");
        outcome.history.push(stats.clone());

        if !emit(&config.progress_tx, TrainingEvent::EpochCompleted(stats)) {
            outcome.stopped_early = epoch < config.epochs;
            break;
        }
    }

    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Forward/backward over one mini-batch and a single optimizer step.
/// Returns the mean sample loss, or `None` when every sample was skipped.
fn run_one_batch(
    model: &mut UNet,
    dataset: &Dataset,
    batch: &[usize],
    optimizer: &mut Adam,
    config: &TrainConfig,
    skipped: &mut usize,
) -> Result<Option<f64>> {
    let (width, height) = (config.spec.input_width, config.spec.input_height);
    let mut total_loss = 0.0;
    let mut used = 0usize;

    model.zero_grad();
    for &idx in batch {
        let sample = match dataset.get(idx, width, height, config.threshold) {
            Ok(sample) => sample,
            Err(e) if config.on_bad_sample == SampleErrorPolicy::Skip => {
                let path = dataset.path(idx).to_path_buf();
                warn!(path = %path.display(), error = %e, "skipping unreadable sample");
                *skipped += 1;
                emit(&config.progress_tx, TrainingEvent::SampleSkipped { path, reason: e.to_string() });
                continue;
            }
            Err(e) => return Err(e),
        };

        let predicted = model.forward(&sample.image);
        total_loss += BceLoss::loss(&predicted.data, &sample.mask.data);

        let grad = BceLoss::logit_gradient(&predicted.data, &sample.mask.data);
        model.backward(&Tensor::from_data(predicted.channels, predicted.height, predicted.width, grad));
        used += 1;
    }

    if used == 0 {
        return Ok(None);
    }

    // Average and apply.
    let inv_batch = 1.0 / used as f32;
    for (_, param) in model.named_parameters_mut() {
        param.scale_grad(inv_batch);
    }
    optimizer.step(model);
    model.zero_grad();

    Ok(Some(total_loss / used as f64))
}

fn should_stop(config: &TrainConfig) -> bool {
    config.stop_flag.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// Sends `event` if a channel is configured. Returns `false` once the
/// receiver is gone.
pub(crate) fn emit(tx: &Option<mpsc::Sender<TrainingEvent>>, event: TrainingEvent) -> bool {
    match tx {
        Some(tx) => tx.send(event).is_ok(),
        None => true,
    }
}
