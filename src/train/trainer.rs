use std::path::Path;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::data::dataset::Dataset;
use crate::error::{Result, SpillError};
use crate::network::state_dict::save_weights;
use crate::network::unet::UNet;
use crate::optim::adam::Adam;
use crate::train::epoch_stats::{TrainingEvent, TrainingReport};
use crate::train::loop_fn::{emit, train_loop};
use crate::train::train_config::TrainConfig;

/// Training entry point: builds a fresh model, trains it on
/// `config.dataset_dir` and writes the weights to `config.output_path`.
///
/// Input problems (bad hyperparameters, missing or empty dataset directory,
/// missing output directory) are reported before any training starts, and
/// no weights file is written in that case.
pub fn train_model(config: &TrainConfig) -> Result<TrainingReport> {
    config.validate()?;
    check_output_dir(&config.output_path)?;
    let dataset = Dataset::open(&config.dataset_dir)?;

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut model = UNet::new(&config.spec, &mut rng);
    let mut optimizer = Adam::new(config.learning_rate);

    info!(
        samples = dataset.len(),
        epochs = config.epochs,
        batch_size = config.batch_size,
        parameters = model.parameter_count(),
        "training started"
    );
    warn!("training targets are pseudo-masks thresholded from the inputs themselves, not annotations");

    let t_start = Instant::now();
    let outcome = train_loop(&mut model, &dataset, &mut optimizer, config, &mut rng)?;
    save_weights(&model, &config.output_path)?;

    let loss_history: Vec<f64> = outcome.history.iter().map(|s| s.average_loss).collect();
    let report = TrainingReport {
        epochs_completed: outcome.history.len(),
        final_loss: loss_history.last().copied(),
        loss_history,
        skipped_samples: outcome.skipped_samples,
        stopped_early: outcome.stopped_early,
        weights_path: config.output_path.clone(),
        elapsed_ms: t_start.elapsed().as_millis() as u64,
    };
    info!(
        epochs = report.epochs_completed,
        stopped_early = report.stopped_early,
        elapsed_ms = report.elapsed_ms,
        "training finished"
    );
    emit(&config.progress_tx, TrainingEvent::TrainingCompleted(report.clone()));
    Ok(report)
}

fn check_output_dir(output_path: &Path) -> Result<()> {
    match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            Err(SpillError::NotFound { path: parent.to_path_buf() })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::network::spec::UNetSpec;
    use crate::train::train_config::SampleErrorPolicy;
    use image::{GrayImage, Luma};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use tempfile::TempDir;

    fn tiny_spec() -> UNetSpec {
        UNetSpec { input_width: 16, input_height: 8, base_channels: 2, depth: 2, ..UNetSpec::default() }
    }

    /// Half dark, half bright images with the split at different columns.
    fn write_dataset(dir: &Path, count: u32) {
        for i in 0..count {
            let split = 6 + i * 3;
            GrayImage::from_fn(24, 12, |x, _| Luma([if x < split { 30 } else { 220 }]))
                .save(dir.join(format!("img_{i}.png")))
                .unwrap();
        }
    }

    fn config(data: &Path, out: &Path) -> TrainConfig {
        let mut config = TrainConfig::new(data, out.join("model.json"));
        config.spec = tiny_spec();
        config.epochs = 2;
        config.batch_size = 2;
        config.seed = Some(7);
        config
    }

    #[test]
    fn emits_events_in_order_and_saves_weights() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_dataset(data.path(), 3);

        let (tx, rx) = mpsc::channel();
        let mut config = config(data.path(), out.path());
        config.progress_tx = Some(tx);
        let report = train_model(&config).unwrap();
        drop(config);

        assert_eq!(report.epochs_completed, 2);
        assert_eq!(report.loss_history.len(), 2);
        assert!(!report.stopped_early);
        assert!(report.weights_path.is_file());

        let events: Vec<TrainingEvent> = rx.iter().collect();
        assert_eq!(events[0], TrainingEvent::EpochStarted { epoch: 1, total_epochs: 2 });
        let batches = events.iter()
            .filter(|e| matches!(e, TrainingEvent::BatchProgress { epoch: 1, .. }))
            .count();
        assert_eq!(batches, 2); // 3 samples in batches of 2
        assert!(matches!(events.last(), Some(TrainingEvent::TrainingCompleted(_))));
        let completed = events.iter()
            .filter(|e| matches!(e, TrainingEvent::EpochCompleted(_)))
            .count();
        assert_eq!(completed, 2);
    }

    #[test]
    fn empty_dataset_fails_without_writing_weights() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let config = config(data.path(), out.path());
        let err = train_model(&config).unwrap_err();
        assert!(matches!(err, SpillError::EmptyDataset { .. }));
        assert!(!config.output_path.exists());
    }

    #[test]
    fn missing_output_directory_is_caught_before_training() {
        let data = TempDir::new().unwrap();
        write_dataset(data.path(), 1);
        let mut config = config(data.path(), data.path());
        config.output_path = data.path().join("missing").join("model.json");
        assert_eq!(train_model(&config).unwrap_err().kind(), ErrorKind::Input);
    }

    #[test]
    fn corrupt_sample_aborts_by_default_and_is_skipped_on_request() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_dataset(data.path(), 2);
        std::fs::write(data.path().join("broken.png"), b"not an image").unwrap();

        let config = config(data.path(), out.path());
        let err = train_model(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(!config.output_path.exists());

        let mut config = config;
        config.on_bad_sample = SampleErrorPolicy::Skip;
        let report = train_model(&config).unwrap();
        assert_eq!(report.skipped_samples, 2); // once per epoch
        assert!(config.output_path.is_file());
    }

    #[test]
    fn stop_flag_ends_the_run_early_but_keeps_weights() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_dataset(data.path(), 2);
        let mut config = config(data.path(), out.path());
        config.epochs = 50;
        let flag = Arc::new(AtomicBool::new(true));
        config.stop_flag = Some(flag.clone());

        let report = train_model(&config).unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.epochs_completed, 0);
        assert!(report.final_loss.is_none());
        assert!(config.output_path.is_file());
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn loss_goes_down_on_a_learnable_target() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_dataset(data.path(), 2);
        let mut config = config(data.path(), out.path());
        config.epochs = 40;
        config.learning_rate = 1e-2;
        let report = train_model(&config).unwrap();
        let first = report.loss_history[0];
        let last = report.final_loss.unwrap();
        assert!(last < first, "loss went from {first} to {last}");
    }

    #[test]
    fn dropped_receiver_stops_the_run_but_keeps_weights() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_dataset(data.path(), 2);
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut config = config(data.path(), out.path());
        config.epochs = 50;
        config.progress_tx = Some(tx);

        let report = train_model(&config).unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.epochs_completed, 0);
        assert!(config.output_path.is_file());
    }

    #[test]
    fn skipping_every_sample_is_an_empty_dataset() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::write(data.path().join("a.png"), b"garbage").unwrap();
        std::fs::write(data.path().join("b.jpg"), b"more garbage").unwrap();
        let mut config = config(data.path(), out.path());
        config.on_bad_sample = SampleErrorPolicy::Skip;

        let err = train_model(&config).unwrap_err();
        assert!(matches!(err, SpillError::EmptyDataset { .. }));
        assert!(!config.output_path.exists());
    }
}
