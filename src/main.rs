use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;

use clap::{ArgAction, Parser, Subcommand};
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;

use spillseg::error::{Result, SpillError};
use spillseg::network::spec::UNetSpec;
use spillseg::pipeline::inference::{analyze_image, DEFAULT_THRESHOLD};
use spillseg::train::epoch_stats::{TrainingEvent, TrainingReport};
use spillseg::train::train_config::{
    SampleErrorPolicy, TrainConfig, DEFAULT_BATCH_SIZE, DEFAULT_EPOCHS, DEFAULT_LEARNING_RATE,
};
use spillseg::{evaluate, logger, train_model};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON architecture file; defaults to the built-in 624x320 UNet.
    #[arg(long, global = true)]
    arch: Option<PathBuf>,

    /// Overrides the architecture's first-stage channel count.
    #[arg(long, global = true)]
    base_channels: Option<usize>,

    /// Overrides the number of down-sampling stages.
    #[arg(long, global = true)]
    depth: Option<usize>,

    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Outline detected spill regions on an image.
    Analyze {
        image: PathBuf,

        #[arg(short, long)]
        weights: PathBuf,

        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f32,

        /// Where to write the annotated image. Defaults to
        /// `<image stem>_annotated.png` next to the input.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Train a fresh model on every image in a directory.
    Train {
        dataset_dir: PathBuf,

        /// Weights file to write (overwritten).
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        #[arg(short, long, default_value_t = DEFAULT_EPOCHS)]
        epochs: usize,

        #[arg(short, long, default_value_t = DEFAULT_LEARNING_RATE)]
        learning_rate: f32,

        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f32,

        #[arg(long)]
        seed: Option<u64>,

        /// Leave undecodable images out instead of failing the run.
        #[arg(long)]
        skip_bad_samples: bool,
    },

    /// Score a model against an image's own pseudo label.
    Evaluate {
        image: PathBuf,

        #[arg(short, long)]
        weights: PathBuf,

        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f32,

        /// Also write input.png, ground_truth.png and prediction.png here.
        #[arg(long)]
        masks_dir: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    });

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let spec = resolve_spec(&cli)?;
    match cli.command {
        Command::Analyze { image, weights, threshold, output } => {
            let annotated = analyze_image(&image, &weights, &spec, threshold)?;
            let output = output.unwrap_or_else(|| annotated_path(&image));
            save_rgb(&annotated, &output)?;
            println!("annotated image written to {}", output.display());
        }
        Command::Train {
            dataset_dir,
            output,
            batch_size,
            epochs,
            learning_rate,
            threshold,
            seed,
            skip_bad_samples,
        } => {
            let mut config = TrainConfig::new(dataset_dir, output);
            config.batch_size = batch_size;
            config.epochs = epochs;
            config.learning_rate = learning_rate;
            config.threshold = threshold;
            config.spec = spec;
            config.seed = seed;
            if skip_bad_samples {
                config.on_bad_sample = SampleErrorPolicy::Skip;
            }
            let report = run_training(config)?;
            print_report(&report);
        }
        Command::Evaluate { image, weights, threshold, masks_dir } => {
            let result = evaluate(&image, &weights, &spec, threshold)?;
            println!("dice: {:.6}", result.dice);
            println!("iou:  {:.6}", result.iou);
            if let Some(dir) = masks_dir {
                std::fs::create_dir_all(&dir).map_err(|e| SpillError::Io {
                    path: dir.clone(),
                    operation: "create directory",
                    source: e,
                })?;
                save_rgb(&result.input_image.to_rgb8(), &dir.join("input.png"))?;
                save_gray(&result.ground_truth, &dir.join("ground_truth.png"))?;
                save_gray(&result.prediction, &dir.join("prediction.png"))?;
                println!("masks written to {}", dir.display());
            }
        }
    }
    Ok(())
}

fn resolve_spec(cli: &Cli) -> Result<UNetSpec> {
    let mut spec = match &cli.arch {
        Some(path) => UNetSpec::load_json(path)?,
        None => UNetSpec::default(),
    };
    if let Some(base) = cli.base_channels {
        spec.base_channels = base;
    }
    if let Some(depth) = cli.depth {
        spec.depth = depth;
    }
    spec.validate()?;
    Ok(spec)
}

// ---------------------------------------------------------------------------
// Training progress
// ---------------------------------------------------------------------------

/// Runs training on a worker thread and renders its events as progress bars.
fn run_training(mut config: TrainConfig) -> Result<TrainingReport> {
    let (tx, rx) = mpsc::channel();
    config.progress_tx = Some(tx);
    let handle = thread::spawn(move || train_model(&config));

    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    let mut bar: Option<ProgressBar> = None;

    for event in rx {
        match event {
            TrainingEvent::EpochStarted { epoch, total_epochs } => {
                let pb = ProgressBar::new(0).with_style(style.clone());
                pb.set_message(format!("epoch {epoch}/{total_epochs}"));
                bar = Some(pb);
            }
            TrainingEvent::BatchProgress { epoch, batch, total_batches, loss } => {
                if let Some(pb) = &bar {
                    pb.set_length(total_batches as u64);
                    pb.set_position(batch as u64);
                    pb.set_message(format!("epoch {epoch} loss {loss:.4}"));
                }
            }
            TrainingEvent::SampleSkipped { path, reason } => {
                let line = format!("skipped {}: {reason}", path.display());
                match &bar {
                    Some(pb) => pb.println(line),
                    None => eprintln!("{line}"),
                }
            }
            TrainingEvent::EpochCompleted(stats) => {
                if let Some(pb) = bar.take() {
                    pb.finish_with_message(format!(
                        "epoch {}/{} avg loss {:.4}",
                        stats.epoch, stats.total_epochs, stats.average_loss
                    ));
                }
            }
            TrainingEvent::TrainingCompleted(_) => {}
        }
    }
    if let Some(pb) = bar.take() {
        pb.abandon();
    }

    handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}

fn print_report(report: &TrainingReport) {
    if report.stopped_early {
        println!("training stopped after {} epoch(s)", report.epochs_completed);
    }
    if let Some(loss) = report.final_loss {
        println!("final loss: {loss:.6}");
    }
    if report.skipped_samples > 0 {
        println!("skipped samples: {}", report.skipped_samples);
    }
    println!("weights written to {}", report.weights_path.display());
}

// ---------------------------------------------------------------------------
// Output files
// ---------------------------------------------------------------------------

fn annotated_path(image: &Path) -> PathBuf {
    let stem = image.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
    image.with_file_name(format!("{stem}_annotated.png"))
}

fn save_rgb(image: &RgbImage, path: &Path) -> Result<()> {
    image.save(path).map_err(|e| SpillError::Encode { path: path.to_path_buf(), source: e })
}

fn save_gray(image: &image::GrayImage, path: &Path) -> Result<()> {
    image.save(path).map_err(|e| SpillError::Encode { path: path.to_path_buf(), source: e })
}
