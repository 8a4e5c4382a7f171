pub mod trainer;
pub mod epoch_stats;
pub mod train_config;
pub mod loop_fn;

pub use trainer::train_model;
pub use epoch_stats::{EpochStats, TrainingEvent, TrainingReport};
pub use train_config::{SampleErrorPolicy, TrainConfig};
pub use loop_fn::train_loop;
