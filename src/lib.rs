pub mod error;
pub mod logger;
pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod data;
pub mod pipeline;
pub mod train;
pub mod eval;

// Convenience re-exports
pub use error::{ErrorKind, Result, SpillError};
pub use math::tensor::Tensor;
pub use activation::activation::ActivationFunction;
pub use network::spec::UNetSpec;
pub use network::unet::UNet;
pub use pipeline::inference::{analyze_image, InferenceEngine};
pub use train::trainer::train_model;
pub use train::train_config::TrainConfig;
pub use eval::evaluate::{evaluate, EvaluationResult};
