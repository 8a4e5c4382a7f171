pub mod dataset;

pub use dataset::{pseudo_mask, Dataset, TrainingSample};
