pub mod preprocess;
pub mod postprocess;
pub mod inference;

pub use preprocess::{prepare_image, PreparedImage};
pub use postprocess::{annotate, Contour};
pub use inference::{analyze_image, EngineState, InferenceEngine};
