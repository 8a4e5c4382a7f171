pub mod metrics;
pub mod evaluate;

pub use metrics::{dice_coefficient, iou_score};
pub use evaluate::{evaluate, evaluate_with_model, EvaluationResult};
