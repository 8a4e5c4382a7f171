use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`SpillError`], so callers can branch on the
/// failure class without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing files, empty datasets, bad hyperparameters or architecture.
    Input,
    /// An image could not be parsed.
    Decode,
    /// Weights do not fit the instantiated architecture or are not finite, or
    /// no model is loaded.
    Model,
    /// Disk reads/writes that failed after the inputs were validated.
    Resource,
}

#[derive(Error, Debug)]
pub enum SpillError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("dataset directory not found: {}", path.display())]
    DatasetDirNotFound { path: PathBuf },

    #[error("dataset directory {} contains no images", path.display())]
    EmptyDataset { path: PathBuf },

    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("malformed configuration file {}", path.display())]
    MalformedConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode image {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode image {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("malformed weights file {}", path.display())]
    MalformedWeights {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("weights do not match the model architecture: {reason}")]
    WeightsMismatch { reason: String },

    #[error("parameter `{name}` holds a NaN or infinite value")]
    NonFiniteWeights { name: String },

    #[error("input shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("no model weights loaded")]
    ModelNotLoaded,

    #[error("{operation} failed for {}", path.display())]
    Io {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl SpillError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpillError::NotFound { .. }
            | SpillError::DatasetDirNotFound { .. }
            | SpillError::EmptyDataset { .. }
            | SpillError::InvalidParameter { .. }
            | SpillError::MalformedConfig { .. } => ErrorKind::Input,
            SpillError::Decode { .. } => ErrorKind::Decode,
            SpillError::MalformedWeights { .. }
            | SpillError::WeightsMismatch { .. }
            | SpillError::NonFiniteWeights { .. }
            | SpillError::ShapeMismatch { .. }
            | SpillError::ModelNotLoaded => ErrorKind::Model,
            SpillError::Encode { .. } | SpillError::Io { .. } => ErrorKind::Resource,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        SpillError::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        SpillError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpillError>;

/// Rejects thresholds that cannot split a [0, 1] probability or intensity.
pub(crate) fn check_threshold(threshold: f32) -> Result<()> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(SpillError::invalid(
            "threshold",
            format!("{threshold} is outside [0, 1]"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_the_four_classes() {
        let missing = SpillError::NotFound { path: "a.png".into() };
        assert_eq!(missing.kind(), ErrorKind::Input);

        let mismatch = SpillError::WeightsMismatch { reason: "x".into() };
        assert_eq!(mismatch.kind(), ErrorKind::Model);

        let io = SpillError::io("w.json", "write", std::io::Error::other("disk full"));
        assert_eq!(io.kind(), ErrorKind::Resource);
        assert_eq!(io.to_string(), "write failed for w.json");
    }

    #[test]
    fn threshold_must_be_a_probability() {
        assert!(check_threshold(0.0).is_ok());
        assert!(check_threshold(0.5).is_ok());
        assert!(check_threshold(1.0).is_ok());
        assert!(check_threshold(-0.1).is_err());
        assert!(check_threshold(1.5).is_err());
        assert!(check_threshold(f32::NAN).is_err());
    }
}
