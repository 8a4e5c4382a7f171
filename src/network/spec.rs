use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Result, SpillError};

/// Model input width every image is resized to.
pub const INPUT_WIDTH: u32 = 624;
/// Model input height every image is resized to.
pub const INPUT_HEIGHT: u32 = 320;

/// Widest first stage `validate` accepts; the bottleneck has
/// `base_channels << depth` channels on top of that.
pub const MAX_BASE_CHANNELS: usize = 256;

/// A serializable description of the UNet architecture.
///
/// The weights file holds raw parameters only, so a non-default architecture
/// has to be reproduced from this spec before weights can be mapped in.
/// `UNetSpec` can be saved to / loaded from JSON independently of the
/// trained weights.
///
/// Fields:
/// - `input_width`, `input_height`: fixed model resolution
/// - `base_channels`: channel count of the first contracting stage; stage
///                     `i` has `base_channels << i`
/// - `depth`        : number of contracting (and expanding) stages
/// - `activation`   : hidden activation after every 3×3 convolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UNetSpec {
    pub input_width: u32,
    pub input_height: u32,
    pub base_channels: usize,
    pub depth: usize,
    #[serde(default)]
    pub activation: ActivationFunction,
}

impl Default for UNetSpec {
    fn default() -> Self {
        UNetSpec {
            input_width: INPUT_WIDTH,
            input_height: INPUT_HEIGHT,
            base_channels: 8,
            depth: 4,
            activation: ActivationFunction::ReLU,
        }
    }
}

impl UNetSpec {
    /// Channel count at contracting stage `level` (the bottleneck is `depth`).
    pub fn channels_at(&self, level: usize) -> usize {
        self.base_channels << level
    }

    /// `[channels, height, width]` of the single-channel model input.
    pub fn input_shape(&self) -> [usize; 3] {
        [1, self.input_height as usize, self.input_width as usize]
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 {
            return Err(SpillError::invalid("depth", "must be at least 1"));
        }
        if self.depth > 8 {
            return Err(SpillError::invalid("depth", format!("{} stages is more than 8", self.depth)));
        }
        if self.base_channels == 0 {
            return Err(SpillError::invalid("base_channels", "must be at least 1"));
        }
        if self.base_channels > MAX_BASE_CHANNELS {
            return Err(SpillError::invalid(
                "base_channels",
                format!("{} is more than {MAX_BASE_CHANNELS}", self.base_channels),
            ));
        }
        let factor = 1u32 << self.depth;
        for (name, size) in [("input_width", self.input_width), ("input_height", self.input_height)] {
            if size == 0 || size % factor != 0 {
                return Err(SpillError::invalid(
                    name,
                    format!("{size} is not a positive multiple of 2^{} = {factor}", self.depth),
                ));
            }
        }
        if let ActivationFunction::Sigmoid = self.activation {
            return Err(SpillError::invalid(
                "activation",
                "hidden layers use ReLU, LeakyReLU or Identity",
            ));
        }
        Ok(())
    }

    /// Serializes the architecture to a pretty-printed JSON file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .map_err(|e| SpillError::io(path, "create architecture file", e))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| SpillError::io(path, "write architecture file", e.into()))
    }

    /// Deserializes and validates a `UNetSpec` from a JSON file.
    pub fn load_json(path: &Path) -> Result<UNetSpec> {
        if !path.exists() {
            return Err(SpillError::NotFound { path: path.to_path_buf() });
        }
        let file = std::fs::File::open(path)
            .map_err(|e| SpillError::io(path, "open architecture file", e))?;
        let reader = std::io::BufReader::new(file);
        let spec: UNetSpec = serde_json::from_reader(reader)
            .map_err(|e| SpillError::MalformedConfig { path: path.to_path_buf(), source: e })?;
        spec.validate()?;
        Ok(spec)
    }
}
