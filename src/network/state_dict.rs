use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};
use tracing::info;

use crate::error::{Result, SpillError};
use crate::network::unet::UNet;

/// One parameter as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// The weights file: parameter name → tensor. No version or architecture
/// metadata; the reader must build the identical `UNet` first.
pub type StateDict = BTreeMap<String, TensorRecord>;

pub fn state_dict(model: &UNet) -> StateDict {
    model.named_parameters().into_iter()
        .map(|(name, p)| (name, TensorRecord { shape: p.shape.clone(), values: p.values.clone() }))
        .collect()
}

/// Maps `dict` into `model`. Every name and shape is checked before any value
/// is written, so a rejected dict leaves the model untouched.
pub fn load_state_dict(model: &mut UNet, mut dict: StateDict) -> Result<()> {
    let expected = model.named_parameters().into_iter()
        .map(|(name, p)| (name, p.shape.clone()))
        .collect::<Vec<_>>();

    for (name, shape) in &expected {
        let record = dict.get(name).ok_or_else(|| SpillError::WeightsMismatch {
            reason: format!("missing parameter `{name}`"),
        })?;
        if &record.shape != shape {
            return Err(SpillError::WeightsMismatch {
                reason: format!("`{name}` has shape {:?}, model expects {:?}", record.shape, shape),
            });
        }
        let len: usize = shape.iter().product();
        if record.values.len() != len {
            return Err(SpillError::WeightsMismatch {
                reason: format!("`{name}` holds {} values for shape {:?}", record.values.len(), shape),
            });
        }
    }
    if dict.len() != expected.len() {
        let unexpected = dict.keys()
            .find(|k| !expected.iter().any(|(name, _)| name == *k))
            .cloned()
            .unwrap_or_default();
        return Err(SpillError::WeightsMismatch {
            reason: format!("unexpected parameter `{unexpected}`"),
        });
    }

    for (name, param) in model.named_parameters_mut() {
        if let Some(record) = dict.remove(&name) {
            param.values = record.values;
        }
    }
    Ok(())
}

/// Writes the model's weights to `path` as JSON, replacing any existing file.
///
/// The JSON goes to a sibling temp file first and is renamed over `path`, so
/// a failed write leaves the previous weights intact. Parameters holding NaN
/// or infinity (a diverged run) are refused before anything is written.
pub fn save_weights(model: &UNet, path: &Path) -> Result<()> {
    if let Some((name, _)) = model.named_parameters().into_iter()
        .find(|(_, p)| p.values.iter().any(|v| !v.is_finite()))
    {
        return Err(SpillError::NonFiniteWeights { name });
    }
    let tmp = temp_path(path);
    let write = || -> std::io::Result<()> {
        let file = std::fs::File::create(&tmp)?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer(&mut writer, &state_dict(model))?;
        writer.flush()?;
        Ok(())
    };
    if let Err(e) = write() {
        let _ = std::fs::remove_file(&tmp);
        return Err(SpillError::io(path, "write weights", e));
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        SpillError::io(path, "replace weights", e)
    })?;
    info!(path = %path.display(), parameters = model.parameter_count(), "saved weights");
    Ok(())
}

/// Reads a weights file written by [`save_weights`] into `model`.
pub fn load_weights(model: &mut UNet, path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(SpillError::NotFound { path: path.to_path_buf() });
    }
    let file = std::fs::File::open(path).map_err(|e| SpillError::io(path, "open weights", e))?;
    let reader = std::io::BufReader::new(file);
    let dict: StateDict = serde_json::from_reader(reader)
        .map_err(|e| SpillError::MalformedWeights { path: path.to_path_buf(), source: e })?;
    load_state_dict(model, dict)?;
    info!(path = %path.display(), "loaded weights");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
