//! Per-network checkpoint files: `{dir}/{label}_net_{name}.pth`.
//!
//! Several networks may share one var store (both generators are trained by
//! one optimizer), so a checkpoint holds only the variables registered below
//! the network's name, with that prefix stripped.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tch::{nn, Device, Tensor};
use tracing::debug;

use crate::error::{DlpGanError, Result};

pub fn checkpoint_path(dir: &Path, name: &str, label: &str) -> PathBuf {
    dir.join(format!("{label}_net_{name}.pth"))
}

fn network_variables(vs: &nn::VarStore, name: &str) -> Vec<(String, Tensor)> {
    let prefix = format!("{name}.");
    let mut vars: Vec<(String, Tensor)> = vs
        .variables()
        .into_iter()
        .filter_map(|(var, t)| var.strip_prefix(&prefix).map(|s| (s.to_string(), t)))
        .collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    vars
}

pub fn save_network(vs: &nn::VarStore, name: &str, label: &str, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = checkpoint_path(dir, name, label);
    let vars = network_variables(vs, name);
    if vars.is_empty() {
        return Err(DlpGanError::InvalidConfiguration {
            reason: format!("no variables registered under `{name}`"),
        });
    }
    Tensor::save_multi(vars.as_slice(), &path)?;
    debug!(network = name, path = %path.display(), tensors = vars.len(), "saved network");
    Ok(path)
}

/// Overwrites the variables of network `name` with the saved ones. Every
/// variable must be present in the file with the same shape.
pub fn load_network(vs: &nn::VarStore, name: &str, label: &str, dir: &Path) -> Result<PathBuf> {
    let path = checkpoint_path(dir, name, label);
    let saved = read_named_tensors(&path, vs.device())?;
    copy_named(network_variables(vs, name), &saved, &path)?;
    debug!(network = name, path = %path.display(), "loaded network");
    Ok(path)
}

/// Fills every variable of `vs` from the state dict at `path`. Entries the
/// store does not know are ignored.
pub fn load_state_dict(vs: &nn::VarStore, path: &Path) -> Result<()> {
    let saved = read_named_tensors(path, vs.device())?;
    let mut vars: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    copy_named(vars, &saved, path)?;
    debug!(path = %path.display(), tensors = saved.len(), "loaded state dict");
    Ok(())
}

/// Reads a libtorch archive (`Tensor::save_multi`, `VarStore::save`) or a
/// pickled `torch.save` state dict. The file extension is not consulted.
pub fn read_named_tensors(path: &Path, device: Device) -> Result<HashMap<String, Tensor>> {
    if !path.is_file() {
        return Err(DlpGanError::MissingWeights {
            path: path.to_path_buf(),
        });
    }
    let tensors = match Tensor::load_multi_with_device(path, device) {
        Ok(tensors) => tensors,
        Err(err) => {
            debug!(path = %path.display(), %err, "not a libtorch archive, reading as pickle");
            Tensor::loadz_multi_with_device(path, device)?
        }
    };
    Ok(tensors.into_iter().collect())
}

fn copy_named(
    vars: Vec<(String, Tensor)>,
    saved: &HashMap<String, Tensor>,
    path: &Path,
) -> Result<()> {
    for (var_name, mut var) in vars {
        let value = match saved.get(&var_name) {
            Some(value) if value.size() == var.size() => value,
            _ => {
                return Err(DlpGanError::MissingParameter {
                    path: path.to_path_buf(),
                    name: var_name,
                })
            }
        };
        tch::no_grad(|| var.f_copy_(value))?;
    }
    Ok(())
}
