//! Loss log and image dumps written during training and testing.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tch::{Device, Kind, Tensor};

use crate::error::Result;
use crate::loss::LossRecord;
use crate::model::Visuals;

/// First image of a `[-1, 1]` batch as a `[3, H, W]` byte tensor.
pub fn tensor_to_image(xs: &Tensor) -> Tensor {
    let image = xs.get(0).detach().to_device(Device::Cpu);
    let image = if image.size()[0] == 1 {
        image.repeat([3, 1, 1])
    } else {
        image
    };
    ((image + 1.0) / 2.0 * 255.0)
        .clamp(0.0, 255.0)
        .to_kind(Kind::Uint8)
}

/// Writes every visual as `{dir}/{prefix}_{name}.png`.
pub fn save_visuals(visuals: &Visuals, dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut paths = Vec::new();
    for (name, image) in visuals.iter() {
        let path = dir.join(format!("{prefix}_{name}.png"));
        tch::vision::image::save(&tensor_to_image(image), &path)?;
        paths.push(path);
    }
    Ok(paths)
}

/// Append-only `loss_log.txt` next to the checkpoints.
#[derive(Debug)]
pub struct LossLog {
    path: PathBuf,
}

impl LossLog {
    pub fn open(dir: &Path) -> Result<LossLog> {
        fs::create_dir_all(dir)?;
        let path = dir.join("loss_log.txt");
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "================ Training Loss ================")?;
        Ok(LossLog { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Formats one report line and appends it to the log.
    pub fn append(
        &self,
        epoch: i64,
        iters: usize,
        seconds: f64,
        record: &LossRecord,
    ) -> Result<String> {
        let line = format!("(epoch: {epoch}, iters: {iters}, time: {seconds:.3}) {record}");
        let mut file: File = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind;

    #[test]
    fn images_are_rescaled_bytes() {
        let xs = Tensor::from_slice(&[-1.0f32, 0.0, 1.0, 1.0]).reshape([1, 1, 2, 2]);
        let image = tensor_to_image(&xs);
        assert_eq!(image.size(), [3, 2, 2]);
        assert_eq!(image.kind(), Kind::Uint8);
        assert_eq!(image.int64_value(&[0, 0, 0]), 0);
        assert_eq!(image.int64_value(&[2, 1, 1]), 255);
        let out_of_range = Tensor::full([2, 3, 2, 2], 3.0, kind::FLOAT_CPU);
        assert_eq!(tensor_to_image(&out_of_range).int64_value(&[1, 0, 0]), 255);
    }

    #[test]
    fn loss_log_appends_lines() {
        let dir = std::env::temp_dir().join(format!("dlp-gan-report-{}", std::process::id()));
        let log = LossLog::open(&dir).unwrap();
        let mut record = LossRecord::default();
        record.push("D_A", 0.5);
        let line = log.append(2, 40, 0.25, &record).unwrap();
        assert_eq!(line, "(epoch: 2, iters: 40, time: 0.250) D_A: 0.500");
        let text = fs::read_to_string(log.path()).unwrap();
        assert!(text.lines().last().unwrap().ends_with("D_A: 0.500"));
    }
}
