//! Unpaired image folders feeding the trainer.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::{Device, Kind, Tensor};
use tracing::info;

use crate::error::{DlpGanError, Result};
use crate::options::{choice_name, Direction, Phase};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "ppm", "tga"];

/// One batch from each domain, `[N, C, H, W]` in `[-1, 1]`.
#[derive(Debug)]
pub struct Sample {
    pub a: Tensor,
    pub b: Tensor,
    pub a_paths: Vec<PathBuf>,
    pub b_paths: Vec<PathBuf>,
}

impl Sample {
    /// Swaps the two sides when translating from B to A.
    pub fn oriented(self, direction: Direction) -> Sample {
        match direction {
            Direction::AtoB => self,
            Direction::BtoA => Sample {
                a: self.b,
                b: self.a,
                a_paths: self.b_paths,
                b_paths: self.a_paths,
            },
        }
    }

    pub fn to_device(&self, device: Device) -> Sample {
        Sample {
            a: self.a.to_device(device),
            b: self.b.to_device(device),
            a_paths: self.a_paths.clone(),
            b_paths: self.b_paths.clone(),
        }
    }
}

/// Reads `{dataroot}/{phase}A` and `{dataroot}/{phase}B` without pairing them.
///
/// Domain A is walked in order, domain B is drawn at random, so an epoch is
/// as long as the larger folder.
#[derive(Debug)]
pub struct UnalignedDataset {
    a_paths: Vec<PathBuf>,
    b_paths: Vec<PathBuf>,
    fine_size: i64,
    flip: bool,
    a_nc: i64,
    b_nc: i64,
    rng: StdRng,
}

impl UnalignedDataset {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dataroot: &Path,
        phase: Phase,
        fine_size: i64,
        flip: bool,
        a_nc: i64,
        b_nc: i64,
        seed: Option<u64>,
    ) -> Result<UnalignedDataset> {
        let phase = choice_name(&phase);
        let a_paths = list_images(&dataroot.join(format!("{phase}A")))?;
        let b_paths = list_images(&dataroot.join(format!("{phase}B")))?;
        info!(a = a_paths.len(), b = b_paths.len(), root = %dataroot.display(), "loaded dataset");
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(UnalignedDataset {
            a_paths,
            b_paths,
            fine_size,
            flip,
            a_nc,
            b_nc,
            rng,
        })
    }

    pub fn len(&self) -> usize {
        self.a_paths.len().max(self.b_paths.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batches(&self, batch_size: usize) -> usize {
        self.len().div_ceil(batch_size.max(1))
    }

    /// The `index`-th batch of an epoch. The last batch may be smaller.
    pub fn batch(&mut self, index: usize, batch_size: usize) -> Result<Sample> {
        let start = index * batch_size;
        let end = (start + batch_size).min(self.len());
        if start >= end {
            return Err(DlpGanError::Dataset {
                message: format!("batch {index} is past the end of the dataset"),
            });
        }

        let mut a = Vec::with_capacity(end - start);
        let mut b = Vec::with_capacity(end - start);
        let mut a_paths = Vec::with_capacity(end - start);
        let mut b_paths = Vec::with_capacity(end - start);
        for i in start..end {
            let a_path = self.a_paths[i % self.a_paths.len()].clone();
            let b_path = self.b_paths[self.rng.gen_range(0..self.b_paths.len())].clone();
            a.push(self.load(&a_path, self.a_nc)?);
            b.push(self.load(&b_path, self.b_nc)?);
            a_paths.push(a_path);
            b_paths.push(b_path);
        }
        Ok(Sample {
            a: Tensor::stack(&a, 0),
            b: Tensor::stack(&b, 0),
            a_paths,
            b_paths,
        })
    }

    fn load(&mut self, path: &Path, nc: i64) -> Result<Tensor> {
        let image = tch::vision::image::load_and_resize(path, self.fine_size, self.fine_size)?;
        let mut image = image.to_kind(Kind::Float) / 127.5 - 1.0;
        if self.flip && self.rng.gen_bool(0.5) {
            image = image.flip([2]);
        }
        if nc == 1 {
            image = image.mean_dim(0, true, Kind::Float);
        }
        Ok(image)
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(DlpGanError::Dataset {
            message: format!("{} is not a directory", dir.display()),
        });
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Err(DlpGanError::Dataset {
            message: format!("no images found in {}", dir.display()),
        });
    }
    paths.sort();
    Ok(paths)
}
