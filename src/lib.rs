//! DLP-GAN: unpaired image translation between two domains, trained as a
//! CycleGAN whose cycle and content terms are measured by frozen VGG16 and
//! DexiNed networks.

pub mod checkpoint;
pub mod data;
pub mod dexined;
pub mod discriminator;
pub mod error;
pub mod extractors;
pub mod generator;
pub mod image_pool;
pub mod loss;
pub mod lpips;
pub mod model;
pub mod networks;
pub mod options;
pub mod report;
pub mod scheduler;
pub mod transforms;
pub mod vgg;

pub use data::{Sample, UnalignedDataset};
pub use error::{DlpGanError, Result};
pub use extractors::FeatureExtractors;
pub use loss::LossRecord;
pub use model::{Generators, ModelConfig, Trainer, Visuals};
pub use options::Options;
