use std::fmt;
use std::fs;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::discriminator::DiscriminatorKind;
use crate::error::Result;
use crate::generator::GeneratorKind;
use crate::networks::{InitKind, NormKind};
use crate::scheduler::LrPolicyKind;

#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "DLP-GAN: unpaired photo / painting translation via Rust.",
    long_about = None,
    args_override_self = true
)]
pub struct Options {
    /// Directory holding `{phase}A` and `{phase}B` image folders.
    #[arg(long, default_value_t = String::new())]
    pub dataroot: String,
    /// Experiment name, used as the checkpoint sub directory.
    #[arg(long, default_value_t = String::from("dlp_gan"))]
    pub name: String,
    #[arg(long, default_value_t = String::from("checkpoints"))]
    pub checkpoints_dir: String,
    #[arg(long, default_value_t = String::from("results"))]
    pub results_dir: String,
    /// Directory holding the pretrained edge and feature network weights.
    #[arg(long, default_value_t = String::from("models"))]
    pub model_dir: String,
    /// DexiNed state dict, either a `torch.save` pickle or a libtorch archive.
    /// Defaults to `{model_dir}/dexined.weight`.
    #[arg(long)]
    pub dexined_weights: Option<String>,
    /// VGG16 backbone and LPIPS heads in one state dict (`net.features.*`,
    /// `lin{k}.model.1.weight`), in either format. Defaults to
    /// `{model_dir}/lpips_vgg.pth`.
    #[arg(long)]
    pub vgg_weights: Option<String>,
    #[arg(long, value_enum, default_value = "train")]
    pub phase: Phase,
    #[arg(long, value_enum, default_value = "AtoB")]
    pub which_direction: Direction,

    #[arg(long, default_value_t = 3)]
    pub input_nc: i64,
    #[arg(long, default_value_t = 3)]
    pub output_nc: i64,
    #[arg(long, default_value_t = 64)]
    pub ngf: i64,
    #[arg(long, default_value_t = 64)]
    pub ndf: i64,
    #[arg(long, value_enum, default_value = "resnet_9blocks")]
    pub which_model_net_g: GeneratorKind,
    #[arg(long, value_enum, default_value = "basic")]
    pub which_model_net_d: DiscriminatorKind,
    #[arg(long, default_value_t = 3)]
    pub n_layers_d: i64,
    #[arg(long, value_enum, default_value = "instance")]
    pub norm: NormKind,
    #[arg(long, value_enum, default_value = "normal")]
    pub init_type: InitKind,
    #[arg(long, default_value_t = 0.02)]
    pub init_gain: f64,
    #[arg(long, default_value_t = false)]
    pub no_dropout: bool,

    #[arg(long, default_value_t = 1)]
    pub batch_size: i64,
    /// Square side every image is resized to. Must suit the generator:
    /// a multiple of 4 for the ResNet variants, of 128 or 256 for the U-Nets.
    #[arg(long, default_value_t = 256)]
    pub fine_size: i64,
    #[arg(long, default_value_t = false)]
    pub no_flip: bool,
    /// Size of the fake image history; 0 disables it.
    #[arg(long, default_value_t = 50)]
    pub pool_size: i64,

    #[arg(long, default_value_t = 0.0002)]
    pub lr: f64,
    #[arg(long, default_value_t = 0.5)]
    pub beta1: f64,
    #[arg(long, value_enum, default_value = "lambda")]
    pub lr_policy: LrPolicyKind,
    /// Epochs at the starting learning rate.
    #[arg(long, default_value_t = 100)]
    pub niter: i64,
    /// Epochs to linearly decay the learning rate to zero.
    #[arg(long, default_value_t = 100)]
    pub niter_decay: i64,
    #[arg(long, default_value_t = 50)]
    pub lr_decay_iters: i64,
    #[arg(long, default_value_t = 1)]
    pub epoch_count: i64,

    #[arg(long, value_enum, default_value = "lsgan")]
    pub gan_mode: GanMode,
    #[arg(long, value_enum, default_value = "dstn")]
    pub loss_formula: LossFormula,
    #[arg(long, default_value_t = 10.0)]
    pub alpha_g: f64,
    #[arg(long, default_value_t = 10.0)]
    pub alpha_f: f64,
    #[arg(long, default_value_t = 5.0)]
    pub beta: f64,
    #[arg(long, default_value_t = 1.0)]
    pub gamma: f64,
    #[arg(long, default_value_t = 1.0)]
    pub lambda_gan: f64,
    #[arg(long, default_value_t = 10.0)]
    pub lambda_dual: f64,
    #[arg(long, default_value_t = 5.0)]
    pub lambda_id: f64,

    #[arg(long, default_value_t = false)]
    pub continue_train: bool,
    #[arg(long, default_value_t = String::from("latest"))]
    pub which_epoch: String,

    #[arg(long, default_value_t = 100)]
    pub print_freq: usize,
    #[arg(long, default_value_t = 5000)]
    pub save_latest_freq: usize,
    #[arg(long, default_value_t = 5)]
    pub save_epoch_freq: i64,
    #[arg(long, default_value_t = 400)]
    pub display_freq: usize,
    /// Number of test samples to translate.
    #[arg(long, default_value_t = 50)]
    pub how_many: usize,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long, default_value_t = false)]
    pub cpu: bool,
}

impl Options {
    pub fn checkpoint_dir(&self) -> PathBuf {
        PathBuf::from(&self.checkpoints_dir).join(&self.name)
    }

    pub fn dexined_weights_path(&self) -> PathBuf {
        match &self.dexined_weights {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.model_dir).join("dexined.weight"),
        }
    }

    pub fn vgg_weights_path(&self) -> PathBuf {
        match &self.vgg_weights {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.model_dir).join("lpips_vgg.pth"),
        }
    }

    /// Writes the effective options next to the checkpoints.
    pub fn save(&self) -> Result<PathBuf> {
        let dir = self.checkpoint_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join("opt.txt");
        fs::write(&path, self.to_string())?;
        Ok(path)
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "------------ Options -------------")?;
        writeln!(f, "{self:#?}")?;
        write!(f, "-------------- End ----------------")
    }
}

/// Command line spelling of a choice, e.g. `AtoB` for [`Direction::AtoB`].
pub fn choice_name<T: ValueEnum>(value: &T) -> String {
    value
        .to_possible_value()
        .map(|v| v.get_name().to_string())
        .unwrap_or_default()
}

/// Adversarial objective shared by the discriminators and the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GanMode {
    Lsgan,
    Vanilla,
}

/// Which weighted sum forms the total generator loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LossFormula {
    Dstn,
    Paper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Phase {
    Train,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    #[value(name = "AtoB")]
    AtoB,
    #[value(name = "BtoA")]
    BtoA,
}
