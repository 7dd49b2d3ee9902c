//! The two translators and the context that trains them against their
//! discriminators.

use std::path::PathBuf;

use tch::nn::{self, ModuleT, OptimizerConfig};
use tch::{Device, Reduction, Tensor};
use tracing::{debug, info};

use crate::checkpoint::{load_network, save_network};
use crate::data::Sample;
use crate::discriminator::{define_discriminator, Discriminator, DiscriminatorKind};
use crate::error::{DlpGanError, Result};
use crate::extractors::FeatureExtractors;
use crate::generator::{define_generator, Generator, GeneratorKind};
use crate::image_pool::ImagePool;
use crate::loss::{scalar, GanLoss, GeneratorTerms, LossRecord, LossWeights};
use crate::networks::{parameter_count, LayerConfig};
use crate::options::{choice_name, GanMode, LossFormula, Options};
use crate::scheduler::{LrPolicy, LrScheduler};

/// Named images of the last forward pass, in display order.
#[derive(Debug, Default)]
pub struct Visuals {
    entries: Vec<(&'static str, Tensor)>,
}

impl Visuals {
    fn push(&mut self, name: &'static str, image: &Tensor) {
        self.entries.push((name, image.detach()));
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, image)| image)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Tensor)> + '_ {
        self.entries.iter().map(|(name, image)| (*name, image))
    }
}

/// Architecture choices and the image layout the networks are built for.
#[derive(Debug, Clone, Copy)]
pub struct ModelConfig {
    pub generator: GeneratorKind,
    pub discriminator: DiscriminatorKind,
    pub layers: LayerConfig,
    pub gan_mode: GanMode,
    pub formula: LossFormula,
    pub input_nc: i64,
    pub output_nc: i64,
    pub ngf: i64,
    pub ndf: i64,
    pub n_layers_d: i64,
    pub use_dropout: bool,
    pub fine_size: i64,
}

impl ModelConfig {
    pub fn from_options(opt: &Options) -> Result<ModelConfig> {
        let generator = opt.which_model_net_g;
        let multiple = generator.size_multiple();
        if opt.fine_size <= 0 || opt.fine_size % multiple != 0 {
            return Err(DlpGanError::InvalidConfiguration {
                reason: format!(
                    "fine_size must be a positive multiple of {multiple} for {}, got {}",
                    choice_name(&generator),
                    opt.fine_size
                ),
            });
        }
        Ok(ModelConfig {
            generator,
            discriminator: opt.which_model_net_d,
            layers: LayerConfig::new(opt.norm, opt.init_type, opt.init_gain),
            gan_mode: opt.gan_mode,
            formula: opt.loss_formula,
            input_nc: opt.input_nc,
            output_nc: opt.output_nc,
            ngf: opt.ngf,
            ndf: opt.ndf,
            n_layers_d: opt.n_layers_d,
            use_dropout: !opt.no_dropout,
            fine_size: opt.fine_size,
        })
    }

    /// Rejects a sample that is not a pair of `fine_size` square batches of
    /// equal length with the configured channels.
    pub fn check_sample(&self, sample: &Sample) -> Result<()> {
        let n = self.check_batch("domain A batch", &sample.a, self.input_nc, None)?;
        self.check_batch("domain B batch", &sample.b, self.output_nc, Some(n))?;
        Ok(())
    }

    fn check_batch(
        &self,
        what: &'static str,
        xs: &Tensor,
        channels: i64,
        batch: Option<i64>,
    ) -> Result<i64> {
        let size = xs.size();
        let side = self.fine_size;
        let fits = size.len() == 4
            && batch.map_or(true, |n| size[0] == n)
            && size[1..] == [channels, side, side];
        if !fits {
            let n = batch.map_or_else(|| "N".to_string(), |n| n.to_string());
            return Err(DlpGanError::ShapeMismatch {
                what,
                expected: format!("[{n}, {channels}, {side}, {side}]"),
                actual: size,
            });
        }
        Ok(size[0])
    }
}

/// G_A translates A to B, G_B translates B to A. Both live in one var store
/// so a single optimizer updates them jointly.
#[derive(Debug)]
pub struct Generators {
    vs: nn::VarStore,
    g_a: Generator,
    g_b: Generator,
    config: ModelConfig,
}

impl Generators {
    pub fn new(device: Device, config: ModelConfig) -> Generators {
        let vs = nn::VarStore::new(device);
        let g_a = define_generator(
            &vs.root() / "G_A",
            config.generator,
            config.input_nc,
            config.output_nc,
            config.ngf,
            config.layers,
            config.use_dropout,
        );
        let g_b = define_generator(
            &vs.root() / "G_B",
            config.generator,
            config.output_nc,
            config.input_nc,
            config.ngf,
            config.layers,
            config.use_dropout,
        );
        info!(
            kind = ?config.generator,
            g_a = parameter_count(&vs, "G_A."),
            g_b = parameter_count(&vs, "G_B."),
            "built generators"
        );
        Generators {
            vs,
            g_a,
            g_b,
            config,
        }
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    /// Translates both sides and back without tracking gradients.
    pub fn test(&self, sample: &Sample) -> Result<Visuals> {
        self.config.check_sample(sample)?;
        let device = self.vs.device();
        let real_a = sample.a.to_device(device);
        let real_b = sample.b.to_device(device);
        let mut visuals = Visuals::default();
        tch::no_grad(|| {
            let fake_b = real_a.apply_t(&self.g_a, false);
            let rec_a = fake_b.apply_t(&self.g_b, false);
            let fake_a = real_b.apply_t(&self.g_b, false);
            let rec_b = fake_a.apply_t(&self.g_a, false);
            visuals.push("real_A", &real_a);
            visuals.push("fake_B", &fake_b);
            visuals.push("rec_A", &rec_a);
            visuals.push("real_B", &real_b);
            visuals.push("fake_A", &fake_a);
            visuals.push("rec_B", &rec_b);
        });
        Ok(visuals)
    }

    pub fn save(&self, label: &str, dir: &std::path::Path) -> Result<()> {
        save_network(&self.vs, "G_A", label, dir)?;
        save_network(&self.vs, "G_B", label, dir)?;
        Ok(())
    }

    pub fn load(&self, label: &str, dir: &std::path::Path) -> Result<()> {
        load_network(&self.vs, "G_A", label, dir)?;
        load_network(&self.vs, "G_B", label, dir)?;
        Ok(())
    }
}

/// Everything one training run owns: networks, optimizers, schedule,
/// image histories and the frozen feature networks.
pub struct Trainer {
    config: ModelConfig,
    checkpoint_dir: PathBuf,
    generators: Generators,
    d_a_vs: nn::VarStore,
    d_a: Discriminator,
    d_b_vs: nn::VarStore,
    d_b: Discriminator,
    extractors: FeatureExtractors,
    gan_loss: GanLoss,
    weights: LossWeights,
    optimizer_g: nn::Optimizer,
    optimizer_d_a: nn::Optimizer,
    optimizer_d_b: nn::Optimizer,
    scheduler: LrScheduler,
    fake_a_pool: ImagePool,
    fake_b_pool: ImagePool,
    visuals: Option<Visuals>,
}

impl Trainer {
    /// Builds the training context, loading the pretrained feature networks
    /// named by the options.
    pub fn new(opt: &Options, device: Device) -> Result<Trainer> {
        let extractors =
            FeatureExtractors::load(device, &opt.vgg_weights_path(), &opt.dexined_weights_path())?;
        Trainer::with_extractors(opt, device, extractors)
    }

    pub fn with_extractors(
        opt: &Options,
        device: Device,
        extractors: FeatureExtractors,
    ) -> Result<Trainer> {
        let config = ModelConfig::from_options(opt)?;
        let weights = LossWeights::from_options(opt, config.formula);
        if weights.identity_enabled() && config.input_nc != config.output_nc {
            return Err(DlpGanError::InvalidConfiguration {
                reason: format!(
                    "identity loss needs input_nc == output_nc, got {} and {}",
                    config.input_nc, config.output_nc
                ),
            });
        }
        let policy = LrPolicy::from_options(opt)?;

        let generators = Generators::new(device, config);
        let (d_a_vs, d_a) = build_discriminator(device, "D_A", config.output_nc, &config);
        let (d_b_vs, d_b) = build_discriminator(device, "D_B", config.input_nc, &config);

        let scheduler = LrScheduler::new(opt.lr, policy);
        let adam = nn::adam(opt.beta1, 0.999, 0.);
        let optimizer_g = adam.build(generators.var_store(), scheduler.lr())?;
        let optimizer_d_a = adam.build(&d_a_vs, scheduler.lr())?;
        let optimizer_d_b = adam.build(&d_b_vs, scheduler.lr())?;

        let (fake_a_pool, fake_b_pool) = match opt.seed {
            Some(seed) => (
                ImagePool::with_seed(opt.pool_size, seed),
                ImagePool::with_seed(opt.pool_size, seed.wrapping_add(1)),
            ),
            None => (ImagePool::new(opt.pool_size), ImagePool::new(opt.pool_size)),
        };

        let trainer = Trainer {
            config,
            checkpoint_dir: opt.checkpoint_dir(),
            generators,
            d_a_vs,
            d_a,
            d_b_vs,
            d_b,
            extractors,
            gan_loss: GanLoss::new(config.gan_mode),
            weights,
            optimizer_g,
            optimizer_d_a,
            optimizer_d_b,
            scheduler,
            fake_a_pool,
            fake_b_pool,
            visuals: None,
        };
        if opt.continue_train {
            trainer.load(&opt.which_epoch)?;
        }
        Ok(trainer)
    }

    /// One iteration: both generators, then D_A, then D_B.
    pub fn optimize_parameters(&mut self, sample: &Sample) -> Result<LossRecord> {
        self.config.check_sample(sample)?;
        let device = self.generators.vs.device();
        let real_a = sample.a.to_device(device);
        let real_b = sample.b.to_device(device);

        // Generators: the discriminators only pass gradients through.
        self.d_a_vs.freeze();
        self.d_b_vs.freeze();
        let g_a = &self.generators.g_a;
        let g_b = &self.generators.g_b;

        let fake_b = real_a.apply_t(g_a, true);
        let rec_a = fake_b.apply_t(g_b, true);
        let fake_a = real_b.apply_t(g_b, true);
        let rec_b = fake_a.apply_t(g_a, true);

        let (idt, idt_a_loss, idt_b_loss) = if self.weights.identity_enabled() {
            let idt_a = real_b.apply_t(g_a, true);
            let idt_b = real_a.apply_t(g_b, true);
            let idt_a_loss = idt_a.l1_loss(&real_b, Reduction::Mean);
            let idt_b_loss = idt_b.l1_loss(&real_a, Reduction::Mean);
            (Some((idt_a, idt_b)), Some(idt_a_loss), Some(idt_b_loss))
        } else {
            (None, None, None)
        };

        let terms = GeneratorTerms {
            gan_a: self.gan_loss.loss(&fake_b.apply_t(&self.d_a, true), true),
            gan_b: self.gan_loss.loss(&fake_a.apply_t(&self.d_b, true), true),
            feature_a: self.extractors.feature_loss(&real_a, &rec_a),
            feature_b: self.extractors.feature_loss(&real_b, &rec_b),
            semantic_a: self.extractors.semantic_loss(&real_a, &fake_b),
            semantic_b: self.extractors.semantic_loss(&real_b, &fake_a),
            idt_a: idt_a_loss,
            idt_b: idt_b_loss,
        };
        let loss_g = self.weights.total(&terms);
        self.optimizer_g.backward_step(&loss_g);
        self.d_a_vs.unfreeze();
        self.d_b_vs.unfreeze();

        // D_A tells real B from translated A, D_B real A from translated B.
        let pooled_b = self.fake_b_pool.query(&fake_b.detach());
        let loss_d_a = self.discriminator_loss(&self.d_a, &real_b, &pooled_b);
        self.optimizer_d_a.backward_step(&loss_d_a);

        let pooled_a = self.fake_a_pool.query(&fake_a.detach());
        let loss_d_b = self.discriminator_loss(&self.d_b, &real_a, &pooled_a);
        self.optimizer_d_b.backward_step(&loss_d_b);

        let mut record = LossRecord::default();
        record.push("D_A", scalar(&loss_d_a));
        record.push("G_A", scalar(&terms.gan_a));
        record.push("Cyc_A", scalar(&terms.feature_a));
        record.push("D_B", scalar(&loss_d_b));
        record.push("G_B", scalar(&terms.gan_b));
        record.push("Cyc_B", scalar(&terms.feature_b));
        record.push("Content_A", scalar(&terms.semantic_a));
        record.push("Content_B", scalar(&terms.semantic_b));
        record.push("idt_A", terms.idt_a.as_ref().map_or(0.0, scalar));
        record.push("idt_B", terms.idt_b.as_ref().map_or(0.0, scalar));
        debug!(losses = %record, "optimized parameters");

        let mut visuals = Visuals::default();
        visuals.push("real_A", &real_a);
        visuals.push("fake_B", &fake_b);
        visuals.push("rec_A", &rec_a);
        visuals.push("real_B", &real_b);
        visuals.push("fake_A", &fake_a);
        visuals.push("rec_B", &rec_b);
        if let Some((idt_a, idt_b)) = &idt {
            visuals.push("idt_A", idt_a);
            visuals.push("idt_B", idt_b);
        }
        self.visuals = Some(visuals);

        Ok(record)
    }

    fn discriminator_loss(&self, net: &Discriminator, real: &Tensor, fake: &Tensor) -> Tensor {
        let loss_real = self.gan_loss.loss(&real.apply_t(net, true), true);
        let loss_fake = self.gan_loss.loss(&fake.apply_t(net, true), false);
        (loss_real + loss_fake) * 0.5
    }

    /// Images of the last iteration, `None` before the first one.
    pub fn current_visuals(&self) -> Option<&Visuals> {
        self.visuals.as_ref()
    }

    /// Advances the schedule by one epoch on all three optimizers.
    pub fn update_learning_rate(&mut self) -> f64 {
        let lr = self.scheduler.step();
        self.optimizer_g.set_lr(lr);
        self.optimizer_d_a.set_lr(lr);
        self.optimizer_d_b.set_lr(lr);
        info!(lr, "learning rate updated");
        lr
    }

    pub fn learning_rate(&self) -> f64 {
        self.scheduler.lr()
    }

    pub fn save(&self, label: &str) -> Result<()> {
        self.generators.save(label, &self.checkpoint_dir)?;
        save_network(&self.d_a_vs, "D_A", label, &self.checkpoint_dir)?;
        save_network(&self.d_b_vs, "D_B", label, &self.checkpoint_dir)?;
        info!(label, dir = %self.checkpoint_dir.display(), "saved checkpoint");
        Ok(())
    }

    pub fn load(&self, label: &str) -> Result<()> {
        self.generators.load(label, &self.checkpoint_dir)?;
        load_network(&self.d_a_vs, "D_A", label, &self.checkpoint_dir)?;
        load_network(&self.d_b_vs, "D_B", label, &self.checkpoint_dir)?;
        info!(label, dir = %self.checkpoint_dir.display(), "resumed from checkpoint");
        Ok(())
    }

    pub fn generators(&self) -> &Generators {
        &self.generators
    }

    pub fn discriminator_stores(&self) -> [&nn::VarStore; 2] {
        [&self.d_a_vs, &self.d_b_vs]
    }

    pub fn extractors(&self) -> &FeatureExtractors {
        &self.extractors
    }
}

fn build_discriminator(
    device: Device,
    name: &str,
    input_nc: i64,
    config: &ModelConfig,
) -> (nn::VarStore, Discriminator) {
    let vs = nn::VarStore::new(device);
    let net = define_discriminator(
        &vs.root() / name,
        config.discriminator,
        input_nc,
        config.ndf,
        config.n_layers_d,
        config.layers,
        config.gan_mode,
    );
    info!(
        network = name,
        kind = ?config.discriminator,
        params = parameter_count(&vs, ""),
        "built discriminator"
    );
    (vs, net)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tch::kind;

    fn options(args: &[&str]) -> Options {
        let mut argv = vec![
            "dlp-gan",
            "--ngf",
            "4",
            "--which-model-net-g",
            "resnet_6blocks",
            "--fine-size",
            "16",
        ];
        argv.extend_from_slice(args);
        Options::parse_from(argv)
    }

    fn sample(a_nc: i64, b_nc: i64) -> Sample {
        sized(a_nc, b_nc, 16)
    }

    fn sized(a_nc: i64, b_nc: i64, side: i64) -> Sample {
        Sample {
            a: Tensor::rand([1, a_nc, side, side], kind::FLOAT_CPU) * 2.0 - 1.0,
            b: Tensor::rand([1, b_nc, side, side], kind::FLOAT_CPU) * 2.0 - 1.0,
            a_paths: vec![PathBuf::from("a.png")],
            b_paths: vec![PathBuf::from("b.png")],
        }
    }

    #[test]
    fn fine_size_must_suit_the_generator() {
        let rejected: [&[&str]; 3] = [
            &["--fine-size", "30"],
            &["--fine-size", "0"],
            &["--which-model-net-g", "unet_256", "--fine-size", "128"],
        ];
        for args in rejected {
            assert!(
                matches!(
                    ModelConfig::from_options(&options(args)),
                    Err(DlpGanError::InvalidConfiguration { .. })
                ),
                "{args:?}"
            );
        }
        let config =
            ModelConfig::from_options(&options(&["--which-model-net-g", "unet_128", "--fine-size", "128"]))
                .unwrap();
        assert_eq!(config.generator, GeneratorKind::Unet128);
        assert_eq!(config.fine_size, 128);
    }

    #[test]
    fn batches_of_another_size_are_rejected() {
        let config = ModelConfig::from_options(&options(&[])).unwrap();
        assert!(config.check_sample(&sample(3, 3)).is_ok());
        let err = config.check_sample(&sized(3, 3, 30)).unwrap_err();
        assert!(matches!(
            err,
            DlpGanError::ShapeMismatch {
                what: "domain A batch",
                ..
            }
        ));
        let uneven = Sample {
            b: Tensor::zeros([2, 3, 16, 16], kind::FLOAT_CPU),
            ..sample(3, 3)
        };
        let err = config.check_sample(&uneven).unwrap_err();
        assert!(matches!(
            err,
            DlpGanError::ShapeMismatch {
                what: "domain B batch",
                ..
            }
        ));
        assert!(err.to_string().contains("[1, 3, 16, 16]"));
    }

    #[test]
    fn wrong_channels_are_rejected() {
        let config = ModelConfig::from_options(&options(&[])).unwrap();
        let err = config.check_sample(&sample(1, 3)).unwrap_err();
        assert!(matches!(
            err,
            DlpGanError::ShapeMismatch {
                what: "domain A batch",
                ..
            }
        ));
        let unbatched = Sample {
            a: Tensor::zeros([3, 16, 16], kind::FLOAT_CPU),
            ..sample(3, 3)
        };
        assert!(config.check_sample(&unbatched).is_err());
    }

    #[test]
    fn test_translates_both_ways() {
        let config = ModelConfig::from_options(&options(&["--output-nc", "1"])).unwrap();
        let generators = Generators::new(Device::Cpu, config);
        let visuals = generators.test(&sample(3, 1)).unwrap();
        assert_eq!(
            visuals.names(),
            ["real_A", "fake_B", "rec_A", "real_B", "fake_A", "rec_B"]
        );
        assert_eq!(visuals.get("fake_B").unwrap().size(), [1, 1, 16, 16]);
        assert_eq!(visuals.get("rec_A").unwrap().size(), [1, 3, 16, 16]);
        assert!(!visuals.get("fake_A").unwrap().requires_grad());
    }
}
