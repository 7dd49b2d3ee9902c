//! Building blocks shared by the generators and discriminators.

use clap::ValueEnum;
use tch::nn::{self, Init};
use tch::Tensor;

/// Normalization layer placed after each convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NormKind {
    Batch,
    Instance,
    None,
}

/// Weight initialization of the trainable networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InitKind {
    Normal,
    Kaiming,
    Orthogonal,
}

/// Layer configuration derived from the chosen norm and init scheme.
#[derive(Debug, Clone, Copy)]
pub struct LayerConfig {
    pub norm: NormKind,
    pub init: InitKind,
    pub init_gain: f64,
}

impl LayerConfig {
    pub fn new(norm: NormKind, init: InitKind, init_gain: f64) -> LayerConfig {
        LayerConfig {
            norm,
            init,
            init_gain,
        }
    }

    /// Affine batch norm carries its own shift, every other norm needs a conv bias.
    pub fn use_bias(&self) -> bool {
        self.norm != NormKind::Batch
    }

    fn weight_init(&self) -> Init {
        match self.init {
            InitKind::Normal => Init::Randn {
                mean: 0.,
                stdev: self.init_gain,
            },
            InitKind::Kaiming => nn::init::DEFAULT_KAIMING_NORMAL,
            InitKind::Orthogonal => Init::Orthogonal {
                gain: self.init_gain,
            },
        }
    }

    pub fn conv(&self, stride: i64, padding: i64, bias: bool) -> nn::ConvConfig {
        nn::ConvConfig {
            stride,
            padding,
            bias,
            ws_init: self.weight_init(),
            bs_init: Init::Const(0.),
            ..Default::default()
        }
    }

    pub fn conv_transpose(
        &self,
        stride: i64,
        padding: i64,
        output_padding: i64,
        bias: bool,
    ) -> nn::ConvTransposeConfig {
        nn::ConvTransposeConfig {
            stride,
            padding,
            output_padding,
            bias,
            ws_init: self.weight_init(),
            bs_init: Init::Const(0.),
            ..Default::default()
        }
    }

    /// Appends the configured norm layer for `dim` channels.
    pub fn add_norm(&self, seq: nn::SequentialT, path: nn::Path, dim: i64) -> nn::SequentialT {
        match self.norm {
            NormKind::Batch => {
                let config = nn::BatchNormConfig {
                    ws_init: Init::Randn {
                        mean: 1.0,
                        stdev: self.init_gain,
                    },
                    bs_init: Init::Const(0.),
                    ..Default::default()
                };
                seq.add(nn::batch_norm2d(path, dim, config))
            }
            NormKind::Instance => seq.add_fn(instance_norm),
            NormKind::None => seq,
        }
    }
}

/// Non-affine instance normalization.
pub fn instance_norm(xs: &Tensor) -> Tensor {
    xs.instance_norm::<Tensor>(None, None, None, None, true, 0.1, 1e-5, false)
}

pub fn leaky_relu(xs: &Tensor) -> Tensor {
    xs.maximum(&(xs * 0.2))
}

/// Number of scalar values (weights and running statistics) stored below
/// `prefix` in a var store.
pub fn parameter_count(vs: &nn::VarStore, prefix: &str) -> i64 {
    vs.variables()
        .iter()
        .filter(|(name, _)| name.starts_with(prefix))
        .map(|(_, t)| t.numel() as i64)
        .sum()
}

/// Copies every variable of a store to CPU, keyed by name.
pub fn snapshot(vs: &nn::VarStore) -> Vec<(String, Tensor)> {
    let mut vars: Vec<(String, Tensor)> = vs
        .variables()
        .into_iter()
        .map(|(name, t)| (name, t.detach().to_device(tch::Device::Cpu).copy()))
        .collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{kind, Device, Kind};

    #[test]
    fn norm_and_init_names() {
        assert_eq!(NormKind::from_str("instance", false).unwrap(), NormKind::Instance);
        assert_eq!(NormKind::from_str("none", false).unwrap(), NormKind::None);
        assert_eq!(InitKind::from_str("orthogonal", false).unwrap(), InitKind::Orthogonal);
        assert!(InitKind::from_str("xavier_plus", false).is_err());
        assert!(NormKind::from_str("group", false).is_err());
    }

    #[test]
    fn bias_follows_norm() {
        assert!(!LayerConfig::new(NormKind::Batch, InitKind::Normal, 0.02).use_bias());
        assert!(LayerConfig::new(NormKind::Instance, InitKind::Normal, 0.02).use_bias());
    }

    #[test]
    fn instance_norm_centers_each_channel() {
        let xs = Tensor::randn([2, 4, 8, 8], kind::FLOAT_CPU) * 3.0 + 5.0;
        let ys = instance_norm(&xs);
        let mean = ys.mean_dim(&[2i64, 3][..], false, Kind::Float);
        assert!(mean.abs().max().double_value(&[]) < 1e-4);
    }

    #[test]
    fn leaky_relu_slope() {
        let xs = Tensor::from_slice(&[-1.0f32, 0.0, 2.0]);
        let ys = leaky_relu(&xs);
        assert!((ys.double_value(&[0]) + 0.2).abs() < 1e-6);
        assert_eq!(ys.double_value(&[2]), 2.0);
    }

    #[test]
    fn batch_norm_registers_parameters() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = LayerConfig::new(NormKind::Batch, InitKind::Normal, 0.02);
        let seq = config.add_norm(nn::seq_t(), &vs.root() / "norm", 4);
        let ys = Tensor::ones([2, 4, 3, 3], kind::FLOAT_CPU).apply_t(&seq, true);
        assert_eq!(ys.size(), [2, 4, 3, 3]);
        // weight, bias, running mean and running var
        assert_eq!(parameter_count(&vs, "norm"), 16);
    }
}
