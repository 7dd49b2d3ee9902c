use clap::ValueEnum;
use tch::nn::{self, ModuleT};
use tch::Tensor;

use crate::networks::{leaky_relu, LayerConfig};
use crate::options::GanMode;

/// Discriminator architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DiscriminatorKind {
    Basic,
    #[value(name = "n_layers")]
    NLayers,
    Pixel,
}

/// Real/fake classifier producing a map of patch scores.
#[derive(Debug)]
pub enum Discriminator {
    NLayer(NLayerDiscriminator),
    Pixel(PixelDiscriminator),
}

/// Builds the discriminator named by `kind` below `path`. With
/// [`GanMode::Vanilla`] the scores go through a sigmoid.
pub fn define_discriminator(
    path: nn::Path,
    kind: DiscriminatorKind,
    input_nc: i64,
    ndf: i64,
    n_layers: i64,
    layers: LayerConfig,
    mode: GanMode,
) -> Discriminator {
    let use_sigmoid = mode == GanMode::Vanilla;
    match kind {
        DiscriminatorKind::Basic => Discriminator::NLayer(NLayerDiscriminator::new(
            path,
            input_nc,
            ndf,
            3,
            layers,
            use_sigmoid,
        )),
        DiscriminatorKind::NLayers => Discriminator::NLayer(NLayerDiscriminator::new(
            path,
            input_nc,
            ndf,
            n_layers,
            layers,
            use_sigmoid,
        )),
        DiscriminatorKind::Pixel => Discriminator::Pixel(PixelDiscriminator::new(
            path,
            input_nc,
            ndf,
            layers,
            use_sigmoid,
        )),
    }
}

impl nn::ModuleT for Discriminator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        match self {
            Discriminator::NLayer(net) => net.forward_t(xs, train),
            Discriminator::Pixel(net) => net.forward_t(xs, train),
        }
    }
}

/// PatchGAN: `n_layers` strided 4x4 convolutions scoring overlapping patches.
#[derive(Debug)]
pub struct NLayerDiscriminator {
    net: nn::SequentialT,
}

impl NLayerDiscriminator {
    pub fn new(
        path: nn::Path,
        input_nc: i64,
        ndf: i64,
        n_layers: i64,
        layers: LayerConfig,
        use_sigmoid: bool,
    ) -> NLayerDiscriminator {
        let bias = layers.use_bias();
        let mut net = nn::seq_t()
            .add(nn::conv2d(&path / "Conv2d_1", input_nc, ndf, 4, layers.conv(2, 1, true)))
            .add_fn(leaky_relu);

        let mut nf_mult = 1;
        for n in 1..=n_layers {
            let nf_mult_prev = nf_mult;
            nf_mult = (1 << n).min(8);
            // The last block keeps the resolution.
            let stride = if n < n_layers { 2 } else { 1 };
            net = net.add(nn::conv2d(
                &path / format!("Conv2d_{}", n + 1),
                ndf * nf_mult_prev,
                ndf * nf_mult,
                4,
                layers.conv(stride, 1, bias),
            ));
            net = layers
                .add_norm(net, &path / format!("norm_{}", n + 1), ndf * nf_mult)
                .add_fn(leaky_relu);
        }

        net = net.add(nn::conv2d(
            &path / format!("Conv2d_{}", n_layers + 2),
            ndf * nf_mult,
            1,
            4,
            layers.conv(1, 1, true),
        ));
        if use_sigmoid {
            net = net.add_fn(|x| x.sigmoid());
        }
        NLayerDiscriminator { net }
    }
}

impl nn::ModuleT for NLayerDiscriminator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.net.forward_t(xs, train)
    }
}

/// 1x1 PixelGAN scoring every pixel independently.
#[derive(Debug)]
pub struct PixelDiscriminator {
    net: nn::SequentialT,
}

impl PixelDiscriminator {
    pub fn new(
        path: nn::Path,
        input_nc: i64,
        ndf: i64,
        layers: LayerConfig,
        use_sigmoid: bool,
    ) -> PixelDiscriminator {
        let bias = layers.use_bias();
        let net = nn::seq_t()
            .add(nn::conv2d(&path / "Conv2d_1", input_nc, ndf, 1, layers.conv(1, 0, true)))
            .add_fn(leaky_relu)
            .add(nn::conv2d(&path / "Conv2d_2", ndf, ndf * 2, 1, layers.conv(1, 0, bias)));
        let mut net = layers
            .add_norm(net, &path / "norm_2", ndf * 2)
            .add_fn(leaky_relu)
            .add(nn::conv2d(&path / "Conv2d_3", ndf * 2, 1, 1, layers.conv(1, 0, bias)));
        if use_sigmoid {
            net = net.add_fn(|x| x.sigmoid());
        }
        PixelDiscriminator { net }
    }
}

impl nn::ModuleT for PixelDiscriminator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.net.forward_t(xs, train)
    }
}
