use clap::ValueEnum;
use tch::nn::{self, ModuleT};
use tch::Tensor;

use crate::networks::{leaky_relu, LayerConfig};

/// Generator architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GeneratorKind {
    #[value(name = "resnet_9blocks")]
    Resnet9Blocks,
    #[value(name = "resnet_6blocks")]
    Resnet6Blocks,
    #[value(name = "unet_128")]
    Unet128,
    #[value(name = "unet_256")]
    Unet256,
}

impl GeneratorKind {
    /// Image sides must be a multiple of this for the output to keep the
    /// input size.
    pub fn size_multiple(self) -> i64 {
        match self {
            GeneratorKind::Resnet9Blocks | GeneratorKind::Resnet6Blocks => 4,
            GeneratorKind::Unet128 => 1 << 7,
            GeneratorKind::Unet256 => 1 << 8,
        }
    }
}

/// Image-to-image translator from one domain to the other.
#[derive(Debug)]
pub enum Generator {
    Resnet(ResnetGenerator),
    Unet(UnetGenerator),
}

/// Builds the generator named by `kind` below `path`.
pub fn define_generator(
    path: nn::Path,
    kind: GeneratorKind,
    input_nc: i64,
    output_nc: i64,
    ngf: i64,
    layers: LayerConfig,
    use_dropout: bool,
) -> Generator {
    match kind {
        GeneratorKind::Resnet9Blocks => Generator::Resnet(ResnetGenerator::new(
            path, input_nc, output_nc, ngf, 9, layers, use_dropout,
        )),
        GeneratorKind::Resnet6Blocks => Generator::Resnet(ResnetGenerator::new(
            path, input_nc, output_nc, ngf, 6, layers, use_dropout,
        )),
        GeneratorKind::Unet128 => Generator::Unet(UnetGenerator::new(
            path, input_nc, output_nc, 7, ngf, layers, use_dropout,
        )),
        GeneratorKind::Unet256 => Generator::Unet(UnetGenerator::new(
            path, input_nc, output_nc, 8, ngf, layers, use_dropout,
        )),
    }
}

impl nn::ModuleT for Generator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        match self {
            Generator::Resnet(net) => net.forward_t(xs, train),
            Generator::Unet(net) => net.forward_t(xs, train),
        }
    }
}

#[derive(Debug)]
struct ResnetBlock {
    block: nn::SequentialT,
}

impl ResnetBlock {
    fn new(path: nn::Path, dim: i64, layers: LayerConfig, use_dropout: bool) -> ResnetBlock {
        let bias = layers.use_bias();
        let mut block = nn::seq_t()
            .add_fn(|x| x.reflection_pad2d([1, 1, 1, 1]))
            .add(nn::conv2d(&path / "Conv2d_1", dim, dim, 3, layers.conv(1, 0, bias)));
        block = layers.add_norm(block, &path / "norm_1", dim).add_fn(|x| x.relu());
        if use_dropout {
            block = block.add_fn_t(|x, train| x.dropout(0.5, train));
        }
        block = block
            .add_fn(|x| x.reflection_pad2d([1, 1, 1, 1]))
            .add(nn::conv2d(&path / "Conv2d_2", dim, dim, 3, layers.conv(1, 0, bias)));
        block = layers.add_norm(block, &path / "norm_2", dim);
        ResnetBlock { block }
    }
}

impl nn::ModuleT for ResnetBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs + xs.apply_t(&self.block, train)
    }
}

/// Encoder, residual transformer, decoder.
#[derive(Debug)]
pub struct ResnetGenerator {
    net: nn::SequentialT,
}

impl ResnetGenerator {
    pub fn new(
        path: nn::Path,
        input_nc: i64,
        output_nc: i64,
        ngf: i64,
        n_blocks: usize,
        layers: LayerConfig,
        use_dropout: bool,
    ) -> ResnetGenerator {
        let bias = layers.use_bias();
        let mut net = nn::seq_t()
            .add_fn(|x| x.reflection_pad2d([3, 3, 3, 3]))
            .add(nn::conv2d(&path / "Conv2d_in", input_nc, ngf, 7, layers.conv(1, 0, bias)));
        net = layers.add_norm(net, &path / "norm_in", ngf).add_fn(|x| x.relu());

        let n_downsampling = 2;
        for i in 0..n_downsampling {
            let mult = 1 << i;
            net = net.add(nn::conv2d(
                &path / format!("Conv2d_down_{}", i + 1),
                ngf * mult,
                ngf * mult * 2,
                3,
                layers.conv(2, 1, bias),
            ));
            net = layers
                .add_norm(net, &path / format!("norm_down_{}", i + 1), ngf * mult * 2)
                .add_fn(|x| x.relu());
        }

        let mult = 1 << n_downsampling;
        for i in 0..n_blocks {
            net = net.add(ResnetBlock::new(
                &path / format!("block_{}", i + 1),
                ngf * mult,
                layers,
                use_dropout,
            ));
        }

        for i in 0..n_downsampling {
            let mult = 1 << (n_downsampling - i);
            net = net.add(nn::conv_transpose2d(
                &path / format!("ConvTranspose2d_up_{}", i + 1),
                ngf * mult,
                ngf * mult / 2,
                3,
                layers.conv_transpose(2, 1, 1, bias),
            ));
            net = layers
                .add_norm(net, &path / format!("norm_up_{}", i + 1), ngf * mult / 2)
                .add_fn(|x| x.relu());
        }

        let net = net
            .add_fn(|x| x.reflection_pad2d([3, 3, 3, 3]))
            .add(nn::conv2d(&path / "Conv2d_out", ngf, output_nc, 7, layers.conv(1, 0, true)))
            .add_fn(|x| x.tanh());
        ResnetGenerator { net }
    }
}

impl nn::ModuleT for ResnetGenerator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.net.forward_t(xs, train)
    }
}

/// One level of the U-Net: a downsampling step, the nested levels and the
/// matching upsampling step, joined by a skip connection.
#[derive(Debug)]
struct UnetBlock {
    down: nn::SequentialT,
    up: nn::SequentialT,
    inner: Option<Box<UnetBlock>>,
    outermost: bool,
}

enum UnetLevel {
    Innermost,
    Middle,
    Outermost,
}

impl UnetBlock {
    #[allow(clippy::too_many_arguments)]
    fn new(
        path: nn::Path,
        outer_nc: i64,
        inner_nc: i64,
        input_nc: i64,
        inner: Option<UnetBlock>,
        level: UnetLevel,
        layers: LayerConfig,
        use_dropout: bool,
    ) -> UnetBlock {
        let bias = layers.use_bias();
        let down_conv = nn::conv2d(&path / "Conv2d_down", input_nc, inner_nc, 4, layers.conv(2, 1, bias));
        let up_in = match level {
            UnetLevel::Innermost => inner_nc,
            _ => inner_nc * 2,
        };
        let up_bias = match level {
            UnetLevel::Outermost => true,
            _ => bias,
        };
        let up_conv = nn::conv_transpose2d(
            &path / "ConvTranspose2d_up",
            up_in,
            outer_nc,
            4,
            layers.conv_transpose(2, 1, 0, up_bias),
        );

        let (down, up) = match level {
            UnetLevel::Outermost => {
                let down = nn::seq_t().add(down_conv);
                let up = nn::seq_t().add_fn(|x| x.relu()).add(up_conv).add_fn(|x| x.tanh());
                (down, up)
            }
            UnetLevel::Innermost => {
                let down = nn::seq_t().add_fn(leaky_relu).add(down_conv);
                let up = nn::seq_t().add_fn(|x| x.relu()).add(up_conv);
                let up = layers.add_norm(up, &path / "norm_up", outer_nc);
                (down, up)
            }
            UnetLevel::Middle => {
                let down = nn::seq_t().add_fn(leaky_relu).add(down_conv);
                let down = layers.add_norm(down, &path / "norm_down", inner_nc);
                let up = nn::seq_t().add_fn(|x| x.relu()).add(up_conv);
                let mut up = layers.add_norm(up, &path / "norm_up", outer_nc);
                if use_dropout {
                    up = up.add_fn_t(|x, train| x.dropout(0.5, train));
                }
                (down, up)
            }
        };

        UnetBlock {
            down,
            up,
            inner: inner.map(Box::new),
            outermost: matches!(level, UnetLevel::Outermost),
        }
    }
}

impl nn::ModuleT for UnetBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let down = xs.apply_t(&self.down, train);
        let mid = match &self.inner {
            Some(inner) => inner.forward_t(&down, train),
            None => down,
        };
        let up = mid.apply_t(&self.up, train);
        if self.outermost {
            up
        } else {
            Tensor::cat(&[xs, &up], 1)
        }
    }
}

/// U-Net with `num_downs` halvings; inputs must be divisible by `2^num_downs`.
#[derive(Debug)]
pub struct UnetGenerator {
    net: UnetBlock,
}

impl UnetGenerator {
    pub fn new(
        path: nn::Path,
        input_nc: i64,
        output_nc: i64,
        num_downs: usize,
        ngf: i64,
        layers: LayerConfig,
        use_dropout: bool,
    ) -> UnetGenerator {
        let mut depth = num_downs;
        let mut block = UnetBlock::new(
            &path / format!("level_{depth}"),
            ngf * 8,
            ngf * 8,
            ngf * 8,
            None,
            UnetLevel::Innermost,
            layers,
            false,
        );
        for _ in 0..num_downs.saturating_sub(5) {
            depth -= 1;
            block = UnetBlock::new(
                &path / format!("level_{depth}"),
                ngf * 8,
                ngf * 8,
                ngf * 8,
                Some(block),
                UnetLevel::Middle,
                layers,
                use_dropout,
            );
        }
        for (outer, inner) in [(4, 8), (2, 4), (1, 2)] {
            depth -= 1;
            block = UnetBlock::new(
                &path / format!("level_{depth}"),
                ngf * outer,
                ngf * inner,
                ngf * outer,
                Some(block),
                UnetLevel::Middle,
                layers,
                false,
            );
        }
        let net = UnetBlock::new(
            &path / "level_1",
            output_nc,
            ngf,
            input_nc,
            Some(block),
            UnetLevel::Outermost,
            layers,
            false,
        );
        UnetGenerator { net }
    }
}

impl nn::ModuleT for UnetGenerator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.net.forward_t(xs, train)
    }
}
