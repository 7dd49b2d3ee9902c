//! DexiNed edge detector (dense extreme inception network).
//!
//! Six encoder blocks, each with an upsampling head producing a full
//! resolution edge map; a 1x1 convolution fuses the six maps into a seventh.
//! Variable names match the reference PyTorch checkpoint so converted
//! weights load directly.

use tch::nn::{self, ModuleT};
use tch::Tensor;

fn conv(path: nn::Path, c_in: i64, c_out: i64, ksize: i64, stride: i64, padding: i64) -> nn::Conv2D {
    let config = nn::ConvConfig {
        stride,
        padding,
        ..Default::default()
    };
    nn::conv2d(path, c_in, c_out, ksize, config)
}

fn max_pool(xs: &Tensor) -> Tensor {
    xs.max_pool2d([3, 3], [2, 2], [1, 1], [1, 1], false)
}

#[derive(Debug)]
struct DoubleConvBlock {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
    use_act: bool,
}

impl DoubleConvBlock {
    fn new(path: nn::Path, c_in: i64, c_mid: i64, c_out: i64, stride: i64, use_act: bool) -> Self {
        DoubleConvBlock {
            conv1: conv(&path / "conv1", c_in, c_mid, 3, stride, 1),
            bn1: nn::batch_norm2d(&path / "bn1", c_mid, Default::default()),
            conv2: conv(&path / "conv2", c_mid, c_out, 3, 1, 1),
            bn2: nn::batch_norm2d(&path / "bn2", c_out, Default::default()),
            use_act,
        }
    }
}

impl nn::ModuleT for DoubleConvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let xs = xs
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .apply(&self.conv2)
            .apply_t(&self.bn2, train);
        if self.use_act {
            xs.relu()
        } else {
            xs
        }
    }
}

/// 1x1 convolution, optionally batch-normalized.
#[derive(Debug)]
struct SingleConvBlock {
    conv: nn::Conv2D,
    bn: Option<nn::BatchNorm>,
}

impl SingleConvBlock {
    fn new(path: nn::Path, c_in: i64, c_out: i64, stride: i64, use_bn: bool) -> Self {
        SingleConvBlock {
            conv: conv(&path / "conv", c_in, c_out, 1, stride, 0),
            bn: use_bn.then(|| nn::batch_norm2d(&path / "bn", c_out, Default::default())),
        }
    }
}

impl nn::ModuleT for SingleConvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let xs = xs.apply(&self.conv);
        match &self.bn {
            Some(bn) => xs.apply_t(bn, train),
            None => xs,
        }
    }
}

#[derive(Debug)]
struct DenseLayer {
    conv1: nn::Conv2D,
    norm1: nn::BatchNorm,
    conv2: nn::Conv2D,
    norm2: nn::BatchNorm,
}

impl DenseLayer {
    fn new(path: nn::Path, c_in: i64, c_out: i64) -> Self {
        DenseLayer {
            // padding 2 followed by an unpadded conv keeps the size
            conv1: conv(&path / "conv1", c_in, c_out, 3, 1, 2),
            norm1: nn::batch_norm2d(&path / "norm1", c_out, Default::default()),
            conv2: conv(&path / "conv2", c_out, c_out, 3, 1, 0),
            norm2: nn::batch_norm2d(&path / "norm2", c_out, Default::default()),
        }
    }

    fn forward_t(&self, xs: &Tensor, skip: &Tensor, train: bool) -> Tensor {
        let new_features = xs
            .relu()
            .apply(&self.conv1)
            .apply_t(&self.norm1, train)
            .relu()
            .apply(&self.conv2)
            .apply_t(&self.norm2, train);
        0.5 * (new_features + skip)
    }
}

#[derive(Debug)]
struct DenseBlock {
    layers: Vec<DenseLayer>,
}

impl DenseBlock {
    fn new(path: nn::Path, num_layers: usize, c_in: i64, c_out: i64) -> Self {
        let layers = (0..num_layers)
            .map(|i| {
                let c_in = if i == 0 { c_in } else { c_out };
                DenseLayer::new(&path / format!("denselayer{}", i + 1), c_in, c_out)
            })
            .collect();
        DenseBlock { layers }
    }

    fn forward_t(&self, xs: &Tensor, skip: &Tensor, train: bool) -> Tensor {
        let mut xs = xs.shallow_clone();
        for layer in &self.layers {
            xs = layer.forward_t(&xs, skip, train);
        }
        xs
    }
}

/// Upsamples by `2^up_scale` down to a single channel.
#[derive(Debug)]
struct UpConvBlock {
    features: nn::Sequential,
}

impl UpConvBlock {
    const CONSTANT_FEATURES: i64 = 16;
    const PADS: [i64; 5] = [0, 0, 1, 3, 7];

    fn new(path: nn::Path, c_in: i64, up_scale: usize) -> Self {
        let features = &path / "features";
        let kernel_size = 1i64 << up_scale;
        let config = nn::ConvTransposeConfig {
            stride: 2,
            padding: Self::PADS[up_scale],
            ..Default::default()
        };
        let mut seq = nn::seq();
        let mut c_in = c_in;
        for i in 0..up_scale {
            let c_out = if i == up_scale - 1 {
                1
            } else {
                Self::CONSTANT_FEATURES
            };
            seq = seq
                .add(conv(&features / (3 * i), c_in, c_out, 1, 1, 0))
                .add_fn(|x| x.relu())
                .add(nn::conv_transpose2d(
                    &features / (3 * i + 2),
                    c_out,
                    c_out,
                    kernel_size,
                    config,
                ));
            c_in = c_out;
        }
        UpConvBlock { features: seq }
    }
}

impl nn::Module for UpConvBlock {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.apply(&self.features)
    }
}

#[derive(Debug)]
pub struct DexiNed {
    block_1: DoubleConvBlock,
    block_2: DoubleConvBlock,
    dblock_3: DenseBlock,
    dblock_4: DenseBlock,
    dblock_5: DenseBlock,
    dblock_6: DenseBlock,

    side_1: SingleConvBlock,
    side_2: SingleConvBlock,
    side_3: SingleConvBlock,
    side_4: SingleConvBlock,

    pre_dense_2: SingleConvBlock,
    pre_dense_3: SingleConvBlock,
    pre_dense_4: SingleConvBlock,
    pre_dense_5: SingleConvBlock,
    pre_dense_6: SingleConvBlock,

    up_blocks: [UpConvBlock; 6],
    block_cat: SingleConvBlock,
}

impl DexiNed {
    pub fn new(path: nn::Path) -> DexiNed {
        let p = |name: &str| &path / name;
        DexiNed {
            block_1: DoubleConvBlock::new(p("block_1"), 3, 32, 64, 2, true),
            block_2: DoubleConvBlock::new(p("block_2"), 64, 128, 128, 1, false),
            dblock_3: DenseBlock::new(p("dblock_3"), 2, 128, 256),
            dblock_4: DenseBlock::new(p("dblock_4"), 3, 256, 512),
            dblock_5: DenseBlock::new(p("dblock_5"), 3, 512, 512),
            dblock_6: DenseBlock::new(p("dblock_6"), 3, 512, 256),

            side_1: SingleConvBlock::new(p("side_1"), 64, 128, 2, true),
            side_2: SingleConvBlock::new(p("side_2"), 128, 256, 2, true),
            side_3: SingleConvBlock::new(p("side_3"), 256, 512, 2, true),
            side_4: SingleConvBlock::new(p("side_4"), 512, 512, 1, true),

            pre_dense_2: SingleConvBlock::new(p("pre_dense_2"), 128, 256, 2, true),
            pre_dense_3: SingleConvBlock::new(p("pre_dense_3"), 128, 256, 1, true),
            pre_dense_4: SingleConvBlock::new(p("pre_dense_4"), 256, 512, 1, true),
            pre_dense_5: SingleConvBlock::new(p("pre_dense_5"), 512, 512, 1, true),
            pre_dense_6: SingleConvBlock::new(p("pre_dense_6"), 512, 256, 1, true),

            up_blocks: [
                UpConvBlock::new(p("up_block_1"), 64, 1),
                UpConvBlock::new(p("up_block_2"), 128, 1),
                UpConvBlock::new(p("up_block_3"), 256, 2),
                UpConvBlock::new(p("up_block_4"), 512, 3),
                UpConvBlock::new(p("up_block_5"), 512, 4),
                UpConvBlock::new(p("up_block_6"), 256, 4),
            ],
            block_cat: SingleConvBlock::new(p("block_cat"), 6, 1, 1, false),
        }
    }

    /// The six side outputs followed by the fused map, all `[N, 1, H, W]`.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Vec<Tensor> {
        let (_, _, height, width) = xs.size4().unwrap_or((0, 0, 0, 0));

        let block_1 = self.block_1.forward_t(xs, train);
        let block_1_side = self.side_1.forward_t(&block_1, train);

        let block_2 = self.block_2.forward_t(&block_1, train);
        let block_2_down = max_pool(&block_2);
        let block_2_add = &block_2_down + &block_1_side;
        let block_2_side = self.side_2.forward_t(&block_2_add, train);

        let block_3_pre_dense = self.pre_dense_3.forward_t(&block_2_down, train);
        let block_3 = self.dblock_3.forward_t(&block_2_add, &block_3_pre_dense, train);
        let block_3_down = max_pool(&block_3);
        let block_3_add = &block_3_down + &block_2_side;
        let block_3_side = self.side_3.forward_t(&block_3_add, train);

        let block_2_resize_half = self.pre_dense_2.forward_t(&block_2_down, train);
        let block_4_pre_dense = self
            .pre_dense_4
            .forward_t(&(&block_3_down + &block_2_resize_half), train);
        let block_4 = self.dblock_4.forward_t(&block_3_add, &block_4_pre_dense, train);
        let block_4_down = max_pool(&block_4);
        let block_4_add = &block_4_down + &block_3_side;
        let block_4_side = self.side_4.forward_t(&block_4_add, train);

        let block_5_pre_dense = self.pre_dense_5.forward_t(&block_4_down, train);
        let block_5 = self.dblock_5.forward_t(&block_4_add, &block_5_pre_dense, train);
        let block_5_add = &block_5 + &block_4_side;

        let block_6_pre_dense = self.pre_dense_6.forward_t(&block_5, train);
        let block_6 = self.dblock_6.forward_t(&block_5_add, &block_6_pre_dense, train);

        let blocks = [&block_1, &block_2, &block_3, &block_4, &block_5, &block_6];
        let mut results: Vec<Tensor> = self
            .up_blocks
            .iter()
            .zip(blocks)
            .map(|(up, block)| match_size(&block.apply(up), height, width))
            .collect();
        let fused = self.block_cat.forward_t(&Tensor::cat(&results, 1), train);
        results.push(fused);
        results
    }

    /// The fused, most refined edge map. Batch norm runs on running statistics.
    pub fn edge_map(&self, xs: &Tensor) -> Tensor {
        let mut results = self.forward_t(xs, false);
        match results.pop() {
            Some(fused) => fused,
            None => xs.zeros_like(),
        }
    }
}

/// Resizes a side output when the input size was not a multiple of 16.
fn match_size(xs: &Tensor, height: i64, width: i64) -> Tensor {
    let size = xs.size();
    if size[2] == height && size[3] == width {
        xs.shallow_clone()
    } else {
        xs.upsample_bicubic2d([height, width], false, None::<f64>, None::<f64>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{kind, Device};

    #[test]
    fn seven_full_resolution_maps() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = DexiNed::new(vs.root());
        let xs = Tensor::randn([1, 3, 32, 32], kind::FLOAT_CPU);
        let outputs = tch::no_grad(|| net.forward_t(&xs, false));
        assert_eq!(outputs.len(), 7);
        for out in &outputs {
            assert_eq!(out.size(), [1, 1, 32, 32]);
        }
    }

    #[test]
    fn odd_sizes_are_resampled() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = DexiNed::new(vs.root());
        let xs = Tensor::randn([2, 3, 36, 20], kind::FLOAT_CPU);
        let edges = tch::no_grad(|| net.edge_map(&xs));
        assert_eq!(edges.size(), [2, 1, 36, 20]);
    }

    #[test]
    fn inference_leaves_running_stats_alone() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = DexiNed::new(vs.root());
        let before = vs.variables()["block_1.bn1.running_mean"].copy();
        let xs = Tensor::randn([1, 3, 16, 16], kind::FLOAT_CPU) * 50.0;
        let _ = tch::no_grad(|| net.edge_map(&xs));
        assert!(vs.variables()["block_1.bn1.running_mean"].equal(&before));
    }

    #[test]
    fn reference_parameter_names() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _net = DexiNed::new(vs.root());
        let vars = vs.variables();
        for name in [
            "block_1.conv1.weight",
            "dblock_4.denselayer3.norm2.running_var",
            "up_block_5.features.9.weight",
            "up_block_5.features.11.bias",
            "block_cat.conv.weight",
        ] {
            assert!(vars.contains_key(name), "missing {name}");
        }
        assert!(!vars.contains_key("block_cat.bn.weight"));
        assert!(!vars.contains_key("side_5.conv.weight"));
    }
}
