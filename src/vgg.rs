//! VGG16 convolutional stack used as the frozen feature network.

use tch::{nn, Tensor};

/// Positions of the 3x3 convolutions inside torchvision's `vgg16().features`,
/// grouped by the activation they end in: relu1_2, relu2_2, relu3_3,
/// relu4_3 and relu5_3.
const STAGES: [&[(usize, i64)]; 5] = [
    &[(0, 64), (2, 64)],
    &[(5, 128), (7, 128)],
    &[(10, 256), (12, 256), (14, 256)],
    &[(17, 512), (19, 512), (21, 512)],
    &[(24, 512), (26, 512), (28, 512)],
];

/// Index of relu3_3 in the output of [`Vgg16Features::forward`].
pub const CONTENT_LAYER: usize = 2;

/// Output channels of each returned activation.
pub const STAGE_CHANNELS: [i64; 5] = [64, 128, 256, 512, 512];

#[derive(Debug)]
pub struct Vgg16Features {
    stages: Vec<Vec<nn::Conv2D>>,
}

impl Vgg16Features {
    /// Registers the convolutions as `{path}.features.{idx}.{weight,bias}`,
    /// the layout of torchvision checkpoints.
    pub fn new(path: nn::Path) -> Vgg16Features {
        let features = &path / "features";
        let config = nn::ConvConfig {
            padding: 1,
            ..Default::default()
        };
        let mut in_channels = 3;
        let stages = STAGES
            .iter()
            .map(|stage| {
                stage
                    .iter()
                    .map(|&(idx, out_channels)| {
                        let conv = nn::conv2d(&features / idx, in_channels, out_channels, 3, config);
                        in_channels = out_channels;
                        conv
                    })
                    .collect()
            })
            .collect();
        Vgg16Features { stages }
    }

    /// Returns the five stage activations, shallowest first.
    pub fn forward(&self, xs: &Tensor) -> Vec<Tensor> {
        let mut outputs = Vec::with_capacity(self.stages.len());
        let mut xs = xs.shallow_clone();
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                xs = xs.max_pool2d([2, 2], [2, 2], [0, 0], [1, 1], false);
            }
            for conv in stage {
                xs = xs.apply(conv).relu();
            }
            outputs.push(xs.shallow_clone());
        }
        outputs
    }

    /// The activation used as the content representation.
    pub fn content(&self, xs: &Tensor) -> Tensor {
        let mut xs = xs.shallow_clone();
        for (i, stage) in self.stages.iter().take(CONTENT_LAYER + 1).enumerate() {
            if i > 0 {
                xs = xs.max_pool2d([2, 2], [2, 2], [0, 0], [1, 1], false);
            }
            for conv in stage {
                xs = xs.apply(conv).relu();
            }
        }
        xs
    }
}
