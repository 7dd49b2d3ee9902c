//! Learned perceptual distance (LPIPS) on top of the VGG16 features.

use tch::{nn, Kind, Tensor};

use crate::vgg::{Vgg16Features, STAGE_CHANNELS};

const SHIFT: [f32; 3] = [-0.030, -0.088, -0.188];
const SCALE: [f32; 3] = [0.458, 0.448, 0.450];
const EPS: f64 = 1e-10;

/// Perceptual distance between two batches of `[-1, 1]` RGB images.
///
/// Backbone and heads load from one combined state dict: the torchvision
/// VGG16 convolutions under `net.features.*` and one 1x1 projection per stage
/// under `lin{k}.model.1.weight`. The `lpips` package ships these as two
/// separate files with different names, so they have to be merged into this
/// layout first.
#[derive(Debug)]
pub struct Lpips {
    net: Vgg16Features,
    lins: Vec<nn::Conv2D>,
}

impl Lpips {
    pub fn new(path: nn::Path) -> Lpips {
        let net = Vgg16Features::new(&path / "net");
        let config = nn::ConvConfig {
            bias: false,
            ..Default::default()
        };
        let lins = STAGE_CHANNELS
            .iter()
            .enumerate()
            .map(|(k, &channels)| {
                nn::conv2d(&path / format!("lin{k}") / "model" / 1, channels, 1, 1, config)
            })
            .collect();
        Lpips { net, lins }
    }

    /// The backbone shared with the feature-consistency loss.
    pub fn features(&self) -> &Vgg16Features {
        &self.net
    }

    /// Per-sample distance, shape `[N, 1, 1, 1]`.
    pub fn forward(&self, xs0: &Tensor, xs1: &Tensor) -> Tensor {
        let feats0 = self.net.forward(&scale_input(xs0));
        let feats1 = self.net.forward(&scale_input(xs1));
        feats0
            .iter()
            .zip(feats1.iter())
            .zip(self.lins.iter())
            .map(|((f0, f1), lin)| {
                let diff = (normalize(f0) - normalize(f1)).square();
                diff.apply(lin).mean_dim(&[2i64, 3][..], true, Kind::Float)
            })
            .reduce(|acc, layer| acc + layer)
            .unwrap_or_else(|| xs0.zeros_like())
    }
}

fn scale_input(xs: &Tensor) -> Tensor {
    let shift = Tensor::from_slice(&SHIFT)
        .view([1, 3, 1, 1])
        .to_device(xs.device());
    let scale = Tensor::from_slice(&SCALE)
        .view([1, 3, 1, 1])
        .to_device(xs.device());
    (xs - shift) / scale
}

/// Unit length along the channel dimension.
fn normalize(xs: &Tensor) -> Tensor {
    let norm = xs
        .square()
        .sum_dim_intlist(&[1i64][..], true, Kind::Float)
        .sqrt();
    xs / (norm + EPS)
}
