//! Input conventions of the frozen networks.
//!
//! Generators work in `[-1, 1]`; the feature and edge networks were trained
//! on differently normalized inputs, so every image is converted right before
//! it enters one of them.

use tch::Tensor;

/// ImageNet RGB mean for inputs in `[0, 1]`.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet RGB std for inputs in `[0, 1]`.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Per channel RGB mean subtracted from `[0, 255]` inputs of the edge network.
pub const EDGE_MEAN_RGB: [f32; 3] = [123.68, 116.779, 103.939];

fn channel_constant(values: &[f32; 3], like: &Tensor) -> Tensor {
    Tensor::from_slice(values)
        .view([1, 3, 1, 1])
        .to_kind(like.kind())
        .to_device(like.device())
}

/// Maps `[-1, 1]` to `[0, 1]`, then normalizes with the ImageNet mean/std.
pub fn feature_transform(xs: &Tensor) -> Tensor {
    let mean = channel_constant(&IMAGENET_MEAN, xs);
    let std = channel_constant(&IMAGENET_STD, xs);
    ((xs + 1.0) / 2.0 - mean) / std
}

/// Maps `[-1, 1]` to `[0, 255]`, subtracts the RGB mean and reorders the
/// channels to BGR.
pub fn edge_transform(xs: &Tensor) -> Tensor {
    let mean = channel_constant(&EDGE_MEAN_RGB, xs);
    ((xs + 1.0) / 2.0 * 255.0 - mean).flip([1])
}
