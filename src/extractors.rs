use std::path::Path;

use tch::{nn, Device, Kind, Reduction, Tensor};
use tracing::info;

use crate::checkpoint::load_state_dict;
use crate::dexined::DexiNed;
use crate::error::Result;
use crate::lpips::Lpips;
use crate::networks::parameter_count;
use crate::transforms::{edge_transform, feature_transform};

/// Pretrained networks that only ever run forward.
///
/// Their var stores are frozen right after loading; gradients still flow
/// through them to the generator outputs they are applied to.
#[derive(Debug)]
pub struct FeatureExtractors {
    perceptual_vs: nn::VarStore,
    perceptual: Lpips,
    edge_vs: nn::VarStore,
    edge: DexiNed,
}

impl FeatureExtractors {
    /// Loads LPIPS-VGG and DexiNed weights. Both files must exist.
    pub fn load(device: Device, vgg_weights: &Path, dexined_weights: &Path) -> Result<Self> {
        let mut perceptual_vs = nn::VarStore::new(device);
        let perceptual = Lpips::new(perceptual_vs.root());
        load_frozen(&mut perceptual_vs, vgg_weights)?;

        let mut edge_vs = nn::VarStore::new(device);
        let edge = DexiNed::new(edge_vs.root());
        load_frozen(&mut edge_vs, dexined_weights)?;

        info!(
            vgg = %vgg_weights.display(),
            params = parameter_count(&perceptual_vs, ""),
            "loaded feature network"
        );
        info!(
            dexined = %dexined_weights.display(),
            params = parameter_count(&edge_vs, ""),
            "loaded edge network"
        );

        Ok(FeatureExtractors {
            perceptual_vs,
            perceptual,
            edge_vs,
            edge,
        })
    }

    /// Writes freshly initialized weights in the layout [`FeatureExtractors::load`]
    /// expects. Used to stand in for the pretrained files in tests and smoke runs.
    pub fn write_untrained(vgg_weights: &Path, dexined_weights: &Path) -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let _ = Lpips::new(vs.root());
        vs.save(vgg_weights)?;

        let vs = nn::VarStore::new(Device::Cpu);
        let _ = DexiNed::new(vs.root());
        vs.save(dexined_weights)?;
        Ok(())
    }

    pub fn perceptual_vs(&self) -> &nn::VarStore {
        &self.perceptual_vs
    }

    pub fn edge_vs(&self) -> &nn::VarStore {
        &self.edge_vs
    }

    /// L1 between the content features of `real` and of its reconstruction.
    pub fn feature_loss(&self, real: &Tensor, reconstructed: &Tensor) -> Tensor {
        let vgg = self.perceptual.features();
        let target = tch::no_grad(|| vgg.content(&feature_transform(&rgb(real))));
        vgg.content(&feature_transform(&rgb(reconstructed)))
            .l1_loss(&target, Reduction::Mean)
    }

    /// LPIPS between the edge maps of `real` and of its translation.
    pub fn semantic_loss(&self, real: &Tensor, fake: &Tensor) -> Tensor {
        let real_edges = tch::no_grad(|| self.edge_map(real));
        let fake_edges = self.edge_map(fake);
        self.perceptual
            .forward(&real_edges, &fake_edges)
            .mean(Kind::Float)
    }

    /// Fused DexiNed map replicated to three channels.
    fn edge_map(&self, xs: &Tensor) -> Tensor {
        self.edge
            .edge_map(&edge_transform(&rgb(xs)))
            .repeat([1, 3, 1, 1])
    }
}

/// Both networks expect three channels; grayscale batches are replicated.
fn rgb(xs: &Tensor) -> Tensor {
    if xs.size()[1] == 1 {
        xs.repeat([1, 3, 1, 1])
    } else {
        xs.shallow_clone()
    }
}

fn load_frozen(vs: &mut nn::VarStore, path: &Path) -> Result<()> {
    load_state_dict(vs, path)?;
    vs.freeze();
    Ok(())
}
