use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::Tensor;

/// History of generated images fed to a discriminator.
///
/// Once full, each query returns either the fresh image or, with probability
/// one half, a random older one that the fresh image then replaces.
#[derive(Debug)]
pub struct ImagePool {
    pool_size: usize,
    images: Vec<Tensor>,
    rng: StdRng,
}

impl ImagePool {
    /// A pool of `pool_size` images; sizes `<= 0` disable the history.
    pub fn new(pool_size: i64) -> ImagePool {
        ImagePool::with_rng(pool_size, StdRng::from_entropy())
    }

    pub fn with_seed(pool_size: i64, seed: u64) -> ImagePool {
        ImagePool::with_rng(pool_size, StdRng::seed_from_u64(seed))
    }

    fn with_rng(pool_size: i64, rng: StdRng) -> ImagePool {
        let pool_size = usize::try_from(pool_size).unwrap_or(0);
        ImagePool {
            pool_size,
            images: Vec::with_capacity(pool_size),
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn query(&mut self, images: &Tensor) -> Tensor {
        if self.pool_size == 0 {
            return images.shallow_clone();
        }
        let mut out = Vec::new();
        for image in images.detach().split(1, 0) {
            if self.images.len() < self.pool_size {
                self.images.push(image.shallow_clone());
                out.push(image);
            } else if self.rng.gen_bool(0.5) {
                let idx = self.rng.gen_range(0..self.images.len());
                let old = std::mem::replace(&mut self.images[idx], image);
                out.push(old);
            } else {
                out.push(image);
            }
        }
        Tensor::cat(&out, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind;

    fn batch(values: &[f64]) -> Tensor {
        let images: Vec<Tensor> = values
            .iter()
            .map(|v| Tensor::full([1, 3, 2, 2], *v, kind::FLOAT_CPU))
            .collect();
        Tensor::cat(&images, 0)
    }

    #[test]
    fn disabled_pool_is_identity() {
        for pool_size in [0, -1, -50] {
            let mut pool = ImagePool::with_seed(pool_size, 7);
            for step in 0..20 {
                let xs = batch(&[step as f64, -(step as f64)]);
                let out = pool.query(&xs);
                assert!(out.equal(&xs));
            }
            assert!(pool.is_empty());
        }
    }

    #[test]
    fn filling_pool_returns_input() {
        let mut pool = ImagePool::with_seed(4, 1);
        let xs = batch(&[1.0, 2.0, 3.0]);
        assert!(pool.query(&xs).equal(&xs));
        assert_eq!(pool.len(), 3);
        // The fourth image fills the last slot, the fifth may be swapped.
        let out = pool.query(&batch(&[4.0, 5.0]));
        assert_eq!(pool.len(), 4);
        assert_eq!(out.size(), [2, 3, 2, 2]);
        assert_eq!(out.double_value(&[0, 0, 0, 0]), 4.0);
    }

    #[test]
    fn single_slot_pool_mixes_new_and_stored() {
        let mut pool = ImagePool::with_seed(1, 42);
        pool.query(&batch(&[0.0]));
        let mut fresh = 0;
        let mut stored = 0;
        for step in 1..=400 {
            let previous_candidates = pool.images[0].double_value(&[0, 0, 0, 0]);
            let value = step as f64;
            let out = pool.query(&batch(&[value])).double_value(&[0, 0, 0, 0]);
            if out == value {
                fresh += 1;
            } else {
                assert_eq!(out, previous_candidates);
                stored += 1;
            }
        }
        assert_eq!(fresh + stored, 400);
        assert!(fresh > 120, "fresh returned {fresh} times");
        assert!(stored > 120, "stored returned {stored} times");
    }

    #[test]
    fn returned_images_carry_no_graph() {
        let mut pool = ImagePool::with_seed(2, 3);
        let xs = batch(&[1.0, 2.0]).set_requires_grad(true);
        let fake = &xs * 2.0;
        let out = pool.query(&fake);
        assert!(!out.requires_grad());
        let out = pool.query(&fake);
        assert!(!out.requires_grad());
    }
}
