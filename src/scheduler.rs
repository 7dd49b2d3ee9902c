//! Learning rate schedule shared by the three optimizers.

use clap::ValueEnum;

use crate::error::{DlpGanError, Result};
use crate::options::Options;

/// `--lr-policy` choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LrPolicyKind {
    Lambda,
    Step,
}

/// How the learning rate evolves with the number of finished epochs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LrPolicy {
    /// Constant for `niter` epochs, then linear decay to zero over
    /// `niter_decay` epochs. `epoch_count` offsets a resumed run.
    Lambda {
        epoch_count: i64,
        niter: i64,
        niter_decay: i64,
    },
    /// Multiplied by `gamma` every `step_size` epochs.
    Step { step_size: i64, gamma: f64 },
}

impl LrPolicy {
    pub fn from_options(opt: &Options) -> Result<LrPolicy> {
        match opt.lr_policy {
            LrPolicyKind::Lambda => Ok(LrPolicy::Lambda {
                epoch_count: opt.epoch_count,
                niter: opt.niter,
                niter_decay: opt.niter_decay,
            }),
            LrPolicyKind::Step => {
                if opt.lr_decay_iters <= 0 {
                    return Err(DlpGanError::InvalidConfiguration {
                        reason: format!("lr_decay_iters must be positive, got {}", opt.lr_decay_iters),
                    });
                }
                Ok(LrPolicy::Step {
                    step_size: opt.lr_decay_iters,
                    gamma: 0.1,
                })
            }
        }
    }

    /// Multiplier of the base learning rate after `epoch` scheduler steps.
    pub fn factor(&self, epoch: i64) -> f64 {
        match *self {
            LrPolicy::Lambda {
                epoch_count,
                niter,
                niter_decay,
            } => {
                let decayed = (epoch + 1 + epoch_count - niter).max(0) as f64;
                1.0 - decayed / (niter_decay + 1) as f64
            }
            LrPolicy::Step { step_size, gamma } => gamma.powi((epoch / step_size) as i32),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LrScheduler {
    base_lr: f64,
    policy: LrPolicy,
    steps: i64,
}

impl LrScheduler {
    pub fn new(base_lr: f64, policy: LrPolicy) -> LrScheduler {
        LrScheduler {
            base_lr,
            policy,
            steps: 0,
        }
    }

    pub fn lr(&self) -> f64 {
        self.base_lr * self.policy.factor(self.steps)
    }

    /// Advances one epoch and returns the new learning rate.
    pub fn step(&mut self) -> f64 {
        self.steps += 1;
        self.lr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn lambda(epoch_count: i64) -> LrPolicy {
        LrPolicy::Lambda {
            epoch_count,
            niter: 100,
            niter_decay: 100,
        }
    }

    #[test]
    fn lambda_keeps_then_decays() {
        let policy = lambda(1);
        assert_eq!(policy.factor(0), 1.0);
        assert_eq!(policy.factor(98), 1.0);
        assert!((policy.factor(99) - (1.0 - 1.0 / 101.0)).abs() < 1e-12);
        assert!((policy.factor(199) - 1.0 / 101.0).abs() < 1e-12);
    }

    #[test]
    fn lambda_honours_resumed_epoch() {
        // Resuming at epoch 150 is already 51 epochs into the decay.
        let policy = lambda(150);
        assert!((policy.factor(0) - (1.0 - 51.0 / 101.0)).abs() < 1e-12);
    }

    #[test]
    fn step_policy() {
        let policy = LrPolicy::Step {
            step_size: 50,
            gamma: 0.1,
        };
        assert_eq!(policy.factor(49), 1.0);
        assert!((policy.factor(50) - 0.1).abs() < 1e-12);
        assert!((policy.factor(120) - 0.01).abs() < 1e-12);
    }

    #[test]
    fn scheduler_steps() {
        let mut scheduler = LrScheduler::new(0.0002, lambda(1));
        assert_eq!(scheduler.lr(), 0.0002);
        for _ in 0..98 {
            scheduler.step();
        }
        assert_eq!(scheduler.lr(), 0.0002);
        let lr = scheduler.step();
        assert!(lr < 0.0002);
    }

    #[test]
    fn policy_from_options() {
        let opt = Options::parse_from(["dlp-gan", "--lr-policy", "step", "--lr-decay-iters", "7"]);
        assert_eq!(
            LrPolicy::from_options(&opt).unwrap(),
            LrPolicy::Step {
                step_size: 7,
                gamma: 0.1
            }
        );
        let opt = Options::parse_from(["dlp-gan", "--lr-policy", "step", "--lr-decay-iters", "0"]);
        assert!(matches!(
            LrPolicy::from_options(&opt),
            Err(DlpGanError::InvalidConfiguration { .. })
        ));
    }
}
