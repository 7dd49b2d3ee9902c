use std::fmt;

use tch::{Reduction, Tensor};

use crate::options::{GanMode, LossFormula, Options};

/// Adversarial criterion against an all-real or all-fake target.
#[derive(Debug, Clone, Copy)]
pub struct GanLoss {
    mode: GanMode,
}

impl GanLoss {
    pub fn new(mode: GanMode) -> GanLoss {
        GanLoss { mode }
    }

    pub fn loss(&self, prediction: &Tensor, target_is_real: bool) -> Tensor {
        let target = if target_is_real {
            prediction.ones_like()
        } else {
            prediction.zeros_like()
        };
        match self.mode {
            GanMode::Lsgan => prediction.mse_loss(&target, Reduction::Mean),
            GanMode::Vanilla => {
                prediction.binary_cross_entropy::<Tensor>(&target, None, Reduction::Mean)
            }
        }
    }
}

/// The individual generator objectives of one iteration.
#[derive(Debug)]
pub struct GeneratorTerms {
    pub gan_a: Tensor,
    pub gan_b: Tensor,
    pub feature_a: Tensor,
    pub feature_b: Tensor,
    pub semantic_a: Tensor,
    pub semantic_b: Tensor,
    /// Absent when the identity weight is zero.
    pub idt_a: Option<Tensor>,
    pub idt_b: Option<Tensor>,
}

/// Weights of the total generator loss under one explicit formula.
#[derive(Debug, Clone, Copy)]
pub struct LossWeights {
    pub formula: LossFormula,
    pub alpha_g: f64,
    pub alpha_f: f64,
    pub beta: f64,
    pub gamma: f64,
    pub lambda_gan: f64,
    pub lambda_dual: f64,
    pub lambda_id: f64,
}

impl LossWeights {
    pub fn from_options(opt: &Options, formula: LossFormula) -> LossWeights {
        LossWeights {
            formula,
            alpha_g: opt.alpha_g,
            alpha_f: opt.alpha_f,
            beta: opt.beta,
            gamma: opt.gamma,
            lambda_gan: opt.lambda_gan,
            lambda_dual: opt.lambda_dual,
            lambda_id: opt.lambda_id,
        }
    }

    /// Weight applied to the identity terms by the selected formula.
    pub fn identity_weight(&self) -> f64 {
        match self.formula {
            LossFormula::Dstn => self.beta,
            LossFormula::Paper => self.lambda_id,
        }
    }

    pub fn identity_enabled(&self) -> bool {
        self.identity_weight() > 0.0
    }

    pub fn total(&self, terms: &GeneratorTerms) -> Tensor {
        let gan = &terms.gan_a + &terms.gan_b;
        let semantic = &terms.semantic_a + &terms.semantic_b;
        let mut total = match self.formula {
            LossFormula::Dstn => {
                gan + self.alpha_g * &terms.feature_a
                    + self.alpha_f * &terms.feature_b
                    + self.gamma * semantic
            }
            LossFormula::Paper => {
                let feature = &terms.feature_a + &terms.feature_b;
                self.lambda_gan * gan + self.lambda_dual * (feature + semantic)
            }
        };
        if let (Some(idt_a), Some(idt_b)) = (&terms.idt_a, &terms.idt_b) {
            total = total + self.identity_weight() * (idt_a + idt_b);
        }
        total
    }
}

/// Named scalar losses of the last iteration, in reporting order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossRecord {
    entries: Vec<(&'static str, f64)>,
}

impl LossRecord {
    pub fn push(&mut self, name: &'static str, value: f64) {
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for LossRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{name}: {value:.3}")?;
        }
        Ok(())
    }
}

/// Reads a scalar loss tensor.
pub fn scalar(t: &Tensor) -> f64 {
    t.double_value(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind;

    fn value(v: f64) -> Tensor {
        Tensor::from(v)
    }

    fn terms(idt: bool) -> GeneratorTerms {
        GeneratorTerms {
            gan_a: value(1.0),
            gan_b: value(2.0),
            feature_a: value(3.0),
            feature_b: value(4.0),
            semantic_a: value(5.0),
            semantic_b: value(6.0),
            idt_a: idt.then(|| value(7.0)),
            idt_b: idt.then(|| value(8.0)),
        }
    }

    fn weights(formula: LossFormula) -> LossWeights {
        LossWeights {
            formula,
            alpha_g: 10.0,
            alpha_f: 100.0,
            beta: 0.5,
            gamma: 2.0,
            lambda_gan: 3.0,
            lambda_dual: 0.1,
            lambda_id: 1.0,
        }
    }

    #[test]
    fn lsgan_targets() {
        let gan = GanLoss::new(GanMode::Lsgan);
        let pred = Tensor::full([2, 1, 4, 4], 0.25, kind::FLOAT_CPU);
        assert!((scalar(&gan.loss(&pred, true)) - 0.5625).abs() < 1e-6);
        assert!((scalar(&gan.loss(&pred, false)) - 0.0625).abs() < 1e-6);
    }

    #[test]
    fn vanilla_targets() {
        let gan = GanLoss::new(GanMode::Vanilla);
        let pred = Tensor::full([1, 1, 3, 3], 0.5, kind::FLOAT_CPU);
        let expected = std::f64::consts::LN_2;
        assert!((scalar(&gan.loss(&pred, true)) - expected).abs() < 1e-6);
        assert!((scalar(&gan.loss(&pred, false)) - expected).abs() < 1e-6);
        let confident = Tensor::full([1, 1, 3, 3], 0.999, kind::FLOAT_CPU);
        assert!(scalar(&gan.loss(&confident, true)) < 0.01);
    }

    #[test]
    fn dstn_formula() {
        let w = weights(LossFormula::Dstn);
        // 1 + 2 + 10*3 + 100*4 + 0.5*(7+8) + 2*(5+6)
        assert!((scalar(&w.total(&terms(true))) - 462.5).abs() < 1e-9);
        assert!((scalar(&w.total(&terms(false))) - 455.0).abs() < 1e-9);
    }

    #[test]
    fn paper_formula() {
        let w = weights(LossFormula::Paper);
        // 3*(1+2) + 0.1*((3+4)+(5+6)) + 1*(7+8)
        assert!((scalar(&w.total(&terms(true))) - 25.8).abs() < 1e-9);
    }

    #[test]
    fn identity_switch_follows_formula() {
        let mut w = weights(LossFormula::Dstn);
        w.beta = 0.0;
        assert!(!w.identity_enabled());
        w.formula = LossFormula::Paper;
        assert!(w.identity_enabled());
    }

    #[test]
    fn record_keeps_order() {
        let mut record = LossRecord::default();
        record.push("D_A", 0.25);
        record.push("G_A", 1.5);
        assert_eq!(record.get("G_A"), Some(1.5));
        assert_eq!(record.get("idt_A"), None);
        assert_eq!(record.to_string(), "D_A: 0.250 G_A: 1.500");
        let names: Vec<&str> = record.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["D_A", "G_A"]);
    }
}
