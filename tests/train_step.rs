use std::path::PathBuf;

use clap::Parser;
use tch::{kind, Device, Tensor};

use dlp_gan::networks::snapshot;
use dlp_gan::{DlpGanError, FeatureExtractors, Options, Sample, Trainer};

fn work_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dlp-gan-it-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Small networks with every generator term but the adversarial ones off.
fn adversarial_only(dir: &PathBuf, extra: &[&str]) -> Options {
    let checkpoints = dir.join("checkpoints");
    let mut argv = vec![
        "dlp-gan",
        "--ngf",
        "8",
        "--ndf",
        "8",
        "--which-model-net-g",
        "resnet_6blocks",
        "--fine-size",
        "32",
        "--alpha-g",
        "0",
        "--alpha-f",
        "0",
        "--beta",
        "0",
        "--gamma",
        "0",
        "--seed",
        "11",
        "--checkpoints-dir",
        checkpoints.to_str().unwrap(),
    ];
    argv.extend_from_slice(extra);
    Options::parse_from(argv)
}

fn extractors(dir: &PathBuf) -> FeatureExtractors {
    let vgg = dir.join("lpips_vgg.pth");
    let dexined = dir.join("dexined.weight");
    FeatureExtractors::write_untrained(&vgg, &dexined).unwrap();
    FeatureExtractors::load(Device::Cpu, &vgg, &dexined).unwrap()
}

fn sample() -> Sample {
    sized(32)
}

fn sized(side: i64) -> Sample {
    Sample {
        a: Tensor::rand([1, 3, side, side], kind::FLOAT_CPU) * 2.0 - 1.0,
        b: Tensor::rand([1, 3, side, side], kind::FLOAT_CPU) * 2.0 - 1.0,
        a_paths: vec![PathBuf::from("a.png")],
        b_paths: vec![PathBuf::from("b.png")],
    }
}

fn changed(before: &[(String, Tensor)], after: &[(String, Tensor)], prefix: &str) -> bool {
    before
        .iter()
        .zip(after)
        .filter(|((name, _), _)| name.starts_with(prefix))
        .any(|((_, b), (_, a))| !b.equal(a))
}

fn unchanged(before: &[(String, Tensor)], after: &[(String, Tensor)]) -> bool {
    before.len() == after.len() && before.iter().zip(after).all(|((_, b), (_, a))| b.equal(a))
}

#[test]
fn one_step_updates_only_the_trained_networks() {
    tch::manual_seed(5);
    let dir = work_dir("step");
    let opt = adversarial_only(&dir, &[]);
    let mut trainer = Trainer::with_extractors(&opt, Device::Cpu, extractors(&dir)).unwrap();

    let g_before = snapshot(trainer.generators().var_store());
    let [d_a_vs, d_b_vs] = trainer.discriminator_stores();
    let d_a_before = snapshot(d_a_vs);
    let d_b_before = snapshot(d_b_vs);
    let vgg_before = snapshot(trainer.extractors().perceptual_vs());
    let edge_before = snapshot(trainer.extractors().edge_vs());

    let record = trainer.optimize_parameters(&sample()).unwrap();

    let g_after = snapshot(trainer.generators().var_store());
    assert!(changed(&g_before, &g_after, "G_A."));
    assert!(changed(&g_before, &g_after, "G_B."));
    let [d_a_vs, d_b_vs] = trainer.discriminator_stores();
    assert!(changed(&d_a_before, &snapshot(d_a_vs), "D_A."));
    assert!(changed(&d_b_before, &snapshot(d_b_vs), "D_B."));
    assert!(unchanged(&vgg_before, &snapshot(trainer.extractors().perceptual_vs())));
    assert!(unchanged(&edge_before, &snapshot(trainer.extractors().edge_vs())));

    for name in ["G_A", "G_B", "D_A", "D_B"] {
        let value = record.get(name).unwrap();
        assert!(value.is_finite() && value >= 0.0, "{name} = {value}");
    }
    assert_eq!(record.get("idt_A"), Some(0.0));
    assert_eq!(record.get("idt_B"), Some(0.0));
    let names: Vec<&str> = record.iter().map(|(name, _)| name).collect();
    assert_eq!(
        names,
        ["D_A", "G_A", "Cyc_A", "D_B", "G_B", "Cyc_B", "Content_A", "Content_B", "idt_A", "idt_B"]
    );

    let visuals = trainer.current_visuals().unwrap();
    assert!(visuals.get("idt_A").is_none());
    assert!(visuals.get("idt_B").is_none());
    assert_eq!(visuals.get("fake_B").unwrap().size(), [1, 3, 32, 32]);
}

#[test]
fn off_size_batch_is_rejected_before_any_update() {
    let dir = work_dir("off-size");
    let opt = adversarial_only(&dir, &[]);
    let mut trainer = Trainer::with_extractors(&opt, Device::Cpu, extractors(&dir)).unwrap();
    let g_before = snapshot(trainer.generators().var_store());

    let err = trainer.optimize_parameters(&sized(30)).unwrap_err();
    assert!(matches!(
        err,
        DlpGanError::ShapeMismatch {
            what: "domain A batch",
            ..
        }
    ));
    assert!(unchanged(&g_before, &snapshot(trainer.generators().var_store())));
    assert!(trainer.current_visuals().is_none());
}

#[test]
fn identity_terms_are_reported_when_enabled() {
    let dir = work_dir("identity");
    let opt = adversarial_only(&dir, &["--beta", "1", "--gan-mode", "vanilla"]);
    let mut trainer = Trainer::with_extractors(&opt, Device::Cpu, extractors(&dir)).unwrap();
    let record = trainer.optimize_parameters(&sample()).unwrap();
    assert!(record.get("idt_A").unwrap() > 0.0);
    assert!(record.get("idt_B").unwrap() > 0.0);
    let visuals = trainer.current_visuals().unwrap();
    assert_eq!(visuals.names().len(), 8);
    assert_eq!(visuals.get("idt_A").unwrap().size(), [1, 3, 32, 32]);
}

#[test]
fn identity_needs_matching_channels() {
    let dir = work_dir("channels");
    let opt = adversarial_only(&dir, &["--beta", "1", "--output-nc", "1"]);
    let err = Trainer::with_extractors(&opt, Device::Cpu, extractors(&dir))
        .err()
        .unwrap();
    assert!(matches!(err, DlpGanError::InvalidConfiguration { .. }));
}

#[test]
fn checkpoints_restore_a_run() {
    let dir = work_dir("resume");
    let opt = adversarial_only(&dir, &[]);
    let mut trainer = Trainer::with_extractors(&opt, Device::Cpu, extractors(&dir)).unwrap();
    trainer.optimize_parameters(&sample()).unwrap();
    trainer.save("latest").unwrap();
    for name in ["G_A", "G_B", "D_A", "D_B"] {
        assert!(opt.checkpoint_dir().join(format!("latest_net_{name}.pth")).is_file());
    }

    let resumed = adversarial_only(&dir, &["--continue-train"]);
    let restored = Trainer::with_extractors(&resumed, Device::Cpu, extractors(&dir)).unwrap();
    assert!(unchanged(
        &snapshot(trainer.generators().var_store()),
        &snapshot(restored.generators().var_store())
    ));
    let [d_a, d_b] = trainer.discriminator_stores();
    let [r_a, r_b] = restored.discriminator_stores();
    assert!(unchanged(&snapshot(d_a), &snapshot(r_a)));
    assert!(unchanged(&snapshot(d_b), &snapshot(r_b)));

    let missing = adversarial_only(&dir, &["--continue-train", "--which-epoch", "7"]);
    let err = Trainer::with_extractors(&missing, Device::Cpu, extractors(&dir))
        .err()
        .unwrap();
    assert!(matches!(err, DlpGanError::MissingWeights { .. }));
}

#[test]
fn learning_rate_decays_after_niter() {
    let dir = work_dir("lr");
    let opt = adversarial_only(&dir, &["--niter", "2", "--niter-decay", "3"]);
    let mut trainer = Trainer::with_extractors(&opt, Device::Cpu, extractors(&dir)).unwrap();
    assert_eq!(trainer.learning_rate(), 0.0002);
    let lr = trainer.update_learning_rate();
    assert!((lr - 0.0002 * 0.75).abs() < 1e-12);
}
