use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Parser;
use tch::Device;
use tqdm::tqdm;
use tracing::info;

use dlp_gan::model::{Generators, ModelConfig, Trainer};
use dlp_gan::options::{Direction, Options, Phase};
use dlp_gan::report::{save_visuals, LossLog};
use dlp_gan::UnalignedDataset;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Options::parse();

    print_oss_license();

    let device = if opt.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };
    info!(?device, "use device");

    if let Some(seed) = opt.seed {
        tch::manual_seed(seed as i64);
    }

    if opt.dataroot.is_empty() {
        bail!("Please specify the dataroot. See the --help option for details.")
    }

    println!("{opt}");

    match opt.phase {
        Phase::Train => train(&opt, device, opt.which_direction),
        Phase::Test => test(&opt, device, opt.which_direction),
    }
}

/// Channel counts of the `A` and `B` folders once `direction` is applied.
fn folder_channels(opt: &Options, direction: Direction) -> (i64, i64) {
    match direction {
        Direction::AtoB => (opt.input_nc, opt.output_nc),
        Direction::BtoA => (opt.output_nc, opt.input_nc),
    }
}

fn train(opt: &Options, device: Device, direction: Direction) -> Result<()> {
    let opt_path = opt.save()?;
    info!(path = %opt_path.display(), "saved options");

    let (a_nc, b_nc) = folder_channels(opt, direction);
    let mut dataset = UnalignedDataset::new(
        Path::new(&opt.dataroot),
        Phase::Train,
        opt.fine_size,
        !opt.no_flip,
        a_nc,
        b_nc,
        opt.seed,
    )?;
    let batch_size = usize::try_from(opt.batch_size)?.max(1);
    let batches = dataset.batches(batch_size);

    let mut trainer = Trainer::new(opt, device)?;
    let log = LossLog::open(&opt.checkpoint_dir())?;
    let image_dir = opt.checkpoint_dir().join("web").join("images");

    let print_freq = opt.print_freq.max(1);
    let display_freq = opt.display_freq.max(1);
    let save_latest_freq = opt.save_latest_freq.max(1);

    info!(
        images = dataset.len(),
        batches,
        epochs = opt.niter + opt.niter_decay,
        "start training"
    );
    let mut total_steps = 0;
    for epoch in opt.epoch_count..=opt.niter + opt.niter_decay {
        let epoch_start = Instant::now();
        for i in tqdm(0..batches) {
            let iter_start = Instant::now();
            let sample = dataset.batch(i, batch_size)?.oriented(direction);
            total_steps += batch_size;
            let epoch_iter = (i + 1) * batch_size;

            let record = trainer.optimize_parameters(&sample)?;

            if total_steps % display_freq == 0 {
                if let Some(visuals) = trainer.current_visuals() {
                    save_visuals(visuals, &image_dir, &format!("epoch{epoch:03}"))?;
                }
            }

            if total_steps % print_freq == 0 {
                let seconds = iter_start.elapsed().as_secs_f64() / batch_size as f64;
                let line = log.append(epoch, epoch_iter, seconds, &record)?;
                info!("{line}");
            }

            if total_steps % save_latest_freq == 0 {
                info!(epoch, total_steps, "saving the latest model");
                trainer.save("latest")?;
            }
        }

        if opt.save_epoch_freq > 0 && epoch % opt.save_epoch_freq == 0 {
            info!(epoch, total_steps, "saving the model at the end of epoch");
            trainer.save("latest")?;
            trainer.save(&epoch.to_string())?;
        }

        info!(
            epoch,
            last = opt.niter + opt.niter_decay,
            seconds = epoch_start.elapsed().as_secs(),
            "end of epoch"
        );
        trainer.update_learning_rate();
    }

    Ok(())
}

fn test(opt: &Options, device: Device, direction: Direction) -> Result<()> {
    let config = ModelConfig::from_options(opt)?;
    let generators = Generators::new(device, config);
    generators.load(&opt.which_epoch, &opt.checkpoint_dir())?;
    info!(label = %opt.which_epoch, "loaded generators");

    let (a_nc, b_nc) = folder_channels(opt, direction);
    let mut dataset = UnalignedDataset::new(
        Path::new(&opt.dataroot),
        Phase::Test,
        opt.fine_size,
        false,
        a_nc,
        b_nc,
        opt.seed,
    )?;

    let image_dir = PathBuf::from(&opt.results_dir)
        .join(&opt.name)
        .join(format!("test_{}", opt.which_epoch))
        .join("images");
    let count = dataset.len().min(opt.how_many);
    for i in tqdm(0..count) {
        let sample = dataset.batch(i, 1)?.oriented(direction);
        let visuals = generators.test(&sample)?;
        let stem = sample.a_paths[0]
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{i:04}"));
        save_visuals(&visuals, &image_dir, &stem)?;
    }
    info!(count, dir = %image_dir.display(), "saved translated images");

    Ok(())
}

fn print_oss_license() {
    println!("OSS Library: PyTorch");
    println!("URL: https://github.com/pytorch/pytorch");
    println!("License: 3-Clause BSD License");
    println!();
    println!("OSS Library: tch-rs");
    println!("URL: https://github.com/LaurentMazare/tch-rs");
    println!("License: MIT License");
    println!();
    println!("OSS Library: anyhow / thiserror");
    println!("URL: https://github.com/dtolnay");
    println!("License: MIT OR Apache-2.0");
    println!();
    println!("OSS Library: rand");
    println!("URL: https://github.com/rust-random/rand");
    println!("License: MIT OR Apache-2.0");
    println!();
    println!("OSS Library: tqdm");
    println!("URL: https://github.com/mrlazy1708/tqdm");
    println!("License: MIT OR Apache-2.0");
    println!();
    println!("OSS Library: clap");
    println!("URL: https://github.com/clap-rs/clap");
    println!("License: MIT OR Apache-2.0");
    println!();
    println!("OSS Library: tracing");
    println!("URL: https://github.com/tokio-rs/tracing");
    println!("License: MIT");
    println!("--------");
    println!();
}
