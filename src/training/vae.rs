use super::{Dataloader, LoaderSettings, Mode, average, check_finite, dataloaders};
use crate::data::mnist::{MnistBatcher, MnistItem, PIXELS, PixelFormat};
use crate::error;
use crate::report::{Curves, save_image_grid};
use crate::utils::scalar;
use crate::vae::{Vae, VaeConfig};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn_dataset::Dataset;
use std::path::Path;
use tracing::{debug, info};

#[derive(Config, Debug)]
pub struct VaeTrainingConfig {
    #[config(default = "VaeConfig::new()")]
    pub model: VaeConfig,
    #[config(default = "AdamConfig::new()")]
    pub optimizer: AdamConfig,
    #[config(default = 40)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub num_workers: usize,
    #[config(default = 1e-3)]
    pub lr: f64,
    #[config(default = 0)]
    pub seed: u64,
    #[config(default = 64)]
    pub n_samples: usize,
    #[config(default = 8)]
    pub nrow: usize,
    /// Side of the latent lattice drawn when `z_dim = 2`.
    #[config(default = 20)]
    pub manifold_grid: usize,
    #[config(default = "String::from(\".\")")]
    pub artifact_dir: String,
}

impl VaeTrainingConfig {
    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings {
            batch_size: self.batch_size,
            num_workers: self.num_workers,
            seed: self.seed,
        }
    }
}

/// Runs one pass over `dataloader` and returns the model with its average negative ELBO.
pub fn epoch_iter<AutoB, O>(
    model: Vae<AutoB>,
    dataloader: &Dataloader<AutoB>,
    optim: &mut O,
    config: &VaeTrainingConfig,
    mode: Mode,
    epoch: usize,
) -> error::Result<(Vae<AutoB>, f64)>
where
    AutoB: AutodiffBackend,
    O: Optimizer<Vae<AutoB>, AutoB>,
{
    match mode {
        Mode::Train => epoch_train(model, dataloader, optim, config, epoch),
        Mode::Eval => {
            let elbo = epoch_valid(&model.valid(), dataloader, epoch)?;
            Ok((model, elbo))
        }
    }
}

pub fn epoch_train<AutoB, O>(
    mut model: Vae<AutoB>,
    dataloader: &Dataloader<AutoB>,
    optim: &mut O,
    config: &VaeTrainingConfig,
    epoch: usize,
) -> error::Result<(Vae<AutoB>, f64)>
where
    AutoB: AutodiffBackend,
    O: Optimizer<Vae<AutoB>, AutoB>,
{
    let mut total = 0.;
    let mut n_batches = 0;
    for (b, batch) in dataloader.iter().enumerate() {
        let loss = model.forward(batch.images);
        let neg_elbo = check_finite(scalar(loss.clone()), "negative elbo", epoch, b)?;

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(config.lr, model, grads);

        debug!("epoch {epoch} batch {b:0>4}: negative elbo {neg_elbo:.4}");
        total += neg_elbo;
        n_batches += 1;
    }
    Ok((model, average(total, n_batches, epoch)?))
}

pub fn epoch_valid<AutoB: AutodiffBackend>(
    model: &Vae<AutoB::InnerBackend>,
    dataloader: &Dataloader<AutoB>,
    epoch: usize,
) -> error::Result<f64> {
    let mut total = 0.;
    let mut n_batches = 0;
    for (b, batch) in dataloader.iter().enumerate() {
        let loss = model.forward(batch.images.inner());
        total += check_finite(scalar(loss), "negative elbo", epoch, b)?;
        n_batches += 1;
    }
    average(total, n_batches, epoch)
}

/// A training epoch followed by a validation epoch; returns `(model, train_elbo, valid_elbo)`.
pub fn run_epoch<AutoB, O>(
    model: Vae<AutoB>,
    dataloader_train: &Dataloader<AutoB>,
    dataloader_valid: &Dataloader<AutoB>,
    optim: &mut O,
    config: &VaeTrainingConfig,
    epoch: usize,
) -> error::Result<(Vae<AutoB>, f64, f64)>
where
    AutoB: AutodiffBackend,
    O: Optimizer<Vae<AutoB>, AutoB>,
{
    let (model, train_elbo) =
        epoch_iter(model, dataloader_train, optim, config, Mode::Train, epoch)?;
    let (model, valid_elbo) =
        epoch_iter(model, dataloader_valid, optim, config, Mode::Eval, epoch)?;
    Ok((model, train_elbo, valid_elbo))
}

/// Trains a VAE on binarized pixels, writing samples, decoder means and the negative ELBO
/// curves into the artifact dir. With a 2-d latent space the decoded manifold is drawn at the end.
pub fn train<AutoB, DTrain, DValid>(
    config: &VaeTrainingConfig,
    device: AutoB::Device,
    dataset_train: DTrain,
    dataset_valid: DValid,
) -> error::Result<(Vae<AutoB>, Curves)>
where
    AutoB: AutodiffBackend,
    DTrain: Dataset<MnistItem> + 'static,
    DValid: Dataset<MnistItem> + 'static,
{
    if config.model.input_dim != PIXELS {
        return Err(error::Error::ImageSize {
            expected: PIXELS,
            got: config.model.input_dim,
        });
    }
    AutoB::seed(&device, config.seed);

    let artifact_dir = Path::new(&config.artifact_dir);
    let images_dir = artifact_dir.join("images_vae");
    std::fs::create_dir_all(&images_dir)?;
    config.save(artifact_dir.join("vae_config.json"))?;

    let mut model: Vae<AutoB> = config.model.init(&device);
    let mut optim = config.optimizer.init::<AutoB, Vae<AutoB>>();

    let (dataloader_train, dataloader_valid) = dataloaders::<AutoB, _, _>(
        MnistBatcher::new(PixelFormat::Binarized),
        &config.loader_settings(),
        &device,
        dataset_train,
        dataset_valid,
    );

    info!(
        "training a VAE with z_dim {} for {} epochs",
        config.model.z_dim, config.num_epochs
    );
    let mut curves = Curves::default();
    for epoch in 0..config.num_epochs {
        let (trained, train_elbo, valid_elbo) = run_epoch(
            model,
            &dataloader_train,
            &dataloader_valid,
            &mut optim,
            config,
            epoch,
        )?;
        model = trained;
        info!("[Epoch {epoch}] train elbo: {train_elbo:.4}, validation elbo: {valid_elbo:.4}");
        curves.push(train_elbo, valid_elbo);

        let (sampled_ims, im_means) = model.valid().sample(config.n_samples, &device);
        save_image_grid(
            sampled_ims,
            config.nrow,
            false,
            &images_dir.join(format!("sample_{epoch:03}.png")),
        )?;
        save_image_grid(
            im_means,
            config.nrow,
            false,
            &images_dir.join(format!("means_{epoch:03}.png")),
        )?;
        curves.save_plot(&artifact_dir.join("elbo.png"))?;
    }
    curves.save_json(&artifact_dir.join("elbo.json"))?;

    if config.model.z_dim == 2 {
        let manifold = model.valid().manifold(config.manifold_grid, &device)?;
        save_image_grid(
            manifold,
            config.manifold_grid,
            false,
            &artifact_dir.join("manifold.png"),
        )?;
    }

    Ok((model, curves))
}
