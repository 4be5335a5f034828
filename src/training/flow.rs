use super::{Dataloader, LoaderSettings, Mode, average, check_finite, dataloaders};
use crate::data::mnist::{MnistBatcher, MnistItem, PIXELS, PixelFormat};
use crate::error;
use crate::flow::{FlowModel, FlowModelConfig};
use crate::report::{Curves, save_image_grid};
use crate::utils::grad_clip::{LinearParams, clip_grad_norm};
use crate::utils::scalar;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn_dataset::Dataset;
use std::f64::consts::LN_2;
use std::path::Path;
use tracing::{debug, info};

#[derive(Config, Debug)]
pub struct FlowTrainingConfig {
    #[config(default = "FlowModelConfig::new()")]
    pub model: FlowModelConfig,
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
    /// Budget for the global L2 norm of the coupling gradients.
    #[config(default = 1.0)]
    pub max_grad_norm: f64,
    /// Images drawn after every epoch.
    #[config(default = 64)]
    pub n_samples: usize,
    /// Images per row of the sample grid.
    #[config(default = 8)]
    pub nrow: usize,
    #[config(default = "String::from(\".\")")]
    pub artifact_dir: String,
}

impl FlowTrainingConfig {
    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings {
            batch_size: self.batch_size,
            num_workers: self.num_workers,
            seed: self.seed,
        }
    }
}

/// Mean negative log-likelihood per dimension, in nats.
pub fn nll_per_dim<B: Backend>(log_px: Tensor<B, 1>, dim: usize) -> Tensor<B, 1> {
    log_px.mean().neg() / dim as f64
}

/// Runs one pass over `dataloader` and returns the model with its average bits per dimension.
///
/// In [`Mode::Eval`] the model is returned unchanged.
pub fn epoch_iter<AutoB, O>(
    model: FlowModel<AutoB>,
    dataloader: &Dataloader<AutoB>,
    optim: &mut O,
    config: &FlowTrainingConfig,
    mode: Mode,
    epoch: usize,
) -> error::Result<(FlowModel<AutoB>, f64)>
where
    AutoB: AutodiffBackend,
    O: Optimizer<FlowModel<AutoB>, AutoB>,
{
    match mode {
        Mode::Train => epoch_train(model, dataloader, optim, config, epoch),
        Mode::Eval => {
            let bpd = epoch_valid(&model.valid(), dataloader, epoch)?;
            Ok((model, bpd))
        }
    }
}

pub fn epoch_train<AutoB, O>(
    mut model: FlowModel<AutoB>,
    dataloader: &Dataloader<AutoB>,
    optim: &mut O,
    config: &FlowTrainingConfig,
    epoch: usize,
) -> error::Result<(FlowModel<AutoB>, f64)>
where
    AutoB: AutodiffBackend,
    O: Optimizer<FlowModel<AutoB>, AutoB>,
{
    let dim = model.dim();
    let mut total = 0.;
    let mut n_batches = 0;
    for (b, batch) in dataloader.iter().enumerate() {
        let loss = nll_per_dim(model.forward(batch.images), dim);
        let bpd = check_finite(scalar(loss.clone()) / LN_2, "bpd", epoch, b)?;

        let grads = loss.backward();
        let mut grads = GradientsParams::from_grads(grads, &model);
        let grad_norm = clip_grad_norm(&model.flow.linears(), &mut grads, config.max_grad_norm);
        model = optim.step(config.lr, model, grads);

        debug!("epoch {epoch} batch {b:0>4}: bpd {bpd:.4}, grad norm {grad_norm:.4}");
        total += bpd;
        n_batches += 1;
    }
    Ok((model, average(total, n_batches, epoch)?))
}

pub fn epoch_valid<AutoB: AutodiffBackend>(
    model: &FlowModel<AutoB::InnerBackend>,
    dataloader: &Dataloader<AutoB>,
    epoch: usize,
) -> error::Result<f64> {
    let dim = model.dim();
    let mut total = 0.;
    let mut n_batches = 0;
    for (b, batch) in dataloader.iter().enumerate() {
        let loss = nll_per_dim(model.forward(batch.images.inner()), dim);
        total += check_finite(scalar(loss) / LN_2, "bpd", epoch, b)?;
        n_batches += 1;
    }
    average(total, n_batches, epoch)
}

/// A training epoch followed by a validation epoch; returns `(model, train_bpd, valid_bpd)`.
pub fn run_epoch<AutoB, O>(
    model: FlowModel<AutoB>,
    dataloader_train: &Dataloader<AutoB>,
    dataloader_valid: &Dataloader<AutoB>,
    optim: &mut O,
    config: &FlowTrainingConfig,
    epoch: usize,
) -> error::Result<(FlowModel<AutoB>, f64, f64)>
where
    AutoB: AutodiffBackend,
    O: Optimizer<FlowModel<AutoB>, AutoB>,
{
    let (model, train_bpd) = epoch_iter(model, dataloader_train, optim, config, Mode::Train, epoch)?;
    let (model, valid_bpd) = epoch_iter(model, dataloader_valid, optim, config, Mode::Eval, epoch)?;
    Ok((model, train_bpd, valid_bpd))
}

/// Trains a flow on raw 0..=255 pixels, writing samples and the bpd curves into the artifact dir.
pub fn train<AutoB, DTrain, DValid>(
    config: &FlowTrainingConfig,
    device: AutoB::Device,
    dataset_train: DTrain,
    dataset_valid: DValid,
) -> error::Result<(FlowModel<AutoB>, Curves)>
where
    AutoB: AutodiffBackend,
    DTrain: Dataset<MnistItem> + 'static,
    DValid: Dataset<MnistItem> + 'static,
{
    if config.model.flow.dim() != PIXELS {
        return Err(error::Error::ImageSize {
            expected: PIXELS,
            got: config.model.flow.dim(),
        });
    }
    AutoB::seed(&device, config.seed);

    let artifact_dir = Path::new(&config.artifact_dir);
    let images_dir = artifact_dir.join("images_nfs");
    std::fs::create_dir_all(&images_dir)?;
    config.save(artifact_dir.join("nfs_config.json"))?;

    let mut model: FlowModel<AutoB> = config.model.init(&device);
    let mut optim = config.optimizer.init::<AutoB, FlowModel<AutoB>>();

    let (dataloader_train, dataloader_valid) = dataloaders::<AutoB, _, _>(
        MnistBatcher::new(PixelFormat::Raw),
        &config.loader_settings(),
        &device,
        dataset_train,
        dataset_valid,
    );

    info!(
        "training a {}-layer flow for {} epochs",
        config.model.flow.n_flows, config.num_epochs
    );
    let mut curves = Curves::default();
    for epoch in 0..config.num_epochs {
        let (trained, train_bpd, valid_bpd) = run_epoch(
            model,
            &dataloader_train,
            &dataloader_valid,
            &mut optim,
            config,
            epoch,
        )?;
        model = trained;
        info!("[Epoch {epoch}] train bpd: {train_bpd:.4}, validation bpd: {valid_bpd:.4}");
        curves.push(train_bpd, valid_bpd);

        let samples = model.valid().sample(config.n_samples, &device);
        save_image_grid(
            samples,
            config.nrow,
            true,
            &images_dir.join(format!("sample_{epoch:03}.png")),
        )?;
        curves.save_plot(&artifact_dir.join("nfs_bpd.png"))?;
    }
    curves.save_json(&artifact_dir.join("nfs_bpd.json"))?;

    Ok((model, curves))
}
