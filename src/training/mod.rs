//! Epoch drivers shared structure: loaders, train/eval mode and metric checks.

#[cfg(feature = "flow")]
pub mod flow;
#[cfg(feature = "vae")]
pub mod vae;

use crate::data::mnist::{MnistBatch, MnistBatcher, MnistItem};
use crate::error::{Error, Result};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::prelude::*;
use burn_dataset::Dataset;
use std::sync::Arc;

pub type Dataloader<B> = Arc<dyn DataLoader<B, MnistBatch<B>> + 'static>;

/// Whether an epoch updates the parameters or only measures the metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Backpropagate and step the optimizer after every batch.
    Train,
    /// Run on the inner (non-autodiff) backend, parameters are left untouched.
    Eval,
}

/// Batching settings shared by both loaders of a run.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub batch_size: usize,
    pub num_workers: usize,
    pub seed: u64,
}

/// Builds the shuffled train loader and the ordered validation loader.
pub fn dataloaders<B, DTrain, DValid>(
    batcher: MnistBatcher,
    settings: &LoaderSettings,
    device: &B::Device,
    train: DTrain,
    valid: DValid,
) -> (Dataloader<B>, Dataloader<B>)
where
    B: Backend,
    DTrain: Dataset<MnistItem> + 'static,
    DValid: Dataset<MnistItem> + 'static,
{
    let dataloader_train = DataLoaderBuilder::new(batcher.clone())
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .num_workers(settings.num_workers)
        .set_device(device.clone())
        .build(train);
    let dataloader_valid = DataLoaderBuilder::new(batcher)
        .batch_size(settings.batch_size)
        .num_workers(settings.num_workers)
        .set_device(device.clone())
        .build(valid);
    (dataloader_train, dataloader_valid)
}

pub(crate) fn check_finite(
    value: f64,
    metric: &'static str,
    epoch: usize,
    batch: usize,
) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::NonFinite {
            metric,
            epoch,
            batch,
        })
    }
}

pub(crate) fn average(total: f64, n_batches: usize, epoch: usize) -> Result<f64> {
    if n_batches == 0 {
        Err(Error::EmptyEpoch(epoch))
    } else {
        Ok(total / n_batches as f64)
    }
}
