use burn_nf_vae::cli::VaeArgs;
use burn_nf_vae::prelude::*;
use burn_nf_vae::training::vae;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = VaeArgs::parse()?;
    let config = VaeTrainingConfig::new()
        .with_model(VaeConfig::new().with_z_dim(args.zdim))
        .with_num_epochs(args.epochs);

    let (_model, curves) = vae::train::<MainAutoBackend, _, _>(
        &config,
        MainAutoBackend::main_device(),
        MnistDataset::train()?,
        MnistDataset::valid()?,
    )?;

    if let (Some(train), Some(valid)) = (curves.train.last(), curves.valid.last()) {
        tracing::info!("final negative elbo: train {train:.4}, validation {valid:.4}");
    }
    Ok(())
}
