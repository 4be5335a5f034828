use burn_nf_vae::cli::FlowArgs;
use burn_nf_vae::prelude::*;
use burn_nf_vae::training::flow;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = FlowArgs::parse()?;
    let device = match &args.device {
        Some(name) => MainAutoBackend::parse_device(name)?,
        None => MainAutoBackend::main_device(),
    };

    let config = FlowTrainingConfig::new().with_num_epochs(args.epochs);
    let (_model, curves) = flow::train::<MainAutoBackend, _, _>(
        &config,
        device,
        MnistDataset::train()?,
        MnistDataset::valid()?,
    )?;

    if let (Some(train), Some(valid)) = (curves.train.last(), curves.valid.last()) {
        tracing::info!("final bpd: train {train:.4}, validation {valid:.4}");
    }
    Ok(())
}
