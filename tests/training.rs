use burn::backend::{Autodiff, NdArray};
use burn::optim::SgdConfig;
use burn_dataset::InMemDataset;
use burn_nf_vae::Error;
use burn_nf_vae::data::mnist::{HEIGHT, WIDTH};
use burn_nf_vae::prelude::*;
use burn_nf_vae::training::{self, LoaderSettings, flow, vae};
use burn_nf_vae::utils::grad_clip::LinearParams;
use burn_nf_vae::utils::scalar;

type AutoB = Autodiff<NdArray<f32>>;

fn synthetic(n: usize, offset: usize) -> InMemDataset<MnistItem> {
    let items = (0..n)
        .map(|i| MnistItem {
            image: (0..WIDTH * HEIGHT)
                .map(|p| ((p * 7 + i * 31 + offset) % 256) as f32)
                .collect(),
            label: (i % 10) as u8,
        })
        .collect();
    InMemDataset::new(items)
}

fn tiny_flow_config(artifact_dir: &std::path::Path) -> FlowTrainingConfig {
    FlowTrainingConfig::new()
        .with_model(
            FlowModelConfig::new().with_flow(FlowConfig::new().with_n_flows(2).with_n_hidden(8)),
        )
        .with_num_epochs(2)
        .with_batch_size(4)
        .with_n_samples(4)
        .with_nrow(2)
        .with_artifact_dir(artifact_dir.to_string_lossy().into_owned())
}

#[test]
fn flow_training_writes_artifacts() {
    let dir = temp_dir::TempDir::new().unwrap();
    let config = tiny_flow_config(dir.path());

    let (_model, curves) =
        flow::train::<AutoB, _, _>(&config, Default::default(), synthetic(8, 0), synthetic(4, 3))
            .unwrap();

    assert_eq!(curves.len(), 2);
    assert!(curves.train.iter().chain(&curves.valid).all(|bpd| bpd.is_finite()));

    for file in [
        "images_nfs/sample_000.png",
        "images_nfs/sample_001.png",
        "nfs_bpd.png",
        "nfs_bpd.json",
        "nfs_config.json",
    ] {
        assert!(dir.path().join(file).is_file(), "missing {file}");
    }

    let saved: Curves =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("nfs_bpd.json")).unwrap())
            .unwrap();
    assert_eq!(saved, curves);
}

#[test]
fn flow_eval_epoch_keeps_parameters() {
    let dir = temp_dir::TempDir::new().unwrap();
    let config = tiny_flow_config(dir.path());
    let device = Default::default();

    let model: FlowModel<AutoB> = config.model.init(&device);
    let before = model.flow.layers[0].in_proj.weight.val().into_data();
    let mut optim = config.optimizer.init::<AutoB, FlowModel<AutoB>>();
    let (loader, _) = training::dataloaders::<AutoB, _, _>(
        MnistBatcher::new(PixelFormat::Raw),
        &config.loader_settings(),
        &device,
        synthetic(6, 1),
        synthetic(2, 2),
    );

    let (model, bpd) = flow::epoch_iter(model, &loader, &mut optim, &config, Mode::Eval, 0).unwrap();
    assert!(bpd.is_finite());
    model.flow.layers[0]
        .in_proj
        .weight
        .val()
        .into_data()
        .assert_eq(&before, true);
}

#[test]
fn empty_epoch_is_an_error() {
    let dir = temp_dir::TempDir::new().unwrap();
    let config = tiny_flow_config(dir.path());
    let device = Default::default();

    let model: FlowModel<AutoB> = config.model.init(&device);
    let mut optim = config.optimizer.init::<AutoB, FlowModel<AutoB>>();
    let settings = LoaderSettings {
        batch_size: 4,
        num_workers: 1,
        seed: 0,
    };
    let (loader, _) = training::dataloaders::<AutoB, _, _>(
        MnistBatcher::new(PixelFormat::Raw),
        &settings,
        &device,
        synthetic(0, 0),
        synthetic(0, 0),
    );

    let result = flow::epoch_iter(model, &loader, &mut optim, &config, Mode::Train, 3);
    assert!(matches!(result, Err(Error::EmptyEpoch(3))));
}

#[test]
fn vae_training_writes_artifacts_and_manifold() {
    let dir = temp_dir::TempDir::new().unwrap();
    let config = VaeTrainingConfig::new()
        .with_model(VaeConfig::new().with_hidden_dim(16).with_z_dim(2))
        .with_num_epochs(1)
        .with_batch_size(4)
        .with_n_samples(4)
        .with_nrow(2)
        .with_manifold_grid(3)
        .with_artifact_dir(dir.path().to_string_lossy().into_owned());

    let (_model, curves) =
        vae::train::<AutoB, _, _>(&config, Default::default(), synthetic(8, 0), synthetic(4, 5))
            .unwrap();

    assert_eq!(curves.len(), 1);
    assert!(curves.train[0].is_finite() && curves.train[0] > 0.);
    assert!(curves.valid[0].is_finite() && curves.valid[0] > 0.);

    for file in [
        "images_vae/sample_000.png",
        "images_vae/means_000.png",
        "elbo.png",
        "elbo.json",
        "vae_config.json",
    ] {
        assert!(dir.path().join(file).is_file(), "missing {file}");
    }

    let manifold = image::open(dir.path().join("manifold.png")).unwrap();
    assert_eq!((manifold.width(), manifold.height()), (92, 92));
}

#[test]
fn vae_without_2d_latent_skips_manifold() {
    let dir = temp_dir::TempDir::new().unwrap();
    let config = VaeTrainingConfig::new()
        .with_model(VaeConfig::new().with_hidden_dim(16).with_z_dim(3))
        .with_num_epochs(1)
        .with_batch_size(4)
        .with_n_samples(2)
        .with_artifact_dir(dir.path().to_string_lossy().into_owned());

    vae::train::<AutoB, _, _>(&config, Default::default(), synthetic(4, 0), synthetic(4, 1))
        .unwrap();

    assert!(!dir.path().join("manifold.png").exists());
}

/// Every coupling weight and bias, flattened in layer order.
fn coupling_params(model: &FlowModel<AutoB>) -> Vec<f32> {
    model
        .flow
        .linears()
        .into_iter()
        .flat_map(|linear| {
            let mut values = linear.weight.val().into_data().to_vec::<f32>().unwrap();
            if let Some(bias) = &linear.bias {
                values.extend(bias.val().into_data().to_vec::<f32>().unwrap());
            }
            values
        })
        .collect()
}

fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| (*x as f64 - *y as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[test]
fn flow_train_epoch_updates_the_zero_initialized_head() {
    let dir = temp_dir::TempDir::new().unwrap();
    let config = tiny_flow_config(dir.path());
    let device = Default::default();

    let model: FlowModel<AutoB> = config.model.init(&device);
    let head = model.flow.layers[0].out_proj.weight.val();
    assert_eq!(scalar(head.abs().max()), 0.0);

    let mut optim = config.optimizer.init::<AutoB, FlowModel<AutoB>>();
    let (loader, _) = training::dataloaders::<AutoB, _, _>(
        MnistBatcher::new(PixelFormat::Raw),
        &config.loader_settings(),
        &device,
        synthetic(8, 0),
        synthetic(2, 1),
    );

    let (model, bpd) =
        flow::epoch_iter(model, &loader, &mut optim, &config, Mode::Train, 0).unwrap();
    assert!(bpd.is_finite());
    for layer in &model.flow.layers {
        assert!(scalar(layer.out_proj.weight.val().abs().max()) > 0.0);
    }
}

/// With plain SGD at `lr = 1` a single step moves the parameters by exactly the clipped
/// gradient, so the global update norm is bounded by `max_grad_norm`.
fn sgd_step_norm(max_grad_norm: f64) -> f64 {
    let dir = temp_dir::TempDir::new().unwrap();
    let config = tiny_flow_config(dir.path())
        .with_batch_size(8)
        .with_lr(1.0)
        .with_max_grad_norm(max_grad_norm);
    let device = Default::default();

    let model: FlowModel<AutoB> = config.model.init(&device);
    let before = coupling_params(&model);
    let mut optim = SgdConfig::new().init::<AutoB, FlowModel<AutoB>>();
    let (loader, _) = training::dataloaders::<AutoB, _, _>(
        MnistBatcher::new(PixelFormat::Raw),
        &config.loader_settings(),
        &device,
        synthetic(8, 0),
        synthetic(2, 1),
    );

    let (model, _) =
        flow::epoch_iter(model, &loader, &mut optim, &config, Mode::Train, 0).unwrap();
    l2_distance(&before, &coupling_params(&model))
}

#[test]
fn flow_train_epoch_clips_the_global_gradient_norm() {
    let max_grad_norm = 1e-3;

    let clipped = sgd_step_norm(max_grad_norm);
    assert!(clipped > 0.0);
    assert!(clipped <= max_grad_norm * 1.01, "clipped step {clipped}");

    let unclipped = sgd_step_norm(1e9);
    assert!(unclipped > 2. * max_grad_norm, "unclipped step {unclipped}");
}

#[test]
fn vae_train_epoch_updates_parameters() {
    let dir = temp_dir::TempDir::new().unwrap();
    let config = VaeTrainingConfig::new()
        .with_model(VaeConfig::new().with_hidden_dim(16).with_z_dim(2))
        .with_batch_size(4)
        .with_artifact_dir(dir.path().to_string_lossy().into_owned());
    let device = Default::default();

    let model: Vae<AutoB> = config.model.init(&device);
    let encoder_before = model.encoder.linear1.weight.val();
    let decoder_before = model.decoder.linear2.weight.val();
    let mut optim = config.optimizer.init::<AutoB, Vae<AutoB>>();
    let (loader, _) = training::dataloaders::<AutoB, _, _>(
        MnistBatcher::new(PixelFormat::Binarized),
        &config.loader_settings(),
        &device,
        synthetic(8, 0),
        synthetic(2, 1),
    );

    let (model, elbo) =
        vae::epoch_iter(model, &loader, &mut optim, &config, Mode::Train, 0).unwrap();
    assert!(elbo.is_finite() && elbo > 0.0);

    let encoder_step = scalar((model.encoder.linear1.weight.val() - encoder_before).abs().max());
    let decoder_step = scalar((model.decoder.linear2.weight.val() - decoder_before).abs().max());
    assert!(encoder_step > 0.0, "encoder did not move");
    assert!(decoder_step > 0.0, "decoder did not move");
}

#[test]
fn training_rejects_images_that_are_not_28x28() {
    let dir = temp_dir::TempDir::new().unwrap();
    let config = FlowTrainingConfig::new()
        .with_model(
            FlowModelConfig::new().with_flow(
                FlowConfig::new()
                    .with_height(4)
                    .with_width(4)
                    .with_n_hidden(8),
            ),
        )
        .with_artifact_dir(dir.path().to_string_lossy().into_owned());
    let result =
        flow::train::<AutoB, _, _>(&config, Default::default(), synthetic(4, 0), synthetic(4, 1));
    assert!(matches!(
        result,
        Err(Error::ImageSize {
            expected: 784,
            got: 16
        })
    ));

    let config = VaeTrainingConfig::new()
        .with_model(VaeConfig::new().with_input_dim(100).with_hidden_dim(8))
        .with_artifact_dir(dir.path().to_string_lossy().into_owned());
    let result =
        vae::train::<AutoB, _, _>(&config, Default::default(), synthetic(4, 0), synthetic(4, 1));
    assert!(matches!(result, Err(Error::ImageSize { got: 100, .. })));
}
