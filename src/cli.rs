use crate::error::{Error, Result};
use std::ffi::OsString;

pub const DEFAULT_EPOCHS: usize = 40;
pub const DEFAULT_ZDIM: usize = 20;

pub const NF_HELP: &str = "\
nf

Trains a RealNVP-style normalizing flow on MNIST and reports bits per dimension.
Each epoch writes a grid of samples into images_nfs/ and refreshes the nfs_bpd.png curve.

USAGE:
    nf [OPTIONS]

FLAGS:
    -h, --help              Show this help message and exit

OPTIONS:
    --epochs <INT>          Number of epochs [default: 40]
    --device <STRING>       Device for the compiled backend: cpu, cuda:N, gpu:N, mps or default
                            [default: the backend's default device]
";

pub const VAE_HELP: &str = "\
vae

Trains a variational autoencoder on binarized MNIST and reports the negative ELBO.
Each epoch writes sample grids into images_vae/ and refreshes the elbo.png curve.
With --zdim 2 the learned data manifold is written to manifold.png.

USAGE:
    vae [OPTIONS]

FLAGS:
    -h, --help              Show this help message and exit

OPTIONS:
    --epochs <INT>          Number of epochs [default: 40]
    --zdim <INT>            Dimensionality of the latent space [default: 20]
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowArgs {
    pub epochs: usize,
    pub device: Option<String>,
}

impl FlowArgs {
    /// Parses the process arguments, printing the help and exiting when asked to.
    pub fn parse() -> Result<Self> {
        let args = std::env::args_os().skip(1).collect();
        match Self::from_vec(args)? {
            Some(args) => Ok(args),
            None => {
                println!("{NF_HELP}");
                std::process::exit(0);
            }
        }
    }

    /// `Ok(None)` when help was requested.
    pub fn from_vec(args: Vec<OsString>) -> Result<Option<Self>> {
        let mut pargs = pico_args::Arguments::from_vec(args);

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            return Ok(None);
        }

        let args = FlowArgs {
            epochs: pargs
                .opt_value_from_str("--epochs")?
                .unwrap_or(DEFAULT_EPOCHS),
            device: pargs.opt_value_from_str("--device")?,
        };
        finish(pargs)?;

        Ok(Some(args))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaeArgs {
    pub epochs: usize,
    pub zdim: usize,
}

impl VaeArgs {
    /// Parses the process arguments, printing the help and exiting when asked to.
    pub fn parse() -> Result<Self> {
        let args = std::env::args_os().skip(1).collect();
        match Self::from_vec(args)? {
            Some(args) => Ok(args),
            None => {
                println!("{VAE_HELP}");
                std::process::exit(0);
            }
        }
    }

    /// `Ok(None)` when help was requested.
    pub fn from_vec(args: Vec<OsString>) -> Result<Option<Self>> {
        let mut pargs = pico_args::Arguments::from_vec(args);

        if pargs.contains(["-h", "--help"]) {
            return Ok(None);
        }

        let args = VaeArgs {
            epochs: pargs
                .opt_value_from_str("--epochs")?
                .unwrap_or(DEFAULT_EPOCHS),
            zdim: pargs.opt_value_from_str("--zdim")?.unwrap_or(DEFAULT_ZDIM),
        };
        finish(pargs)?;

        Ok(Some(args))
    }
}

fn finish(pargs: pico_args::Arguments) -> Result<()> {
    let remaining = pargs.finish();
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(Error::UnusedArguments(remaining))
    }
}
