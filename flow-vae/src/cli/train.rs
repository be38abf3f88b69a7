use crate::candle_decoder_bernoulli::BernoulliDecoder;
use crate::candle_elbo_loss::LossMetrics;
use crate::candle_encoder_gaussian::GaussianEncoder;
use crate::candle_flow_config::{FlowConfig, InitScheme, Nonlinearity};
use crate::candle_image_datasets::{load_dataset, DatasetKind};
use crate::candle_inference::TrainConfig;
use crate::candle_norm_flow::{FlowStack, FlowType};
use crate::candle_vae_inference::{Vae, VaeT};

use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::Args;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(short, long, value_enum)]
    pub dataset: DatasetKind,

    #[arg(long, default_value = "data", help = "Root directory of the data sets")]
    pub data_path: PathBuf,

    #[arg(long, help = "JSON model config with a `flow` section")]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Overrides flow.weight_initialisation")]
    pub weight_initialisation: Option<InitScheme>,

    #[arg(long, help = "Overrides flow.weight_initialisation_std")]
    pub weight_initialisation_std: Option<f64>,

    #[arg(long, value_enum, help = "Overrides flow.nonlinearity")]
    pub nonlinearity: Option<Nonlinearity>,

    #[arg(short, long, value_enum, default_value = "planar")]
    pub flow: FlowType,

    #[arg(long, default_value = "0", help = "Number of flow steps (0: plain Gaussian VAE)")]
    pub num_flows: usize,

    #[arg(long, default_value = "40")]
    pub latent_dim: usize,

    #[arg(long, value_delimiter = ',', default_value = "300", help = "Hidden layer sizes")]
    pub hidden: Vec<usize>,

    #[arg(short, long, default_value = "100")]
    pub epochs: usize,

    #[arg(long, default_value = "100")]
    pub batch_size: usize,

    #[arg(long, default_value = "0.001")]
    pub learning_rate: f32,

    #[arg(long, default_value = "0", help = "Epochs of linear entropy warm-up")]
    pub warm_up_epochs: usize,

    #[arg(long, help = "Train on the small balanced subset")]
    pub balanced: bool,

    #[arg(long, default_value = "42", help = "Seed for flow weight initialisation")]
    pub seed: u64,

    #[arg(short, long, help = "Output prefix (creates {output}.safetensors and {output}.json)")]
    pub output: Option<String>,

    #[arg(long)]
    pub gpu: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Serialize)]
struct TrainSummary<'a> {
    dataset: String,
    flow: String,
    num_flows: usize,
    elbo_trace: &'a [f64],
    test_metrics: &'a LossMetrics,
}

/// Config file first, command-line overrides second
fn resolve_flow_config(args: &TrainArgs) -> Result<FlowConfig> {
    let base = match &args.config {
        Some(path) => FlowConfig::from_json_file(path)?,
        None => FlowConfig::default(),
    };

    Ok(FlowConfig::new(
        args.weight_initialisation
            .unwrap_or(base.weight_initialisation),
        args.weight_initialisation_std
            .or(base.weight_initialisation_std),
        args.nonlinearity.unwrap_or(base.nonlinearity),
    )?)
}

pub fn run(args: &TrainArgs) -> Result<()> {
    let device = if args.gpu {
        #[cfg(feature = "metal")]
        { Device::new_metal(0).unwrap_or(Device::Cpu) }
        #[cfg(all(feature = "cuda", not(feature = "metal")))]
        { Device::new_cuda(0).unwrap_or(Device::Cpu) }
        #[cfg(not(any(feature = "cuda", feature = "metal")))]
        { Device::Cpu }
    } else {
        Device::Cpu
    };
    info!("Using device: {:?}", device);

    let flow_config = resolve_flow_config(args)?;
    info!("Flow config: {:?}", flow_config);

    let mut train_data = load_dataset(args.dataset, &args.data_path, true, args.balanced)?;
    let mut test_data = load_dataset(args.dataset, &args.data_path, false, false)?;

    let obs_shape = train_data.sample_shape().to_vec();
    let n_features: usize = obs_shape.iter().product();
    info!(
        "{} training / {} test samples of shape {:?}",
        train_data.num_samples(),
        test_data.num_samples(),
        obs_shape
    );

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let mut rng = StdRng::seed_from_u64(args.seed);

    let encoder = GaussianEncoder::new(n_features, args.latent_dim, &args.hidden, vb.clone())?;
    let flows = FlowStack::new(
        args.flow,
        args.num_flows,
        args.latent_dim,
        &flow_config,
        &mut rng,
        vb.pp("nn"),
    )?;
    let decoder_layers: Vec<usize> = args.hidden.iter().rev().copied().collect();
    let decoder = BernoulliDecoder::new(&obs_shape, args.latent_dim, &decoder_layers, vb.clone())?;

    if flows.is_empty() {
        info!("Model: Gaussian VAE");
    } else {
        info!("Model: {} x {:?} flow VAE", flows.len(), args.flow);
    }

    let train_config = TrainConfig {
        learning_rate: args.learning_rate,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        num_warm_up_epochs: args.warm_up_epochs,
        device: device.clone(),
        verbose: args.verbose,
        show_progress: true,
    };

    let mut vae = Vae::build(&encoder, &flows, &decoder, &varmap);
    let elbo_trace = vae.train_encoder_decoder(&mut train_data, &train_config)?;
    if let Some(last) = elbo_trace.last() {
        info!("Final training ELBO: {:.4}", last);
    }

    let test_metrics = vae.evaluate(&mut test_data, &train_config)?;
    let mut keys: Vec<&String> = test_metrics.keys().collect();
    keys.sort();
    for k in keys {
        info!("test {}: {:.4}", k, test_metrics[k]);
    }

    if let Some(output) = &args.output {
        let params_file = format!("{}.safetensors", output);
        varmap.save(&params_file)?;
        info!("Wrote {}", params_file);

        let summary_file = format!("{}.json", output);
        let summary = TrainSummary {
            dataset: format!("{:?}", args.dataset),
            flow: format!("{:?}", args.flow),
            num_flows: flows.len(),
            elbo_trace: &elbo_trace,
            test_metrics: &test_metrics,
        };
        std::fs::write(&summary_file, serde_json::to_string_pretty(&summary)?)?;
        info!("Wrote {}", summary_file);
    }

    Ok(())
}
