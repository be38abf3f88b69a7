use crate::candle_data_loader::*;
use crate::candle_elbo_loss::*;
use crate::candle_inference::TrainConfig;
use crate::candle_model_traits::{DecoderModuleT, EncoderModuleT};
use crate::candle_norm_flow::FlowStack;
use crate::error::Result;

use candle_core::Tensor;
use candle_nn::AdamW;
use candle_nn::Optimizer;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

pub struct Vae<'a, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    pub encoder: &'a Enc,
    pub flows: &'a FlowStack,
    pub decoder: &'a Dec,
    pub variable_map: &'a candle_nn::VarMap,
}

impl<Enc, Dec> Vae<'_, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    /// encoder -> base sample -> flow stack -> decoder
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<FlowVaeOutput> {
        let (z0, params) = self.encoder.forward_t(x, train)?;
        let (zk, log_det) = self.flows.flow(&z0)?;
        let x_hat = self.decoder.forward(&zk)?;
        Ok(FlowVaeOutput {
            x_hat,
            z0,
            zk,
            log_det,
            params,
        })
    }

    /// Plain Gaussian ELBO without flow steps, flow-corrected otherwise
    pub fn compute_loss(&self, x: &Tensor, train: bool, warm_up: f64) -> Result<LossOutput> {
        let out = self.forward_t(x, train)?;
        if self.flows.is_empty() {
            let out = VaeOutput {
                x_hat: out.x_hat,
                z: out.zk,
                params: out.params,
            };
            GaussianLoss.compute_loss(x, &out, warm_up)
        } else {
            FlowGaussianLoss.compute_loss(x, &out, warm_up)
        }
    }
}

pub trait VaeT<'a, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    /// Train the VAE model
    /// * `data` - data loader should have `minibatch_data`
    /// * `train_config` - training configuration
    ///
    /// Returns the average ELBO of each epoch
    fn train_encoder_decoder<DataL>(
        &mut self,
        data: &mut DataL,
        train_config: &TrainConfig,
    ) -> anyhow::Result<Vec<f64>>
    where
        DataL: DataLoader;

    /// Sample-weighted average of the loss metrics over all
    /// minibatches at full warm-up. Latents are sampled from `q(z|x)`
    /// as in training, so the result is the single-sample Monte Carlo
    /// ELBO; no parameter is updated.
    fn evaluate<DataL>(
        &self,
        data: &mut DataL,
        train_config: &TrainConfig,
    ) -> anyhow::Result<LossMetrics>
    where
        DataL: DataLoader;

    /// Build a VAE model
    /// * `encoder` - encoder module
    /// * `flows` - flow steps between encoder and decoder
    /// * `decoder` - decoder module
    fn build(
        encoder: &'a Enc,
        flows: &'a FlowStack,
        decoder: &'a Dec,
        variable_map: &'a candle_nn::VarMap,
    ) -> Self;
}

impl<'a, Enc, Dec> VaeT<'a, Enc, Dec> for Vae<'a, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    fn train_encoder_decoder<DataL>(
        &mut self,
        data: &mut DataL,
        train_config: &TrainConfig,
    ) -> anyhow::Result<Vec<f64>>
    where
        DataL: DataLoader,
    {
        let device = &train_config.device;
        let mut adam = AdamW::new_lr(
            self.variable_map.all_vars(),
            train_config.learning_rate.into(),
        )?;

        let pb = ProgressBar::new(train_config.num_epochs as u64);

        if !train_config.show_progress || train_config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut elbo_trace = vec![];

        for epoch in 0..train_config.num_epochs {
            let warm_up = train_config.warm_up(epoch);
            data.shuffle_minibatch(train_config.batch_size)?;

            let mut elbo_tot = 0f64;

            for b in 0..data.num_minibatch() {
                let minibatch_data = data.minibatch_data(b, device)?;
                let out = self.compute_loss(&minibatch_data.input, true, warm_up)?;
                adam.backward_step(&out.loss)?;
                elbo_tot += out.loss_metrics[ELBO];
            }
            elbo_trace.push(elbo_tot / data.num_minibatch().max(1) as f64);
            pb.inc(1);

            if train_config.verbose {
                info!(
                    "[{}] warm-up: {:.3}, elbo: {}",
                    epoch + 1,
                    warm_up,
                    elbo_trace.last().ok_or(anyhow::anyhow!("elbo"))?
                );
            }
        } // each epoch

        pb.finish_and_clear();
        Ok(elbo_trace)
    }

    fn evaluate<DataL>(
        &self,
        data: &mut DataL,
        train_config: &TrainConfig,
    ) -> anyhow::Result<LossMetrics>
    where
        DataL: DataLoader,
    {
        let device = &train_config.device;
        data.shuffle_minibatch(train_config.batch_size)?;

        let mut totals = LossMetrics::new();
        let mut ntot = 0usize;

        for b in 0..data.num_minibatch() {
            let minibatch_data = data.minibatch_data(b, device)?;
            let n = minibatch_data.input.dim(0)?;
            let out = self.compute_loss(&minibatch_data.input, true, 1.0)?;
            for (k, v) in out.loss_metrics {
                *totals.entry(k).or_insert(0.) += v * n as f64;
            }
            ntot += n;
        }

        if ntot == 0 {
            return Err(anyhow::anyhow!("no samples to evaluate"));
        }
        totals.values_mut().for_each(|v| *v /= ntot as f64);
        Ok(totals)
    }

    fn build(
        encoder: &'a Enc,
        flows: &'a FlowStack,
        decoder: &'a Dec,
        variable_map: &'a candle_nn::VarMap,
    ) -> Self {
        assert_eq!(encoder.dim_latent(), decoder.dim_latent());
        assert_eq!(encoder.dim_latent(), flows.dim_latent());
        assert_eq!(encoder.dim_obs(), decoder.dim_obs());

        Self {
            encoder,
            flows,
            decoder,
            variable_map,
        }
    }
}
