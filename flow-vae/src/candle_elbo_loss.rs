use crate::candle_loss_functions::*;
use crate::error::{FlowVaeError, Result};

use candle_core::{DType, Tensor};
use std::collections::HashMap;

pub const ELBO: &str = "elbo";
pub const LOG_P_XZ: &str = "log p(x|z)";
pub const LOG_P_Z: &str = "log p(z)";
pub const LOG_Q_ZX: &str = "log q(z|x)";

/// Batch means of the ELBO terms as plain numbers; only meaningful
/// for the batch that produced them.
pub type LossMetrics = HashMap<String, f64>;

/// Parameters of a fully-factorized Gaussian `q(z|x)`, each `n x k`
#[derive(Clone, Debug)]
pub struct GaussianParams {
    pub mean: Tensor,
    pub log_var: Tensor,
}

/// What a Gaussian-posterior VAE hands to the loss
///
/// * `x_hat` - reconstruction logits, same shape as the input
/// * `z` - latent sample `n x k`
/// * `params` - posterior parameters
#[derive(Clone, Debug)]
pub struct VaeOutput {
    pub x_hat: Tensor,
    pub z: Tensor,
    pub params: GaussianParams,
}

/// What a flow-posterior VAE hands to the loss
///
/// * `x_hat` - reconstruction logits
/// * `z0` - base sample drawn from `params`
/// * `zk` - sample after the flow stack, fed to the decoder
/// * `log_det` - `sum_k log |det J_k|` per sample `(n,)`
/// * `params` - base posterior parameters
#[derive(Clone, Debug)]
pub struct FlowVaeOutput {
    pub x_hat: Tensor,
    pub z0: Tensor,
    pub zk: Tensor,
    pub log_det: Tensor,
    pub params: GaussianParams,
}

/// * `loss` - scalar `-mean(log_p_x)`, the only output carrying gradient
/// * `loss_metrics` - detached batch means
/// * `log_p_x` - per-sample bound `(n,)`
pub struct LossOutput {
    pub loss: Tensor,
    pub loss_metrics: LossMetrics,
    pub log_p_x: Tensor,
}

pub trait LossModuleT {
    type Input;

    /// Single-sample Monte Carlo estimate of the evidence lower bound
    ///
    /// log p(x) >= log p(x|z) + log p(z) - warm_up * log q(z|x)
    ///
    /// # Arguments
    /// * `x` - input to the VAE `(n x ...)`
    /// * `vae_output` - output of the VAE
    /// * `warm_up` - entropy annealing factor; `1.0` is the plain ELBO
    fn compute_loss(&self, x: &Tensor, vae_output: &Self::Input, warm_up: f64)
        -> Result<LossOutput>;
}

/// ELBO for a fully-factorized Gaussian approximate posterior with a
/// Bernoulli observation model and a standard normal prior
#[derive(Clone, Copy, Debug, Default)]
pub struct GaussianLoss;

impl LossModuleT for GaussianLoss {
    type Input = VaeOutput;

    fn compute_loss(&self, x: &Tensor, vae_output: &VaeOutput, warm_up: f64) -> Result<LossOutput> {
        let GaussianParams { mean, log_var } = &vae_output.params;

        let log_p_xz = bernoulli_likelihood(x, &vae_output.x_hat).map_err(FlowVaeError::from_candle)?;
        let log_p_z = std_normal_log_density(&vae_output.z)?;
        let log_q_zx = diag_gaussian_log_density(&vae_output.z, mean, log_var)?;

        combine_elbo_terms(&log_p_xz, &log_p_z, &log_q_zx, warm_up)
    }
}

/// ELBO for a Gaussian base posterior pushed through a flow stack
///
/// log q(z_k|x) = log q0(z0|x) - sum_k log |det J_k|
/// log p(z) is evaluated at z_k
#[derive(Clone, Copy, Debug, Default)]
pub struct FlowGaussianLoss;

impl LossModuleT for FlowGaussianLoss {
    type Input = FlowVaeOutput;

    fn compute_loss(
        &self,
        x: &Tensor,
        vae_output: &FlowVaeOutput,
        warm_up: f64,
    ) -> Result<LossOutput> {
        let GaussianParams { mean, log_var } = &vae_output.params;

        let log_p_xz = bernoulli_likelihood(x, &vae_output.x_hat).map_err(FlowVaeError::from_candle)?;
        let log_p_z = std_normal_log_density(&vae_output.zk)?;
        let log_q_z0 = diag_gaussian_log_density(&vae_output.z0, mean, log_var)?;
        let log_q_zx = (log_q_z0 - &vae_output.log_det)?;

        combine_elbo_terms(&log_p_xz, &log_p_z, &log_q_zx, warm_up)
    }
}

fn combine_elbo_terms(
    log_p_xz: &Tensor,
    log_p_z: &Tensor,
    log_q_zx: &Tensor,
    warm_up: f64,
) -> Result<LossOutput> {
    debug_assert!(warm_up >= 0., "warm-up must be non-negative");

    let log_p_x = ((log_p_xz + log_p_z)? - (log_q_zx * warm_up)?)?;

    let elbo = log_p_x.mean_all()?;
    let loss = elbo.neg()?;

    let mut loss_metrics = LossMetrics::new();
    loss_metrics.insert(ELBO.to_string(), detached_mean(&log_p_x)?);
    loss_metrics.insert(LOG_P_XZ.to_string(), detached_mean(log_p_xz)?);
    loss_metrics.insert(LOG_P_Z.to_string(), detached_mean(log_p_z)?);
    loss_metrics.insert(LOG_Q_ZX.to_string(), detached_mean(log_q_zx)?);

    Ok(LossOutput {
        loss,
        loss_metrics,
        log_p_x,
    })
}

fn detached_mean(x: &Tensor) -> Result<f64> {
    Ok(x.detach().mean_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}
