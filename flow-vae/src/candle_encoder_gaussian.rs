use crate::candle_aux_layers::*;
use crate::candle_elbo_loss::GaussianParams;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// MLP encoder for a fully-factorized Gaussian `q(z|x)`
pub struct GaussianEncoder {
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl EncoderModuleT for GaussianEncoder {
    ///
    /// Evaluate latent Gaussian parameters: mu and log_var
    /// z ~ (mu(x), log_var(x))
    fn latent_gaussian_params(&self, x_nd: &Tensor, _train: bool) -> Result<GaussianParams> {
        let min_lv = -8.; // keeps exp(log_var) away from zero
        let max_lv = 8.; //

        let x_nd = x_nd.flatten_from(1)?;
        debug_assert_eq!(x_nd.dim(1)?, self.n_features);

        let fc_nl = self.fc.forward(&x_nd)?;
        let mean = self.z_mean.forward(&fc_nl)?;
        let log_var = self.z_lnvar.forward(&fc_nl)?.clamp(min_lv, max_lv)?;
        Ok(GaussianParams { mean, log_var })
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl GaussianEncoder {
    /// Will create a new Gaussian encoder module
    /// with these variables:
    ///
    /// * `nn.enc.fc.{}.weight` where {} is the layer index
    /// * `nn.enc.z.mean.weight`
    /// * `nn.enc.z.lnvar.weight`
    ///
    /// # Arguments
    /// * `n_features` - the number of (flattened) input features
    /// * `n_latent` - latent dimension
    /// * `layers` - fully connected layers, each with the dim
    /// * `vs` - variable builder
    pub fn new(n_features: usize, n_latent: usize, layers: &[usize], vs: VarBuilder) -> Result<Self> {
        let (fc, fc_dim) = stack_relu_linear(n_features, layers, vs.pp("nn.enc.fc"))?;
        let z_mean = candle_nn::linear(fc_dim, n_latent, vs.pp("nn.enc.z.mean"))?;
        let z_lnvar = candle_nn::linear(fc_dim, n_latent, vs.pp("nn.enc.z.lnvar"))?;

        Ok(Self {
            n_features,
            n_latent,
            fc,
            z_mean,
            z_lnvar,
        })
    }
}
