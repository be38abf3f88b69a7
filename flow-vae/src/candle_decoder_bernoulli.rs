use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// MLP decoder producing Bernoulli logits
pub struct BernoulliDecoder {
    obs_shape: Vec<usize>,
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
}

impl BernoulliDecoder {
    /// Will create a new decoder with these variables:
    /// * `nn.dec.fc.{}.weight` where {} is the layer index
    /// * `nn.dec.logits.weight`
    ///
    /// # Arguments
    /// * `obs_shape` - shape of one observation, e.g. `[784]` or `[3, 32, 32]`
    /// * `n_latent` - latent dimension
    /// * `layers` - fully connected layers, each with the dim
    /// * `vs` - variable builder
    pub fn new(obs_shape: &[usize], n_latent: usize, layers: &[usize], vs: VarBuilder) -> Result<Self> {
        let n_features = obs_shape.iter().product();
        let (mut fc, fc_dim) = stack_relu_linear(n_latent, layers, vs.pp("nn.dec.fc"))?;
        fc.push(candle_nn::linear(fc_dim, n_features, vs.pp("nn.dec.logits"))?);

        Ok(Self {
            obs_shape: obs_shape.to_vec(),
            n_features,
            n_latent,
            fc,
        })
    }
}

impl DecoderModuleT for BernoulliDecoder {
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor> {
        let n = z_nk.dim(0)?;
        let logits_nd = self.fc.forward(z_nk)?;

        let mut shape = vec![n];
        shape.extend_from_slice(&self.obs_shape);
        logits_nd.reshape(shape)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}
