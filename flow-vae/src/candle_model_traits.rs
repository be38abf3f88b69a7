use crate::candle_elbo_loss::GaussianParams;
use candle_core::{Result, Tensor};

pub trait EncoderModuleT {
    /// Parameters of `q(z|x)`
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x ...); flattened past the batch dimension
    /// * `train` - whether we are training
    fn latent_gaussian_params(&self, x_nd: &Tensor, train: bool) -> Result<GaussianParams>;

    /// An encoder that spits out a base sample and the parameters it
    /// was drawn from
    ///
    /// # Returns `(z_nk, params)`
    /// * `z_nk` - `mu + sigma * eps` while training, `mu` otherwise
    /// * `params` - `(mu, log_var)`, each n x k
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, GaussianParams)> {
        let params = self.latent_gaussian_params(x_nd, train)?;
        let z_nk = reparameterize(&params, train)?;
        Ok((z_nk, params))
    }

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// A decoder that spits out reconstruction logits shaped like the
    /// observed data
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

///
/// z = mu + sigma * eps
/// where eps ~ N(0, 1)
///
pub fn reparameterize(params: &GaussianParams, train: bool) -> Result<Tensor> {
    if train {
        let eps = Tensor::randn_like(&params.mean, 0., 1.)?;
        &params.mean + (&params.log_var * 0.5)?.exp()? * eps
    } else {
        Ok(params.mean.clone())
    }
}
