use crate::candle_aux_linear::FlowLinear;
use crate::error::{FlowVaeError, Result};

use candle_core::{Tensor, Var};
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

/// Weight initialisation policy applied to each [`FlowLinear`] a flow
/// allocates, and to its free-standing matrix parameters through
/// [`WeightInit::initialise_matrix`].
///
/// * `XavierUniform` - `W ~ U(-a, a)`, `a = sqrt(6 / (fan_in + fan_out))`, `b = 0`
/// * `XavierNormal` - `W ~ N(0, s^2)`, `s = sqrt(2 / (fan_in + fan_out))`, `b = 0`
/// * `Normal` - `W, b ~ N(0, std^2)` independently
/// * `Default` - keep whatever the layer was created with
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightInit {
    XavierUniform,
    XavierNormal,
    Normal { std: f64 },
    Default,
}

impl WeightInit {
    /// Overwrite `layer`'s parameters in place and hand it back for
    /// chaining. Draws come from `rng` only, so the same seed gives the
    /// same parameters.
    pub fn initialise<'a, R>(&self, layer: &'a FlowLinear, rng: &mut R) -> Result<&'a FlowLinear>
    where
        R: Rng + ?Sized,
    {
        if let Some(weight) = self.draw_matrix(layer.weight(), rng)? {
            layer.set_weight(&weight)?;
            let bias = match *self {
                WeightInit::Normal { std } => sample_like(&normal(std)?, layer.bias(), rng)?,
                _ => layer.bias().zeros_like()?,
            };
            layer.set_bias(&bias)?;
        }
        Ok(layer)
    }

    /// Overwrite a free-standing `rows x cols` parameter in place as if
    /// it were a weight matrix with `fan_in = cols`, `fan_out = rows`.
    /// `Default` keeps it.
    pub fn initialise_matrix<R>(&self, param: &Var, rng: &mut R) -> Result<()>
    where
        R: Rng + ?Sized,
    {
        if let Some(value) = self.draw_matrix(param.as_tensor(), rng)? {
            param.set(&value)?;
        }
        Ok(())
    }

    fn draw_matrix<R>(&self, like: &Tensor, rng: &mut R) -> Result<Option<Tensor>>
    where
        R: Rng + ?Sized,
    {
        let (fan_out, fan_in) = like.dims2()?;
        let fan_sum = (fan_in + fan_out) as f64;

        match *self {
            WeightInit::XavierUniform => {
                let a = (6. / fan_sum).sqrt();
                let unif = Uniform::new_inclusive(-a, a)
                    .map_err(|e| FlowVaeError::config(format!("xavier_uniform: {}", e)))?;
                Ok(Some(sample_like(&unif, like, rng)?))
            }
            WeightInit::XavierNormal => {
                let s = (2. / fan_sum).sqrt();
                let normal = Normal::new(0., s)
                    .map_err(|e| FlowVaeError::config(format!("xavier_normal: {}", e)))?;
                Ok(Some(sample_like(&normal, like, rng)?))
            }
            WeightInit::Normal { std } => Ok(Some(sample_like(&normal(std)?, like, rng)?)),
            WeightInit::Default => Ok(None),
        }
    }
}

fn normal(std: f64) -> Result<Normal<f64>> {
    Normal::new(0., std).map_err(|e| FlowVaeError::config(format!("normal: {}", e)))
}

/// fresh tensor with `like`'s shape, dtype and device
fn sample_like<D, R>(dist: &D, like: &Tensor, rng: &mut R) -> Result<Tensor>
where
    D: Distribution<f64>,
    R: Rng + ?Sized,
{
    let values: Vec<f64> = (0..like.elem_count()).map(|_| dist.sample(rng)).collect();
    Ok(Tensor::from_vec(values, like.dims(), like.device())?.to_dtype(like.dtype())?)
}
