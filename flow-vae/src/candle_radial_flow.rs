use crate::candle_aux_linear::{flow_linear, FlowLinear};
use crate::candle_norm_flow::{scalar_like, softplus, FlowBase, FlowOutput, NormFlowT};
use crate::candle_weight_init::WeightInit;
use crate::error::Result;

use candle_core::{Tensor, Var};
use candle_nn::{Module, VarBuilder};
use rand::Rng;

pub struct RadialLayers {
    reference: FlowLinear,
    alpha_beta: Var,
}

/// Radial flow step
///
/// `z' = z + β h(α, r) (z - z_ref)`, `r = |z - z_ref|`, `h = 1 / (α + r)`
///
/// with `α = softplus(α̂) > 0` and `β = -α + softplus(β̂) >= -α`.
///
/// `log |det J| = (k - 1) log(1 + βh) + log(1 + βh - βr / (α + r)²)`
///
/// The reference point is `z_ref = W·1 + b` of a `1 -> k` linear map, so
/// the weight initialisation policy covers it.
pub struct RadialFlow {
    dim_latent: usize,
    base: FlowBase,
    reference: FlowLinear,
    alpha_beta: Var,
}

impl RadialFlow {
    pub fn base(&self) -> &FlowBase {
        &self.base
    }

    /// `z_ref (1 x k)`
    fn z_ref(&self) -> Result<Tensor> {
        let one = Tensor::ones((1, 1), self.reference.weight().dtype(), self.reference.weight().device())?;
        Ok(self.reference.forward(&one)?)
    }

    /// `(α, β)` each of shape `(1,)`
    fn alpha_beta(&self) -> Result<(Tensor, Tensor)> {
        let ab = self.alpha_beta.as_tensor();
        let alpha = softplus(&ab.narrow(0, 0, 1)?)?;
        let beta = (softplus(&ab.narrow(0, 1, 1)?)? - &alpha)?;
        Ok((alpha, beta))
    }
}

impl NormFlowT for RadialFlow {
    type Layers = RadialLayers;

    /// Will create these variables:
    /// * `ref.weight`, `ref.bias` - reference point map `(k x 1)`, `(k)`
    /// * `alpha.beta` - unconstrained `(α̂, β̂)`; zero under every
    ///   initialisation policy, so a fresh step is the identity
    fn construct_layers<R: Rng + ?Sized>(
        dim_latent: usize,
        init: &WeightInit,
        rng: &mut R,
        vb: VarBuilder,
    ) -> Result<RadialLayers> {
        let reference = flow_linear(1, dim_latent, vb.pp("ref"))?;
        init.initialise(&reference, rng)?;

        let alpha_beta = vb.get_with_hints(2, "alpha.beta", candle_nn::Init::Const(0.))?;

        Ok(RadialLayers {
            reference,
            alpha_beta: Var::from_tensor(&alpha_beta)?,
        })
    }

    fn assemble(base: FlowBase, layers: RadialLayers) -> Self {
        Self {
            dim_latent: layers.reference.out_dim(),
            base,
            reference: layers.reference,
            alpha_beta: layers.alpha_beta,
        }
    }

    fn forward(&self, z0_nk: &Tensor) -> Result<FlowOutput> {
        let (alpha, beta) = self.alpha_beta()?;
        let diff_nk = z0_nk.broadcast_sub(&self.z_ref()?)?;
        let r_n1 = diff_nk.sqr()?.sum_keepdim(1)?.sqrt()?;

        let h_n1 = r_n1.broadcast_add(&alpha)?.recip()?;
        let beta_h_n1 = h_n1.broadcast_mul(&beta)?;

        let z_nk = (z0_nk + diff_nk.broadcast_mul(&beta_h_n1)?)?;

        // h'(r) = -h²
        let one_beta_h = (&beta_h_n1 + 1.)?;
        let k_1 = scalar_like((self.dim_latent as f64) - 1., z0_nk)?;
        let term1 = one_beta_h.log()?.broadcast_mul(&k_1)?;
        let dh_r = h_n1.sqr()?.mul(&r_n1)?.broadcast_mul(&beta)?;
        let term2 = (one_beta_h - dh_r)?.log()?;
        let log_det_n = (term1 + term2)?.squeeze(1)?;

        Ok(FlowOutput {
            z: z_nk,
            log_det: Some(log_det_n),
        })
    }

    fn dim_latent(&self) -> usize {
        self.dim_latent
    }
}
