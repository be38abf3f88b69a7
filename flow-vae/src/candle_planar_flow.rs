use crate::candle_aux_linear::{flow_linear, FlowLinear};
use crate::candle_norm_flow::{softplus, FlowBase, FlowOutput, NormFlowT};
use crate::candle_weight_init::WeightInit;
use crate::error::Result;

use candle_core::{DType, Tensor, Var};
use candle_nn::{Module, VarBuilder};
use rand::Rng;

pub struct PlanarLayers {
    wb: FlowLinear,
    u: Var,
}

/// Planar flow step
///
/// `z' = z + û h(wᵀz + b)`
///
/// where `û = u + (m(wᵀu) - wᵀu) w / |w|²` and `m(a) = -1 + softplus(a)`
/// keeps `ûᵀw >= -1` so the step stays invertible.
///
/// `log |det J| = log |1 + ûᵀ h'(wᵀz + b) w|`
pub struct PlanarFlow {
    dim_latent: usize,
    base: FlowBase,
    wb: FlowLinear,
    u: Var,
}

impl PlanarFlow {
    pub fn base(&self) -> &FlowBase {
        &self.base
    }

    /// `û (1 x k)`
    fn u_hat(&self) -> Result<Tensor> {
        let w_1k = self.wb.weight();
        let u_1k = self.u.as_tensor();

        let w_sq = w_1k.sqr()?.sum_all()?;
        // no direction to correct along
        if w_sq.to_dtype(DType::F64)?.to_scalar::<f64>()? == 0. {
            return Ok(u_1k.clone());
        }

        let wu = w_1k.mul(u_1k)?.sum_all()?;
        let m_wu = (softplus(&wu)? - 1.)?;
        let coef = ((m_wu - &wu)? / w_sq)?;

        Ok((u_1k + w_1k.broadcast_mul(&coef)?)?)
    }
}

impl NormFlowT for PlanarFlow {
    type Layers = PlanarLayers;

    /// Will create these variables:
    /// * `wb.weight` - `w (1 x k)`
    /// * `wb.bias` - `b (1)`
    /// * `u` - `u (1 x k)`, `N(0, 0.01²)` under `default`, otherwise
    ///   drawn by `init` as a `1 x k` weight
    fn construct_layers<R: Rng + ?Sized>(
        dim_latent: usize,
        init: &WeightInit,
        rng: &mut R,
        vb: VarBuilder,
    ) -> Result<PlanarLayers> {
        let wb = flow_linear(dim_latent, 1, vb.pp("wb"))?;
        init.initialise(&wb, rng)?;

        let u = vb.get_with_hints(
            (1, dim_latent),
            "u",
            candle_nn::Init::Randn {
                mean: 0.,
                stdev: 0.01,
            },
        )?;

        let u = Var::from_tensor(&u)?;
        init.initialise_matrix(&u, rng)?;

        Ok(PlanarLayers { wb, u })
    }

    fn assemble(base: FlowBase, layers: PlanarLayers) -> Self {
        Self {
            dim_latent: layers.wb.in_dim(),
            base,
            wb: layers.wb,
            u: layers.u,
        }
    }

    fn forward(&self, z0_nk: &Tensor) -> Result<FlowOutput> {
        let activation = &self.base.activation;
        let u_hat_1k = self.u_hat()?;

        let a_n1 = self.wb.forward(z0_nk)?;
        let h_n1 = activation.forward(&a_n1)?;
        let z_nk = (z0_nk + h_n1.broadcast_mul(&u_hat_1k)?)?;

        let psi_nk = activation.derivative(&a_n1)?.broadcast_mul(self.wb.weight())?;
        let det_n = (psi_nk.broadcast_mul(&u_hat_1k)?.sum(1)? + 1.)?;
        let log_det_n = det_n.abs()?.log()?;

        Ok(FlowOutput {
            z: z_nk,
            log_det: Some(log_det_n),
        })
    }

    fn dim_latent(&self) -> usize {
        self.dim_latent
    }
}
