use crate::candle_flow_activation::FlowActivation;
use crate::candle_flow_config::FlowConfig;
use crate::candle_planar_flow::PlanarFlow;
use crate::candle_radial_flow::RadialFlow;
use crate::candle_weight_init::WeightInit;
use crate::error::Result;

use candle_core::Tensor;
use candle_nn::VarBuilder;
use clap::ValueEnum;
use log::debug;
use rand::Rng;

/// One flow step's output
///
/// * `z` - transformed sample `(n x k)`
/// * `log_det` - `log |det dz/dz0|` per sample `(n,)`; `None` when the
///   step does not track it
pub struct FlowOutput {
    pub z: Tensor,
    pub log_det: Option<Tensor>,
}

/// What every flow step shares: the initialisation policy its layers
/// were built with and the resolved activation pair.
#[derive(Debug, Clone, Copy)]
pub struct FlowBase {
    pub init: WeightInit,
    pub activation: FlowActivation,
}

pub trait NormFlowT: Sized {
    /// parameters a flow allocates for itself
    type Layers;

    /// Allocate the step's parameters and run `init` over every
    /// [`crate::candle_aux_linear::FlowLinear`] among them. The
    /// activation is not resolved yet when this runs.
    ///
    /// # Arguments
    /// * `dim_latent` - latent dimension `k`
    /// * `init` - weight initialisation policy
    /// * `rng` - random state the policy draws from
    /// * `vb` - variable builder
    fn construct_layers<R: Rng + ?Sized>(
        dim_latent: usize,
        init: &WeightInit,
        rng: &mut R,
        vb: VarBuilder,
    ) -> Result<Self::Layers>;

    fn assemble(base: FlowBase, layers: Self::Layers) -> Self;

    /// Push a base sample `z0 (n x k)` through the step
    fn forward(&self, z0: &Tensor) -> Result<FlowOutput>;

    fn dim_latent(&self) -> usize;
}

/// Build a flow step in a fixed order: initialisation policy, then
/// layers, then activation.
pub fn build_flow<F, R>(
    dim_latent: usize,
    config: &FlowConfig,
    rng: &mut R,
    vb: VarBuilder,
) -> Result<F>
where
    F: NormFlowT,
    R: Rng + ?Sized,
{
    let init = config.weight_init()?;
    let layers = F::construct_layers(dim_latent, &init, rng, vb)?;
    let activation = FlowActivation::from(config.nonlinearity);
    Ok(F::assemble(FlowBase { init, activation }, layers))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FlowType {
    Planar,
    Radial,
}

pub enum Flow {
    Planar(PlanarFlow),
    Radial(RadialFlow),
}

impl Flow {
    pub fn new<R: Rng + ?Sized>(
        flow_type: FlowType,
        dim_latent: usize,
        config: &FlowConfig,
        rng: &mut R,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(match flow_type {
            FlowType::Planar => Flow::Planar(build_flow(dim_latent, config, rng, vb)?),
            FlowType::Radial => Flow::Radial(build_flow(dim_latent, config, rng, vb)?),
        })
    }

    pub fn forward(&self, z0: &Tensor) -> Result<FlowOutput> {
        match self {
            Flow::Planar(f) => f.forward(z0),
            Flow::Radial(f) => f.forward(z0),
        }
    }

    pub fn dim_latent(&self) -> usize {
        match self {
            Flow::Planar(f) => f.dim_latent(),
            Flow::Radial(f) => f.dim_latent(),
        }
    }
    pub fn base(&self) -> &FlowBase {
        match self {
            Flow::Planar(f) => f.base(),
            Flow::Radial(f) => f.base(),
        }
    }
}

/// `K` flow steps applied one after another
pub struct FlowStack {
    dim_latent: usize,
    flows: Vec<Flow>,
}

impl FlowStack {
    /// Will create `n_flows` steps of the same type with variables
    /// under `flow.{k}`
    pub fn new<R: Rng + ?Sized>(
        flow_type: FlowType,
        n_flows: usize,
        dim_latent: usize,
        config: &FlowConfig,
        rng: &mut R,
        vb: VarBuilder,
    ) -> Result<Self> {
        let flows = (0..n_flows)
            .map(|k| Flow::new(flow_type, dim_latent, config, &mut *rng, vb.pp(format!("flow.{}", k))))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "built {} {:?} flow step(s) on {} latent dims, h = {}",
            n_flows,
            flow_type,
            dim_latent,
            FlowActivation::from(config.nonlinearity).name()
        );

        Ok(Self { dim_latent, flows })
    }

    pub fn identity(dim_latent: usize) -> Self {
        Self {
            dim_latent,
            flows: vec![],
        }
    }

    pub fn push(&mut self, flow: Flow) {
        debug_assert_eq!(flow.dim_latent(), self.dim_latent);
        self.flows.push(flow);
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn dim_latent(&self) -> usize {
        self.dim_latent
    }

    /// Returns `(z_k, sum_log_det)`; untracked steps contribute zero
    ///
    /// * `z_k` - `n x k`
    /// * `sum_log_det` - `(n,)`
    pub fn flow(&self, z0_nk: &Tensor) -> Result<(Tensor, Tensor)> {
        let n = z0_nk.dim(0)?;
        let mut z_nk = z0_nk.clone();
        let mut log_det_n = Tensor::zeros(n, z0_nk.dtype(), z0_nk.device())?;

        for flow in self.flows.iter() {
            let FlowOutput { z, log_det } = flow.forward(&z_nk)?;
            if let Some(log_det) = log_det {
                log_det_n = (log_det_n + log_det)?;
            }
            z_nk = z;
        }
        Ok((z_nk, log_det_n))
    }
}

/// stable `log(1 + exp(x))`
pub(crate) fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.)?.log()?;
    Ok((x.relu()? + tail)?)
}

pub(crate) fn scalar_like(v: f64, like: &Tensor) -> Result<Tensor> {
    Ok(Tensor::new(v, like.device())?.to_dtype(like.dtype())?)
}
