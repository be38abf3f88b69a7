use candle_core::{Result, Tensor, Var};
use candle_nn::Module;

////////////////////////////////////////////
// Linear module with in-place parameters //
////////////////////////////////////////////

/// Affine map `x -> x W^T + b` whose parameters are `Var`s, so an
/// initialisation policy (or an optimizer) can overwrite them without
/// rebuilding the module.
///
/// * `weight` - `out_dim x in_dim`
/// * `bias` - `out_dim`
#[derive(Clone, Debug)]
pub struct FlowLinear {
    in_dim: usize,
    out_dim: usize,
    weight: Var,
    bias: Var,
}

impl FlowLinear {
    pub fn new(in_dim: usize, out_dim: usize, weight: &Tensor, bias: &Tensor) -> Result<Self> {
        debug_assert_eq!(weight.dims(), &[out_dim, in_dim]);
        debug_assert_eq!(bias.dims(), &[out_dim]);
        Ok(Self {
            in_dim,
            out_dim,
            weight: Var::from_tensor(weight)?,
            bias: Var::from_tensor(bias)?,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn weight(&self) -> &Tensor {
        self.weight.as_tensor()
    }

    pub fn bias(&self) -> &Tensor {
        self.bias.as_tensor()
    }

    /// overwrite the weight matrix in place (same shape required)
    pub fn set_weight(&self, weight: &Tensor) -> Result<()> {
        self.weight.set(&weight.to_dtype(self.weight.dtype())?)
    }

    /// overwrite the bias vector in place (same shape required)
    pub fn set_bias(&self, bias: &Tensor) -> Result<()> {
        self.bias.set(&bias.to_dtype(self.bias.dtype())?)
    }
}

impl Module for FlowLinear {
    fn forward(&self, h_ni: &Tensor) -> Result<Tensor> {
        let w_io = match *h_ni.dims() {
            [b1, b2, _, _] => self.weight().broadcast_left((b1, b2))?.t()?,
            [bsize, _, _] => self.weight().broadcast_left(bsize)?.t()?,
            _ => self.weight().t()?,
        };
        h_ni.matmul(&w_io)?.broadcast_add(self.bias())
    }
}

/// Create a [`FlowLinear`] with the same framework defaults as
/// `candle_nn::linear`:
///
/// * `weight` - Kaiming normal
/// * `bias` - uniform on `[-1/sqrt(in_dim), 1/sqrt(in_dim)]`
pub fn flow_linear(in_dim: usize, out_dim: usize, vb: candle_nn::VarBuilder) -> Result<FlowLinear> {
    let init_ws = candle_nn::init::DEFAULT_KAIMING_NORMAL;
    let ws = vb.get_with_hints((out_dim, in_dim), "weight", init_ws)?;
    let bound = 1. / (in_dim as f64).sqrt();
    let bs = vb.get_with_hints(
        out_dim,
        "bias",
        candle_nn::Init::Uniform {
            lo: -bound,
            up: bound,
        },
    )?;
    FlowLinear::new(in_dim, out_dim, &ws, &bs)
}
