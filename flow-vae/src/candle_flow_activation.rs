use crate::candle_flow_config::Nonlinearity;
use crate::error::{FlowVaeError, Result};

use candle_core::Tensor;

/// Nonlinearity `h` and its derivative `h'`, always chosen together.
///
/// A flow that needs `h'` for its Jacobian asks the same value for
/// both, so the two can never disagree on the forward formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowActivation {
    Tanh,
    Elu,
}

impl From<Nonlinearity> for FlowActivation {
    fn from(nonlinearity: Nonlinearity) -> Self {
        match nonlinearity {
            Nonlinearity::Tanh => Self::Tanh,
            Nonlinearity::Elu => Self::Elu,
        }
    }
}

impl FlowActivation {
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Tanh => Ok(x.tanh()?),
            Self::Elu => Ok(x.elu(1.0)?),
        }
    }

    /// `h'(x)` elementwise
    ///
    /// * `Tanh` - `1 - h(x)^2`, going through [`Self::forward`]
    /// * `Elu` - always an error
    pub fn derivative(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Tanh => {
                let h = self.forward(x)?;
                Ok(h.sqr()?.affine(-1., 1.)?)
            }
            Self::Elu => Err(FlowVaeError::UnimplementedDerivative("elu")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Tanh => "tanh",
            Self::Elu => "elu",
        }
    }
}
