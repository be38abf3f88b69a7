use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowVaeError>;

#[derive(Debug, Error)]
pub enum FlowVaeError {
    /// Bad or incomplete `flow.*` configuration; raised while building
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("derivative for {0} nonlinearity not implemented")]
    UnimplementedDerivative(&'static str),

    #[error("shape mismatch in {op}: lhs {lhs}, rhs {rhs}")]
    ShapeMismatch {
        lhs: String,
        rhs: String,
        op: &'static str,
    },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("data error: {0}")]
    Data(String),
}

impl FlowVaeError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Unwraps backtrace/context layers so that a binary-op shape
    /// mismatch inside candle comes out as [`FlowVaeError::ShapeMismatch`].
    pub fn from_candle(err: candle_core::Error) -> Self {
        match err {
            candle_core::Error::ShapeMismatchBinaryOp { lhs, rhs, op } => Self::ShapeMismatch {
                lhs: format!("{:?}", lhs.dims()),
                rhs: format!("{:?}", rhs.dims()),
                op,
            },
            candle_core::Error::WithBacktrace { inner, .. } => Self::from_candle(*inner),
            candle_core::Error::Context { inner, .. } => Self::from_candle(*inner),
            other => Self::Candle(other),
        }
    }
}
