use crate::candle_weight_init::WeightInit;
use crate::error::{FlowVaeError, Result};

use clap::ValueEnum;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Weight initialisation scheme for flow layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InitScheme {
    #[value(name = "xavier_uniform")]
    XavierUniform,
    #[value(name = "xavier_normal")]
    XavierNormal,
    #[value(name = "normal")]
    Normal,
    #[value(name = "default")]
    Default,
}

impl FromStr for InitScheme {
    type Err = FlowVaeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "xavier_uniform" => Ok(Self::XavierUniform),
            "xavier_normal" => Ok(Self::XavierNormal),
            "normal" => Ok(Self::Normal),
            "default" => Ok(Self::Default),
            other => Err(FlowVaeError::config(format!(
                "Initialisation {} not recognised",
                other
            ))),
        }
    }
}

/// Nonlinearity `h` used inside a flow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Nonlinearity {
    #[value(name = "elu")]
    Elu,
    #[value(name = "tanh")]
    Tanh,
}

impl FromStr for Nonlinearity {
    type Err = FlowVaeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "elu" => Ok(Self::Elu),
            "tanh" => Ok(Self::Tanh),
            other => Err(FlowVaeError::config(format!(
                "Nonlinearity {} not recognised",
                other
            ))),
        }
    }
}

/// The `flow` section as it appears in a config file. Nothing here
/// is trusted until [`FlowConfig::from_raw`] has checked it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFlowConfig {
    pub weight_initialisation: Option<String>,
    pub weight_initialisation_std: Option<f64>,
    pub nonlinearity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawModelConfig {
    #[serde(default)]
    flow: RawFlowConfig,
}

/// Validated flow configuration
///
/// * `weight_initialisation` - defaults to [`InitScheme::Default`]
/// * `weight_initialisation_std` - required iff the scheme is `normal`
/// * `nonlinearity` - defaults to [`Nonlinearity::Tanh`]
#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    pub weight_initialisation: InitScheme,
    pub weight_initialisation_std: Option<f64>,
    pub nonlinearity: Nonlinearity,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            weight_initialisation: InitScheme::Default,
            weight_initialisation_std: None,
            nonlinearity: Nonlinearity::Tanh,
        }
    }
}

impl FlowConfig {
    pub fn new(
        weight_initialisation: InitScheme,
        weight_initialisation_std: Option<f64>,
        nonlinearity: Nonlinearity,
    ) -> Result<Self> {
        let ret = Self {
            weight_initialisation,
            weight_initialisation_std,
            nonlinearity,
        };
        ret.weight_init()?;
        Ok(ret)
    }

    pub fn from_raw(raw: &RawFlowConfig) -> Result<Self> {
        let weight_initialisation = match raw.weight_initialisation.as_deref() {
            Some(s) => s.parse()?,
            None => InitScheme::Default,
        };
        let nonlinearity = match raw.nonlinearity.as_deref() {
            Some(s) => s.parse()?,
            None => Nonlinearity::Tanh,
        };
        Self::new(
            weight_initialisation,
            raw.weight_initialisation_std,
            nonlinearity,
        )
    }

    /// Parse `{"flow": {...}}`; the `flow` object may be absent
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawModelConfig = serde_json::from_str(json)?;
        Self::from_raw(&raw.flow)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Resolve the initialisation policy
    pub fn weight_init(&self) -> Result<WeightInit> {
        match self.weight_initialisation {
            InitScheme::XavierUniform => Ok(WeightInit::XavierUniform),
            InitScheme::XavierNormal => Ok(WeightInit::XavierNormal),
            InitScheme::Default => Ok(WeightInit::Default),
            InitScheme::Normal => {
                let std = self.weight_initialisation_std.ok_or_else(|| {
                    FlowVaeError::config(
                        "flow.weight_initialisation_std is required for normal initialisation",
                    )
                })?;
                if !std.is_finite() || std < 0. {
                    return Err(FlowVaeError::config(format!(
                        "flow.weight_initialisation_std must be a non-negative number, got {}",
                        std
                    )));
                }
                Ok(WeightInit::Normal { std })
            }
        }
    }
}
