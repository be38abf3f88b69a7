pub mod candle_aux_layers;
pub mod candle_aux_linear;
pub mod candle_data_loader;
pub mod candle_data_loader_util;
pub mod candle_decoder_bernoulli;
pub mod candle_elbo_loss;
pub mod candle_encoder_gaussian;
pub mod candle_flow_activation;
pub mod candle_flow_config;
pub mod candle_image_datasets;
pub mod candle_inference;
pub mod candle_loss_functions;
pub mod candle_model_traits;
pub mod candle_norm_flow;
pub mod candle_planar_flow;
pub mod candle_radial_flow;
pub mod candle_vae_inference;
pub mod candle_weight_init;
pub mod cli;
pub mod error;

pub use candle_core;
pub use candle_nn;
