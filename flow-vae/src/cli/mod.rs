pub mod train;

use clap::{Parser, Subcommand};

pub use train::TrainArgs;

#[derive(Parser)]
#[command(name = "flow-vae")]
#[command(about = "Variational auto-encoders with normalizing-flow posteriors")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a (flow) VAE on an image corpus and report test-set ELBO terms
    Train(TrainArgs),
}
