pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub num_warm_up_epochs: usize,
    pub device: candle_core::Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl TrainConfig {
    /// Linear entropy annealing: `min(1, epoch / num_warm_up_epochs)`,
    /// or `1` throughout without warm-up epochs
    pub fn warm_up(&self, epoch: usize) -> f64 {
        if self.num_warm_up_epochs == 0 {
            1.
        } else {
            (epoch as f64 / self.num_warm_up_epochs as f64).min(1.)
        }
    }
}
