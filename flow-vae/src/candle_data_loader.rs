use crate::candle_data_loader_util::Minibatches;

use anyhow::anyhow;
use candle_core::{Device, Tensor};

pub struct MinibatchData {
    pub input: Tensor,
    pub labels: Tensor,
}

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData>;

    fn num_minibatch(&self) -> usize;

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// An in-memory image data set. The first dimension of `images` indexes
/// samples; the rest is the shape of one (binarised, possibly flattened)
/// image. `labels` are `i64`, `-1` where no label exists.
///
pub struct InMemoryImages {
    images: Tensor,
    labels: Tensor,
    shuffle: bool,
    minibatches: Minibatches,
}

impl InMemoryImages {
    pub fn new(images: Tensor, labels: Tensor, shuffle: bool) -> anyhow::Result<Self> {
        let n = images.dim(0)?;
        if labels.dims() != [n] {
            return Err(anyhow!(
                "{} images but labels of shape {:?}",
                n,
                labels.dims()
            ));
        }
        Ok(Self {
            images,
            labels,
            shuffle,
            minibatches: Minibatches::new(n),
        })
    }

    pub fn num_samples(&self) -> usize {
        self.minibatches.size()
    }

    /// shape of a single sample
    pub fn sample_shape(&self) -> &[usize] {
        &self.images.dims()[1..]
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    pub fn images(&self) -> &Tensor {
        &self.images
    }

    pub fn labels(&self) -> &Tensor {
        &self.labels
    }
}

impl DataLoader for InMemoryImages {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let chunk = self.minibatches.chunks.get(batch_idx).ok_or_else(|| {
            anyhow!(
                "invalid index = {} vs. total # = {}",
                batch_idx,
                self.num_minibatch()
            )
        })?;

        let idx: Vec<u32> = chunk.iter().map(|&i| i as u32).collect();
        let idx = Tensor::from_vec(idx, chunk.len(), self.images.device())?;

        Ok(MinibatchData {
            input: self.images.index_select(&idx, 0)?.to_device(target_device)?,
            labels: self.labels.index_select(&idx, 0)?.to_device(target_device)?,
        })
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow!("batch size must be positive"));
        }
        self.minibatches.shuffle_minibatch(batch_size, self.shuffle);
        Ok(())
    }
}
