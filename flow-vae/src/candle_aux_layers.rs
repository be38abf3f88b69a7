use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder};

/// build a stack of alternating `M` and `A` layers
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Activation>>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = module.forward(&x)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn push(&mut self, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(None);
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Fully connected ReLU layers `in_dim -> layers[0] -> ... -> layers[L-1]`
/// with variables `{j}.weight`, `{j}.bias` under `vb`.
///
/// Returns the stack and its output dimension (`in_dim` if `layers`
/// is empty).
pub fn stack_relu_linear(
    in_dim: usize,
    layers: &[usize],
    vb: VarBuilder,
) -> Result<(StackLayers<Linear>, usize)> {
    let mut fc = StackLayers::<Linear>::new();
    let mut prev_dim = in_dim;
    for (j, &next_dim) in layers.iter().enumerate() {
        let _name = format!("{}", j);
        fc.push_with_act(
            candle_nn::linear(prev_dim, next_dim, vb.pp(_name))?,
            Activation::Relu,
        );
        prev_dim = next_dim;
    }
    Ok((fc, prev_dim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn relu_stack_reports_output_dim() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let (fc, out_dim) = stack_relu_linear(5, &[4, 3], vb.clone())?;
        assert_eq!((fc.len(), out_dim), (2, 3));

        let x = Tensor::randn(0f32, 1f32, (6, 5), &Device::Cpu)?;
        let y = fc.forward(&x)?;
        assert_eq!(y.dims(), &[6, 3]);
        assert!(y.flatten_all()?.to_vec1::<f32>()?.iter().all(|&v| v >= 0.));

        let (empty, same_dim) = stack_relu_linear(5, &[], vb.pp("empty"))?;
        assert!(empty.is_empty());
        assert_eq!(same_dim, 5);
        Ok(())
    }
}
