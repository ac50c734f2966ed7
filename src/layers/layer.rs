use crate::{Input, Result, Shape4, Tensor};

/// Ordinal of an accelerator the caller may offload work to.
///
/// Layers that run entirely inside the enclave ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHint(pub usize);

/// The contract every layer executed inside the enclave fulfills.
///
/// All tensors are taken from the same `MemPool` the layer was built with, tied by `'p`.
pub trait Layer<'p> {
    /// Returns the diagnostic name of the layer.
    fn name(&self) -> &str;

    /// Returns the shape of the last produced output.
    fn output_shape(&self) -> Shape4;

    /// Returns the amount of output features per batch row.
    fn output_size(&self) -> usize;

    /// Returns the amount of linear transforms the layer performs.
    fn num_linear(&self) -> usize {
        0
    }

    /// Makes a forward pass through the layer.
    ///
    /// # Arguments
    /// * `input` - The input tensor, released by the layer once consumed if it's owned.
    /// * `device` - An optional offload hint.
    ///
    /// # Returns
    /// A fresh output tensor owned by the caller, or an error if occurred.
    fn forward(&mut self, input: Input<'_, 'p>, device: Option<DeviceHint>) -> Result<Tensor<'p>>;

    /// Propagates `grad` back through the layer and updates its parameters.
    ///
    /// # Arguments
    /// * `input` - The input of the matching forward pass.
    /// * `grad` - The gradient of the loss with respect to this layer's output, released by
    ///   the layer.
    /// * `learning_rate` - The step size of the update.
    ///
    /// # Returns
    /// The gradient with respect to this layer's input, owned by the caller.
    fn backward(
        &mut self,
        input: &Tensor<'p>,
        grad: Tensor<'p>,
        learning_rate: f32,
    ) -> Result<Tensor<'p>>;
}
