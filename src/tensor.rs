use ndarray::{ArrayView2, ArrayViewMut2};

use crate::{EngineErr, MemPool, PoolBuf, Result};

/// A 4-dimensional tensor shape.
pub type Shape4 = [usize; 4];

/// A 4-dimensional `f32` tensor backed by a pool buffer.
#[derive(Debug)]
pub struct Tensor<'p> {
    data: PoolBuf<'p, f32>,
    shape: Shape4,
}

impl<'p> Tensor<'p> {
    /// Creates a new `Tensor` over an existing buffer.
    ///
    /// # Arguments
    /// * `data` - The backing buffer, its length must be the product of `shape`.
    /// * `shape` - The tensor's extents.
    ///
    /// # Returns
    /// The tensor or a `SizeMismatch` error.
    pub fn new(data: PoolBuf<'p, f32>, shape: Shape4) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or(EngineErr::InvalidInput {
                what: "tensor shape",
                got: usize::MAX,
                expected: data.len(),
            })?;

        if data.len() != expected {
            return Err(EngineErr::SizeMismatch {
                what: "tensor data",
                got: data.len(),
                expected,
            });
        }

        Ok(Self { data, shape })
    }

    /// Copies `data` into `pool` and wraps it in a tensor.
    pub fn from_slice(pool: &'p MemPool, shape: Shape4, data: &[f32]) -> Result<Self> {
        Self::new(pool.alloc_copy(data)?, shape)
    }

    /// Returns the tensor's extents.
    pub fn shape(&self) -> Shape4 {
        self.shape
    }

    /// Returns the logical batch size.
    ///
    /// Flattened activations come as `{1, 1, batch, features}` while batch-major ones come as
    /// `{batch, ...}`.
    pub fn batch(&self) -> usize {
        match self.shape {
            [1, 1, batch, _] => batch,
            [batch, ..] => batch,
        }
    }

    /// Returns the elements of the tensor.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Takes the backing buffer out of the tensor.
    pub fn into_buffer(self) -> PoolBuf<'p, f32> {
        self.data
    }

    /// Views the tensor as a `batch × cols` row-major matrix.
    ///
    /// # Returns
    /// The view or an `InvalidInput` error if the tensor doesn't hold `batch * cols` elements.
    pub fn matrix(&self, cols: usize) -> Result<ArrayView2<'_, f32>> {
        let rows = self.rows_for(cols)?;
        Ok(ArrayView2::from_shape((rows, cols), &self.data[..])?)
    }

    /// Mutable counterpart of `matrix`.
    pub fn matrix_mut(&mut self, cols: usize) -> Result<ArrayViewMut2<'_, f32>> {
        let rows = self.rows_for(cols)?;
        Ok(ArrayViewMut2::from_shape((rows, cols), &mut self.data[..])?)
    }

    fn rows_for(&self, cols: usize) -> Result<usize> {
        let rows = self.batch();
        let expected = rows * cols;

        if rows == 0 || self.data.len() != expected {
            return Err(EngineErr::InvalidInput {
                what: "tensor extent",
                got: self.data.len(),
                expected,
            });
        }

        Ok(rows)
    }
}

/// A tensor handed to a layer, either owned by the callee or still owned by the caller.
#[derive(Debug)]
pub enum Input<'t, 'p> {
    /// The layer takes ownership and releases the buffer once it's consumed.
    Release(Tensor<'p>),
    /// The caller keeps ownership of the buffer.
    Retain(&'t Tensor<'p>),
}

impl<'p> Input<'_, 'p> {
    /// Returns the tensor regardless of who owns it.
    pub fn tensor(&self) -> &Tensor<'p> {
        match self {
            Input::Release(t) => t,
            Input::Retain(t) => t,
        }
    }

    /// Returns whether the callee is responsible for releasing the buffer.
    pub fn releases(&self) -> bool {
        matches!(self, Input::Release(_))
    }
}

impl<'p> From<Tensor<'p>> for Input<'_, 'p> {
    fn from(value: Tensor<'p>) -> Self {
        Input::Release(value)
    }
}

impl<'t, 'p> From<&'t Tensor<'p>> for Input<'t, 'p> {
    fn from(value: &'t Tensor<'p>) -> Self {
        Input::Retain(value)
    }
}
