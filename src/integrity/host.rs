use std::{fmt, ops::Range, sync::Arc};

use parking_lot::RwLock;

use crate::{EngineErr, Result};

/// A handle to a buffer living in untrusted host memory.
///
/// Clones share the same memory. Nothing read from it is trusted until it's copied into the
/// enclave and authenticated.
#[derive(Clone)]
pub struct HostBuffer {
    data: Arc<RwLock<Box<[f32]>>>,
}

impl HostBuffer {
    /// Creates a new `HostBuffer` holding `data`.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data.into_boxed_slice())),
        }
    }

    /// Returns the amount of elements in the buffer.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns whether the buffer has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the elements in `range` into `out`.
    ///
    /// # Arguments
    /// * `range` - The element range to read.
    /// * `out` - A mutable slice of the same length as `range`.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `range` is out of bounds or doesn't fit `out`.
    pub fn copy_range(&self, range: Range<usize>, out: &mut [f32]) -> Result<()> {
        let data = self.data.read();

        if range.end > data.len() || range.start > range.end {
            return Err(EngineErr::SizeMismatch {
                what: "host buffer range",
                got: range.end,
                expected: data.len(),
            });
        }

        if range.len() != out.len() {
            return Err(EngineErr::SizeMismatch {
                what: "host buffer destination",
                got: out.len(),
                expected: range.len(),
            });
        }

        out.copy_from_slice(&data[range]);
        Ok(())
    }

    /// Returns a copy of the whole buffer.
    pub fn snapshot(&self) -> Vec<f32> {
        self.data.read().to_vec()
    }

    /// Gives the host mutable access to the buffer.
    pub fn write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut [f32]) -> R,
    {
        f(&mut self.data.write())
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer").field("len", &self.len()).finish()
    }
}
