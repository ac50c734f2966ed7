use std::{num::NonZeroUsize, ops::Range};

use crate::{EngineErr, Result};

/// How a row-major `h_in × h_out` weight matrix is split into row shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPlan {
    h_in: usize,
    h_out: usize,
    factor: usize,
}

impl ShardPlan {
    /// Creates a new `ShardPlan`.
    ///
    /// # Arguments
    /// * `h_in` - The amount of rows of the weight matrix.
    /// * `h_out` - The amount of columns of the weight matrix.
    /// * `factor` - The amount of shards, must evenly divide `h_in`.
    ///
    /// # Returns
    /// The plan or a `ShardFactor` error.
    pub fn new(h_in: usize, h_out: usize, factor: NonZeroUsize) -> Result<Self> {
        let factor = factor.get();
        if h_in % factor != 0 {
            return Err(EngineErr::ShardFactor {
                h_in,
                shard_factor: factor,
            });
        }

        Ok(Self { h_in, h_out, factor })
    }

    /// Returns the amount of shards.
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Returns the amount of weight rows in each shard.
    pub fn rows_per_shard(&self) -> usize {
        self.h_in / self.factor
    }

    /// Returns the amount of elements in each shard.
    pub fn shard_len(&self) -> usize {
        self.rows_per_shard() * self.h_out
    }

    /// Returns the weight rows (and input features) covered by the `i`-th shard.
    pub fn rows(&self, i: usize) -> Range<usize> {
        let s = self.rows_per_shard();
        i * s..(i + 1) * s
    }

    /// Returns the flat element range of the `i`-th shard.
    pub fn elements(&self, i: usize) -> Range<usize> {
        let rows = self.rows(i);
        rows.start * self.h_out..rows.end * self.h_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(h_in: usize, h_out: usize, factor: usize) -> Result<ShardPlan> {
        ShardPlan::new(h_in, h_out, NonZeroUsize::new(factor).unwrap())
    }

    #[test]
    fn test_ranges_cover_matrix() {
        let plan = plan(4, 3, 2).unwrap();
        assert_eq!(plan.rows_per_shard(), 2);
        assert_eq!(plan.shard_len(), 6);
        assert_eq!(plan.rows(1), 2..4);
        assert_eq!(plan.elements(0), 0..6);
        assert_eq!(plan.elements(1), 6..12);
    }

    #[test]
    fn test_single_shard_is_whole_matrix() {
        let plan = plan(5, 2, 1).unwrap();
        assert_eq!(plan.elements(0), 0..10);
    }

    #[test]
    fn test_factor_must_divide_rows() {
        let err = plan(10, 3, 4).unwrap_err();
        assert!(matches!(
            err,
            EngineErr::ShardFactor {
                h_in: 10,
                shard_factor: 4
            }
        ));
        assert!(plan(3, 3, 4).is_err());
    }
}
