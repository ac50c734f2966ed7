use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use bytemuck::Pod;
use zeroize::{DefaultIsZeroes, Zeroize};

use super::MemPool;

/// An owned buffer taken from a `MemPool`.
///
/// The buffer is zeroized and its bytes are given back to the pool when dropped, so it's
/// released exactly once on every exit path.
pub struct PoolBuf<'p, T>
where
    T: Pod + DefaultIsZeroes,
{
    pool: &'p MemPool,
    data: Box<[T]>,
    bytes: usize,
}

impl<'p, T> PoolBuf<'p, T>
where
    T: Pod + DefaultIsZeroes,
{
    pub(super) fn new(pool: &'p MemPool, data: Box<[T]>, bytes: usize) -> Self {
        Self { pool, data, bytes }
    }

    /// Returns the pool this buffer was taken from.
    pub fn pool(&self) -> &'p MemPool {
        self.pool
    }

    /// Returns the raw bytes of the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

impl<T> Deref for PoolBuf<'_, T>
where
    T: Pod + DefaultIsZeroes,
{
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<T> DerefMut for PoolBuf<'_, T>
where
    T: Pod + DefaultIsZeroes,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl<T> fmt::Debug for PoolBuf<'_, T>
where
    T: Pod + DefaultIsZeroes,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuf")
            .field("len", &self.data.len())
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl<T> Drop for PoolBuf<'_, T>
where
    T: Pod + DefaultIsZeroes,
{
    fn drop(&mut self) {
        self.data.zeroize();
        self.pool.give_back(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_view_matches_elements() {
        let pool = MemPool::new(64);
        let buf = pool.alloc_copy(&[1f32, -2.]).unwrap();

        let bytes = buf.as_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1f32.to_ne_bytes());
        assert_eq!(&bytes[4..], &(-2f32).to_ne_bytes());
    }

    #[test]
    fn test_mutation_through_deref() {
        let pool = MemPool::new(64);
        let mut buf = pool.alloc::<f32>(3).unwrap();
        buf[1] = 7.;
        buf.iter_mut().for_each(|v| *v += 1.);
        assert_eq!(&*buf, &[1., 8., 1.]);
    }
}
