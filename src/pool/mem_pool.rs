use std::mem;

use bytemuck::Pod;
use log::warn;
use parking_lot::Mutex;
use zeroize::DefaultIsZeroes;

use super::PoolBuf;
use crate::{EngineConfig, EngineErr, Result};

/// A snapshot of the arena's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total bytes the arena may hand out.
    pub capacity: usize,
    /// Bytes currently held by live buffers.
    pub in_use: usize,
    /// The largest `in_use` value observed.
    pub peak: usize,
    /// Amount of live buffers.
    pub live: usize,
}

/// The bounded arena every tensor buffer inside the enclave is taken from.
///
/// Buffers are handed out as `PoolBuf` handles which give their bytes back when dropped, so
/// the arena only keeps the accounting.
#[derive(Debug)]
pub struct MemPool {
    stats: Mutex<PoolStats>,
}

impl MemPool {
    /// Creates a new `MemPool`.
    ///
    /// # Arguments
    /// * `capacity` - The size of the arena in bytes.
    ///
    /// # Returns
    /// A new `MemPool` instance.
    pub fn new(capacity: usize) -> Self {
        Self {
            stats: Mutex::new(PoolStats {
                capacity,
                ..Default::default()
            }),
        }
    }

    /// Creates a new `MemPool` sized after `config.pool_capacity`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.pool_capacity)
    }

    /// Allocates a zeroed buffer of `count` elements.
    ///
    /// # Arguments
    /// * `count` - The amount of elements.
    ///
    /// # Returns
    /// The buffer or `OutOfMemory` if the arena can't hold it.
    pub fn alloc<T>(&self, count: usize) -> Result<PoolBuf<'_, T>>
    where
        T: Pod + DefaultIsZeroes,
    {
        let bytes = self.reserve::<T>(count)?;
        Ok(PoolBuf::new(self, vec![T::zeroed(); count].into_boxed_slice(), bytes))
    }

    /// Allocates a buffer and copies `src` into it.
    ///
    /// # Arguments
    /// * `src` - The data to copy into the arena.
    ///
    /// # Returns
    /// The buffer or `OutOfMemory` if the arena can't hold it.
    pub fn alloc_copy<T>(&self, src: &[T]) -> Result<PoolBuf<'_, T>>
    where
        T: Pod + DefaultIsZeroes,
    {
        let bytes = self.reserve::<T>(src.len())?;
        Ok(PoolBuf::new(self, Box::from(src), bytes))
    }

    /// Gives a buffer back to the arena.
    ///
    /// Equivalent to dropping it, spelled out for call sites where the release point matters.
    pub fn release<T>(&self, buf: PoolBuf<'_, T>)
    where
        T: Pod + DefaultIsZeroes,
    {
        debug_assert!(std::ptr::eq(buf.pool(), self), "released a foreign buffer");
        drop(buf);
    }

    /// Returns the current bookkeeping.
    pub fn stats(&self) -> PoolStats {
        *self.stats.lock()
    }

    /// Returns the amount of bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.stats.lock().in_use
    }

    /// Returns the amount of bytes still available.
    pub fn available(&self) -> usize {
        let stats = self.stats.lock();
        stats.capacity - stats.in_use
    }

    fn reserve<T>(&self, count: usize) -> Result<usize> {
        let mut stats = self.stats.lock();
        let available = stats.capacity - stats.in_use;

        let bytes = match count.checked_mul(mem::size_of::<T>()) {
            Some(bytes) if bytes <= available => bytes,
            requested => {
                let requested = requested.unwrap_or(usize::MAX);
                warn!(requested = requested, available = available; "enclave pool exhausted");
                return Err(EngineErr::OutOfMemory {
                    requested,
                    available,
                });
            }
        };

        stats.in_use += bytes;
        stats.peak = stats.peak.max(stats.in_use);
        stats.live += 1;
        Ok(bytes)
    }

    pub(super) fn give_back(&self, bytes: usize) {
        let mut stats = self.stats.lock();
        stats.in_use -= bytes;
        stats.live -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_alloc_is_zeroed_and_accounted() {
        let pool = MemPool::new(1024);
        let buf = pool.alloc::<f32>(16).unwrap();

        assert!(buf.iter().all(|&v| v == 0.));
        assert_eq!(pool.in_use(), 64);
        assert_eq!(pool.stats().live, 1);

        pool.release(buf);
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.live, 0);
        assert_eq!(stats.peak, 64);
    }

    #[test]
    fn test_exhaustion_reports_out_of_memory() {
        let pool = MemPool::new(32);
        let _held = pool.alloc::<f32>(6).unwrap();

        let err = pool.alloc::<f32>(4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
        assert!(matches!(
            err,
            EngineErr::OutOfMemory {
                requested: 16,
                available: 8
            }
        ));
        assert_eq!(pool.in_use(), 24);
    }

    #[test]
    fn test_overflowing_request_fails() {
        let pool = MemPool::new(32);
        assert!(pool.alloc::<f64>(usize::MAX).is_err());
        assert_eq!(pool.stats().live, 0);
    }

    #[test]
    fn test_drop_returns_bytes_on_every_path() {
        let pool = MemPool::new(256);

        let attempt = || -> Result<()> {
            let _a = pool.alloc_copy(&[1f32, 2., 3.])?;
            let _b = pool.alloc::<u8>(512)?;
            Ok(())
        };

        assert!(attempt().is_err());
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 256);
    }

    #[test]
    fn test_alloc_copy_preserves_contents() {
        let pool = MemPool::new(64);
        let buf = pool.alloc_copy(&[1u32, 2, 3]).unwrap();
        assert_eq!(&*buf, &[1, 2, 3]);
        assert_eq!(pool.in_use(), 12);
    }
}
