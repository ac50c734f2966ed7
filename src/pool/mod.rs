mod buffer;
mod mem_pool;

pub use buffer::PoolBuf;
pub use mem_pool::{MemPool, PoolStats};
