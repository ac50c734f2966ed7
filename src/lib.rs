//! Sharded, integrity-verified fully connected layers for enclave execution.
//!
//! Every tensor lives in a bounded `MemPool`. Weight matrices too large for the pool stay in
//! untrusted host memory (`HostBuffer`) and are streamed in MAC-authenticated row shards.

pub mod config;
pub mod error;
pub mod integrity;
pub mod layers;
pub mod pool;
mod tensor;

pub use config::{EngineConfig, ShardingPolicy};
pub use error::{EngineErr, ErrorKind, Result};
pub use integrity::{HostBuffer, Mac, Tag};
pub use layers::{Dense, DeviceHint, Layer, ShardPlan};
pub use pool::{MemPool, PoolBuf, PoolStats};
pub use tensor::{Input, Shape4, Tensor};
