mod dense;
mod layer;
mod shard;

pub use dense::Dense;
pub use layer::{DeviceHint, Layer};
pub use shard::ShardPlan;
