mod host;
mod mac;

pub use host::HostBuffer;
pub use mac::{Mac, Tag};
