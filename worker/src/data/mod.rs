mod csv;
mod partition;
mod shard;

pub use csv::{load_csv, parse_csv};
pub use partition::{Dataset, InstanceSource, Partition};
pub use shard::shard_range;
