mod accumulator;
pub mod data;
pub mod error;
pub mod net;

pub use accumulator::GradientAccumulator;
pub use data::{Dataset, InstanceSource, Partition};
pub use error::{Result, WorkerErr};
pub use net::MergeClient;
