mod cost;
mod network;
pub mod neuron;
mod squashing;

pub use cost::CostFn;
pub use network::{LayeredNetwork, check_spec};
pub use neuron::{LayerParams, MaskSource, Neuron};
pub use squashing::Squashing;
