pub mod arch;
pub mod error;
pub mod matrices;
pub mod store;

pub use error::{MlErr, Result};
pub use store::Model;
