mod convergence;
mod error;
mod server;
mod service;

pub use convergence::{ConvergencePolicy, ConvergenceState};
pub use error::{MergeErr, Result};
pub use server::{MergeServer, ServiceHandle, handle_connection};
pub use service::MergeService;
