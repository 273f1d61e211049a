use std::{fmt, io};

use machine_learning::MlErr;
use worker::WorkerErr;

/// The node's result type.
pub type Result<T> = std::result::Result<T, NodeErr>;

/// All errors that can end a node's job.
#[derive(Debug)]
pub enum NodeErr {
    /// Invalid configuration, caught before training starts.
    Configuration(String),
    /// The merge service could not be bound.
    Bind { addr: String, source: io::Error },
    /// The model could not be loaded or initialized.
    Model(MlErr),
    /// A slave failed while training.
    Worker(WorkerErr),
    /// A peer's task panicked or was cancelled.
    Task(String),
    Io(io::Error),
}

impl fmt::Display for NodeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Bind { addr, source } => {
                write!(f, "could not bind merge service to {addr}: {source}")
            }
            Self::Model(e) => write!(f, "model error: {e}"),
            Self::Worker(e) => write!(f, "worker error: {e}"),
            Self::Task(msg) => write!(f, "peer task failed: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for NodeErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind { source, .. } => Some(source),
            Self::Model(e) => Some(e),
            Self::Worker(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NodeErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<MlErr> for NodeErr {
    fn from(e: MlErr) -> Self {
        Self::Model(e)
    }
}

impl From<WorkerErr> for NodeErr {
    fn from(e: WorkerErr) -> Self {
        Self::Worker(e)
    }
}

/// Boundary conversion for the binary.
impl From<NodeErr> for io::Error {
    fn from(value: NodeErr) -> Self {
        match value {
            NodeErr::Io(e) => e,
            NodeErr::Configuration(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            other => io::Error::other(other),
        }
    }
}
