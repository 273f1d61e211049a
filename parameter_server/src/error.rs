use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use machine_learning::MlErr;

/// The result type of the parameter server.
pub type Result<T> = std::result::Result<T, MergeErr>;

/// Everything that can go wrong while serving merges.
#[derive(Debug)]
pub enum MergeErr {
    /// The request doesn't have the shape of the canonical state, nothing was applied.
    Shape(MlErr),
    /// The peer speaks another version of the protocol.
    VersionMismatch { got: u32, expected: u32 },
    /// The peer sent a message that makes no sense at this point of the conversation.
    Protocol(String),
    /// The service is shutting down.
    Closed,
    Io(io::Error),
}

impl Display for MergeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeErr::Shape(e) => write!(f, "rejected merge: {e}"),
            MergeErr::VersionMismatch { got, expected } => write!(
                f,
                "protocol version mismatch, got {got} and expected {expected}"
            ),
            MergeErr::Protocol(detail) => write!(f, "protocol error: {detail}"),
            MergeErr::Closed => f.write_str("merge service closed"),
            MergeErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MergeErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MergeErr::Shape(e) => Some(e),
            MergeErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MergeErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for MergeErr {
    fn from(value: MlErr) -> Self {
        Self::Shape(value)
    }
}

impl From<MergeErr> for io::Error {
    fn from(value: MergeErr) -> Self {
        match value {
            MergeErr::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}
