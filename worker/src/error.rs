use std::{error::Error, fmt, io};

use machine_learning::MlErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Ml(MlErr),
    /// The local partition has no instances to train on.
    EmptyPartition,
    /// A line of the dataset could not be parsed.
    Data {
        line: usize,
        detail: String,
    },
    /// The merge service could not be reached.
    Connect {
        addr: String,
        attempts: usize,
        source: io::Error,
    },
    /// The merge service answered with an error.
    Rejected(String),
    UnexpectedMessage {
        round: u64,
        got: &'static str,
    },
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Ml(e) => write!(f, "model error: {e}"),
            WorkerErr::EmptyPartition => f.write_str("the input partition is empty"),
            WorkerErr::Data { line, detail } => write!(f, "invalid dataset line {line}: {detail}"),
            WorkerErr::Connect {
                addr,
                attempts,
                source,
            } => write!(
                f,
                "could not connect to {addr} after {attempts} attempts: {source}"
            ),
            WorkerErr::Rejected(detail) => write!(f, "merge rejected: {detail}"),
            WorkerErr::UnexpectedMessage { round, got } => {
                write!(f, "unexpected message at round {round}: got {got}")
            }
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Ml(e) => Some(e),
            WorkerErr::Connect { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
