use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        index: usize,
        got: (usize, usize),
        expected: (usize, usize),
    },
    InvalidSpec(String),
    InvalidModel(String),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch in {what}, got {got} and expected {expected}"),
            MlErr::ShapeMismatch {
                index,
                got,
                expected,
            } => write!(
                f,
                "matrix {index} has shape {}x{}, expected {}x{}",
                got.0, got.1, expected.0, expected.1
            ),
            MlErr::InvalidSpec(detail) => write!(f, "invalid network spec: {detail}"),
            MlErr::InvalidModel(detail) => write!(f, "invalid model file: {detail}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
