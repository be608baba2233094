use crate::dtype::DType;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    DTypeMismatch {
        expected: DType,
        got: DType,
    },
    UnsupportedDType(DType),
    UnsupportedOp(String),
    InvalidArgument(String),
    InvalidDevice(String),
    IncompatibleShape(String),
    InvalidShape {
        message: String,
    },
    DimensionOutOfBounds {
        dim: usize,
        ndim: usize,
    },
    IndexOutOfBounds {
        index: isize,
        size: usize,
    },
    // gradient engine
    GradKeyFinalized,
    SecondOrderGrad,
    TensorGradCountMismatch {
        tensors: usize,
        grads: usize,
    },
    CallbackAlreadySet,
    NullGradient,
    InvalidState(String),
    //
    Internal {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DTypeMismatch { expected, got } => {
                write!(f, "DType mismatch: expected {:?}, got {:?}", expected, got)
            }
            Self::UnsupportedDType(dtype) => write!(f, "Unsupported data type: {}", dtype),
            Self::UnsupportedOp(msg) => write!(f, "Unsupported operation: {}", msg),
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Self::InvalidDevice(msg) => write!(f, "Invalid device: {}", msg),
            Self::IncompatibleShape(msg) => write!(f, "Incompatible shape: {}", msg),
            Self::InvalidShape { message } => {
                write!(f, "Invalid shape: {}", message)
            }
            Self::DimensionOutOfBounds { dim, ndim } => {
                write!(
                    f,
                    "Dimension out of bounds: dimension {} is not valid for tensor with {} dimensions",
                    dim, ndim
                )
            }
            Self::IndexOutOfBounds { index, size } => {
                write!(f, "Index out of bounds: index {} is out of bounds for axis with size {}", index, size)
            }

            Self::GradKeyFinalized => write!(f, "Grad key already finalized"),
            Self::SecondOrderGrad => {
                write!(f, "Second order gradient is not supported unless higher order is enabled")
            }
            Self::TensorGradCountMismatch { tensors, grads } => {
                write!(f, "Got {} tensors but {} gradients", tensors, grads)
            }
            Self::CallbackAlreadySet => write!(f, "Callback already set on this tensor"),
            Self::NullGradient => write!(f, "Gradient is partially null"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {}", msg),

            Self::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for Error {}
