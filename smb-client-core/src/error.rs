use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::nt_status::NTStatus;

/// Error type shared across the client crates.
///
/// Cloneable so a single connection-fatal error can be delivered to every
/// outstanding request promise.
#[derive(Debug, Clone)]
pub enum SMBError {
    IoError(Arc<std::io::Error>),
    ParseError(String),
    PayloadTooSmall(usize),
    CryptoError(String),
    ResponseError(String),
    TransportError(String),
    AuthenticationError { status: NTStatus, context: String },
    TimedOut(String),
    PreconditionFailed(String),
}

impl SMBError {
    pub fn io_error(error: std::io::Error) -> Self {
        Self::IoError(Arc::new(error))
    }

    pub fn parse_error<T: Into<String>>(message: T) -> Self {
        Self::ParseError(message.into())
    }

    pub fn crypto_error<T: Into<String>>(message: T) -> Self {
        Self::CryptoError(message.into())
    }

    pub fn response_error<T: Into<String>>(message: T) -> Self {
        Self::ResponseError(message.into())
    }

    pub fn transport_error<T: Into<String>>(message: T) -> Self {
        Self::TransportError(message.into())
    }

    pub fn auth_error<T: Into<String>>(status: NTStatus, context: T) -> Self {
        Self::AuthenticationError {
            status,
            context: context.into(),
        }
    }

    pub fn timed_out<T: Into<String>>(message: T) -> Self {
        Self::TimedOut(message.into())
    }

    pub fn precondition_failed<T: Into<String>>(message: T) -> Self {
        Self::PreconditionFailed(message.into())
    }
}

impl Display for SMBError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(x) => write!(f, "I/O operation failed: {}", x),
            Self::ParseError(x) => write!(f, "Parse failed with error: {}", x),
            Self::PayloadTooSmall(x) => write!(f, "Payload too small: {} bytes", x),
            Self::CryptoError(x) => write!(f, "Crypto operation failed with error: {}", x),
            Self::ResponseError(x) => write!(f, "Unexpected response: {}", x),
            Self::TransportError(x) => write!(f, "Transport failure: {}", x),
            Self::AuthenticationError { status, context } => {
                write!(
                    f,
                    "Authentication failed with status {:#010x}: {}",
                    *status as u32, context
                )
            }
            Self::TimedOut(x) => write!(f, "Operation timed out: {}", x),
            Self::PreconditionFailed(x) => {
                write!(f, "Operation failed with unmet precondition: {}", x)
            }
        }
    }
}

impl std::error::Error for SMBError {}

impl From<std::io::Error> for SMBError {
    fn from(error: std::io::Error) -> Self {
        Self::io_error(error)
    }
}
