//! Error types for the gateway core.

use std::fmt;
use std::time::Duration;

use meshgate_protocol::{AuthError, ParseError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::platform::StoreError;

/// Numeric error codes reported by the mesh stack.
///
/// Values follow the stack's own numbering so they can be echoed to the host
/// unchanged in `ERROR ... <code>` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackErrorCode {
    /// Operation failed for an unspecified reason.
    Failed,
    /// Message was dropped.
    Drop,
    /// Insufficient buffers.
    NoBufs,
    /// No route available.
    NoRoute,
    /// Service is busy and could not service the operation.
    Busy,
    /// Failed to parse message.
    Parse,
    /// Input arguments are invalid.
    InvalidArgs,
    /// Security checks failed.
    Security,
    /// Functionality not implemented.
    NotImplemented,
    /// Cannot complete due to invalid state.
    InvalidState,
    /// The requested item could not be found.
    NotFound,
    /// The operation is already in progress, or the state is already set.
    Already,
    /// Operation prevented by device capabilities.
    NotCapable,
    /// Response timed out.
    ResponseTimeout,
    /// Request rejected.
    Rejected,
    /// A code this crate has no name for.
    Other(u8),
}

impl StackErrorCode {
    /// The numeric code as the stack reports it.
    pub fn code(&self) -> u8 {
        match self {
            StackErrorCode::Failed => 1,
            StackErrorCode::Drop => 2,
            StackErrorCode::NoBufs => 3,
            StackErrorCode::NoRoute => 4,
            StackErrorCode::Busy => 5,
            StackErrorCode::Parse => 6,
            StackErrorCode::InvalidArgs => 7,
            StackErrorCode::Security => 8,
            StackErrorCode::NotImplemented => 12,
            StackErrorCode::InvalidState => 13,
            StackErrorCode::NotFound => 23,
            StackErrorCode::Already => 24,
            StackErrorCode::NotCapable => 27,
            StackErrorCode::ResponseTimeout => 28,
            StackErrorCode::Rejected => 37,
            StackErrorCode::Other(code) => *code,
        }
    }

    /// Map a numeric stack code back to a named variant.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => StackErrorCode::Failed,
            2 => StackErrorCode::Drop,
            3 => StackErrorCode::NoBufs,
            4 => StackErrorCode::NoRoute,
            5 => StackErrorCode::Busy,
            6 => StackErrorCode::Parse,
            7 => StackErrorCode::InvalidArgs,
            8 => StackErrorCode::Security,
            12 => StackErrorCode::NotImplemented,
            13 => StackErrorCode::InvalidState,
            23 => StackErrorCode::NotFound,
            24 => StackErrorCode::Already,
            27 => StackErrorCode::NotCapable,
            28 => StackErrorCode::ResponseTimeout,
            37 => StackErrorCode::Rejected,
            other => StackErrorCode::Other(other),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            StackErrorCode::Failed => "failed",
            StackErrorCode::Drop => "dropped",
            StackErrorCode::NoBufs => "no buffers",
            StackErrorCode::NoRoute => "no route",
            StackErrorCode::Busy => "busy",
            StackErrorCode::Parse => "parse failure",
            StackErrorCode::InvalidArgs => "invalid arguments",
            StackErrorCode::Security => "security check failed",
            StackErrorCode::NotImplemented => "not implemented",
            StackErrorCode::InvalidState => "invalid state",
            StackErrorCode::NotFound => "not found",
            StackErrorCode::Already => "already",
            StackErrorCode::NotCapable => "not capable",
            StackErrorCode::ResponseTimeout => "response timeout",
            StackErrorCode::Rejected => "rejected",
            StackErrorCode::Other(_) => "unknown error",
        }
    }
}

impl fmt::Display for StackErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// A mesh stack operation returned a failure code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{operation} failed: {code}")]
pub struct StackError {
    /// The stack call that failed.
    pub operation: &'static str,
    /// The code the stack returned.
    pub code: StackErrorCode,
}

impl StackError {
    /// Create a stack error for the named operation.
    pub fn new(operation: &'static str, code: StackErrorCode) -> Self {
        StackError { operation, code }
    }
}

/// The stack lock could not be acquired within its bound.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("stack lock busy: {operation} gave up after {timeout:?}")]
pub struct BusyError {
    /// What the caller wanted the lock for.
    pub operation: &'static str,
    /// How long the caller waited.
    pub timeout: Duration,
}

/// Bootstrap failed in a way only a device restart can fix.
#[derive(Debug, Error)]
pub enum FatalInitError {
    /// The persistent store could not be initialized, even after an erase.
    #[error("persistent store init failed: {0}")]
    Store(#[from] StoreError),

    /// The gateway could not be assembled from its configuration.
    #[error("gateway setup failed: {0}")]
    Setup(String),
}

/// Top-level error for gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A command or one of its arguments was malformed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A signed command failed authentication.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The stack lock was not acquired in time.
    #[error(transparent)]
    Busy(#[from] BusyError),

    /// The mesh stack rejected an operation.
    #[error(transparent)]
    Stack(#[from] StackError),

    /// The persistent store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Bootstrap failed.
    #[error(transparent)]
    FatalInit(#[from] FatalInitError),
}

impl GatewayError {
    /// The numeric code reported to the host for this failure.
    ///
    /// Lock timeouts report the stack's "busy" code and malformed arguments
    /// its "invalid arguments" code, so the host sees one numbering scheme.
    pub fn code(&self) -> u8 {
        match self {
            GatewayError::Parse(_) => StackErrorCode::InvalidArgs.code(),
            GatewayError::Busy(_) => StackErrorCode::Busy.code(),
            GatewayError::Stack(e) => e.code.code(),
            GatewayError::Auth(_) => StackErrorCode::Security.code(),
            GatewayError::Store(_) | GatewayError::Config(_) | GatewayError::FatalInit(_) => {
                StackErrorCode::Failed.code()
            }
        }
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
