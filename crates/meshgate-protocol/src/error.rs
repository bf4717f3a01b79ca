//! Error types for the command protocol.

use thiserror::Error;

/// Errors raised while authenticating a signed command line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The line has no `|` separator, so there is nothing to verify.
    #[error("no signature found")]
    NoSignature,

    /// The received signature does not match the computed HMAC.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// The pre-shared key cannot be used (for example, it is empty).
    #[error("invalid pre-shared key")]
    InvalidKey,
}

/// Errors raised while tokenizing a command or one of its arguments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A joiner identity that is neither `*` nor exactly 16 hex characters.
    #[error("invalid joiner identity: {0:?}")]
    InvalidIdentity(String),

    /// A verb was given fewer arguments than it requires.
    #[error("{verb}: missing argument <{argument}>")]
    MissingArgument {
        /// The command verb.
        verb: &'static str,
        /// Name of the first missing argument.
        argument: &'static str,
    },
}

/// Result type alias for protocol parsing.
pub type ParseResult<T> = Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParseError::MissingArgument { verb: "add", argument: "credential" };
        assert_eq!(err.to_string(), "add: missing argument <credential>");

        let err = ParseError::InvalidIdentity("00112233".into());
        assert!(err.to_string().contains("00112233"));

        assert_eq!(AuthError::NoSignature.to_string(), "no signature found");
    }
}
